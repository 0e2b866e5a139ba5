//! Parsers for the line-oriented messages a serial GPS/compass device sends.
//!
//! Four kinds of line are understood:
//!
//! - NMEA `RMC`: position fix, or "no fix" when the status field is `V`
//! - NMEA `HDT` / `HDG`: compass heading, clockwise from north
//! - `+ORNT:<alpha>,<beta>,<gamma>[,<compass>]`: a device-orientation event;
//!   the optional fourth field is an absolute compass heading, preferred
//!   over `alpha` when the device provides it
//! - `+GERR:<text>`: the position sensor reporting an error
//!
//! NMEA checksums (`*hh`) are verified when present.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while_m_n},
    character::complete::{char, one_of},
    combinator::{map, map_res, opt, rest, verify},
    error::{Error, ErrorKind},
    number::complete::double,
    sequence::{preceded, tuple},
    Finish, IResult,
};

use crate::geodesy::GeoPoint;
use crate::sensor_data_manager::{OrientationSample, SensorEvent};

use std::str::FromStr;

/// One decoded line from a sensor device.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorMessage {
    /// A valid position fix
    Fix(GeoPoint),
    /// The receiver is alive but has no fix yet
    NoFix,
    /// A compass heading, degrees clockwise from north
    Heading(f64),
    /// A device-orientation event
    Orientation {
        alpha: f64,
        beta: f64,
        gamma: f64,
        compass: Option<f64>,
    },
    /// The position sensor reported an error
    Fault(String),
}

impl SensorMessage {
    /// Converts the message into what the guidance loop consumes. A missing
    /// fix carries no information and yields `None`.
    pub fn into_event(self) -> Option<SensorEvent> {
        match self {
            SensorMessage::Fix(point) => Some(SensorEvent::Position(point)),
            SensorMessage::NoFix => None,
            SensorMessage::Heading(h) => {
                Some(SensorEvent::Orientation(OrientationSample::Compass(h)))
            }
            SensorMessage::Orientation {
                alpha, compass, ..
            } => Some(SensorEvent::Orientation(match compass {
                Some(h) => OrientationSample::Compass(h),
                None => OrientationSample::Alpha(alpha),
            })),
            SensorMessage::Fault(msg) => Some(SensorEvent::PositionError(msg)),
        }
    }
}

fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

fn parse_hex_byte(s: &str) -> IResult<&str, u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |h: &str| u8::from_str_radix(h, 16),
    )(s)
}

fn parse_talker(s: &str) -> IResult<&str, &str> {
    take_while_m_n(2, 2, |c: char| c.is_ascii_uppercase())(s)
}

fn parse_field(s: &str) -> IResult<&str, &str> {
    take_till(|c| c == ',')(s)
}

/// NMEA packs coordinates as `dddmm.mmmm`.
fn nmea_to_degrees(packed: f64, negative: bool) -> f64 {
    let degrees = (packed / 100.0).trunc();
    let value = degrees + (packed - degrees * 100.0) / 60.0;
    if negative {
        -value
    } else {
        value
    }
}

fn finite_double(s: &str) -> IResult<&str, f64> {
    verify(double, |v: &f64| v.is_finite())(s)
}

fn parse_latitude(s: &str) -> IResult<&str, f64> {
    map(
        tuple((finite_double, char(','), one_of("NS"))),
        |(packed, _, hemisphere)| nmea_to_degrees(packed, hemisphere == 'S'),
    )(s)
}

fn parse_longitude(s: &str) -> IResult<&str, f64> {
    map(
        tuple((finite_double, char(','), one_of("EW"))),
        |(packed, _, hemisphere)| nmea_to_degrees(packed, hemisphere == 'W'),
    )(s)
}

fn parse_rmc(s: &str) -> IResult<&str, SensorMessage> {
    preceded(
        tuple((parse_talker, tag("RMC,"), parse_field, char(','))),
        alt((
            map(
                preceded(
                    tag("A,"),
                    tuple((parse_latitude, preceded(char(','), parse_longitude))),
                ),
                |(latitude, longitude)| SensorMessage::Fix(GeoPoint::new(latitude, longitude)),
            ),
            map(char('V'), |_| SensorMessage::NoFix),
        )),
    )(s)
}

fn parse_heading_sentence(s: &str) -> IResult<&str, SensorMessage> {
    map(
        preceded(tuple((parse_talker, alt((tag("HDT,"), tag("HDG,"))))), double),
        SensorMessage::Heading,
    )(s)
}

fn parse_nmea(s: &str) -> IResult<&str, SensorMessage> {
    let (remaining, (body, checksum)) = preceded(
        char('$'),
        tuple((
            take_till(|c| c == '*'),
            opt(preceded(char('*'), parse_hex_byte)),
        )),
    )(s)?;

    if let Some(expected) = checksum {
        if nmea_checksum(body) != expected {
            return Err(nom::Err::Failure(Error::new(s, ErrorKind::Verify)));
        }
    }

    let (_, message) = alt((parse_rmc, parse_heading_sentence))(body)?;
    Ok((remaining, message))
}

fn parse_orientation(s: &str) -> IResult<&str, SensorMessage> {
    map(
        preceded(
            tag("+ORNT:"),
            tuple((
                double,
                preceded(char(','), double),
                preceded(char(','), double),
                opt(preceded(char(','), double)),
            )),
        ),
        |(alpha, beta, gamma, compass)| SensorMessage::Orientation {
            alpha,
            beta,
            gamma,
            compass,
        },
    )(s)
}

fn parse_fault(s: &str) -> IResult<&str, SensorMessage> {
    map(preceded(tag("+GERR:"), rest), |text: &str| {
        SensorMessage::Fault(text.trim().to_owned())
    })(s)
}

fn parse_sensor_message(s: &str) -> IResult<&str, SensorMessage> {
    alt((parse_nmea, parse_orientation, parse_fault))(s)
}

impl FromStr for SensorMessage {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_sensor_message(s.trim()).finish() {
            Ok((_remaining, message)) => Ok(message),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn rmc_with_fix() {
        let s = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        match s.parse::<SensorMessage>().unwrap() {
            SensorMessage::Fix(p) => {
                assert!(close(p.latitude, 48.1173), "{p}");
                assert!(close(p.longitude, 11.0 + 31.0 / 60.0), "{p}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rmc_southern_western_hemisphere() {
        let (_, msg) = parse_sensor_message("$GNRMC,000000,A,3356.000,S,01828.000,W,,,,,").unwrap();
        assert_eq!(
            msg,
            SensorMessage::Fix(GeoPoint::new(-(33.0 + 56.0 / 60.0), -(18.0 + 28.0 / 60.0)))
        );
    }

    #[test]
    fn rmc_with_non_numeric_coordinates_is_rejected() {
        assert!("$GPRMC,015540,A,nan,N,nan,E,0.0,0.0,161026,,"
            .parse::<SensorMessage>()
            .is_err());
        assert!("$GPRMC,015540,A,3316.800,N,inf,E,0.0,0.0,161026,,"
            .parse::<SensorMessage>()
            .is_err());
    }

    #[test]
    fn rmc_without_fix() {
        let s = "$GNRMC,081836,V,,,,,,,130998,,*21\r\n";
        assert_eq!(s.parse::<SensorMessage>().unwrap(), SensorMessage::NoFix);
        assert_eq!(SensorMessage::NoFix.into_event(), None);
    }

    #[test]
    fn rmc_near_beppu() {
        let s = "$GPRMC,015540,A,3316.800,N,13130.000,E,0.0,0.0,161026,,*15";
        let msg: SensorMessage = s.parse().unwrap();
        let SensorMessage::Fix(p) = msg else {
            panic!("expected a fix");
        };
        assert!(close(p.latitude, 33.28));
        assert!(close(p.longitude, 131.5));
    }

    #[test]
    fn heading_sentences() {
        assert_eq!(
            "$HEHDT,274.07,T*19".parse::<SensorMessage>().unwrap(),
            SensorMessage::Heading(274.07)
        );
        assert_eq!(
            "$HCHDG,98.3,0.0,E,12.6,W*57".parse::<SensorMessage>().unwrap(),
            SensorMessage::Heading(98.3)
        );
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let err = "$HEHDT,274.07,T*20".parse::<SensorMessage>().unwrap_err();
        assert_eq!(err.code, ErrorKind::Verify);
    }

    #[test]
    fn orientation_prefers_compass_field() {
        let with_compass: SensorMessage = "+ORNT:90.0,1.5,-2.0,45.5".parse().unwrap();
        assert_eq!(
            with_compass.into_event(),
            Some(SensorEvent::Orientation(OrientationSample::Compass(45.5)))
        );

        let alpha_only: SensorMessage = "+ORNT:90.0,1.5,-2.0".parse().unwrap();
        assert_eq!(
            alpha_only.into_event(),
            Some(SensorEvent::Orientation(OrientationSample::Alpha(90.0)))
        );
    }

    #[test]
    fn fault_line() {
        let msg: SensorMessage = "+GERR: timeout expired".parse().unwrap();
        assert_eq!(
            msg.into_event(),
            Some(SensorEvent::PositionError("timeout expired".to_owned()))
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!("hello".parse::<SensorMessage>().is_err());
        assert!("$GPGSV,1,1,00".parse::<SensorMessage>().is_err());
        assert!("+ORNT:abc".parse::<SensorMessage>().is_err());
    }
}
