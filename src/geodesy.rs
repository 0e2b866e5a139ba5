//! Great-circle helpers for the guidance pipeline. Everything in here is a
//! pure function of its inputs, working in degrees and meters on a
//! spherical Earth (no datum correction).

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Mean Earth radius used by every computation in this module, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Compass angle in degrees, clockwise from north.
pub type Degree = f64;

/// A latitude/longitude pair in degrees.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Makes a new [`GeoPoint`] from a latitude and a longitude, in degrees.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both coordinates are ordinary numbers.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

impl Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Wraps any angle into `[0, 360)`.
pub fn normalize_degrees(angle: Degree) -> Degree {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wraps any angle into `(-180, 180]`.
pub fn wrap_signed(angle: Degree) -> Degree {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// The shortest signed turn, in `(-180, 180]`, that takes `heading` onto
/// `bearing`. Positive means the target lies clockwise (to the right).
///
/// Non-finite input (for instance the bearing between two identical points
/// on a platform that reports NaN) is treated as zero error.
pub fn angular_error(heading: Degree, bearing: Degree) -> Degree {
    let error = wrap_signed(bearing - heading);
    if error.is_finite() {
        error
    } else {
        0.0
    }
}

/// Initial great-circle bearing from `from` to `to`, in `[0, 360)`.
///
/// Uses the spherical forward azimuth. NaN coordinates propagate as NaN.
pub fn bearing(from: GeoPoint, to: GeoPoint) -> Degree {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let d_lambda = (to.longitude - from.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Haversine great-circle distance between two points, in meters.
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// The point reached by travelling `meters` along the great circle leaving
/// `from` at `heading`.
pub fn destination_point(from: GeoPoint, heading: Degree, meters: f64) -> GeoPoint {
    let delta = meters / EARTH_RADIUS_M;
    let theta = heading.to_radians();
    let phi1 = from.latitude.to_radians();
    let lambda1 = from.longitude.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    GeoPoint {
        latitude: phi2.to_degrees(),
        longitude: wrap_signed(lambda2.to_degrees()),
    }
}

/// Flat east/north offset of `point` from `origin`, in meters. Only good
/// for the few-kilometer spans a walk covers; used for plotting.
pub fn local_offset(origin: GeoPoint, point: GeoPoint) -> (f64, f64) {
    let mean_lat = ((origin.latitude + point.latitude) / 2.0).to_radians();
    let east = (point.longitude - origin.longitude).to_radians() * mean_lat.cos() * EARTH_RADIUS_M;
    let north = (point.latitude - origin.latitude).to_radians() * EARTH_RADIUS_M;
    (east, north)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEPPU: GeoPoint = GeoPoint::new(33.2800, 131.5000);
    const ONSEN: GeoPoint = GeoPoint::new(33.2820, 131.5064);

    #[test]
    fn bearing_to_self_is_defined() {
        let b = bearing(BEPPU, BEPPU);
        assert!(b.is_finite());
        assert!((0.0..360.0).contains(&b));
    }

    #[test]
    fn distance_to_self_is_zero() {
        assert_eq!(distance(BEPPU, BEPPU), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let there = distance(BEPPU, ONSEN);
        let back = distance(ONSEN, BEPPU);
        assert!((there - back).abs() < 1e-6);
        // about 630 m between the two
        assert!(there > 600.0 && there < 660.0, "{there}");
    }

    #[test]
    fn due_east_along_equator() {
        let b = bearing(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert!((b - 90.0).abs() < 1e-9, "{b}");
    }

    #[test]
    fn cardinal_bearings() {
        let origin = GeoPoint::new(10.0, 10.0);
        assert!(bearing(origin, GeoPoint::new(11.0, 10.0)).abs() < 1e-9);
        assert!((bearing(origin, GeoPoint::new(9.0, 10.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(origin, GeoPoint::new(10.0, 9.0)) - 270.0).abs() < 0.2);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 111_194.9).abs() < 1.0, "{d}");
    }

    #[test]
    fn nan_propagates_through_bearing() {
        assert!(bearing(GeoPoint::new(f64::NAN, 0.0), BEPPU).is_nan());
    }

    #[test]
    fn angular_error_takes_the_short_way() {
        assert!((angular_error(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((angular_error(10.0, 350.0) + 20.0).abs() < 1e-9);
        assert!((angular_error(0.0, 180.0) - 180.0).abs() < 1e-9);
        assert!((angular_error(180.0, 0.0) - 180.0).abs() < 1e-9);
        assert_eq!(angular_error(90.0, f64::NAN), 0.0);
    }

    #[test]
    fn normalize_wraps_into_range() {
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert!((normalize_degrees(-90.0) - 270.0).abs() < 1e-9);
        assert!((normalize_degrees(725.0) - 5.0).abs() < 1e-9);
        assert_eq!(normalize_degrees(-1e-18), 0.0);
    }

    #[test]
    fn destination_point_walks_the_bearing() {
        let heading = bearing(BEPPU, ONSEN);
        let reached = destination_point(BEPPU, heading, distance(BEPPU, ONSEN));
        assert!(distance(reached, ONSEN) < 0.01);
    }

    #[test]
    fn local_offset_points_north_east() {
        let (east, north) = local_offset(BEPPU, ONSEN);
        assert!(east > 500.0 && east < 620.0, "{east}");
        assert!(north > 200.0 && north < 240.0, "{north}");
    }
}
