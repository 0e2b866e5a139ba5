//! Sources of walking routes. The guidance core only sees the
//! [`RouteProvider`] trait: a start and an end go in, an ordered list of
//! maneuver points comes out.

use crate::geodesy::GeoPoint;

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs, path::Path, time::Duration};

/// Something that can plan a walking route. Called from a worker thread,
/// hence `Send + Sync`.
pub trait RouteProvider: Send + Sync {
    /// Plans a route from `start` to `end`, returning the maneuver points
    /// in walking order.
    fn fetch(&self, start: GeoPoint, end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError>;
}

/// Everything that can go wrong while planning a route.
#[derive(Debug)]
pub enum RouteError {
    /// The HTTP request failed or came back with an error status.
    HttpError(Box<ureq::Error>),

    /// Reading a route file or a response body failed.
    IoError(std::io::Error),

    /// The directions response was not the JSON we expected.
    JsonError(serde_json::Error),

    /// A route file was not valid RON.
    RonSpannedError(ron::de::SpannedError),

    /// The provider answered, but without any route.
    NoRoute,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            RouteError::HttpError(error) => Cow::from(format!("http error: {}", error)),
            RouteError::IoError(error) => Cow::from(format!("io error: {}", error)),
            RouteError::JsonError(error) => Cow::from(format!("malformed response: {}", error)),
            RouteError::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            RouteError::NoRoute => Cow::from("no route found"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RouteError {}

impl From<ureq::Error> for RouteError {
    fn from(value: ureq::Error) -> Self {
        Self::HttpError(Box::new(value))
    }
}

impl From<std::io::Error> for RouteError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<serde_json::Error> for RouteError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonError(value)
    }
}

impl From<ron::de::SpannedError> for RouteError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

/// The on-disk shape of a route file:
///
/// ```text
/// (waypoints: [(latitude: 33.281, longitude: 131.503), ...])
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct RouteFile {
    pub waypoints: Vec<GeoPoint>,
}

/// Hands out the same pre-planned route every time. With no waypoints at
/// all it plans a straight line to wherever it is asked to go.
#[derive(Debug, Clone, Default)]
pub struct FixedRouteProvider {
    waypoints: Vec<GeoPoint>,
}

impl FixedRouteProvider {
    /// A provider that always answers with `waypoints`.
    pub fn new(waypoints: Vec<GeoPoint>) -> Self {
        Self { waypoints }
    }

    /// A provider that always walks straight to the destination.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Loads the waypoints from a RON [`RouteFile`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let text = fs::read_to_string(path)?;
        let file: RouteFile = ron::from_str(&text)?;
        Ok(Self::new(file.waypoints))
    }

    /// The waypoints this provider was built with.
    pub fn waypoints(&self) -> &[GeoPoint] {
        &self.waypoints
    }
}

impl RouteProvider for FixedRouteProvider {
    fn fetch(&self, _start: GeoPoint, end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError> {
        if self.waypoints.is_empty() {
            Ok(vec![end])
        } else {
            Ok(self.waypoints.clone())
        }
    }
}

const DEFAULT_DIRECTIONS_URL: &str = "https://api.mapbox.com/directions/v5/mapbox/walking";

/// Asks a Mapbox-style directions web service for a walking route and
/// keeps the location of every maneuver.
#[derive(Debug, Clone)]
pub struct DirectionsRouteProvider {
    base_url: String,
    access_token: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    legs: Vec<DirectionsLeg>,
}

#[derive(Debug, Deserialize)]
struct DirectionsLeg {
    steps: Vec<DirectionsStep>,
}

#[derive(Debug, Deserialize)]
struct DirectionsStep {
    maneuver: Maneuver,
}

#[derive(Debug, Deserialize)]
struct Maneuver {
    /// `[longitude, latitude]`
    location: [f64; 2],
}

impl DirectionsRouteProvider {
    /// A provider talking to the public directions endpoint.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_DIRECTIONS_URL.to_owned(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Points the provider at another, compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, start: GeoPoint, end: GeoPoint) -> String {
        format!(
            "{}/{:.6},{:.6};{:.6},{:.6}?steps=true&geometries=geojson&access_token={}",
            self.base_url.trim_end_matches('/'),
            start.longitude,
            start.latitude,
            end.longitude,
            end.latitude,
            self.access_token
        )
    }

    /// Pulls the maneuver locations of the first route out of a directions
    /// response body.
    pub fn parse_response(body: &str) -> Result<Vec<GeoPoint>, RouteError> {
        let response: DirectionsResponse = serde_json::from_str(body)?;
        let route = response.routes.into_iter().next().ok_or(RouteError::NoRoute)?;

        let waypoints: Vec<GeoPoint> = route
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|step| {
                let [longitude, latitude] = step.maneuver.location;
                GeoPoint::new(latitude, longitude)
            })
            .collect();

        if waypoints.is_empty() {
            Err(RouteError::NoRoute)
        } else {
            Ok(waypoints)
        }
    }
}

impl RouteProvider for DirectionsRouteProvider {
    fn fetch(&self, start: GeoPoint, end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError> {
        let body = ureq::get(&self.url(start, end))
            .timeout(self.timeout)
            .call()?
            .into_string()?;
        Self::parse_response(&body)
    }
}
