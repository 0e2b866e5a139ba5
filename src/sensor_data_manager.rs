use crate::geodesy::{normalize_degrees, Degree, GeoPoint};

/// A compass reading in one of the two dialects orientation sensors speak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrientationSample {
    /// Heading measured clockwise from north, as absolute compasses and
    /// NMEA `HDT` sentences report it.
    Compass(Degree),
    /// Device-orientation `alpha`, which grows counter-clockwise.
    Alpha(Degree),
}

impl OrientationSample {
    /// Normalizes either dialect into a clockwise heading in `[0, 360)`.
    /// Returns `None` for non-finite readings.
    pub fn heading(&self) -> Option<Degree> {
        let heading = match *self {
            OrientationSample::Compass(h) => h,
            OrientationSample::Alpha(alpha) => 360.0 - alpha,
        };
        heading.is_finite().then(|| normalize_degrees(heading))
    }
}

/// Anything a sensor can tell the guidance loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// A new orientation sample
    Orientation(OrientationSample),
    /// A new position fix
    Position(GeoPoint),
    /// The position sensor reported a problem; the session carries on
    PositionError(String),
}

/// `SensorDataManager`
///
/// A typed, clearable iterator that emits `SensorEvent`s when iterated upon.
/// The guidance loop drains one of these at the start of every frame, so
/// every sensor stream reaches the core components on the loop's thread.
pub trait SensorDataManager: Iterator<Item = SensorEvent> {
    /// Drops every event not yet consumed.
    fn clear(&mut self);

    /// Stops delivery altogether. Must be safe to call more than once.
    fn close(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compass_dialect_passes_through() {
        assert_eq!(OrientationSample::Compass(42.0).heading(), Some(42.0));
        assert_eq!(OrientationSample::Compass(360.0).heading(), Some(0.0));
    }

    #[test]
    fn alpha_dialect_is_mirrored() {
        assert_eq!(OrientationSample::Alpha(90.0).heading(), Some(270.0));
        assert_eq!(OrientationSample::Alpha(0.0).heading(), Some(0.0));
        assert_eq!(OrientationSample::Alpha(350.0).heading(), Some(10.0));
    }

    #[test]
    fn garbage_is_dropped() {
        assert_eq!(OrientationSample::Alpha(f64::NAN).heading(), None);
        assert_eq!(OrientationSample::Compass(f64::INFINITY).heading(), None);
    }
}
