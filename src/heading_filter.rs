//! Smooths compass samples that arrive whenever the sensor feels like it
//! into one continuous heading per rendered frame.

use crate::config::HeadingSettings;
use crate::geodesy::{normalize_degrees, wrap_signed, Degree};

/// The `HeadingFilter` holds the latest raw sample alongside the heading
/// that is actually used downstream. Raw samples may jump around; the
/// smoothed heading only moves along the shortest arc towards them, a
/// fraction of the way per tick.
#[derive(Debug, Clone)]
pub struct HeadingFilter {
    raw: Option<Degree>,
    smoothed: Option<Degree>,
    factor: f64,
    snap_threshold: Degree,
}

impl HeadingFilter {
    /// Instantiates an empty filter with the given blend factor and snap
    /// threshold.
    pub fn new(settings: &HeadingSettings) -> Self {
        Self {
            raw: None,
            smoothed: None,
            factor: settings.smoothing_factor.clamp(0.0, 1.0),
            snap_threshold: settings.snap_threshold,
        }
    }

    /// Records a raw heading sample. Nothing moves until the next tick.
    pub fn push_raw(&mut self, heading: Degree) {
        if heading.is_finite() {
            self.raw = Some(normalize_degrees(heading));
        }
    }

    /// Advances the smoothed heading one frame towards the latest raw
    /// sample and returns it. Returns `None` until a sample has arrived.
    pub fn tick(&mut self) -> Option<Degree> {
        let raw = self.raw?;

        let next = match self.smoothed {
            None => raw,
            Some(smoothed) => {
                let diff = wrap_signed(raw - smoothed);
                if diff.abs() > self.snap_threshold {
                    // too far to glide, treat it as a fresh reading
                    raw
                } else {
                    normalize_degrees(smoothed + diff * self.factor + 360.0)
                }
            }
        };

        self.smoothed = Some(next);
        Some(next)
    }

    /// The latest raw sample, if any.
    pub fn raw(&self) -> Option<Degree> {
        self.raw
    }

    /// The heading as of the last tick, if any.
    pub fn smoothed(&self) -> Option<Degree> {
        self.smoothed
    }

    /// Forgets both headings.
    pub fn reset(&mut self) {
        self.raw = None;
        self.smoothed = None;
    }
}
