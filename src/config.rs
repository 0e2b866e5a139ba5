//! Tunables for a guidance session, read from a [ron] file.
//!
//! Every field has a default, so a config file only needs to mention the
//! values it changes:
//!
//! ```text
//! (
//!     route: (divergence_threshold_m: 40.0),
//!     audio: (alignment_cone: 10.0),
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs, ops::RangeInclusive, path::Path, time::Duration};

/// Everything a session can be tuned with.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Heading smoothing
    pub heading: HeadingSettings,
    /// Waypoint progression and rerouting
    pub route: RouteSettings,
    /// Drone and chimes
    pub audio: AudioSettings,
    /// Render ticks per second
    pub frame_rate: f64,
    /// How many status lines the log ring keeps
    pub log_depth: usize,
}

/// Settings for the [`HeadingFilter`](crate::heading_filter::HeadingFilter).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadingSettings {
    /// Fraction of the remaining turn taken per tick
    pub smoothing_factor: f64,
    /// Jumps larger than this (degrees) are taken in one step
    pub snap_threshold: f64,
}

/// Settings for the [`RouteStateMachine`](crate::route::RouteStateMachine).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteSettings {
    /// A waypoint closer than this (meters) counts as reached
    pub arrival_threshold_m: f64,
    /// Moving this much (meters) further away than the closest approach asks for a new route
    pub divergence_threshold_m: f64,
    /// Minimum time between two route requests
    pub fetch_cooldown_secs: f64,
}

/// Settings for the [`AudioEngine`](crate::audio_engine::AudioEngine).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Output sample rate, in Hz
    pub sample_rate: u32,
    /// Half-width (degrees) of the window in which a target counts as faced
    pub alignment_cone: f64,
    /// Minimum time between two chimes
    pub chime_cooldown_secs: f64,
    /// Root pitch of the drone, in Hz
    pub drone_frequency: f64,
    /// Drone gain when facing directly away
    pub drone_min_gain: f32,
    /// Drone gain when facing the target
    pub drone_max_gain: f32,
    /// Time constant of gain and pan changes
    pub glide_secs: f32,
    /// Length of the fade-out on stop
    pub fade_out_secs: f32,
    /// Chime gain
    pub chime_gain: f32,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            heading: HeadingSettings::default(),
            route: RouteSettings::default(),
            audio: AudioSettings::default(),
            frame_rate: 60.0,
            log_depth: 8,
        }
    }
}

impl Default for HeadingSettings {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.15,
            snap_threshold: 100.0,
        }
    }
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            arrival_threshold_m: 10.0,
            divergence_threshold_m: 25.0,
            fetch_cooldown_secs: 15.0,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            alignment_cone: 15.0,
            chime_cooldown_secs: 2.0,
            drone_frequency: 110.0,
            drone_min_gain: 0.02,
            drone_max_gain: 0.18,
            glide_secs: 0.12,
            fade_out_secs: 0.4,
            chime_gain: 0.35,
        }
    }
}

impl RouteSettings {
    /// The fetch cooldown as a [`Duration`].
    pub fn fetch_cooldown(&self) -> Duration {
        seconds(self.fetch_cooldown_secs)
    }
}

impl AudioSettings {
    /// The chime cooldown as a [`Duration`].
    pub fn chime_cooldown(&self) -> Duration {
        seconds(self.chime_cooldown_secs)
    }
}

/// Things that can go wrong while loading a [`GuidanceConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    IoError(std::io::Error),

    /// The file is not valid RON, or has fields of the wrong type.
    RonSpannedError(ron::de::SpannedError),

    /// A value is out of its sensible range.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::Invalid(what) => Cow::from(format!("invalid config: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

impl GuidanceConfig {
    /// Reads a config from the RON file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Parses a config from RON text and checks it.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: GuidanceConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !FRAME_RATES.contains(&self.frame_rate) {
            return Err(ConfigError::Invalid("frame_rate must be within 1..=1000"));
        }
        if !within_seconds(self.route.fetch_cooldown_secs)
            || !within_seconds(self.audio.chime_cooldown_secs)
        {
            return Err(ConfigError::Invalid("cooldowns must be within 0..=3600 seconds"));
        }
        if !within_seconds(self.audio.glide_secs as f64)
            || !within_seconds(self.audio.fade_out_secs as f64)
        {
            return Err(ConfigError::Invalid("glide and fade must be within 0..=3600 seconds"));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive"));
        }
        if !(0.0..=1.0).contains(&self.heading.smoothing_factor) {
            return Err(ConfigError::Invalid("smoothing_factor must be within 0..=1"));
        }
        if self.log_depth == 0 {
            return Err(ConfigError::Invalid("log_depth must be at least 1"));
        }
        Ok(())
    }

    /// The interval between two render ticks.
    pub fn frame_interval(&self) -> Duration {
        seconds(1.0 / self.frame_rate)
    }
}

/// Longest cooldown, fade or glide a config may ask for, in seconds.
pub const MAX_SECONDS: f64 = 3600.0;

/// Render rates a config may ask for, in ticks per second.
pub const FRAME_RATES: RangeInclusive<f64> = 1.0..=1000.0;

/// Converts a non-negative number of seconds, clamping anything a
/// [`Duration`] cannot hold. NaN counts as zero.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn within_seconds(secs: f64) -> bool {
    (0.0..=MAX_SECONDS).contains(&secs)
}
