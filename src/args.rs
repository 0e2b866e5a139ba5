// Commandline argument parser using clap for SoundCompass

use crate::config::{ConfigError, GuidanceConfig};
use crate::geodesy::GeoPoint;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct CompassArgs {
    #[command(subcommand)]
    /// Where the heading and position come from
    pub command: CommandTask,

    /// RON file with tuning values; anything it leaves out keeps its default
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Latitude of the destination, in degrees
    #[arg(long = "dest-lat", allow_negative_numbers = true)]
    pub dest_lat: f64,

    /// Longitude of the destination, in degrees
    #[arg(long = "dest-lon", allow_negative_numbers = true)]
    pub dest_lon: f64,

    /// WAV file to record the guidance audio to. Without it the audio is
    /// rendered and discarded
    #[arg(short = 'o', long = "out")]
    pub outfile: Option<PathBuf>,

    /// RON file with a fixed list of waypoints
    #[arg(short = 'r', long = "route", conflicts_with = "directions_token")]
    pub route: Option<PathBuf>,

    /// Access token for a Mapbox-style walking directions service
    #[arg(long = "directions-token")]
    pub directions_token: Option<String>,

    /// Base URL of the directions service
    #[arg(long = "directions-url", requires = "directions_token")]
    pub directions_url: Option<String>,

    /// Sample rate of the rendered audio, e.g. 44100
    #[arg(short = 's', long = "samp")]
    pub samp_rate: Option<u32>,

    /// Render ticks per second
    #[arg(short = 'u', long = "update")]
    pub frame_rate: Option<f64>,

    /// Half-width of the alignment cone, in degrees
    #[arg(long = "cone")]
    pub alignment_cone: Option<f64>,

    /// How far past the closest approach counts as off course, in meters
    #[arg(long = "divergence")]
    pub divergence_threshold: Option<f64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Walk a simulated pedestrian to the destination in virtual time
    #[command(about)]
    Simulate(SimulateCommand),

    /// Read NMEA / orientation lines from a serial device in real time
    #[command(about)]
    Serial(SerialCommand),
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct SimulateCommand {
    /// Latitude the walk starts at
    #[arg(long = "start-lat", allow_negative_numbers = true)]
    pub start_lat: f64,

    /// Longitude the walk starts at
    #[arg(long = "start-lon", allow_negative_numbers = true)]
    pub start_lon: f64,

    /// Longest the walk may take, in simulated seconds
    #[arg(short = 't', long = "seconds", default_value_t = 600.0)]
    pub seconds: f64,

    /// Random compass jitter, in degrees
    #[arg(long = "heading-noise", default_value_t = 3.0)]
    pub heading_noise: f64,

    /// Random position jitter, in meters
    #[arg(long = "position-noise", default_value_t = 4.0)]
    pub position_noise: f64,

    /// Constant compass error, in degrees
    #[arg(long = "heading-offset", default_value_t = 0.0, allow_negative_numbers = true)]
    pub heading_offset: f64,

    /// Walking speed, in meters per second
    #[arg(long = "speed", default_value_t = 1.4)]
    pub speed: f64,

    /// Seed for the simulated sensor noise
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct SerialCommand {
    /// Serial device to read; asks interactively when left out
    #[arg(short = 'd', long = "device")]
    pub device: Option<PathBuf>,

    /// Baud rate of the device
    #[arg(short = 'b', long = "baud", default_value_t = 115200)]
    pub baud: u32,

    /// Do not play on the sound card; `--out` still records
    #[arg(long = "mute")]
    pub mute: bool,
}

impl CompassArgs {
    pub fn destination(&self) -> GeoPoint {
        GeoPoint::new(self.dest_lat, self.dest_lon)
    }

    /// Writes every value given on the command line over `config`.
    pub fn apply_overrides(&self, config: &mut GuidanceConfig) {
        if let Some(samp_rate) = self.samp_rate {
            config.audio.sample_rate = samp_rate;
        }
        if let Some(frame_rate) = self.frame_rate {
            config.frame_rate = frame_rate;
        }
        if let Some(cone) = self.alignment_cone {
            config.audio.alignment_cone = cone;
        }
        if let Some(divergence) = self.divergence_threshold {
            config.route.divergence_threshold_m = divergence;
        }
    }

    /// The config file (or the defaults) with the command line applied.
    pub fn load_config(&self) -> Result<GuidanceConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => GuidanceConfig::from_path(path)?,
            None => GuidanceConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }
}

impl SimulateCommand {
    pub fn start(&self) -> GeoPoint {
        GeoPoint::new(self.start_lat, self.start_lon)
    }
}
