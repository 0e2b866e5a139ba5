//! SoundCompass guides a pedestrian to a destination by sound alone. There
//! is no map and no visible route line: a continuous drone gets louder and
//! moves towards the side the next target is on, and a chime rings out
//! whenever the listener faces the next waypoint or the destination.
//!
//! The pieces, from the sensors inwards:
//!
//! - [sensor_message_decoder], [sdm] and [dummy_sdm] turn a serial device
//!   or a simulated walker into a stream of
//!   [`SensorEvent`](sensor_data_manager::SensorEvent)s
//! - [heading_filter] smooths the compass into one heading per frame
//! - [geodesy] computes bearings and distances on the sphere
//! - [route] walks the waypoints a [route_provider] planned and asks for a
//!   new route when the listener strays
//! - [audio_engine] and [synth] turn angular error into sound, written out
//!   through an [audio_output] backend such as [hound_writer] or, with the
//!   `device-audio` feature, the sound card
//! - [guidance] ties all of it together once per frame
//!
//! The `soundcompass` binary drives a session from a serial device or a
//! virtual-time simulation; the `monitor` binary shows a simulated walk in
//! the terminal.

#![warn(missing_docs)]
pub mod args;
pub mod audio_engine;
pub mod audio_output;
pub mod clock;
pub mod component;
pub mod config;
#[cfg(feature = "device-audio")]
pub mod device_output;
pub mod dummy_sdm;
pub mod geodesy;
pub mod guidance;
pub mod gui;
pub mod heading_filter;
pub mod hound_writer;
pub mod log_ring;
pub mod route;
pub mod route_provider;
pub mod scheduler;
pub mod sdm;
pub mod sensor_data_manager;
pub mod sensor_message_decoder;
pub mod synth;
