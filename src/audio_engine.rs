//! Turns angular error into sound.
//!
//! The engine never sees a coordinate. Each frame it is given the smoothed
//! heading and up to two target bearings and derives from them:
//!
//! - the drone's gain, loudest when facing the target and quietest when
//!   facing away
//! - the drone's pan, towards the side the target is on
//! - whether to strike a chime because the listener just lined up with the
//!   next waypoint or with the destination
//!
//! Output goes through an injected [`AudioBackend`]. If it cannot be opened
//! the engine stays silent and inert rather than failing the session.

use crate::audio_output::{AudioBackend, AudioSink};
use crate::clock::Clock;
use crate::config::AudioSettings;
use crate::geodesy::{angular_error, Degree};
use crate::log_ring::LogRing;
use crate::synth::{ChimeVoice, Drone};

use std::{fmt, sync::Arc, time::Duration};

/// Frames rendered per sink write while draining on stop.
const DRAIN_BLOCK: usize = 1024;

/// The two chime sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeKind {
    /// Lined up with the next waypoint
    Waypoint,
    /// Lined up with the destination
    Destination,
}

impl fmt::Display for ChimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChimeKind::Waypoint => write!(f, "waypoint"),
            ChimeKind::Destination => write!(f, "destination"),
        }
    }
}

/// Everything that only exists between `start` and `stop`.
struct Graph {
    sink: Box<dyn AudioSink>,
    drone: Drone,
    chimes: Vec<ChimeVoice>,
}

impl Graph {
    fn render(&mut self, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for _ in 0..frames {
            let (mut l, mut r) = self.drone.next_frame();
            for chime in &mut self.chimes {
                let (cl, cr) = chime.next_frame();
                l += cl;
                r += cr;
            }
            left.push(l);
            right.push(r);
        }
        self.chimes.retain(|chime| !chime.is_finished());
        (left, right)
    }
}

/// The procedural sound of one guidance session.
pub struct AudioEngine {
    settings: AudioSettings,
    backend: Box<dyn AudioBackend>,
    clock: Arc<dyn Clock>,
    log: LogRing,
    graph: Option<Graph>,
    last_chime: Option<Duration>,
    chimes_fired: usize,
    frame_remainder: f64,
}

impl AudioEngine {
    /// An engine that will open `backend` once started.
    pub fn new(
        settings: AudioSettings,
        backend: Box<dyn AudioBackend>,
        clock: Arc<dyn Clock>,
        log: LogRing,
    ) -> Self {
        Self {
            settings,
            backend,
            clock,
            log,
            graph: None,
            last_chime: None,
            chimes_fired: 0,
            frame_remainder: 0.0,
        }
    }

    /// Opens the output and builds the drone. Does nothing if already
    /// running; if the output cannot be opened the engine stays inert.
    pub fn start(&mut self) {
        if self.graph.is_some() {
            return;
        }

        let sample_rate = self.settings.sample_rate;
        match self.backend.open(sample_rate) {
            Ok(sink) => {
                self.graph = Some(Graph {
                    sink,
                    drone: Drone::new(
                        self.settings.drone_frequency,
                        sample_rate,
                        self.settings.glide_secs,
                    ),
                    chimes: Vec::new(),
                });
                self.frame_remainder = 0.0;
                self.log.info(format!("Audio started at {} Hz", sample_rate));
            }
            Err(e) => {
                self.log.warn(format!("Audio unavailable, staying silent: {}", e));
            }
        }
    }

    /// Whether the engine has an open output.
    pub fn is_running(&self) -> bool {
        self.graph.is_some()
    }

    /// How many chimes have been struck since creation.
    pub fn chimes_fired(&self) -> usize {
        self.chimes_fired
    }

    /// How many chime voices are still ringing.
    pub fn active_chimes(&self) -> usize {
        self.graph.as_ref().map_or(0, |graph| graph.chimes.len())
    }

    /// The gain and pan the drone is currently heading for.
    pub fn drone_targets(&self) -> Option<(f32, f32)> {
        self.graph.as_ref().map(|graph| graph.drone.targets())
    }

    /// The drone's gain right now.
    pub fn drone_gain(&self) -> Option<f32> {
        self.graph.as_ref().map(|graph| graph.drone.gain())
    }

    /// Feeds the current heading and target bearings in. Retargets the
    /// drone and returns the chime struck by this call, if any.
    ///
    /// While a waypoint bearing is given only the waypoint can chime; the
    /// destination chime is reserved for when no waypoint remains. No two
    /// chimes of any kind are closer together than the chime cooldown.
    pub fn update(
        &mut self,
        heading: Degree,
        destination_bearing: Degree,
        waypoint_bearing: Option<Degree>,
    ) -> Option<ChimeKind> {
        let graph = self.graph.as_mut()?;

        let destination_error = angular_error(heading, destination_bearing);
        let waypoint_error = waypoint_bearing.map(|b| angular_error(heading, b));

        // the drone tracks the nearer-term target
        let error = waypoint_error.unwrap_or(destination_error);
        let (gain, pan) = drone_levels(&self.settings, error);
        graph.drone.set_target(gain, pan);

        let now = self.clock.now();
        let cooled = self
            .last_chime
            .map_or(true, |last| now.saturating_sub(last) > self.settings.chime_cooldown());
        let cone = self.settings.alignment_cone;

        let kind = match waypoint_error {
            Some(e) if cooled && e.abs() <= cone => ChimeKind::Waypoint,
            None if cooled && destination_error.abs() <= cone => ChimeKind::Destination,
            _ => return None,
        };

        let sample_rate = self.settings.sample_rate;
        let voice = match kind {
            ChimeKind::Waypoint => ChimeVoice::waypoint(self.settings.chime_gain, sample_rate),
            ChimeKind::Destination => {
                ChimeVoice::destination(self.settings.chime_gain, sample_rate)
            }
        };
        graph.chimes.push(voice);
        self.last_chime = Some(now);
        self.chimes_fired += 1;
        self.log.info(format!("Facing the {}", kind));
        Some(kind)
    }

    /// Synthesizes `dt` worth of audio and writes it out. Fractions of a
    /// frame carry over to the next call. A failing output stops the
    /// engine.
    pub fn render(&mut self, dt: Duration) {
        let Some(graph) = self.graph.as_mut() else {
            return;
        };

        let exact = dt.as_secs_f64() * self.settings.sample_rate as f64 + self.frame_remainder;
        let frames = exact.floor();
        self.frame_remainder = exact - frames;
        if frames < 1.0 {
            return;
        }

        let (left, right) = graph.render(frames as usize);
        if let Err(e) = graph.sink.write(&left, &right) {
            self.log.warn(format!("Audio output failed, going silent: {}", e));
            self.graph = None;
        }
    }

    /// Fades the drone out, lets ringing chimes finish, then closes the
    /// output and drops everything. Safe to call at any time, any number
    /// of times.
    pub fn stop(&mut self) {
        let Some(mut graph) = self.graph.take() else {
            return;
        };

        graph.drone.cancel();
        graph.drone.fade_out(self.settings.fade_out_secs);

        let sample_rate = self.settings.sample_rate as f32;
        let fade = (self.settings.fade_out_secs.max(0.0) * sample_rate).ceil() as usize;
        let tail = graph
            .chimes
            .iter()
            .map(ChimeVoice::remaining)
            .max()
            .unwrap_or(0);

        let mut left_to_render = fade.max(tail);
        while left_to_render > 0 {
            let frames = left_to_render.min(DRAIN_BLOCK);
            let (left, right) = graph.render(frames);
            if let Err(e) = graph.sink.write(&left, &right) {
                self.log.warn(format!("Audio output failed while stopping: {}", e));
                break;
            }
            left_to_render -= frames;
        }

        if let Err(e) = graph.sink.close() {
            self.log.warn(format!("Could not close audio output: {}", e));
        }
        self.frame_remainder = 0.0;
        self.log.info("Audio stopped");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drone gain and pan for a given angular error. Gain falls off
/// quadratically from `drone_max_gain` when facing the target to
/// `drone_min_gain` when facing directly away; pan is the sine of the
/// error, so a target to the right pans right.
pub fn drone_levels(settings: &AudioSettings, error: Degree) -> (f32, f32) {
    let error = if error.is_finite() { error } else { 0.0 };
    let closeness = (1.0 - error.abs() / 180.0).clamp(0.0, 1.0) as f32;
    let gain = settings.drone_min_gain
        + (settings.drone_max_gain - settings.drone_min_gain) * closeness * closeness;
    let pan = error.to_radians().sin() as f32;
    (gain, pan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_output::{AudioError, MemoryBackend};
    use crate::clock::VirtualClock;

    const SR: u32 = 8000;

    struct BrokenBackend;

    impl AudioBackend for BrokenBackend {
        fn open(&mut self, _sample_rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
            Err(AudioError::Unavailable("no device".to_owned()))
        }
    }

    fn settings() -> AudioSettings {
        AudioSettings {
            sample_rate: SR,
            ..AudioSettings::default()
        }
    }

    fn engine(backend: &MemoryBackend, clock: &VirtualClock) -> AudioEngine {
        let mut engine = AudioEngine::new(
            settings(),
            Box::new(backend.clone()),
            Arc::new(clock.clone()),
            LogRing::new(8),
        );
        engine.start();
        engine
    }

    #[test]
    fn gain_and_pan_follow_error() {
        let s = settings();
        let (ahead, centered) = drone_levels(&s, 0.0);
        assert!((ahead - s.drone_max_gain).abs() < 1e-6);
        assert!(centered.abs() < 1e-6);

        let (behind, _) = drone_levels(&s, 180.0);
        assert!((behind - s.drone_min_gain).abs() < 1e-6);

        let (side, right) = drone_levels(&s, 90.0);
        assert!(side > behind && side < ahead);
        assert!((right - 1.0).abs() < 1e-6);
        let (_, left) = drone_levels(&s, -90.0);
        assert!((left + 1.0).abs() < 1e-6);

        assert_eq!(drone_levels(&s, f64::NAN), drone_levels(&s, 0.0));
    }

    #[test]
    fn waypoint_takes_priority() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        assert_eq!(
            engine.update(10.0, 12.0, Some(8.0)),
            Some(ChimeKind::Waypoint)
        );
        assert_eq!(engine.chimes_fired(), 1);
        assert_eq!(engine.active_chimes(), 1);
    }

    #[test]
    fn pending_waypoint_silences_destination() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        assert_eq!(engine.update(10.0, 12.0, Some(100.0)), None);
        assert_eq!(engine.chimes_fired(), 0);
        // the drone still follows the waypoint, hard right of the heading
        let (_, pan) = engine.drone_targets().unwrap();
        assert!(pan > 0.9);

        assert_eq!(engine.update(10.0, 12.0, None), Some(ChimeKind::Destination));
    }

    #[test]
    fn cooldown_spaces_chimes() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        assert!(engine.update(0.0, 0.0, None).is_some());
        clock.advance_secs(0.5);
        assert_eq!(engine.update(0.0, 0.0, Some(1.0)), None);
        clock.advance_secs(1.5);
        // exactly at the cooldown is still too soon
        assert_eq!(engine.update(0.0, 0.0, None), None);
        clock.advance_secs(0.01);
        assert_eq!(engine.update(0.0, 0.0, None), Some(ChimeKind::Destination));
        assert_eq!(engine.chimes_fired(), 2);
    }

    #[test]
    fn no_chime_outside_cone() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        assert_eq!(engine.update(0.0, 16.0, None), None);
        assert_eq!(engine.update(350.0, 90.0, Some(180.0)), None);
        // across north counts as close
        assert_eq!(engine.update(355.0, 5.0, None), Some(ChimeKind::Destination));
    }

    #[test]
    fn drone_glides_towards_target() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);
        let s = settings();

        engine.update(0.0, 0.0, None);
        let (target, _) = engine.drone_targets().unwrap();
        assert!((target - s.drone_max_gain).abs() < 1e-6);

        engine.render(Duration::from_millis(1));
        let early = engine.drone_gain().unwrap();
        assert!(early > 0.0 && early < target * 0.5, "{early}");

        engine.render(Duration::from_secs(1));
        let late = engine.drone_gain().unwrap();
        assert!((late - target).abs() < 1e-3, "{late}");
    }

    #[test]
    fn render_keeps_fractional_frames() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        // 8000 / 60 = 133.33 frames per tick
        for _ in 0..60 {
            engine.render(Duration::from_secs_f64(1.0 / 60.0));
        }
        let frames = backend.frames();
        assert!((7999..=8000).contains(&frames), "{frames}");
    }

    #[test]
    fn chimes_are_dropped_when_finished() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        engine.update(0.0, 0.0, Some(0.0));
        engine.render(Duration::from_millis(100));
        assert_eq!(engine.active_chimes(), 1);
        engine.render(Duration::from_millis(250));
        assert_eq!(engine.active_chimes(), 0);
    }

    #[test]
    fn stop_drains_chimes_and_closes_once() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);

        engine.update(0.0, 0.0, None);
        engine.render(Duration::from_millis(100));
        engine.stop();
        engine.stop();

        let recording = backend.recording();
        assert_eq!(recording.closed, 1);
        // the bell rang to its end
        assert!(recording.left.len() >= (2.5 * SR as f64) as usize);
        let tail = &recording.left[recording.left.len() - 16..];
        assert!(tail.iter().all(|s| s.abs() < 1e-3), "{tail:?}");

        assert!(!engine.is_running());
        assert_eq!(engine.update(0.0, 0.0, None), None);
        engine.render(Duration::from_secs(1));
        assert_eq!(backend.frames(), recording.left.len());
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let backend = MemoryBackend::new();
        let mut engine = AudioEngine::new(
            settings(),
            Box::new(backend.clone()),
            Arc::new(VirtualClock::new()),
            LogRing::new(4),
        );
        engine.stop();
        engine.stop();
        assert_eq!(backend.recording().opened, 0);
    }

    #[test]
    fn start_is_idempotent() {
        let backend = MemoryBackend::new();
        let clock = VirtualClock::new();
        let mut engine = engine(&backend, &clock);
        engine.start();
        assert_eq!(backend.recording().opened, 1);
    }

    #[test]
    fn broken_backend_leaves_engine_inert() {
        let log = LogRing::new(4);
        let mut engine = AudioEngine::new(
            settings(),
            Box::new(BrokenBackend),
            Arc::new(VirtualClock::new()),
            log.clone(),
        );
        engine.start();
        assert!(!engine.is_running());
        assert!(log.last().unwrap().contains("no device"));
        assert_eq!(engine.update(0.0, 0.0, None), None);
        engine.render(Duration::from_secs(1));
        engine.stop();
    }
}
