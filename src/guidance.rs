//! The composition root of a guidance session.
//!
//! [`GuidanceLoop`] owns the heading filter and the route state machine and
//! shares the audio engine with whoever started it. Sensor events come in
//! through [`GuidanceLoop::dispatch`]; once per rendered frame
//! [`GuidanceLoop::tick`] turns the latest state into sound, always in the
//! same order:
//!
//! 1. advance the smoothed heading
//! 2. pick up finished route requests and compute the target bearings
//! 3. update the audio engine
//! 4. render the frame's audio
//!
//! [`Session`] adds the sensor feed and the frame scheduler on top and knows
//! how to tear all three down.

use crate::audio_engine::{AudioEngine, ChimeKind};
use crate::clock::Clock;
use crate::config::GuidanceConfig;
use crate::geodesy::{bearing, distance, Degree, GeoPoint};
use crate::heading_filter::HeadingFilter;
use crate::log_ring::LogRing;
use crate::route::{RouteEvent, RouteState, RouteStateMachine};
use crate::route_provider::RouteProvider;
use crate::scheduler::{CancelHandle, FrameScheduler};
use crate::sensor_data_manager::{OrientationSample, SensorDataManager, SensorEvent};

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A read-only view of a session for anything that wants to display it.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceSnapshot {
    /// Smoothed heading as of the last tick
    pub heading: Option<Degree>,
    /// Latest raw compass sample
    pub raw_heading: Option<Degree>,
    pub position: Option<GeoPoint>,
    pub destination: GeoPoint,
    pub destination_bearing: Option<Degree>,
    pub destination_distance: Option<f64>,
    pub waypoint: Option<GeoPoint>,
    pub waypoint_bearing: Option<Degree>,
    pub waypoint_distance: Option<f64>,
    pub route: RouteState,
    pub audio_running: bool,
    pub chimes_fired: usize,
    /// Most recent status lines, oldest first
    pub log: Vec<String>,
}

/// Drives heading smoothing, routing and audio for one destination.
pub struct GuidanceLoop {
    filter: HeadingFilter,
    route: RouteStateMachine,
    audio: Arc<Mutex<AudioEngine>>,
    log: LogRing,
    position: Option<GeoPoint>,
}

impl GuidanceLoop {
    pub fn new(
        config: &GuidanceConfig,
        destination: GeoPoint,
        provider: Arc<dyn RouteProvider>,
        audio: Arc<Mutex<AudioEngine>>,
        clock: Arc<dyn Clock>,
        log: LogRing,
    ) -> Self {
        Self {
            filter: HeadingFilter::new(&config.heading),
            route: RouteStateMachine::new(
                destination,
                provider,
                clock,
                config.route.clone(),
                log.clone(),
            ),
            audio,
            log,
            position: None,
        }
    }

    fn audio(&self) -> MutexGuard<'_, AudioEngine> {
        self.audio.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the audio engine.
    pub fn start(&self) {
        self.audio().start();
        self.log
            .info(format!("Guiding towards {}", self.route.destination()));
    }

    /// Stops the audio engine. Idempotent.
    pub fn stop(&self) {
        self.audio().stop();
    }

    /// Feeds a raw compass sample to the heading filter.
    pub fn on_orientation(&mut self, sample: OrientationSample) {
        match sample.heading() {
            Some(heading) => self.filter.push_raw(heading),
            None => log::debug!("Dropping unusable orientation sample {:?}", sample),
        }
    }

    /// Feeds a position fix to the route state machine. Fixes with
    /// non-finite coordinates are dropped.
    pub fn on_position(&mut self, position: GeoPoint) -> Option<RouteEvent> {
        if !position.is_finite() {
            self.log.warn(format!("Dropping unusable position fix {}", position));
            return None;
        }
        self.position = Some(position);
        self.route.on_position(position)
    }

    /// Notes a position sensor error. The session carries on with the last
    /// known position.
    pub fn on_position_error(&mut self, message: &str) {
        self.log.warn(format!("Position unavailable: {}", message));
    }

    /// Routes any sensor event to its handler.
    pub fn dispatch(&mut self, event: SensorEvent) -> Option<RouteEvent> {
        match event {
            SensorEvent::Orientation(sample) => {
                self.on_orientation(sample);
                None
            }
            SensorEvent::Position(position) => self.on_position(position),
            SensorEvent::PositionError(message) => {
                self.on_position_error(&message);
                None
            }
        }
    }

    /// One render frame covering `dt`. Returns the chime struck this frame.
    pub fn tick(&mut self, dt: Duration) -> Option<ChimeKind> {
        let heading = self.filter.tick();
        self.route.poll_fetches();

        let mut audio = self.audio.lock().unwrap_or_else(PoisonError::into_inner);
        let chime = match (heading, self.position) {
            (Some(heading), Some(position)) => {
                let destination_bearing = bearing(position, self.route.destination());
                let waypoint_bearing = self
                    .route
                    .active_waypoint()
                    .map(|waypoint| bearing(position, waypoint));
                audio.update(heading, destination_bearing, waypoint_bearing)
            }
            _ => None,
        };
        audio.render(dt);
        chime
    }

    /// The waypoint being walked to, or the destination once there are no
    /// waypoints left.
    pub fn active_target(&self) -> GeoPoint {
        self.route
            .active_waypoint()
            .unwrap_or_else(|| self.route.destination())
    }

    pub fn route_state(&self) -> &RouteState {
        self.route.state()
    }

    pub fn position(&self) -> Option<GeoPoint> {
        self.position
    }

    pub fn log(&self) -> &LogRing {
        &self.log
    }

    pub fn snapshot(&self) -> GuidanceSnapshot {
        let destination = self.route.destination();
        let waypoint = self.route.active_waypoint();
        let towards = |target: GeoPoint| self.position.map(|p| bearing(p, target));
        let away = |target: GeoPoint| self.position.map(|p| distance(p, target));
        let audio = self.audio();

        GuidanceSnapshot {
            heading: self.filter.smoothed(),
            raw_heading: self.filter.raw(),
            position: self.position,
            destination,
            destination_bearing: towards(destination),
            destination_distance: away(destination),
            waypoint,
            waypoint_bearing: waypoint.and_then(towards),
            waypoint_distance: waypoint.and_then(away),
            route: self.route.state().clone(),
            audio_running: audio.is_running(),
            chimes_fired: audio.chimes_fired(),
            log: self.log.recent(),
        }
    }
}

/// A [`GuidanceLoop`] wired to a sensor feed and paced by a
/// [`FrameScheduler`].
pub struct Session<S: SensorDataManager> {
    guidance: GuidanceLoop,
    sensors: Option<S>,
    scheduler: FrameScheduler,
}

impl<S: SensorDataManager> Session<S> {
    pub fn new(guidance: GuidanceLoop, sensors: S, scheduler: FrameScheduler) -> Self {
        Self {
            guidance,
            sensors: Some(sensors),
            scheduler,
        }
    }

    pub fn guidance(&self) -> &GuidanceLoop {
        &self.guidance
    }

    pub fn guidance_mut(&mut self) -> &mut GuidanceLoop {
        &mut self.guidance
    }

    /// A handle that ends [`Session::run`] from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.scheduler.cancel_handle()
    }

    /// Drains every queued sensor event, then ticks once.
    pub fn frame(&mut self, dt: Duration) -> Option<ChimeKind> {
        if let Some(sensors) = self.sensors.as_mut() {
            for event in sensors.by_ref() {
                self.guidance.dispatch(event);
            }
        }
        self.guidance.tick(dt)
    }

    /// Starts the audio.
    pub fn start(&self) {
        self.guidance.start();
    }

    /// Waits for the next scheduled frame and runs it. Returns `false`
    /// once the session has been cancelled.
    pub fn step(&mut self) -> bool {
        match self.scheduler.next_frame() {
            Some(dt) => {
                self.frame(dt);
                true
            }
            None => false,
        }
    }

    /// Runs frames until cancelled, then tears the session down.
    pub fn run(&mut self) {
        self.run_with(|_, _| {});
    }

    /// Like [`Session::run`], handing the loop and any chime to `observer`
    /// after every frame.
    pub fn run_with<F>(&mut self, mut observer: F)
    where
        F: FnMut(&GuidanceLoop, Option<ChimeKind>),
    {
        self.start();
        while let Some(dt) = self.scheduler.next_frame() {
            let chime = self.frame(dt);
            observer(&self.guidance, chime);
        }
        self.stop();
    }

    /// Cancels the scheduler, closes the sensor feed and stops the audio.
    /// Any of them may already be stopped or never have started.
    pub fn stop(&mut self) {
        self.scheduler.cancel();
        if let Some(mut sensors) = self.sensors.take() {
            sensors.close();
        }
        self.guidance.stop();
    }
}
