//! Waypoint progression and rerouting.
//!
//! The [`RouteStateMachine`] asks a [`RouteProvider`] for a route as soon as
//! it learns where the walker is, then follows the walker from waypoint to
//! waypoint using nothing but distance:
//!
//! - closer than the arrival threshold: the waypoint is reached
//! - further than the closest approach so far plus the divergence
//!   threshold: the walker is heading away, ask for a new route
//!
//! Route requests run on a worker thread and come back over a channel; they
//! only take effect when [`RouteStateMachine::poll_fetches`] picks them up,
//! so the route itself is only ever touched from the guidance loop's thread.
//! At most one request goes out per cooldown window, whatever the reason.

use crate::clock::Clock;
use crate::config::RouteSettings;
use crate::geodesy::{distance, GeoPoint};
use crate::log_ring::LogRing;
use crate::route_provider::{RouteError, RouteProvider};

use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread,
    time::Duration,
};

type FetchResult = Result<Vec<GeoPoint>, RouteError>;

/// Where the walker is along the route.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteState {
    /// No route yet
    Idle,
    /// Walking towards `waypoints[index]`
    Navigating {
        waypoints: Vec<GeoPoint>,
        index: usize,
        /// Closest approach to the current waypoint so far; `None` until
        /// the first fix after the waypoint became current
        closest: Option<f64>,
    },
    /// Every waypoint has been reached
    Completed,
}

/// Something noteworthy that a position fix caused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteEvent {
    /// The waypoint at `index` was reached and the next one is now current
    WaypointReached { index: usize },
    /// The last waypoint was reached
    Completed,
    /// The walker drifted away and a new route was asked for
    RerouteRequested,
    /// The walker drifted away, but the request cooldown is still running
    RerouteDeferred,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteState::Idle => write!(f, "idle"),
            RouteState::Navigating {
                waypoints, index, ..
            } => write!(f, "navigating {}/{}", index + 1, waypoints.len()),
            RouteState::Completed => write!(f, "completed"),
        }
    }
}

/// Owns the route of one guidance session.
pub struct RouteStateMachine {
    destination: GeoPoint,
    provider: Arc<dyn RouteProvider>,
    clock: Arc<dyn Clock>,
    log: LogRing,
    settings: RouteSettings,
    state: RouteState,
    last_request: Option<Duration>,
    pending: Option<Receiver<FetchResult>>,
}

impl RouteStateMachine {
    /// An idle machine that will route towards `destination`.
    pub fn new(
        destination: GeoPoint,
        provider: Arc<dyn RouteProvider>,
        clock: Arc<dyn Clock>,
        settings: RouteSettings,
        log: LogRing,
    ) -> Self {
        Self {
            destination,
            provider,
            clock,
            log,
            settings,
            state: RouteState::Idle,
            last_request: None,
            pending: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> &RouteState {
        &self.state
    }

    /// Where the session ends.
    pub fn destination(&self) -> GeoPoint {
        self.destination
    }

    /// The waypoint currently being walked to, if navigating.
    pub fn active_waypoint(&self) -> Option<GeoPoint> {
        match &self.state {
            RouteState::Navigating {
                waypoints, index, ..
            } => waypoints.get(*index).copied(),
            _ => None,
        }
    }

    /// Whether a route request is still out.
    pub fn is_fetching(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds a new position fix through the arrival and divergence rules.
    pub fn on_position(&mut self, position: GeoPoint) -> Option<RouteEvent> {
        self.poll_fetches();

        let arrival = self.settings.arrival_threshold_m;
        let divergence = self.settings.divergence_threshold_m;

        let (waypoints, index, closest) = match &mut self.state {
            RouteState::Idle => {
                if self.pending.is_none() {
                    self.request_route(position);
                }
                return None;
            }
            RouteState::Completed => return None,
            RouteState::Navigating {
                waypoints,
                index,
                closest,
            } => (waypoints, index, closest),
        };

        let d = distance(position, waypoints[*index]);

        if d < arrival {
            let reached = *index;
            *index += 1;
            *closest = None;
            if *index >= waypoints.len() {
                self.state = RouteState::Completed;
                self.log.info("Arrived at the destination");
                return Some(RouteEvent::Completed);
            }
            self.log.info(format!(
                "Reached waypoint {} of {}",
                reached + 1,
                waypoints.len()
            ));
            return Some(RouteEvent::WaypointReached { index: reached });
        }

        let best = closest.map_or(d, |c| c.min(d));
        if d > best + divergence {
            // start measuring afresh from here
            *closest = Some(d);
            self.log.warn(format!(
                "Off course: {:.0} m from waypoint, was {:.0} m",
                d, best
            ));
            return if self.request_route(position) {
                Some(RouteEvent::RerouteRequested)
            } else {
                Some(RouteEvent::RerouteDeferred)
            };
        }
        *closest = Some(best);
        None
    }

    /// Sends a route request from `start` unless the cooldown forbids it.
    /// Returns whether a request went out.
    pub fn request_route(&mut self, start: GeoPoint) -> bool {
        let now = self.clock.now();
        if let Some(last) = self.last_request {
            if now.saturating_sub(last) < self.settings.fetch_cooldown() {
                log::debug!("Route request suppressed by cooldown");
                return false;
            }
        }

        let (tx, rx) = mpsc::channel();
        let provider = Arc::clone(&self.provider);
        let end = self.destination;
        let spawned = thread::Builder::new()
            .name("route-fetch".into())
            .spawn(move || {
                // the machine may be gone by the time the route arrives
                let _ = tx.send(provider.fetch(start, end));
            });

        if let Err(e) = spawned {
            self.log.warn(format!("Could not start route request: {}", e));
            return false;
        }

        self.last_request = Some(now);
        self.pending = Some(rx);
        self.log.info("Requesting route");
        true
    }

    /// Applies a finished route request, if there is one. Never blocks.
    /// Returns whether a new route was installed.
    pub fn poll_fetches(&mut self) -> bool {
        let Some(rx) = &self.pending else {
            return false;
        };
        match rx.try_recv() {
            Ok(result) => {
                self.pending = None;
                self.apply(result)
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.pending = None;
                self.log.warn("Route request vanished without an answer");
                false
            }
        }
    }

    /// Waits up to `timeout` for an outstanding route request and applies
    /// it. Returns whether a new route was installed.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let Some(rx) = &self.pending else {
            return false;
        };
        match rx.recv_timeout(timeout) {
            Ok(result) => {
                self.pending = None;
                self.apply(result)
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.pending = None;
                false
            }
        }
    }

    fn apply(&mut self, result: FetchResult) -> bool {
        if self.state == RouteState::Completed {
            log::debug!("Ignoring route that arrived after completion");
            return false;
        }
        match result {
            Ok(waypoints) if !waypoints.is_empty() => {
                self.log
                    .info(format!("New route with {} waypoints", waypoints.len()));
                self.state = RouteState::Navigating {
                    waypoints,
                    index: 0,
                    closest: None,
                };
                true
            }
            Ok(_) => {
                self.log.warn("Route request returned no waypoints");
                false
            }
            Err(e) => {
                self.log.warn(format!("Route request failed: {}", e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::geodesy::destination_point;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START: GeoPoint = GeoPoint::new(33.2800, 131.5000);
    const GOAL: GeoPoint = GeoPoint::new(33.2820, 131.5064);
    const WAIT: Duration = Duration::from_secs(5);

    /// Hands out a fixed route and counts how often it was asked.
    struct CountingProvider {
        route: Vec<GeoPoint>,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(route: Vec<GeoPoint>) -> Arc<Self> {
            Arc::new(Self {
                route,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RouteProvider for CountingProvider {
        fn fetch(&self, _start: GeoPoint, _end: GeoPoint) -> Result<Vec<GeoPoint>, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.route.is_empty() {
                Err(RouteError::NoRoute)
            } else {
                Ok(self.route.clone())
            }
        }
    }

    fn machine(provider: Arc<CountingProvider>, clock: &VirtualClock) -> RouteStateMachine {
        RouteStateMachine::new(
            GOAL,
            provider,
            Arc::new(clock.clone()),
            RouteSettings::default(),
            LogRing::new(16),
        )
    }

    /// A point `meters` due south of `p`.
    fn south_of(p: GeoPoint, meters: f64) -> GeoPoint {
        destination_point(p, 180.0, meters)
    }

    #[test]
    fn first_fix_fetches_a_route() {
        let clock = VirtualClock::new();
        let provider = CountingProvider::new(vec![START, GOAL]);
        let mut route = machine(provider.clone(), &clock);

        assert_eq!(route.on_position(START), None);
        assert!(route.is_fetching());
        assert!(route.settle(WAIT));
        assert_eq!(provider.calls(), 1);
        assert_eq!(route.active_waypoint(), Some(START));
    }

    #[test]
    fn n_arrivals_complete_the_route() {
        let clock = VirtualClock::new();
        let waypoints = vec![
            START,
            GeoPoint::new(33.2810, 131.5030),
            GeoPoint::new(33.2815, 131.5050),
            GOAL,
        ];
        let provider = CountingProvider::new(waypoints.clone());
        let mut route = machine(provider, &clock);

        route.on_position(START);
        assert!(route.settle(WAIT));

        for (i, waypoint) in waypoints.iter().enumerate() {
            let event = route.on_position(south_of(*waypoint, 2.0));
            if i + 1 < waypoints.len() {
                assert_eq!(event, Some(RouteEvent::WaypointReached { index: i }));
            } else {
                assert_eq!(event, Some(RouteEvent::Completed));
            }
        }
        assert_eq!(route.state(), &RouteState::Completed);
        assert_eq!(route.active_waypoint(), None);

        // terminal
        assert_eq!(route.on_position(START), None);
        assert_eq!(route.state(), &RouteState::Completed);
    }

    #[test]
    fn index_only_moves_forward() {
        let clock = VirtualClock::new();
        let provider = CountingProvider::new(vec![START, GOAL]);
        let mut route = machine(provider, &clock);
        route.on_position(START);
        route.settle(WAIT);

        route.on_position(START);
        assert_eq!(route.active_waypoint(), Some(GOAL));
        // standing on the old waypoint again changes nothing
        assert_eq!(route.on_position(START), None);
        assert_eq!(route.active_waypoint(), Some(GOAL));
    }

    #[test]
    fn moving_away_reroutes_exactly_once() {
        let clock = VirtualClock::new();
        let provider = CountingProvider::new(vec![GOAL]);
        let mut route = machine(provider.clone(), &clock);

        let far = south_of(GOAL, 200.0);
        route.on_position(far);
        assert!(route.settle(WAIT));
        assert_eq!(provider.calls(), 1);

        clock.advance_secs(20.0);

        // closing in...
        for meters in [190.0, 170.0, 150.0, 130.0] {
            assert_eq!(route.on_position(south_of(GOAL, meters)), None);
        }
        // ...then wandering off
        assert_eq!(
            route.on_position(south_of(GOAL, 160.0)),
            Some(RouteEvent::RerouteRequested)
        );
        for meters in [165.0, 170.0, 180.0, 200.0] {
            let event = route.on_position(south_of(GOAL, meters));
            assert_ne!(event, Some(RouteEvent::RerouteRequested), "{meters}");
        }

        route.settle(WAIT);
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn small_wobbles_do_not_reroute() {
        let clock = VirtualClock::new();
        let provider = CountingProvider::new(vec![GOAL]);
        let mut route = machine(provider.clone(), &clock);
        route.on_position(south_of(GOAL, 100.0));
        route.settle(WAIT);
        clock.advance_secs(20.0);

        for meters in [90.0, 80.0, 95.0, 85.0, 104.0, 70.0] {
            assert_eq!(route.on_position(south_of(GOAL, meters)), None, "{meters}");
        }
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn reroute_waits_for_cooldown() {
        let clock = VirtualClock::new();
        let provider = CountingProvider::new(vec![GOAL]);
        let mut route = machine(provider.clone(), &clock);
        route.on_position(south_of(GOAL, 100.0));
        route.settle(WAIT);

        clock.advance_secs(5.0);
        route.on_position(south_of(GOAL, 50.0));
        assert_eq!(
            route.on_position(south_of(GOAL, 90.0)),
            Some(RouteEvent::RerouteDeferred)
        );
        assert!(!route.is_fetching());
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn reroute_replaces_the_list_and_resets_progress() {
        let clock = VirtualClock::new();
        let detour = GeoPoint::new(33.2790, 131.5040);
        let provider = CountingProvider::new(vec![detour, GOAL]);
        let mut route = machine(provider, &clock);

        route.on_position(START);
        route.settle(WAIT);
        route.on_position(detour);
        assert_eq!(route.active_waypoint(), Some(GOAL));

        clock.advance_secs(30.0);
        assert!(route.request_route(START));
        assert!(route.settle(WAIT));
        assert_eq!(
            route.state(),
            &RouteState::Navigating {
                waypoints: vec![detour, GOAL],
                index: 0,
                closest: None,
            }
        );
    }

    #[test]
    fn failed_fetch_stays_idle_and_retries_later() {
        let clock = VirtualClock::new();
        let provider = CountingProvider::new(vec![]);
        let log = LogRing::new(4);
        let mut route = RouteStateMachine::new(
            GOAL,
            provider.clone(),
            Arc::new(clock.clone()),
            RouteSettings::default(),
            log.clone(),
        );

        route.on_position(START);
        assert!(!route.settle(WAIT));
        assert_eq!(route.state(), &RouteState::Idle);
        assert!(log.last().unwrap().contains("failed"));

        // still cooling down
        route.on_position(START);
        assert!(!route.is_fetching());

        clock.advance_secs(16.0);
        route.on_position(START);
        assert!(route.is_fetching());
        route.settle(WAIT);
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn state_reads_nicely() {
        assert_eq!(RouteState::Idle.to_string(), "idle");
        assert_eq!(
            RouteState::Navigating {
                waypoints: vec![START, GOAL],
                index: 1,
                closest: None
            }
            .to_string(),
            "navigating 2/2"
        );
    }
}
