use crate::geodesy::{bearing, destination_point, distance, normalize_degrees, Degree, GeoPoint};
use crate::sensor_data_manager::*;
use rand::prelude::*;
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Waypoints closer than this are considered passed by the walker.
const WALKER_REACH_M: f64 = 3.0;

/// A pedestrian following a fixed path, producing the noisy compass samples
/// and position fixes a phone would. Time only moves through
/// [`SimulatedWalker::advance`], so it works equally well with a virtual
/// clock and inside [`DummySdm`]'s real-time thread.
#[derive(Debug, Clone)]
pub struct SimulatedWalker {
    position: GeoPoint,
    path: VecDeque<GeoPoint>,
    facing: Degree,
    speed: f64,
    heading_offset: Degree,
    heading_noise: Degree,
    position_noise: f64,
    sample_interval: Duration,
    fix_interval: Duration,
    since_sample: Duration,
    since_fix: Duration,
    rng: StdRng,
}

impl SimulatedWalker {
    /// A walker standing at `start` that will walk `path` in order. Seeded
    /// so a run can be repeated exactly.
    pub fn new(start: GeoPoint, path: Vec<GeoPoint>, seed: u64) -> Self {
        let facing = path.first().map_or(0.0, |&p| bearing(start, p));
        Self {
            position: start,
            path: path.into(),
            facing,
            speed: 1.4,
            heading_offset: 0.0,
            heading_noise: 0.0,
            position_noise: 0.0,
            sample_interval: Duration::from_millis(50),
            fix_interval: Duration::from_secs(1),
            since_sample: Duration::ZERO,
            // first fix goes out on the first step
            since_fix: Duration::from_secs(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Walking speed, in meters per second.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(0.0);
    }

    /// A constant error added to every compass sample, in degrees.
    pub fn set_heading_offset(&mut self, offset: Degree) {
        self.heading_offset = offset;
    }

    /// Maximum random jitter on compass samples (degrees) and fixes (meters).
    pub fn set_noise(&mut self, heading_noise: Degree, position_noise: f64) {
        self.heading_noise = heading_noise.abs();
        self.position_noise = position_noise.abs();
    }

    /// Where the walker actually is, without any noise.
    pub fn position(&self) -> GeoPoint {
        self.position
    }

    /// Whether every point of the path has been reached.
    pub fn arrived(&self) -> bool {
        self.path.is_empty()
    }

    /// Walks for `dt` and returns whatever the sensors report meanwhile.
    pub fn advance(&mut self, dt: Duration) -> Vec<SensorEvent> {
        let mut step = self.speed * dt.as_secs_f64();
        while let Some(&target) = self.path.front() {
            let remaining = distance(self.position, target);
            if remaining <= WALKER_REACH_M.max(step) {
                self.position = target;
                step -= remaining.min(step);
                self.path.pop_front();
                continue;
            }
            self.facing = bearing(self.position, target);
            self.position = destination_point(self.position, self.facing, step);
            break;
        }

        let mut events = Vec::new();

        self.since_sample += dt;
        if self.since_sample >= self.sample_interval {
            self.since_sample = Duration::ZERO;
            let jitter = self.jitter(self.heading_noise);
            let heading = normalize_degrees(self.facing + self.heading_offset + jitter);
            events.push(SensorEvent::Orientation(OrientationSample::Compass(heading)));
        }

        self.since_fix += dt;
        if self.since_fix >= self.fix_interval {
            self.since_fix = Duration::ZERO;
            let direction = self.rng.gen_range(0.0..360.0);
            let offset = self.jitter(self.position_noise).abs();
            events.push(SensorEvent::Position(destination_point(
                self.position,
                direction,
                offset,
            )));
        }

        events
    }

    fn jitter(&mut self, amount: f64) -> f64 {
        self.rng.gen_range(-amount..=amount)
    }
}

enum Signal {
    Speed(f64),
    HeadingOffset(f64),
    Noise(f64, f64),
    Stop,
}

/// A [`SensorDataManager`] fed by a [`SimulatedWalker`] running in real
/// time on its own thread.
pub struct DummySdm {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
    msgs: Arc<Mutex<VecDeque<SensorEvent>>>,
    truth: Arc<Mutex<GeoPoint>>,
}

/// Collects the settings of a [`DummySdm`] before its thread starts.
pub struct DummySdmBuilder {
    start: GeoPoint,
    path: Vec<GeoPoint>,
    seed: u64,
    speed: f64,
    heading_offset: f64,
    heading_noise: f64,
    position_noise: f64,
}

impl DummySdmBuilder {
    pub fn path(mut self, path: Vec<GeoPoint>) -> Self {
        self.path = path;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }
    pub fn heading_offset(mut self, offset: f64) -> Self {
        self.heading_offset = offset;
        self
    }
    pub fn noise(mut self, heading_noise: f64, position_noise: f64) -> Self {
        self.heading_noise = heading_noise;
        self.position_noise = position_noise;
        self
    }

    /// Spawns the walker thread.
    pub fn build(self) -> DummySdm {
        let mut walker = SimulatedWalker::new(self.start, self.path, self.seed);
        walker.set_speed(self.speed);
        walker.set_heading_offset(self.heading_offset);
        walker.set_noise(self.heading_noise, self.position_noise);
        DummySdm::spawn(walker)
    }
}

impl DummySdm {
    /// Starts configuring a walker standing at `start`.
    pub fn builder(start: GeoPoint) -> DummySdmBuilder {
        DummySdmBuilder {
            start,
            path: Vec::new(),
            seed: 0,
            speed: 1.4,
            heading_offset: 0.0,
            heading_noise: 0.0,
            position_noise: 0.0,
        }
    }

    fn spawn(mut walker: SimulatedWalker) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let msgs = Arc::new(Mutex::new(VecDeque::new()));
        let truth = Arc::new(Mutex::new(walker.position()));
        let th_msgs = Arc::clone(&msgs);
        let th_truth = Arc::clone(&truth);

        let handle = thread::spawn(move || {
            let mut last = Instant::now();
            loop {
                match rx.try_recv() {
                    Ok(Signal::Speed(speed)) => walker.set_speed(speed),
                    Ok(Signal::HeadingOffset(offset)) => walker.set_heading_offset(offset),
                    Ok(Signal::Noise(h, p)) => walker.set_noise(h, p),
                    Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                    Err(mpsc::TryRecvError::Empty) => {}
                }
                let events = walker.advance(last.elapsed());
                last = Instant::now();
                th_msgs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(events);
                *th_truth.lock().unwrap_or_else(PoisonError::into_inner) = walker.position();
                thread::sleep(Duration::from_millis(20));
            }
        });

        DummySdm {
            handle: Some(handle),
            tx,
            msgs,
            truth,
        }
    }

    /// Where the simulated walker really is, for plotting against the fixes.
    pub fn true_position(&self) -> GeoPoint {
        *self.truth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // A send only fails once the thread is gone, at which point there is
    // nothing left to configure.
    pub fn set_speed(&self, speed: f64) {
        let _ = self.tx.send(Signal::Speed(speed));
    }
    pub fn set_heading_offset(&self, offset: f64) {
        let _ = self.tx.send(Signal::HeadingOffset(offset));
    }
    pub fn set_noise(&self, heading_noise: f64, position_noise: f64) {
        let _ = self.tx.send(Signal::Noise(heading_noise, position_noise));
    }

    /// Stops the walker thread and waits for it. Safe to call again.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                log::warn!("Simulated walker thread panicked");
            }
        }
    }
}

impl Iterator for DummySdm {
    type Item = SensorEvent;
    fn next(&mut self) -> Option<Self::Item> {
        self.msgs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl SensorDataManager for DummySdm {
    fn clear(&mut self) {
        self.msgs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn close(&mut self) {
        self.stop();
        self.clear();
    }
}

impl Drop for DummySdm {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: GeoPoint = GeoPoint::new(33.2800, 131.5000);
    const GOAL: GeoPoint = GeoPoint::new(33.2820, 131.5064);

    fn positions(events: &[SensorEvent]) -> Vec<GeoPoint> {
        events
            .iter()
            .filter_map(|e| match e {
                SensorEvent::Position(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn walks_to_the_end_of_its_path() {
        let mut walker = SimulatedWalker::new(START, vec![GOAL], 7);
        walker.set_speed(10.0);
        for _ in 0..200 {
            walker.advance(Duration::from_millis(500));
        }
        assert!(walker.arrived());
        assert_eq!(walker.position(), GOAL);
    }

    #[test]
    fn reports_fix_once_per_second() {
        let mut walker = SimulatedWalker::new(START, vec![GOAL], 7);
        let mut events = Vec::new();
        for _ in 0..60 {
            events.extend(walker.advance(Duration::from_millis(50)));
        }
        // one immediately, then every second over three seconds
        assert_eq!(positions(&events).len(), 3);
    }

    #[test]
    fn compass_faces_the_path_plus_offset() {
        let mut walker = SimulatedWalker::new(START, vec![GOAL], 7);
        walker.set_heading_offset(90.0);
        let events = walker.advance(Duration::from_millis(100));
        let expected = normalize_degrees(bearing(START, GOAL) + 90.0);
        let heading = events.iter().find_map(|e| match e {
            SensorEvent::Orientation(s) => s.heading(),
            _ => None,
        });
        let heading = heading.unwrap();
        assert!((heading - expected).abs() < 0.5, "{heading} vs {expected}");
    }

    #[test]
    fn position_noise_stays_bounded() {
        let mut walker = SimulatedWalker::new(START, vec![], 11);
        walker.set_noise(5.0, 8.0);
        let mut events = Vec::new();
        for _ in 0..20 {
            events.extend(walker.advance(Duration::from_secs(1)));
        }
        let fixes = positions(&events);
        assert!(!fixes.is_empty());
        for fix in fixes {
            assert!(distance(fix, START) <= 8.0 + 1e-6);
        }
    }

    #[test]
    fn dummy_sdm_produces_events_and_stops() {
        let mut sdm = DummySdm::builder(START).path(vec![GOAL]).seed(3).build();
        thread::sleep(Duration::from_millis(120));
        sdm.stop();
        sdm.stop();
        assert!(sdm.by_ref().count() > 0);
        assert!(distance(sdm.true_position(), START) < 5.0);
    }
}
