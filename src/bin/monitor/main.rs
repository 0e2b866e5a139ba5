//! Walks a simulated pedestrian through Beppu in real time and shows what
//! the guidance loop makes of it. Quit with `q`.

mod gui;

use std::{
    error::Error,
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use soundcompass::{
    audio_engine::AudioEngine,
    audio_output::NullBackend,
    clock::SystemClock,
    config::GuidanceConfig,
    dummy_sdm::DummySdm,
    geodesy::GeoPoint,
    guidance::{GuidanceLoop, GuidanceSnapshot, Session},
    log_ring::LogRing,
    route_provider::FixedRouteProvider,
    scheduler::FrameScheduler,
};

use gui::engage_gui;

const START: GeoPoint = GeoPoint::new(33.2800, 131.5000);
const DESTINATION: GeoPoint = GeoPoint::new(33.2820, 131.5064);

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = GuidanceConfig::default();
    let route = vec![
        GeoPoint::new(33.2806, 131.5021),
        GeoPoint::new(33.2815, 131.5043),
        DESTINATION,
    ];

    // the walker is led slightly astray so that rerouting shows up
    let sdm = DummySdm::builder(START)
        .path(route.clone())
        .speed(4.0)
        .heading_offset(8.0)
        .noise(4.0, 3.0)
        .seed(2024)
        .build();

    let clock = Arc::new(SystemClock::new());
    let log = LogRing::new(config.log_depth);
    let audio = AudioEngine::new(
        config.audio.clone(),
        Box::new(NullBackend),
        clock.clone(),
        log.clone(),
    );
    let guidance = GuidanceLoop::new(
        &config,
        DESTINATION,
        Arc::new(FixedRouteProvider::new(route)),
        Arc::new(Mutex::new(audio)),
        clock,
        log,
    );
    let mut session = Session::new(
        guidance,
        sdm,
        FrameScheduler::with_frame_rate(config.frame_rate),
    );
    let cancel = session.cancel_handle();

    let latest: Arc<Mutex<Option<GuidanceSnapshot>>> = Arc::new(Mutex::new(None));
    let publish = Arc::clone(&latest);
    let session_thread = thread::spawn(move || {
        session.run_with(|guidance, _chime| {
            *publish.lock().unwrap_or_else(PoisonError::into_inner) = Some(guidance.snapshot());
        });
    });

    let result = engage_gui(
        START,
        Box::new(move || {
            latest
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }),
    );

    cancel.cancel();
    if session_thread.join().is_err() {
        log::warn!("Guidance thread panicked");
    }
    result
}
