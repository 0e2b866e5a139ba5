//! Guides a listener to a destination by sound.
//!
//! `simulate` walks a virtual pedestrian there in simulated time, which is
//! handy together with `--out` to listen back to what a walk sounds like.
//! `serial` reads a real compass/GPS device and guides in real time, out of
//! the sound card, until a key is pressed.

use clap::Parser;
use soundcompass::{
    args::{
        CommandTask::{Serial, Simulate},
        CompassArgs, SerialCommand, SimulateCommand,
    },
    audio_engine::AudioEngine,
    audio_output::{AudioBackend, NullBackend},
    clock::{Clock, SystemClock, VirtualClock},
    config::GuidanceConfig,
    dummy_sdm::SimulatedWalker,
    geodesy::distance,
    guidance::{GuidanceLoop, Session},
    gui::{device_selector, fold_until_stop},
    hound_writer::WavBackend,
    log_ring::LogRing,
    route::{RouteEvent, RouteState},
    route_provider::{DirectionsRouteProvider, FixedRouteProvider, RouteProvider},
    scheduler::FrameScheduler,
    sdm::{pump_lines, Sdm},
};

use log::{info, warn};
use serial2::SerialPort;
use std::{
    error::Error,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

// Example:
// cargo run --bin soundcompass --
//                            --dest-lat  33.2820
//                            --dest-lon  131.5064
//                            --out       walk.wav
//                            simulate
//                            --start-lat 33.2800
//                            --start-lon 131.5000

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CompassArgs::parse();
    let config = args.load_config()?;

    match &args.command {
        Simulate(cmd) => simulate(&args, cmd, &config),
        Serial(cmd) => serial(&args, cmd, &config),
    }
}

fn route_provider(args: &CompassArgs) -> Result<Arc<dyn RouteProvider>, Box<dyn Error>> {
    if let Some(path) = &args.route {
        return Ok(Arc::new(FixedRouteProvider::from_path(path)?));
    }
    if let Some(token) = &args.directions_token {
        let mut provider = DirectionsRouteProvider::new(token.as_str());
        if let Some(url) = &args.directions_url {
            provider = provider.with_base_url(url.as_str());
        }
        return Ok(Arc::new(provider));
    }
    Ok(Arc::new(FixedRouteProvider::direct()))
}

/// A WAV file when `--out` is given. Otherwise a live session plays on the
/// sound card and a simulated one renders into the void.
fn audio_backend(args: &CompassArgs, live: bool) -> Box<dyn AudioBackend> {
    match &args.outfile {
        Some(path) => Box::new(WavBackend::new(path)),
        None if live => device_backend(),
        None => Box::new(NullBackend),
    }
}

#[cfg(feature = "device-audio")]
fn device_backend() -> Box<dyn AudioBackend> {
    Box::new(soundcompass::device_output::CpalBackend::new())
}

#[cfg(not(feature = "device-audio"))]
fn device_backend() -> Box<dyn AudioBackend> {
    warn!("Built without device-audio, guidance will be silent");
    Box::new(NullBackend)
}

fn guidance_loop(
    args: &CompassArgs,
    config: &GuidanceConfig,
    provider: Arc<dyn RouteProvider>,
    backend: Box<dyn AudioBackend>,
    clock: Arc<dyn Clock>,
    log: &LogRing,
) -> GuidanceLoop {
    let audio = AudioEngine::new(
        config.audio.clone(),
        backend,
        Arc::clone(&clock),
        log.clone(),
    );
    GuidanceLoop::new(
        config,
        args.destination(),
        provider,
        Arc::new(Mutex::new(audio)),
        clock,
        log.clone(),
    )
}

/// Walks the route the provider plans, frame by frame, without waiting for
/// the wall clock.
fn simulate(
    args: &CompassArgs,
    cmd: &SimulateCommand,
    config: &GuidanceConfig,
) -> Result<(), Box<dyn Error>> {
    let provider = route_provider(args)?;
    let destination = args.destination();

    // the walker follows its own copy of the route so that it can be led
    // astray with a heading offset while the guidance loop reroutes
    let path = match provider.fetch(cmd.start(), destination) {
        Ok(path) => path,
        Err(e) => {
            warn!("Walker could not plan a route, walking straight: {}", e);
            vec![destination]
        }
    };
    let mut walker = SimulatedWalker::new(cmd.start(), path, cmd.seed);
    walker.set_speed(cmd.speed);
    walker.set_heading_offset(cmd.heading_offset);
    walker.set_noise(cmd.heading_noise, cmd.position_noise);

    let clock = VirtualClock::new();
    let log = LogRing::new(config.log_depth);
    let mut guidance = guidance_loop(
        args,
        config,
        provider,
        audio_backend(args, false),
        Arc::new(clock.clone()),
        &log,
    );
    guidance.start();

    let dt = config.frame_interval();
    let mut elapsed = Duration::ZERO;
    let limit = Duration::try_from_secs_f64(cmd.seconds)
        .map_err(|e| format!("--seconds {} is not a usable duration: {}", cmd.seconds, e))?;
    let mut chimes = 0;

    while elapsed < limit {
        for event in walker.advance(dt) {
            let secs = elapsed.as_secs_f64();
            match guidance.dispatch(event) {
                Some(RouteEvent::Completed) => info!("Route completed after {:.1} s", secs),
                Some(other) => info!("{:?} at {:.1} s", other, secs),
                None => {}
            }
        }
        if guidance.tick(dt).is_some() {
            chimes += 1;
        }
        clock.advance(dt);
        elapsed += dt;

        if walker.arrived() && *guidance.route_state() == RouteState::Completed {
            break;
        }
    }
    guidance.stop();

    let remaining = distance(walker.position(), destination);
    println!(
        "Walked {:.1} s, {} chimes, route {}, {:.1} m from the destination",
        elapsed.as_secs_f64(),
        chimes,
        guidance.route_state(),
        remaining
    );
    if let Some(path) = &args.outfile {
        println!("Audio written to {}", path.display());
    }
    Ok(())
}

/// Guides from a serial compass/GPS device until a key is pressed.
fn serial(
    args: &CompassArgs,
    cmd: &SerialCommand,
    config: &GuidanceConfig,
) -> Result<(), Box<dyn Error>> {
    let device = match &cmd.device {
        Some(device) => device.clone(),
        None => match device_selector(SerialPort::available_ports()?)? {
            Some(device) => device,
            None => {
                println!("No device selected");
                return Ok(());
            }
        },
    };

    // Try to open the requested port and set its read timeout to infinity
    // (well, about 584,942,417,355 years, which is close enough)
    let mut port = SerialPort::open(&device, cmd.baud)?;
    port.set_read_timeout(Duration::MAX)?;
    info!("Reading sensors from {}", device.display());

    let sdm = Sdm::new();
    let feed = sdm.clone();
    let _reader = thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || {
            if let Err(e) = pump_lines(port, &feed) {
                warn!("Serial device closed: {}", e);
            }
        })?;

    let log = LogRing::new(config.log_depth);
    let provider = route_provider(args)?;
    let guidance = guidance_loop(
        args,
        config,
        provider,
        audio_backend(args, !cmd.mute),
        Arc::new(SystemClock::new()),
        &log,
    );
    let session = Session::new(
        guidance,
        sdm,
        FrameScheduler::with_frame_rate(config.frame_rate),
    );
    session.start();

    let status = log.clone();
    let mut session = fold_until_stop(
        "Guiding",
        session,
        |mut session| {
            session.step();
            session
        },
        move || status.recent(),
    )?;
    session.stop();

    let snapshot = session.guidance().snapshot();
    println!(
        "Stopped: route {}, {} chimes",
        snapshot.route, snapshot.chimes_fired
    );
    Ok(())
}
