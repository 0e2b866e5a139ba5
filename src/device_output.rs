//! Plays guidance audio on the default output device through cpal.
//!
//! The engine writes frames into a lock-free ring and the device callback
//! pulls them out, playing silence whenever the ring runs dry. The cpal
//! stream lives on its own thread for as long as the sink is open, since a
//! stream cannot be moved between threads on every platform.

use crate::audio_output::{AudioBackend, AudioError, AudioSink};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig, StreamError,
};
use log::{debug, info, warn};
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Seconds of audio the ring between the engine and the device holds.
const RING_SECONDS: f64 = 0.5;

/// Longest a single write waits for the device to make room.
const WRITE_PATIENCE: Duration = Duration::from_millis(250);

const POLL: Duration = Duration::from_millis(1);

type Frame = (f32, f32);

/// Opens the host's default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
        let capacity = ring_capacity(sample_rate);
        let (producer, consumer) = RingBuffer::new(capacity);
        let failed = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stream_failed = Arc::clone(&failed);

        let thread = thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || {
                let stream = match open_stream(sample_rate, consumer, stream_failed) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_ok() {
                    // returns once the sink drops its end
                    let _ = shutdown_rx.recv();
                }
                drop(stream);
            })
            .map_err(|e| unavailable(format!("could not start the audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                let sink = RingSink::new(producer, sample_rate, failed).with_stream(shutdown_tx, thread);
                Ok(Box::new(sink))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(unavailable("audio thread exited before the device opened"))
            }
        }
    }
}

fn unavailable(why: impl Display) -> AudioError {
    AudioError::Unavailable(why.to_string())
}

fn ring_capacity(sample_rate: u32) -> usize {
    ((sample_rate as f64 * RING_SECONDS) as usize).max(1024)
}

fn open_stream(
    sample_rate: u32,
    consumer: Consumer<Frame>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| unavailable("no default output device"))?;
    let name = device.name().unwrap_or_else(|_| "unknown device".to_string());

    // Prefer f32 stereo, but anything that runs at our rate will do
    let supported = device
        .supported_output_configs()
        .map_err(unavailable)?
        .filter(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
        .max_by_key(|c| (c.sample_format() == SampleFormat::F32, c.channels() >= 2))
        .ok_or_else(|| unavailable(format!("{} cannot play at {} Hz", name, sample_rate)))?
        .with_sample_rate(SampleRate(sample_rate));
    let config = supported.config();

    info!(
        "Playing on {}: {} channels, {} Hz, {:?}",
        name,
        config.channels,
        sample_rate,
        supported.sample_format()
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, failed),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, failed),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, failed),
        other => Err(unavailable(format!("unsupported sample format {:?}", other))),
    }?;
    stream.play().map_err(unavailable)?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: Consumer<Frame>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_interleaved(&mut consumer, data, channels)
            },
            move |err| {
                warn!("Audio device error: {}", err);
                if let StreamError::DeviceNotAvailable = err {
                    failed.store(true, Ordering::Release);
                }
            },
            None,
        )
        .map_err(unavailable)
}

/// Moves queued frames into an interleaved device buffer, padding with
/// silence when the ring runs dry. A mono device gets both channels mixed;
/// channels past the second stay silent.
fn fill_interleaved<T>(consumer: &mut Consumer<Frame>, data: &mut [T], channels: usize)
where
    T: Sample + FromSample<f32>,
{
    for frame in data.chunks_mut(channels.max(1)) {
        let (left, right) = consumer.pop().unwrap_or((0.0, 0.0));
        match frame {
            [mono] => *mono = T::from_sample(0.5 * (left + right)),
            [l, r, rest @ ..] => {
                *l = T::from_sample(left);
                *r = T::from_sample(right);
                for sample in rest {
                    *sample = T::EQUILIBRIUM;
                }
            }
            [] => {}
        }
    }
}

/// The engine's end of the ring.
struct RingSink {
    producer: Producer<Frame>,
    capacity: usize,
    drain_limit: Duration,
    failed: Arc<AtomicBool>,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl RingSink {
    fn new(producer: Producer<Frame>, sample_rate: u32, failed: Arc<AtomicBool>) -> Self {
        let capacity = producer.slots();
        let drain_limit =
            Duration::from_secs_f64(capacity as f64 / sample_rate.max(1) as f64) + WRITE_PATIENCE;
        Self {
            producer,
            capacity,
            drain_limit,
            failed,
            shutdown: None,
            thread: None,
            closed: false,
        }
    }

    fn with_stream(mut self, shutdown: mpsc::Sender<()>, thread: JoinHandle<()>) -> Self {
        self.shutdown = Some(shutdown);
        self.thread = Some(thread);
        self
    }

    fn check(&self) -> Result<(), AudioError> {
        if self.failed.load(Ordering::Acquire) || self.producer.is_abandoned() {
            return Err(unavailable("the output device went away"));
        }
        Ok(())
    }

    fn queued(&self) -> usize {
        self.capacity - self.producer.slots()
    }
}

impl AudioSink for RingSink {
    fn write(&mut self, left: &[f32], right: &[f32]) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        self.check()?;

        let deadline = Instant::now() + WRITE_PATIENCE;
        let mut dropped = 0;
        for frame in left.iter().copied().zip(right.iter().copied()) {
            let mut frame = frame;
            loop {
                match self.producer.push(frame) {
                    Ok(()) => break,
                    Err(PushError::Full(back)) if Instant::now() < deadline => {
                        frame = back;
                        self.check()?;
                        spin_sleep::sleep(POLL);
                    }
                    Err(PushError::Full(_)) => {
                        dropped += 1;
                        break;
                    }
                }
            }
        }

        if dropped > 0 {
            debug!("Output device fell behind, dropped {} frames", dropped);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // let the device play out what is still queued
        let deadline = Instant::now() + self.drain_limit;
        while self.queued() > 0 && self.check().is_ok() && Instant::now() < deadline {
            spin_sleep::sleep(POLL);
        }

        self.shutdown = None;
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| unavailable("the audio thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for RingSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Could not close the output device: {}", e);
        }
    }
}
