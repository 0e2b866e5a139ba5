//! Where rendered audio goes. The engine only ever talks to an
//! [`AudioBackend`], which hands out an [`AudioSink`] once the sample rate
//! is known.

use crate::component::ComponentError;

use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

/// Opens audio outputs.
pub trait AudioBackend: Send {
    /// Opens a stereo output running at `sample_rate`.
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn AudioSink>, AudioError>;
}

/// An open stereo output.
pub trait AudioSink: Send {
    /// Appends one block of frames; both channels have the same length.
    fn write(&mut self, left: &[f32], right: &[f32]) -> Result<(), AudioError>;

    /// Flushes and closes the output. Writes after this fail.
    fn close(&mut self) -> Result<(), AudioError>;
}

#[derive(Debug)]
pub enum AudioError {
    /// The WAV encoder failed.
    HoundError(hound::Error),

    /// The writer thread could not be started or went away.
    ComponentError(ComponentError),

    /// No output device or file could be opened.
    Unavailable(String),

    /// The sink was already closed.
    Closed,
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            AudioError::HoundError(error) => Cow::from(format!("wav error: {}", error)),
            AudioError::ComponentError(error) => Cow::from(format!("writer error: {}", error)),
            AudioError::Unavailable(why) => Cow::from(format!("audio unavailable: {}", why)),
            AudioError::Closed => Cow::from("audio output already closed"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for AudioError {}

impl From<hound::Error> for AudioError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

impl From<ComponentError> for AudioError {
    fn from(value: ComponentError) -> Self {
        Self::ComponentError(value)
    }
}

/// Discards everything. Lets the guidance loop run without any output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

struct NullSink;

impl AudioBackend for NullBackend {
    fn open(&mut self, _sample_rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
        Ok(Box::new(NullSink))
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, _left: &[f32], _right: &[f32]) -> Result<(), AudioError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// What a [`MemoryBackend`] has captured.
#[derive(Debug, Default, Clone)]
pub struct Recording {
    pub sample_rate: u32,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub opened: usize,
    pub closed: usize,
}

/// Keeps everything written to it in memory. Clones share the recording,
/// so one clone can go into the engine while another is inspected.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    recording: Arc<Mutex<Recording>>,
}

struct MemorySink {
    recording: Arc<Mutex<Recording>>,
    open: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything captured so far.
    pub fn recording(&self) -> Recording {
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of stereo frames captured so far.
    pub fn frames(&self) -> usize {
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .left
            .len()
    }
}

impl AudioBackend for MemoryBackend {
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
        let mut recording = self.recording.lock().unwrap_or_else(PoisonError::into_inner);
        recording.sample_rate = sample_rate;
        recording.opened += 1;
        Ok(Box::new(MemorySink {
            recording: Arc::clone(&self.recording),
            open: true,
        }))
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, left: &[f32], right: &[f32]) -> Result<(), AudioError> {
        if !self.open {
            return Err(AudioError::Closed);
        }
        let mut recording = self.recording.lock().unwrap_or_else(PoisonError::into_inner);
        recording.left.extend_from_slice(left);
        recording.right.extend_from_slice(right);
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if !self.open {
            return Err(AudioError::Closed);
        }
        self.open = false;
        self.recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed += 1;
        Ok(())
    }
}
