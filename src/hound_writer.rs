//! Writes the rendered guidance audio to a WAV file using hound. The
//! encoder runs as a [`Component`] on its own thread so that disk I/O never
//! holds up a frame.

use crate::audio_output::{AudioBackend, AudioError, AudioSink};
use crate::component::{run_component, Component, ComponentError};
use hound::{Error as HoundError, SampleFormat, WavSpec, WavWriter};

use std::{
    fmt,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::mpsc::{channel, Receiver, Sender, TryRecvError},
    thread::JoinHandle,
};

type StereoBlock = (Vec<f32>, Vec<f32>);

/// Stereo 32-bit float at the given rate.
pub fn stereo_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// A component wrapper for the hound WavWriter that appends interleaved
/// stereo blocks to a file
pub struct HoundWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
}

impl HoundWriter {
    /// Creates (or truncates) the file at `path` and prepares to write it
    pub fn new(path: impl AsRef<Path>, wave_spec: WavSpec) -> Result<Self, HoundError> {
        let path = path.as_ref().to_path_buf();
        let writer = WavWriter::create(&path, wave_spec)?;

        Ok(Self {
            writer: Some(writer),
            path,
        })
    }
}

impl Component for HoundWriter {
    type InData = StereoBlock;
    type OutData = Result<(), HoundError>;

    /// Appends one block of audio data to the output WAV file
    fn convert(&mut self, input: StereoBlock) -> Result<(), HoundError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let (left_samps, right_samps) = input;

        // interleave the two streams
        for (left, right) in std::iter::zip(left_samps, right_samps) {
            writer.write_sample(left)?;
            writer.write_sample(right)?;
        }

        // keep the header valid in case we never get to finalize
        writer.flush()
    }

    /// Finishes the WAV header. Dropping the WavWriter would do the same,
    /// but swallow any error.
    fn finalize(&mut self) -> Result<(), ComponentError> {
        match self.writer.take() {
            Some(writer) => writer.finalize().map_err(ComponentError::from),
            None => Ok(()),
        }
    }
}

impl fmt::Display for HoundWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HoundWriter({})", self.path.display())
    }
}

/// An [`AudioBackend`] that records to a WAV file.
#[derive(Debug, Clone)]
pub struct WavBackend {
    path: PathBuf,
}

impl WavBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AudioBackend for WavBackend {
    fn open(&mut self, sample_rate: u32) -> Result<Box<dyn AudioSink>, AudioError> {
        let writer = HoundWriter::new(&self.path, stereo_spec(sample_rate))?;
        let (block_tx, block_rx) = channel::<StereoBlock>();
        let (result_tx, result_rx) = channel::<Result<(), HoundError>>();
        let handle = run_component(Box::new(writer), block_rx, result_tx)?;

        Ok(Box::new(WavSink {
            blocks: Some(block_tx),
            results: result_rx,
            handle: Some(handle),
        }))
    }
}

/// Feeds a running [`HoundWriter`].
struct WavSink {
    blocks: Option<Sender<StereoBlock>>,
    results: Receiver<Result<(), HoundError>>,
    handle: Option<JoinHandle<()>>,
}

impl WavSink {
    /// Surfaces the first write error reported so far, if any.
    fn check_results(&self) -> Result<(), AudioError> {
        loop {
            match self.results.try_recv() {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => return Err(error.into()),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, left: &[f32], right: &[f32]) -> Result<(), AudioError> {
        let Some(blocks) = &self.blocks else {
            return Err(AudioError::Closed);
        };
        blocks
            .send((left.to_vec(), right.to_vec()))
            .map_err(|_| AudioError::Unavailable("wav writer thread is gone".to_owned()))?;
        self.check_results()
    }

    fn close(&mut self) -> Result<(), AudioError> {
        // dropping the sender lets the writer finalize and exit
        if self.blocks.take().is_none() {
            return Err(AudioError::Closed);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(ComponentError::Panicked("HoundWriter".to_owned()).into());
            }
        }
        self.check_results()
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if self.blocks.is_some() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use std::f32::consts::PI;
    use std::sync::mpsc::channel;

    const SAMP_RATE: u32 = 44100;
    const A: f32 = 440.0;

    fn create_sine_wave(frames: usize, note: f32) -> Vec<f32> {
        (0..frames)
            .map(|x| (x as f32 / SAMP_RATE as f32 * note * 2.0 * PI).sin() * 0.5)
            .collect()
    }

    fn read_back(path: &Path) -> (Vec<f32>, Vec<f32>) {
        let mut reader = WavReader::open(path).unwrap();
        assert_eq!(reader.spec(), stereo_spec(SAMP_RATE));
        let all_samps = reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, hound::Error>>()
            .unwrap();
        let left = all_samps.iter().step_by(2).copied().collect();
        let right = all_samps.iter().skip(1).step_by(2).copied().collect();
        (left, right)
    }

    /// Writes one block through a HoundWriter running as a Component thread
    /// and reads it back.
    #[test]
    fn hound_writer_component_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sine.wav");

        let left_samps = create_sine_wave(100, A);
        let right_samps = create_sine_wave(100, A * 1.5);

        let writer = HoundWriter::new(&path, stereo_spec(SAMP_RATE)).unwrap();
        let (hound_tx, hound_rx) = channel::<StereoBlock>();
        let (result_tx, result_rx) = channel::<Result<(), HoundError>>();
        let handle = run_component(Box::new(writer), hound_rx, result_tx).unwrap();

        hound_tx
            .send((left_samps.clone(), right_samps.clone()))
            .unwrap();
        assert!(result_rx.recv().unwrap().is_ok());

        drop(hound_tx);
        handle.join().unwrap();

        assert_eq!(read_back(&path), (left_samps, right_samps));
    }

    #[test]
    fn wav_backend_writes_every_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guidance.wav");

        let mut backend = WavBackend::new(&path);
        let mut sink = backend.open(SAMP_RATE).unwrap();

        let block = create_sine_wave(256, A);
        for _ in 0..4 {
            sink.write(&block, &block).unwrap();
        }
        sink.close().unwrap();
        assert!(matches!(sink.close(), Err(AudioError::Closed)));

        let (left, right) = read_back(&path);
        assert_eq!(left.len(), 1024);
        assert_eq!(left, right);
        assert_eq!(&left[256..512], &block[..]);
    }

    #[test]
    fn unwritable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = WavBackend::new(dir.path().join("missing").join("out.wav"));
        assert!(matches!(
            backend.open(SAMP_RATE),
            Err(AudioError::HoundError(_))
        ));
    }
}
