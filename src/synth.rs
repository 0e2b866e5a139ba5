//! Sample-level building blocks for the guidance sound: oscillators,
//! smoothed parameters, equal-power panning, the continuous drone and the
//! one-shot chime voices.
//!
//! Everything here works one stereo frame at a time and knows nothing about
//! headings or geography.

use std::f64::consts::TAU;

/// A parameter that glides towards its target with a one-pole lowpass, so
/// that changes never reach the output as a step.
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    value: f32,
    target: f32,
    coeff: f32,
}

impl SmoothedParam {
    /// Starts at `value`, reaching about 63% of any new target after
    /// `time_constant` seconds.
    pub fn new(value: f32, time_constant: f32, sample_rate: u32) -> Self {
        let mut param = Self {
            value,
            target: value,
            coeff: 1.0,
        };
        param.set_time_constant(time_constant, sample_rate);
        param
    }

    /// Changes how quickly the parameter follows its target. A time
    /// constant of zero makes it jump.
    pub fn set_time_constant(&mut self, time_constant: f32, sample_rate: u32) {
        let samples = time_constant * sample_rate as f32;
        self.coeff = if samples > 0.0 {
            1.0 - (-1.0 / samples).exp()
        } else {
            1.0
        };
    }

    pub fn set_target(&mut self, target: f32) {
        if target.is_finite() {
            self.target = target;
        }
    }

    /// Drops the pending target and holds the current value.
    pub fn cancel(&mut self) {
        self.target = self.value;
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Advances one sample and returns the new value.
    pub fn next(&mut self) -> f32 {
        self.value += (self.target - self.value) * self.coeff;
        self.value
    }
}

/// Oscillator shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
}

/// A free-running phase-accumulating oscillator.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f64,
    increment: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: u32) -> Self {
        Self {
            waveform,
            phase: 0.0,
            increment: frequency / sample_rate.max(1) as f64,
        }
    }

    /// Next sample in `[-1, 1]`.
    pub fn next(&mut self) -> f32 {
        let out = match self.waveform {
            Waveform::Sine => (self.phase * TAU).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
        };
        self.phase = (self.phase + self.increment).fract();
        out as f32
    }
}

/// Splits a mono signal between two channels at constant power. `pan` runs
/// from -1 (hard left) to 1 (hard right); 0 gives both channels `1/√2`.
pub fn equal_power_pan(pan: f32) -> (f32, f32) {
    let pan = if pan.is_finite() {
        pan.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// The continuous bed of sound: a root, a slightly detuned fifth and a sub
/// octave, sharing one smoothed gain and one smoothed pan.
#[derive(Debug, Clone)]
pub struct Drone {
    voices: Vec<(Oscillator, f32)>,
    gain: SmoothedParam,
    pan: SmoothedParam,
    sample_rate: u32,
}

impl Drone {
    /// A silent drone rooted at `frequency` whose gain and pan glide with
    /// the given time constant.
    pub fn new(frequency: f64, sample_rate: u32, glide: f32) -> Self {
        let voices = vec![
            (Oscillator::new(Waveform::Sine, frequency, sample_rate), 0.6),
            (
                Oscillator::new(Waveform::Sine, frequency * 1.5 * 1.003, sample_rate),
                0.25,
            ),
            (
                Oscillator::new(Waveform::Triangle, frequency * 0.5, sample_rate),
                0.15,
            ),
        ];
        Self {
            voices,
            gain: SmoothedParam::new(0.0, glide, sample_rate),
            pan: SmoothedParam::new(0.0, glide, sample_rate),
            sample_rate,
        }
    }

    /// Sets where gain and pan should glide to.
    pub fn set_target(&mut self, gain: f32, pan: f32) {
        self.gain.set_target(gain.max(0.0));
        self.pan.set_target(pan.clamp(-1.0, 1.0));
    }

    /// Holds gain and pan where they currently are.
    pub fn cancel(&mut self) {
        self.gain.cancel();
        self.pan.cancel();
    }

    /// Sends the gain towards silence, close enough to be inaudible after
    /// `seconds`.
    pub fn fade_out(&mut self, seconds: f32) {
        self.gain.set_time_constant(seconds / 6.0, self.sample_rate);
        self.gain.set_target(0.0);
    }

    pub fn gain(&self) -> f32 {
        self.gain.value()
    }

    pub fn pan(&self) -> f32 {
        self.pan.value()
    }

    /// The gain and pan the drone is gliding towards.
    pub fn targets(&self) -> (f32, f32) {
        (self.gain.target(), self.pan.target())
    }

    /// Next stereo frame.
    pub fn next_frame(&mut self) -> (f32, f32) {
        let mono: f32 = self
            .voices
            .iter_mut()
            .map(|(osc, weight)| osc.next() * *weight)
            .sum();
        let gain = self.gain.next();
        let (left, right) = equal_power_pan(self.pan.next());
        (mono * gain * left, mono * gain * right)
    }
}

/// One exponentially decaying sinusoid of a chime.
#[derive(Debug, Clone, Copy)]
struct Partial {
    frequency: f64,
    amplitude: f64,
    decay: f64,
    onset: f64,
}

/// Short ramp at every onset so strikes do not click.
const ATTACK_SECS: f64 = 0.002;

/// A one-shot chime. Renders its envelope once and then reports itself
/// finished so the owner can drop it.
#[derive(Debug, Clone)]
pub struct ChimeVoice {
    partials: Vec<Partial>,
    gain: f32,
    frame: usize,
    length: usize,
    sample_rate: u32,
}

impl ChimeVoice {
    fn new(partials: Vec<Partial>, seconds: f64, gain: f32, sample_rate: u32) -> Self {
        Self {
            partials,
            gain,
            frame: 0,
            length: (seconds * sample_rate as f64).round() as usize,
            sample_rate: sample_rate.max(1),
        }
    }

    /// A dry, percussive double tap: facing the next waypoint.
    pub fn waypoint(gain: f32, sample_rate: u32) -> Self {
        let tap = |onset| {
            [
                Partial {
                    frequency: 1760.0,
                    amplitude: 1.0,
                    decay: 0.025,
                    onset,
                },
                Partial {
                    frequency: 3520.0,
                    amplitude: 0.3,
                    decay: 0.012,
                    onset,
                },
            ]
        };
        let partials = tap(0.0).into_iter().chain(tap(0.09)).collect();
        Self::new(partials, 0.3, gain, sample_rate)
    }

    /// A bright, long-ringing bell: facing the destination.
    pub fn destination(gain: f32, sample_rate: u32) -> Self {
        const ROOT: f64 = 1046.5;
        const RATIOS: [f64; 4] = [1.0, 2.0, 2.76, 5.40];
        const AMPLITUDES: [f64; 4] = [1.0, 0.5, 0.35, 0.15];
        const DECAYS: [f64; 4] = [1.6, 0.9, 0.6, 0.3];

        let partials = RATIOS
            .iter()
            .zip(AMPLITUDES)
            .zip(DECAYS)
            .map(|((ratio, amplitude), decay)| Partial {
                frequency: ROOT * ratio,
                // keep the sum of partials at unity
                amplitude: amplitude / 2.0,
                decay,
                onset: 0.0,
            })
            .collect();
        Self::new(partials, 2.5, gain, sample_rate)
    }

    pub fn is_finished(&self) -> bool {
        self.frame >= self.length
    }

    /// Frames left before the envelope ends.
    pub fn remaining(&self) -> usize {
        self.length.saturating_sub(self.frame)
    }

    /// Next stereo frame; silence once finished. Chimes sit in the center.
    pub fn next_frame(&mut self) -> (f32, f32) {
        if self.is_finished() {
            return (0.0, 0.0);
        }
        let t = self.frame as f64 / self.sample_rate as f64;
        self.frame += 1;

        let mono: f64 = self
            .partials
            .iter()
            .filter(|p| t >= p.onset)
            .map(|p| {
                let local = t - p.onset;
                let attack = (local / ATTACK_SECS).min(1.0);
                p.amplitude * attack * (-local / p.decay).exp() * (TAU * p.frequency * local).sin()
            })
            .sum();

        // last tenth of the voice fades to nothing
        let release = (self.length / 10).max(1);
        let tail = (self.remaining() as f64 / release as f64).min(1.0);

        let out = (mono * tail) as f32 * self.gain * std::f32::consts::FRAC_1_SQRT_2;
        (out, out)
    }
}
