//! Defines the Component trait for work that runs on its own thread at the
//! end of a channel, such as encoding the rendered audio. The guidance loop
//! hands data off and carries on; the component converts each message and
//! reports the outcome on its output channel.

use log::{debug, info, warn};
use std::{
    borrow::Cow,
    fmt, io,
    sync::mpsc::{Receiver, Sender},
    thread::{self, JoinHandle},
};

#[derive(Debug)]
pub enum ComponentError {
    /// The WAV encoder failed while finishing its file.
    HoundError(hound::Error),

    /// The component thread could not be spawned.
    SpawnError(io::Error),

    /// The component thread panicked.
    Panicked(String),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ComponentError::HoundError(error) => Cow::from(format!("hound error: {}", error)),
            ComponentError::SpawnError(error) => Cow::from(format!("could not spawn: {}", error)),
            ComponentError::Panicked(name) => Cow::from(format!("{} panicked", name)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ComponentError {}

impl From<hound::Error> for ComponentError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

///
/// A stage that consumes messages on one thread and produces results for
/// another. Its `Display` form names the thread and its log lines.
///
pub trait Component: fmt::Display {
    type InData;
    type OutData;

    /// Converts one input message into one output message
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up once the input channel has closed
    fn finalize(&mut self) -> Result<(), ComponentError>;
}

/// Runs the given Component on its own named thread. Every message received
/// on `input` is converted and sent to `output`. Once every sender of
/// `input` is dropped the component is finalized and the thread ends.
pub fn run_component<C: Component + Send + 'static>(
    mut component: Box<C>,
    input: Receiver<<C as Component>::InData>,
    output: Sender<<C as Component>::OutData>,
) -> Result<JoinHandle<()>, ComponentError>
where
    <C as Component>::InData: Send + 'static,
    <C as Component>::OutData: Send + 'static,
{
    thread::Builder::new()
        .name(component.to_string())
        .spawn(move || {
            while let Ok(data) = input.recv() {
                let out_data = component.convert(data);
                if output.send(out_data).is_err() {
                    // nobody is listening for results, keep consuming anyway
                    debug!("{} : result dropped", component);
                }
            }

            if let Err(component_error) = component.finalize() {
                warn!("{} : error during termination : {}", component, component_error);
            }
            info!("{} : terminated.", component);
        })
        .map_err(ComponentError::SpawnError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    /// Scales a stereo block by a fixed gain
    struct Gain {
        gain: f32,
        finalized: Sender<()>,
    }

    impl Component for Gain {
        type InData = (Vec<f32>, Vec<f32>);
        type OutData = (Vec<f32>, Vec<f32>);

        fn convert(&mut self, (left, right): Self::InData) -> Self::OutData {
            (
                left.into_iter().map(|s| s * self.gain).collect(),
                right.into_iter().map(|s| s * self.gain).collect(),
            )
        }

        fn finalize(&mut self) -> Result<(), ComponentError> {
            let _ = self.finalized.send(());
            Ok(())
        }
    }

    impl fmt::Display for Gain {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "Gain({})", self.gain)
        }
    }

    #[test]
    fn converts_each_block() {
        let (done_tx, _done_rx) = channel();
        let (test_tx, block_rx) = channel();
        let (block_tx, test_rx) = channel();

        run_component(
            Box::new(Gain {
                gain: 0.5,
                finalized: done_tx,
            }),
            block_rx,
            block_tx,
        )
        .unwrap();

        test_tx.send((vec![1.0, -1.0], vec![0.5, 0.0])).unwrap();
        assert_eq!(test_rx.recv(), Ok((vec![0.5, -0.5], vec![0.25, 0.0])));
    }

    #[test]
    fn chained_components_finalize_when_input_closes() {
        let (done_tx, done_rx) = channel();
        let (test_tx, a_rx) = channel();
        let (a_tx, b_rx) = channel();
        let (b_tx, test_rx) = channel();

        let a = run_component(
            Box::new(Gain {
                gain: 2.0,
                finalized: done_tx.clone(),
            }),
            a_rx,
            a_tx,
        )
        .unwrap();
        let b = run_component(
            Box::new(Gain {
                gain: 3.0,
                finalized: done_tx,
            }),
            b_rx,
            b_tx,
        )
        .unwrap();

        test_tx.send((vec![1.0], vec![2.0])).unwrap();
        assert_eq!(test_rx.recv(), Ok((vec![6.0], vec![12.0])));

        drop(test_tx);
        a.join().unwrap();
        b.join().unwrap();
        assert_eq!(done_rx.iter().count(), 2);
    }
}
