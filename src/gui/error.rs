use std::{borrow::Cow, error::Error, fmt, sync::mpsc};

/// Everything that can go wrong while driving the terminal.
#[derive(Debug)]
pub enum GuiError {
    IOError(std::io::Error),
    MPSCSendError,
    MPSCRecvError(mpsc::RecvError),
    JoinError,
}

impl fmt::Display for GuiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            GuiError::IOError(error) => Cow::from(format!("terminal error: {}", error)),
            GuiError::MPSCSendError => Cow::from("worker thread stopped listening"),
            GuiError::MPSCRecvError(error) => Cow::from(format!("worker thread vanished: {}", error)),
            GuiError::JoinError => Cow::from("worker thread panicked"),
        };

        write!(f, "{}", msg)
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl<T> From<mpsc::SendError<T>> for GuiError {
    fn from(_: mpsc::SendError<T>) -> Self {
        Self::MPSCSendError
    }
}

impl From<mpsc::RecvError> for GuiError {
    fn from(value: mpsc::RecvError) -> Self {
        Self::MPSCRecvError(value)
    }
}
