//! Crate-level error type

use thiserror::Error;

use crate::framing::FrameError;
use crate::session::{IntoAsyncError, SessionError};
use crate::transport::TransportError;

/// Errors returned by commlink operations that span modules
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Framing failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Worker thread could not be spawned
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IntoAsyncError> for Error {
    fn from(err: IntoAsyncError) -> Self {
        Self::Io(err.into_io_error())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
