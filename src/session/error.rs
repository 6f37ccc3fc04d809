//! Session error types

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::Session;

use crate::framing::FrameError;
use crate::mailbox::{Fault, FaultKind};
use crate::transport::TransportError;

/// Errors surfaced by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport could not be opened; the session stays disconnected.
    #[error("connect to {endpoint} failed: {source}")]
    ConnectFailed {
        /// Endpoint description
        endpoint: String,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// Operation requires a connected session.
    #[error("session is not connected")]
    NotConnected,

    /// The transport failed or was closed; the session is now disconnected.
    #[error("session disconnected")]
    Disconnected {
        /// Failure that forced the disconnect, if any
        #[source]
        source: Option<TransportError>,
    },

    /// No correlated response arrived in time; the transport stays open.
    #[error("request timed out after {waited:?}")]
    Timeout {
        /// Total time spent waiting across attempts
        waited: Duration,
    },

    /// Outbound payload could not be framed.
    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),
}

impl SessionError {
    /// Whether the session is disconnected as a result of this error.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::NotConnected | Self::Disconnected { .. }
        )
    }
}

/// The reader thread of [`Session::into_async`] could not be started.
///
/// The session is handed back with its previous mailbox attachment.
#[derive(Error, Debug)]
#[error("failed to start session reader: {source}")]
pub struct IntoAsyncError {
    session: Session,
    #[source]
    source: io::Error,
}

impl IntoAsyncError {
    pub(crate) const fn new(session: Session, source: io::Error) -> Self {
        Self { session, source }
    }

    /// Recover the session.
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Spawn failure reported by the OS.
    #[must_use]
    pub const fn io_error(&self) -> &io::Error {
        &self.source
    }

    pub(crate) fn into_io_error(self) -> io::Error {
        self.source
    }
}

impl From<&SessionError> for Fault {
    fn from(err: &SessionError) -> Self {
        let kind = match err {
            SessionError::ConnectFailed { .. } => FaultKind::ConnectFailed,
            SessionError::NotConnected | SessionError::Disconnected { .. } => {
                FaultKind::Disconnected
            }
            SessionError::Timeout { .. } => FaultKind::Timeout,
            SessionError::Encode(_) => FaultKind::Encode,
        };
        Self::new(kind, err.to_string())
    }
}
