//! Typed messages carried by the mailbox

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::session::{SessionId, SessionState};
use crate::tasklet::TaskId;

/// Producer of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// A protocol session.
    Session(SessionId),
    /// A tasklet action.
    Task(TaskId),
    /// Application code outside sessions and tasklets.
    Application,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Task(id) => write!(f, "task:{id}"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Opening the transport failed.
    ConnectFailed,
    /// The transport was lost or closed by the peer.
    Disconnected,
    /// An operation ran out of time.
    Timeout,
    /// An inbound frame failed validation and was discarded.
    Corrupt,
    /// Outbound payload could not be framed.
    Encode,
    /// A tasklet action panicked and was cancelled.
    TaskPanicked,
    /// Application-defined failure.
    Other,
}

/// Summary of a failure, suitable for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    kind: FaultKind,
    detail: String,
}

impl Fault {
    /// Create a fault.
    pub fn new(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Fault category.
    #[must_use]
    pub const fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Human-readable description.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Application-defined payload tagged with a numeric discriminator.
#[derive(Clone)]
pub struct Custom {
    tag: u32,
    value: Arc<dyn Any + Send + Sync>,
}

impl Custom {
    /// Wrap `value` under `tag`.
    pub fn new<T: Any + Send + Sync>(tag: u32, value: T) -> Self {
        Self {
            tag,
            value: Arc::new(value),
        }
    }

    /// Discriminator chosen by the producer.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.tag
    }

    /// Borrow the value as `T`, if that is its type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Custom")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Message contents; consumers match on this exhaustively.
#[derive(Debug)]
pub enum MessageBody {
    /// Inbound frame payload or other raw bytes.
    Data(Bytes),
    /// A terminal or surfaced failure.
    Error(Fault),
    /// Session state change.
    Status(SessionState),
    /// Application-defined value.
    Custom(Custom),
}

/// Discriminant of a [`MessageBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// [`MessageBody::Data`]
    Data,
    /// [`MessageBody::Error`]
    Error,
    /// [`MessageBody::Status`]
    Status,
    /// [`MessageBody::Custom`] with its tag
    Custom(u32),
}

/// Immutable mailbox message.
#[derive(Debug)]
pub struct Message {
    body: MessageBody,
    source: Source,
    timestamp: SystemTime,
    sequence: u64,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(source: Source, body: MessageBody) -> Self {
        Self {
            body,
            source,
            timestamp: SystemTime::now(),
            sequence: 0,
        }
    }

    /// Raw data message.
    pub fn data(source: Source, payload: impl Into<Bytes>) -> Self {
        Self::new(source, MessageBody::Data(payload.into()))
    }

    /// Error message.
    #[must_use]
    pub fn error(source: Source, fault: Fault) -> Self {
        Self::new(source, MessageBody::Error(fault))
    }

    /// Status message.
    #[must_use]
    pub fn status(source: Source, state: SessionState) -> Self {
        Self::new(source, MessageBody::Status(state))
    }

    /// Custom message.
    pub fn custom<T: Any + Send + Sync>(source: Source, tag: u32, value: T) -> Self {
        Self::new(source, MessageBody::Custom(Custom::new(tag, value)))
    }

    /// Get message type
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match &self.body {
            MessageBody::Data(_) => MessageType::Data,
            MessageBody::Error(_) => MessageType::Error,
            MessageBody::Status(_) => MessageType::Status,
            MessageBody::Custom(custom) => MessageType::Custom(custom.tag()),
        }
    }

    /// Get body
    #[must_use]
    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Consume the message, returning its body.
    #[must_use]
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// Get source
    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Position in the mailbox's total enqueue order, starting at 1.
    ///
    /// Zero until the message has been enqueued.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(super) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Progress(u8);

    #[test]
    fn message_type_tracks_body() {
        let msg = Message::data(Source::Application, &b"abc"[..]);
        assert_eq!(msg.message_type(), MessageType::Data);
        assert_eq!(msg.sequence(), 0);

        let msg = Message::custom(Source::Application, 7, Progress(40));
        assert_eq!(msg.message_type(), MessageType::Custom(7));
        match msg.into_body() {
            MessageBody::Custom(custom) => {
                assert_eq!(custom.downcast_ref::<Progress>(), Some(&Progress(40)));
                assert!(custom.downcast_ref::<String>().is_none());
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn fault_display_includes_kind() {
        let fault = Fault::new(FaultKind::Timeout, "no reply from /dev/ttyUSB0");
        assert_eq!(fault.to_string(), "Timeout: no reply from /dev/ttyUSB0");
    }
}
