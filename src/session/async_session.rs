//! Background-reader session mode.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{Inner, IntoAsyncError, Session, SessionError, SessionId, SessionState};
use crate::mailbox::Poster;

const MIN_IDLE: Duration = Duration::from_millis(1);

/// Session whose inbound frames are delivered through a mailbox.
///
/// A reader thread polls the transport every
/// [`poll_interval`](super::SessionConfig::poll_interval) and posts each
/// frame as a `Data` message, each corrupt frame as an `Error` message and
/// each state change as a `Status` message. There is no `request`: replies
/// arrive in the mailbox like any other frame.
#[derive(Debug)]
pub struct AsyncSession {
    inner: Arc<Inner>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

type SpawnReader = fn(String, Arc<Inner>, Arc<AtomicBool>) -> io::Result<JoinHandle<()>>;

impl Session {
    /// Switch to asynchronous delivery into `poster`'s mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`IntoAsyncError`], which gives the session back, when the
    /// reader thread cannot be spawned.
    pub fn into_async(self, poster: Poster) -> Result<AsyncSession, IntoAsyncError> {
        self.start_reader(poster, spawn_reader)
    }

    fn start_reader(
        self,
        poster: Poster,
        spawn: SpawnReader,
    ) -> Result<AsyncSession, IntoAsyncError> {
        let previous = self.inner.attach(Some(poster));
        let stop = Arc::new(AtomicBool::new(false));
        let name = format!("{}-reader", self.inner.config.name);
        match spawn(name, Arc::clone(&self.inner), Arc::clone(&stop)) {
            Ok(reader) => Ok(AsyncSession {
                inner: self.inner,
                stop,
                reader: Some(reader),
            }),
            Err(err) => {
                warn!(
                    session = %self.inner.config.name,
                    error = %err,
                    "reader thread failed to start"
                );
                self.inner.attach(previous);
                Err(IntoAsyncError::new(self, err))
            }
        }
    }
}

fn spawn_reader(
    name: String,
    inner: Arc<Inner>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || read_loop(&inner, &stop))
}

fn read_loop(inner: &Inner, stop: &AtomicBool) {
    debug!(session = %inner.config.name, "reader started");
    let idle = inner.config.poll_interval.max(MIN_IDLE);
    while !stop.load(Ordering::Acquire) {
        if !inner.pump() {
            thread::sleep(idle);
        }
    }
    debug!(session = %inner.config.name, "reader stopped");
}

impl AsyncSession {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Whether the session can send.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Open the transport; the reader picks it up on its next poll.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.inner.connect()
    }

    /// Close the transport. The reader keeps running and idles.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Frame and write `payload`.
    pub fn send(&self, payload: &[u8]) -> Result<(), SessionError> {
        self.inner.send(payload)
    }

    /// Stop the reader and return to synchronous mode.
    ///
    /// The mailbox stays attached for status and error notifications.
    #[must_use]
    pub fn into_sync(self) -> Session {
        let inner = Arc::clone(&self.inner);
        drop(self);
        Session { inner }
    }

    fn stop_reader(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(session = %self.inner.config.name, "reader thread panicked");
            }
        }
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
