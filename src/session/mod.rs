//! Protocol sessions pairing one transport with one framer.
//!
//! A [`Session`] offers synchronous request/response; [`Session::into_async`]
//! turns it into an [`AsyncSession`] whose reader thread posts every inbound
//! frame to a mailbox. The two modes are separate types, so a request can
//! never race the reader for the same inbound bytes.
//!
//! Sessions never reconnect on their own. After a failure the state is
//! [`SessionState::Disconnected`] and the caller decides when to call
//! [`Session::connect`] again.

mod async_session;
mod config;
mod error;
mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, trace, warn};

use crate::framing::{Frame, FrameError, Framer};
use crate::mailbox::{Fault, FaultKind, Message, MessageBody, Poster, Source};
use crate::metrics::Metrics;
use crate::transport::{Connector, Transport, TransportError};

pub use async_session::AsyncSession;
pub use config::{RetryPolicy, SessionConfig};
pub use error::{IntoAsyncError, SessionError};
pub use state::{SessionId, SessionState};

/// Upper bound on reads spent discarding stale input before a request.
const MAX_FLUSH_READS: usize = 64;

struct Link {
    transport: Option<Box<dyn Transport>>,
    framer: Framer,
}

struct Inner {
    id: SessionId,
    config: SessionConfig,
    connector: Box<dyn Connector>,
    state: Mutex<SessionState>,
    link: Mutex<Link>,
    notify: Mutex<Option<Poster>>,
    // Bumped by every `disconnect`; requests issued earlier stop waiting.
    disconnects: AtomicU64,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().expect("session link mutex poisoned")
    }

    fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    fn set_state(&self, next: SessionState) {
        let previous = {
            let mut state = self.state.lock().expect("session state mutex poisoned");
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            info!(
                session = %self.config.name,
                from = %previous,
                to = %next,
                "session state changed"
            );
            self.notify(MessageBody::Status(next));
        }
    }

    fn attach(&self, poster: Option<Poster>) -> Option<Poster> {
        std::mem::replace(
            &mut *self.notify.lock().expect("session notify mutex poisoned"),
            poster,
        )
    }

    fn notify(&self, body: MessageBody) {
        let poster = self
            .notify
            .lock()
            .expect("session notify mutex poisoned")
            .clone();
        if let Some(poster) = poster {
            let delivery = poster.post(Message::new(Source::Session(self.id), body));
            if !delivery.is_queued() {
                debug!(session = %self.config.name, ?delivery, "session notification not queued");
            }
        }
    }

    fn report(&self, err: &SessionError) {
        self.notify(MessageBody::Error(Fault::from(err)));
    }

    fn report_corrupt(&self, err: &FrameError) {
        debug!(session = %self.config.name, error = %err, "corrupt frame discarded");
        self.notify(MessageBody::Error(Fault::new(
            FaultKind::Corrupt,
            err.to_string(),
        )));
    }

    #[instrument(level = "debug", skip(self), fields(session = %self.config.name, id = %self.id))]
    fn connect(&self) -> Result<(), SessionError> {
        let mut link = self.lock_link();
        if link.transport.is_some() && self.state().is_connected() {
            return Ok(());
        }

        self.set_state(SessionState::Connecting);
        let endpoint = self.connector.endpoint();
        match self.connector.open() {
            Ok(transport) => {
                Metrics::record_connect(true);
                debug!(%endpoint, transport = transport.endpoint(), "transport opened");
                link.transport = Some(transport);
                link.framer.reset();
                self.set_state(SessionState::Connected);
                Ok(())
            }
            Err(source) => {
                Metrics::record_connect(false);
                self.set_state(SessionState::Disconnected);
                let err = SessionError::ConnectFailed { endpoint, source };
                warn!(error = %err, "connect failed");
                self.report(&err);
                Err(err)
            }
        }
    }

    #[instrument(level = "debug", skip(self), fields(session = %self.config.name, id = %self.id))]
    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        let mut link = self.lock_link();

        if let Some(mut transport) = link.transport.take() {
            self.set_state(SessionState::Closing);
            transport.close();
        }
        link.framer.reset();
        self.set_state(SessionState::Disconnected);
    }

    fn ensure_connected<'a>(
        &self,
        link: &'a mut Link,
    ) -> Result<&'a mut Box<dyn Transport>, SessionError> {
        match link.transport.as_mut() {
            Some(transport) if self.state().is_connected() => Ok(transport),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Close the transport after an unrecoverable I/O error.
    fn fail(&self, link: &mut Link, source: TransportError) -> SessionError {
        warn!(session = %self.config.name, error = %source, "transport failed, disconnecting");
        if let Some(mut transport) = link.transport.take() {
            transport.close();
        }
        link.framer.reset();
        self.set_state(SessionState::Disconnected);
        let err = SessionError::Disconnected {
            source: Some(source),
        };
        self.report(&err);
        err
    }

    fn write(&self, link: &mut Link, wire: &[u8], payload_len: usize) -> Result<(), SessionError> {
        let transport = self.ensure_connected(link)?;
        match transport.write(wire) {
            Ok(_) => {
                Metrics::record_frame_sent(payload_len);
                trace!(session = %self.config.name, len = wire.len(), "frame sent");
                Ok(())
            }
            // A timed-out write may have left half a frame on the wire.
            Err(err) => Err(self.fail(link, err)),
        }
    }

    #[instrument(
        level = "trace",
        skip(self, payload),
        fields(session = %self.config.name, len = payload.len())
    )]
    fn send(&self, payload: &[u8]) -> Result<(), SessionError> {
        let mut link = self.lock_link();
        self.ensure_connected(&mut link)?;
        let wire = link.framer.encode(payload)?;
        self.write(&mut link, &wire, payload.len())
    }

    fn flush_input(&self, link: &mut Link) -> Result<(), SessionError> {
        let mut discarded = link.framer.buffered();
        link.framer.reset();
        for _ in 0..MAX_FLUSH_READS {
            let transport = self.ensure_connected(link)?;
            match transport.read(None) {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => discarded += bytes.len(),
                Err(TransportError::Timeout) => break,
                Err(err) => return Err(self.fail(link, err)),
            }
        }
        if discarded > 0 {
            debug!(session = %self.config.name, discarded, "discarded stale input before request");
        }
        Ok(())
    }

    fn await_response<F>(
        &self,
        link: &mut Link,
        timeout: Duration,
        epoch: u64,
        matcher: &mut F,
    ) -> Result<Frame, SessionError>
    where
        F: FnMut(&Frame) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(result) = link.framer.next_frame() {
                match result {
                    Ok(frame) if matcher(&frame) => return Ok(frame),
                    Ok(frame) => {
                        trace!(
                            session = %self.config.name,
                            len = frame.len(),
                            "ignoring uncorrelated frame"
                        );
                    }
                    Err(err) => self.report_corrupt(&err),
                }
            }

            if self.disconnects.load(Ordering::Acquire) != epoch {
                return Err(SessionError::Disconnected { source: None });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::Timeout { waited: timeout });
            }

            let slice = remaining.min(self.config.poll_interval.max(Duration::from_millis(1)));
            let transport = self.ensure_connected(link)?;
            match transport.read(Some(slice)) {
                Ok(bytes) => {
                    let _ = link.framer.feed(&bytes);
                }
                Err(TransportError::Timeout) => {}
                Err(err) => return Err(self.fail(link, err)),
            }
        }
    }

    #[instrument(
        level = "debug",
        skip(self, payload, matcher),
        fields(session = %self.config.name, len = payload.len())
    )]
    fn request<F>(
        &self,
        payload: &[u8],
        timeout: Duration,
        mut matcher: F,
    ) -> Result<Frame, SessionError>
    where
        F: FnMut(&Frame) -> bool,
    {
        let epoch = self.disconnects.load(Ordering::Acquire);
        let mut link = self.lock_link();
        self.ensure_connected(&mut link)?;
        let wire = link.framer.encode(payload)?;
        if self.config.flush_before_request {
            self.flush_input(&mut link)?;
        }

        let started = Instant::now();
        let attempts = self.config.retry.max_attempts();
        let mut attempt = 1;
        loop {
            self.write(&mut link, &wire, payload.len())?;
            match self.await_response(&mut link, timeout, epoch, &mut matcher) {
                Ok(frame) => {
                    Metrics::record_request(started.elapsed(), false);
                    trace!(attempt, len = frame.len(), "response received");
                    return Ok(frame);
                }
                Err(SessionError::Timeout { .. }) if attempt < attempts => {
                    debug!(attempt, attempts, "request timed out, retrying");
                    attempt += 1;
                    if !self.config.retry.delay.is_zero() {
                        thread::sleep(self.config.retry.delay);
                    }
                }
                Err(SessionError::Timeout { .. }) => {
                    let waited = started.elapsed();
                    Metrics::record_request(waited, true);
                    debug!(?waited, attempts, "request timed out");
                    return Err(SessionError::Timeout { waited });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read whatever is available and post the completed frames.
    ///
    /// Returns `true` when bytes arrived.
    fn pump(&self) -> bool {
        let mut link = self.lock_link();
        let Some(transport) = link.transport.as_mut() else {
            return false;
        };
        let bytes = match transport.read(None) {
            Ok(bytes) if bytes.is_empty() => return false,
            Ok(bytes) => bytes,
            Err(TransportError::Timeout) => return false,
            Err(err) => {
                self.fail(&mut link, err);
                return false;
            }
        };
        let frames: Vec<Result<Frame, FrameError>> = link.framer.feed(&bytes).collect();
        drop(link);

        for result in frames {
            match result {
                Ok(frame) => self.notify(MessageBody::Data(frame.into_payload())),
                Err(err) => self.report_corrupt(&err),
            }
        }
        true
    }
}

/// Synchronous protocol session.
///
/// All methods take `&self`; the transport sits behind an internal lock, so a
/// session may be shared between threads with `Arc`.
#[derive(Debug)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a disconnected session that opens transports with `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] when the framer configuration is
    /// invalid.
    pub fn new(
        connector: impl Connector + 'static,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let framer = Framer::new(config.framer.clone())?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: SessionId::new(),
                config,
                connector: Box::new(connector),
                state: Mutex::new(SessionState::Disconnected),
                link: Mutex::new(Link {
                    transport: None,
                    framer,
                }),
                notify: Mutex::new(None),
                disconnects: AtomicU64::new(0),
            }),
        })
    }

    /// Post status changes and errors to `poster`.
    #[must_use]
    pub fn with_mailbox(self, poster: Poster) -> Self {
        self.inner.attach(Some(poster));
        self
    }

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

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
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

    /// Open the transport. A no-op when already connected.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.inner.connect()
    }

    /// Close the transport.
    ///
    /// Requests already pending when this is called return
    /// [`SessionError::Disconnected`] within one poll interval; requests
    /// issued afterwards are not affected until the transport is closed.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Frame and write `payload`.
    pub fn send(&self, payload: &[u8]) -> Result<(), SessionError> {
        self.inner.send(payload)
    }

    /// Send `payload` and wait for the next complete frame.
    ///
    /// `None` uses [`SessionConfig::request_timeout`]. On timeout the session
    /// stays connected.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] when the session is not connected
    /// - [`SessionError::Timeout`] when no response arrived in time
    /// - [`SessionError::Disconnected`] when the transport failed or
    ///   [`Session::disconnect`] interrupted the wait
    pub fn request(
        &self,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Frame, SessionError> {
        self.request_matching(payload, timeout, |_| true)
    }

    /// Like [`Session::request`], but frames rejected by `matcher` are skipped.
    pub fn request_matching<F>(
        &self,
        payload: &[u8],
        timeout: Option<Duration>,
        matcher: F,
    ) -> Result<Frame, SessionError>
    where
        F: FnMut(&Frame) -> bool,
    {
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        self.inner.request(payload, timeout, matcher)
    }

    /// Convenience wrapper returning the response payload.
    pub fn query(&self, payload: &[u8]) -> Result<Bytes, SessionError> {
        self.request(payload, None).map(Frame::into_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{Checksum, FramerConfig, LengthWidth};
    use crate::mailbox::{MailboxConfig, MessageType, mailbox};
    use crate::transport::{MemoryConnector, MemoryTransport};

    fn session_with_peer(config: SessionConfig) -> (Session, MemoryTransport) {
        let (local, peer) = MemoryTransport::pair();
        let session = Session::new(MemoryConnector::new([local]), config).unwrap();
        session.connect().unwrap();
        (session, peer)
    }

    fn lines() -> SessionConfig {
        SessionConfig::new("test", FramerConfig::lines())
    }

    #[test]
    fn send_requires_connection() {
        let session = Session::new(MemoryConnector::default(), lines()).unwrap();
        assert!(matches!(session.send(b"x"), Err(SessionError::NotConnected)));
        assert!(matches!(
            session.request(b"x", Some(Duration::from_millis(5))),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn connect_failure_stays_disconnected() {
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        let session = Session::new(MemoryConnector::default(), lines())
            .unwrap()
            .with_mailbox(poster);
        let err = session.connect().unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailed { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);

        let types: Vec<_> = inbox.drain_all().iter().map(Message::message_type).collect();
        assert_eq!(
            types,
            vec![MessageType::Status, MessageType::Status, MessageType::Error]
        );
    }

    #[test]
    fn request_returns_first_frame() {
        let (session, mut peer) = session_with_peer(lines());
        let responder = thread::spawn(move || {
            let got = peer.read(Some(Duration::from_secs(1))).unwrap();
            assert_eq!(&got[..], b"PING\r\n");
            peer.write(b"PONG\r\n").unwrap();
            peer
        });
        let frame = session.request(b"PING", Some(Duration::from_secs(1))).unwrap();
        assert_eq!(frame.payload(), &Bytes::from_static(b"PONG"));
        drop(responder.join().unwrap());
    }

    #[test]
    fn request_times_out_and_stays_connected() {
        let (session, _peer) = session_with_peer(lines());
        let started = Instant::now();
        let err = session
            .request(b"PING", Some(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn retry_resends_after_timeout() {
        let config = lines().with_retry(RetryPolicy::new(3, Duration::ZERO));
        let (session, mut peer) = session_with_peer(config);
        let responder = thread::spawn(move || {
            let mut seen = 0;
            while seen < 2 {
                let chunk = peer.read(Some(Duration::from_secs(1))).unwrap();
                seen += chunk.windows(2).filter(|w| w == b"\r\n").count();
            }
            peer.write(b"LATE\r\n").unwrap();
            peer
        });
        let frame = session.request(b"PING", Some(Duration::from_millis(50))).unwrap();
        assert_eq!(&frame.payload()[..], b"LATE");
        drop(responder.join().unwrap());
    }

    #[test]
    fn matcher_skips_uncorrelated_frames() {
        let mut config = lines();
        config.flush_before_request = false;
        let (session, mut peer) = session_with_peer(config);
        peer.write(b"EVENT 1\r\nOK 7\r\n").unwrap();
        let frame = session
            .request_matching(b"GET 7", Some(Duration::from_millis(200)), |f| {
                f.payload().starts_with(b"OK")
            })
            .unwrap();
        assert_eq!(&frame.payload()[..], b"OK 7");
    }

    #[test]
    fn stale_input_is_flushed_before_request() {
        let (session, mut peer) = session_with_peer(lines());
        peer.write(b"STALE\r\n").unwrap();
        let err = session
            .request(b"PING", Some(Duration::from_millis(30)))
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[test]
    fn corrupt_frame_is_reported_and_skipped() {
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        let framer = FramerConfig::length_prefixed(LengthWidth::U16, Checksum::Crc16);
        let mut config = SessionConfig::new("crc", framer.clone());
        config.flush_before_request = false;
        let (session, mut peer) = session_with_peer(config);
        let session = session.with_mailbox(poster);

        let encoder = Framer::new(framer).unwrap();
        let mut bad = encoder.encode(b"bad").unwrap().to_vec();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        peer.write(&bad).unwrap();
        peer.write(&encoder.encode(b"good").unwrap()).unwrap();

        let frame = session.request(b"q", Some(Duration::from_millis(200))).unwrap();
        assert_eq!(&frame.payload()[..], b"good");
        assert_eq!(session.state(), SessionState::Connected);

        let faults: Vec<_> = inbox
            .drain_all()
            .into_iter()
            .filter_map(|m| match m.into_body() {
                MessageBody::Error(fault) => Some(fault.kind()),
                _ => None,
            })
            .collect();
        assert_eq!(faults, vec![FaultKind::Corrupt]);
    }

    #[test]
    fn peer_close_forces_disconnect() {
        let (session, peer) = session_with_peer(lines());
        drop(peer);
        let err = session.request(b"PING", Some(Duration::from_millis(200))).unwrap_err();
        assert!(matches!(err, SessionError::Disconnected { source: Some(_) }));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.send(b"x"), Err(SessionError::NotConnected)));
    }

    #[test]
    fn disconnect_interrupts_pending_request() {
        let config = lines().with_poll_interval(Duration::from_millis(5));
        let (session, _peer) = session_with_peer(config);
        let session = Arc::new(session);
        let worker = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.request(b"PING", Some(Duration::from_secs(10))))
        };
        thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        session.disconnect();
        let result = worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(result, Err(SessionError::Disconnected { source: None })));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn request_issued_after_disconnect_call_is_not_interrupted() {
        let (session, _peer) = session_with_peer(lines());
        let session = Arc::new(session);
        let guard = session.inner.lock_link();

        let disconnecter = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.disconnect())
        };
        while session.inner.disconnects.load(Ordering::Acquire) == 0 {
            thread::yield_now();
        }
        let requester = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.request(b"PING", Some(Duration::from_millis(50))))
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);

        disconnecter.join().unwrap();
        let result = requester.join().unwrap();
        assert!(
            matches!(
                result,
                Err(SessionError::NotConnected | SessionError::Timeout { .. })
            ),
            "{result:?}"
        );
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn connect_when_connected_is_a_no_op() {
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        let (session, _peer) = session_with_peer(lines());
        let session = session.with_mailbox(poster);

        // The connector is exhausted, so a second open would fail.
        session.connect().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(inbox.drain_all().is_empty());
    }

    #[test]
    fn encode_errors_do_not_disconnect() {
        let (session, _peer) = session_with_peer(lines());
        assert!(matches!(
            session.send(b"a\r\nb"),
            Err(SessionError::Encode(FrameError::ContainsDelimiter))
        ));
        assert!(session.is_connected());
    }
}
