//! Thread-safe FIFO mailbox bridging worker threads and a single consumer.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Session I/O  │──┐                 │              │
//! └──────────────┘  │  Poster::post   │   Inbox      │  drain_all() once per UI tick
//! ┌──────────────┐  ├───────────────▶│  (single     │  drain_one(timeout) on a
//! │ Tasklet      │──┘                 │   consumer)  │  dedicated thread
//! └──────────────┘                    └──────────────┘
//! ```
//!
//! Any number of [`Poster`] clones may post concurrently. Exactly one
//! [`Inbox`] exists per mailbox; its draining methods take `&mut self`, so the
//! single-consumer rule is enforced by the type system.

mod message;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::metrics::Metrics;

pub use message::{Custom, Fault, FaultKind, Message, MessageBody, MessageType, Source};

/// What to do with a new message when a bounded mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    DropOldest,
    /// Discard the new message.
    DropNewest,
    /// Wait up to `timeout` for room, then discard the new message.
    Block {
        /// Longest time a producer waits for room.
        timeout: Duration,
    },
}

/// Mailbox configuration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MailboxConfig {
    /// Maximum queued messages; `None` is unbounded and zero behaves as one.
    pub capacity: Option<usize>,
    /// Policy applied when `capacity` is reached.
    pub overflow: OverflowPolicy,
}

impl MailboxConfig {
    /// Unbounded mailbox.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::DropNewest,
        }
    }

    /// Bounded mailbox with the given overflow policy.
    #[must_use]
    pub const fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Result of [`Poster::post`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Message queued.
    Queued,
    /// Message queued after evicting the oldest one.
    DisplacedOldest,
    /// Message discarded by the overflow policy.
    Dropped,
    /// Mailbox closed; message discarded.
    Closed,
}

impl Delivery {
    /// Whether the posted message is now in the queue.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Queued | Self::DisplacedOldest)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    config: MailboxConfig,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct State {
    queue: VecDeque<Message>,
    next_sequence: u64,
    closed: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mailbox mutex poisoned")
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Metrics::record_mail_dropped();
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            debug!(pending = state.queue.len(), "mailbox closed");
        }
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl State {
    fn enqueue(&mut self, mut message: Message) {
        self.next_sequence += 1;
        message.set_sequence(self.next_sequence);
        self.queue.push_back(message);
        Metrics::record_mail_posted();
    }
}

/// Create a mailbox, returning its producer and consumer halves.
#[must_use]
pub fn mailbox(mut config: MailboxConfig) -> (Poster, Inbox) {
    if config.capacity == Some(0) {
        debug!("mailbox capacity of zero raised to one");
        config.capacity = Some(1);
    }
    let initial = config.capacity.unwrap_or(64).min(1024);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::with_capacity(initial),
            next_sequence: 0,
            closed: false,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        config,
        dropped: AtomicU64::new(0),
    });
    (
        Poster {
            shared: Arc::clone(&shared),
        },
        Inbox { shared },
    )
}

/// Producer handle; clone freely across threads.
#[derive(Clone, Debug)]
pub struct Poster {
    shared: Arc<Shared>,
}

impl Poster {
    /// Enqueue `message`, applying the overflow policy if the mailbox is full.
    ///
    /// Only [`OverflowPolicy::Block`] can make this call wait, and never
    /// longer than its configured timeout.
    pub fn post(&self, message: Message) -> Delivery {
        self.post_gated(message, None)
    }

    /// Post only while `gate` is open. The gate is checked under the mailbox
    /// lock, and again whenever a blocked post wakes.
    pub(crate) fn post_gated(&self, message: Message, gate: Option<&AtomicBool>) -> Delivery {
        let shared = &*self.shared;
        let is_open = || gate.is_none_or(|open| open.load(Ordering::Acquire));
        let mut state = shared.lock();
        if state.closed || !is_open() {
            return Delivery::Closed;
        }

        let outcome = match shared.config.capacity {
            Some(capacity) if state.queue.len() >= capacity => match shared.config.overflow {
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = state.queue.pop_front() {
                        trace!(sequence = evicted.sequence(), "mailbox full, evicting oldest");
                    }
                    shared.record_drop();
                    state.enqueue(message);
                    Delivery::DisplacedOldest
                }
                OverflowPolicy::DropNewest => {
                    trace!("mailbox full, dropping newest");
                    shared.record_drop();
                    return Delivery::Dropped;
                }
                OverflowPolicy::Block { timeout } => {
                    let deadline = Instant::now() + timeout;
                    while state.queue.len() >= capacity && !state.closed && is_open() {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            break;
                        }
                        state = shared
                            .not_full
                            .wait_timeout(state, remaining)
                            .expect("mailbox mutex poisoned")
                            .0;
                    }
                    if state.closed || !is_open() {
                        return Delivery::Closed;
                    }
                    if state.queue.len() >= capacity {
                        debug!(?timeout, "mailbox still full after blocking, dropping newest");
                        shared.record_drop();
                        return Delivery::Dropped;
                    }
                    state.enqueue(message);
                    Delivery::Queued
                }
            },
            _ => {
                state.enqueue(message);
                Delivery::Queued
            }
        };
        drop(state);
        shared.not_empty.notify_one();
        outcome
    }

    /// Wake producers blocked in [`Poster::post_gated`] so they re-check
    /// their gate.
    pub(crate) fn wake_blocked(&self) {
        // Taking the lock orders this wake-up after any gate check in progress.
        drop(self.shared.lock());
        self.shared.not_full.notify_all();
    }

    /// Number of messages discarded by the overflow policy so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Check whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer has closed the mailbox.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

/// Single consumer half of a mailbox.
///
/// Dropping the inbox closes the mailbox; subsequent posts report
/// [`Delivery::Closed`].
#[derive(Debug)]
pub struct Inbox {
    shared: Arc<Shared>,
}

impl Inbox {
    /// Remove and return every queued message in FIFO order. Never blocks
    /// beyond acquiring the internal lock.
    pub fn drain_all(&mut self) -> Vec<Message> {
        let mut state = self.shared.lock();
        let drained: Vec<Message> = state.queue.drain(..).collect();
        drop(state);
        if !drained.is_empty() {
            trace!(count = drained.len(), "mailbox drained");
            self.shared.not_full.notify_all();
        }
        drained
    }

    /// Pop the oldest message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        let message = self.shared.lock().queue.pop_front();
        if message.is_some() {
            self.shared.not_full.notify_one();
        }
        message
    }

    /// Pop the oldest message, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or immediately once the mailbox is closed
    /// and empty.
    pub fn drain_one(&mut self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(message) = state.queue.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Some(message);
            }
            if state.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .shared
                .not_empty
                .wait_timeout(state, remaining)
                .expect("mailbox mutex poisoned")
                .0;
        }
    }

    /// Create another producer for this mailbox.
    #[must_use]
    pub fn poster(&self) -> Poster {
        Poster {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of messages discarded by the overflow policy so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Check whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further posts and wake blocked producers. Queued messages can
    /// still be drained.
    pub fn close(&mut self) {
        self.shared.close();
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn text(tag: &'static str) -> Message {
        Message::data(Source::Application, tag.as_bytes())
    }

    fn payloads(messages: Vec<Message>) -> Vec<String> {
        messages
            .into_iter()
            .map(|m| match m.into_body() {
                MessageBody::Data(bytes) => String::from_utf8(bytes.to_vec()).unwrap(),
                other => panic!("unexpected body {other:?}"),
            })
            .collect()
    }

    #[test]
    fn drain_all_is_fifo_and_empties_queue() {
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        for tag in ["A", "B", "C"] {
            assert_eq!(poster.post(text(tag)), Delivery::Queued);
        }
        let drained = inbox.drain_all();
        let sequences: Vec<u64> = drained.iter().map(Message::sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(payloads(drained), vec!["A", "B", "C"]);
        assert!(inbox.drain_all().is_empty());
    }

    #[test]
    fn drop_oldest_keeps_latest() {
        let (poster, mut inbox) = mailbox(MailboxConfig::bounded(2, OverflowPolicy::DropOldest));
        poster.post(text("A"));
        poster.post(text("B"));
        assert_eq!(poster.post(text("C")), Delivery::DisplacedOldest);
        assert_eq!(payloads(inbox.drain_all()), vec!["B", "C"]);
        assert_eq!(inbox.dropped(), 1);
    }

    #[test]
    fn drop_newest_keeps_earliest() {
        let (poster, mut inbox) = mailbox(MailboxConfig::bounded(2, OverflowPolicy::DropNewest));
        poster.post(text("A"));
        poster.post(text("B"));
        assert_eq!(poster.post(text("C")), Delivery::Dropped);
        assert_eq!(payloads(inbox.drain_all()), vec!["A", "B"]);
        assert_eq!(poster.dropped(), 1);
    }

    #[test]
    fn block_policy_times_out_then_drops() {
        let timeout = Duration::from_millis(30);
        let (poster, mut inbox) =
            mailbox(MailboxConfig::bounded(1, OverflowPolicy::Block { timeout }));
        poster.post(text("A"));
        let start = Instant::now();
        assert_eq!(poster.post(text("B")), Delivery::Dropped);
        assert!(start.elapsed() >= timeout);
        assert_eq!(payloads(inbox.drain_all()), vec!["A"]);
    }

    #[test]
    fn block_policy_resumes_when_consumer_drains() {
        let timeout = Duration::from_secs(5);
        let (poster, mut inbox) =
            mailbox(MailboxConfig::bounded(1, OverflowPolicy::Block { timeout }));
        poster.post(text("A"));

        let producer = {
            let poster = poster.clone();
            thread::spawn(move || poster.post(text("B")))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(payloads(inbox.drain_all()), vec!["A"]);
        assert_eq!(producer.join().unwrap(), Delivery::Queued);
        assert_eq!(payloads(inbox.drain_all()), vec!["B"]);
    }

    #[test]
    fn drain_one_waits_for_producer() {
        let (poster, mut inbox) = mailbox(MailboxConfig::default());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            poster.post(text("late"));
        });
        let message = inbox.drain_one(Duration::from_secs(5)).expect("message");
        assert_eq!(payloads(vec![message]), vec!["late"]);
        producer.join().unwrap();
    }

    #[test]
    fn drain_one_times_out_when_empty() {
        let (_poster, mut inbox) = mailbox(MailboxConfig::default());
        let start = Instant::now();
        assert!(inbox.drain_one(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn closing_rejects_posts_and_wakes_blocked_producer() {
        let (poster, mut inbox) = mailbox(MailboxConfig::bounded(
            1,
            OverflowPolicy::Block {
                timeout: Duration::from_secs(30),
            },
        ));
        poster.post(text("A"));
        let blocked = {
            let poster = poster.clone();
            thread::spawn(move || poster.post(text("B")))
        };
        thread::sleep(Duration::from_millis(20));
        inbox.close();
        assert_eq!(blocked.join().unwrap(), Delivery::Closed);
        assert_eq!(poster.post(text("C")), Delivery::Closed);
        assert_eq!(payloads(inbox.drain_all()), vec!["A"]);
        assert!(inbox.drain_one(Duration::from_secs(30)).is_none());
    }

    #[test]
    fn zero_capacity_holds_one_message() {
        let literal = MailboxConfig {
            capacity: Some(0),
            overflow: OverflowPolicy::DropOldest,
        };
        for config in [literal, MailboxConfig::bounded(0, OverflowPolicy::DropOldest)] {
            let (poster, mut inbox) = mailbox(config);
            assert_eq!(poster.post(text("A")), Delivery::Queued);
            assert_eq!(poster.post(text("B")), Delivery::DisplacedOldest);
            assert_eq!(payloads(inbox.drain_all()), vec!["B"]);
        }
    }

    #[test]
    fn closed_gate_rejects_and_releases_blocked_post() {
        let (poster, mut inbox) = mailbox(MailboxConfig::bounded(
            1,
            OverflowPolicy::Block {
                timeout: Duration::from_secs(30),
            },
        ));
        poster.post(text("A"));
        let gate = Arc::new(AtomicBool::new(true));
        let blocked = {
            let poster = poster.clone();
            let gate = Arc::clone(&gate);
            thread::spawn(move || poster.post_gated(text("B"), Some(&gate)))
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        gate.store(false, Ordering::Release);
        poster.wake_blocked();
        assert_eq!(blocked.join().unwrap(), Delivery::Closed);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(poster.post_gated(text("C"), Some(&gate)), Delivery::Closed);
        assert_eq!(payloads(inbox.drain_all()), vec!["A"]);
    }

    #[test]
    fn dropping_inbox_closes_mailbox() {
        let (poster, inbox) = mailbox(MailboxConfig::default());
        drop(inbox);
        assert!(poster.is_closed());
        assert_eq!(poster.post(text("A")), Delivery::Closed);
    }
}
