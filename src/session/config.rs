//! Session configuration.

use std::time::Duration;

use crate::framing::FramerConfig;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How often a timed-out request is resent.
///
/// Only timeouts are retried; disconnects and encode failures return at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Total attempts including the first; zero behaves as one.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// `attempts` tries separated by `delay`.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub(crate) const fn max_attempts(&self) -> u32 {
        if self.attempts == 0 { 1 } else { self.attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Session configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Name used in log spans.
    pub name: String,
    /// Framing applied to both directions.
    pub framer: FramerConfig,
    /// Timeout used by [`Session::request`](super::Session::request) when none is given.
    pub request_timeout: Duration,
    /// Resend policy for timed-out requests.
    pub retry: RetryPolicy,
    /// Read slice used while waiting; bounds how long a disconnect takes to
    /// interrupt a pending read.
    pub poll_interval: Duration,
    /// Discard buffered inbound bytes before each request so a late reply to
    /// an earlier request is not taken as the answer.
    pub flush_before_request: bool,
}

impl SessionConfig {
    /// Default settings with the given name and framing.
    pub fn new(name: impl Into<String>, framer: FramerConfig) -> Self {
        Self {
            name: name.into(),
            framer,
            ..Self::default()
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "session".to_owned(),
            framer: FramerConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            flush_before_request: true,
        }
    }
}
