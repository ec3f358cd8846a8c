//! Retry policy and connection lifecycle for the pooled SQL Server backend.

use std::time::Duration;

/// Poll interval while another caller's connection attempt is in flight.
pub const CONNECT_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Ceiling on waiting for an in-flight connection attempt to resolve.
pub const CONNECT_WAIT_CEILING: Duration = Duration::from_secs(30);

/// Substrings marking an error as connection-class and therefore retriable.
const DEFAULT_FAULT_INDICATORS: &[&str] = &[
    "connection reset",
    "connection refused",
    "socket",
    "timeout",
    "closed",
    "network",
    "failed to connect",
];

/// Connection lifecycle of the pooled adapter.
///
/// `Connecting` doubles as the mutual-exclusion flag: at most one connection
/// attempt is in flight per adapter instance, and callers observing this
/// state wait for it to resolve instead of dialing a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Retry policy for operations on the pooled backend.
///
/// Classification matches the error text against `fault_indicators`,
/// case-insensitively. The driver exposes no stable structured code for
/// every transport fault, so text matching is the baseline; the indicator
/// set is a constructor input and callers can extend the vocabulary.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Unit of the linear backoff: attempt N sleeps `backoff_unit * N`.
    pub backoff_unit: Duration,
    pub fault_indicators: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_unit: Duration::from_secs(1),
            fault_indicators: DEFAULT_FAULT_INDICATORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// True when the error text matches the connection-fault vocabulary.
    /// Anything else is a logic error (bad SQL, constraint violation) and is
    /// never retried.
    pub fn is_connection_fault(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.fault_indicators
            .iter()
            .any(|indicator| lower.contains(indicator.as_str()))
    }

    /// Backoff before the retry that follows failed attempt number `attempt`
    /// (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}
