use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const OUTBOUND_QUEUE_LIMIT: usize = 256;

/// Reconnection parameters of a [`ConnectionManager`](crate::client::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any single wait.
    pub max_delay: Duration,
    /// Automatic retries allowed before giving up.
    pub max_attempts: u32,
    /// Messages kept while disconnected; the oldest is dropped beyond this.
    pub outbound_queue_limit: usize,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            outbound_queue_limit: OUTBOUND_QUEUE_LIMIT,
        }
    }
}

/// Doubling delay sequence bounded by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    current: Duration,
}

impl Backoff {
    /// Fresh sequence starting at the base delay.
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current = policy.base_delay;
        Self {
            policy,
            attempts: 0,
            current,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.current.min(self.policy.max_delay);
        self.current = (self.current * 2).min(self.policy.max_delay);
        Some(delay)
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.policy.base_delay;
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay the next call to [`Backoff::next_delay`] would return.
    pub fn current_delay(&self) -> Duration {
        self.current.min(self.policy.max_delay)
    }

    /// Policy driving this sequence.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
