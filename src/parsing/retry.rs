//! Bounded polling for parsers that answer `Pending`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::parser::{DocumentParser, ParseError, ParseOutcome};

/// How long to keep polling a pending parse.
///
/// The worst-case wait is `max_attempts * wait_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total parse calls before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between calls.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_wait_secs() -> u64 {
    10
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_secs: default_wait_secs(),
        }
    }
}

impl RetryPolicy {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    /// Upper bound on time spent polling.
    pub fn timeout(&self) -> Duration {
        self.wait() * self.max_attempts
    }
}

/// Wraps a parser and polls it while it reports `Pending`.
pub struct RetryingParser<P> {
    inner: P,
    policy: RetryPolicy,
    /// Overrides `policy.wait()`; tests use a zero pause.
    pause: Duration,
}

impl<P: DocumentParser> RetryingParser<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        let pause = policy.wait();
        Self {
            inner,
            policy,
            pause,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<P: DocumentParser> DocumentParser for RetryingParser<P> {
    fn parse(&self, path: &Path) -> Result<ParseOutcome, ParseError> {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.inner.parse(path)? {
                ParseOutcome::Ready(document) => return Ok(ParseOutcome::Ready(document)),
                ParseOutcome::Pending { progress } => {
                    tracing::debug!(
                        target: "parsing",
                        "{} pending (attempt {attempt}/{attempts}, progress: {})",
                        path.display(),
                        progress.as_deref().unwrap_or("unknown")
                    );
                    if attempt < attempts {
                        std::thread::sleep(self.pause);
                    }
                }
            }
        }

        tracing::warn!(target: "parsing", "{} still pending after {attempts} attempts", path.display());
        Err(ParseError::Timeout { attempts })
    }
}
