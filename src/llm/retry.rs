use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::GenerationError;

/// Outcome of a single failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// Server said it is busy; wait longer before the next attempt
    Busy(String),
    /// Connection failures, 5xx, empty answers
    Transient(String),
    /// Retrying will not help
    Permanent(String),
}

impl AttemptError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("{status} - {body}");
        if status == StatusCode::SERVICE_UNAVAILABLE {
            AttemptError::Busy(message)
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            AttemptError::Transient(message)
        } else {
            AttemptError::Permanent(message)
        }
    }

    fn message(&self) -> &str {
        match self {
            AttemptError::Busy(m) | AttemptError::Transient(m) | AttemptError::Permanent(m) => m,
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AttemptError::Permanent(err.to_string())
        } else {
            AttemptError::Transient(err.to_string())
        }
    }
}

/// Bounded fixed-backoff retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Pause after a busy signal
    pub busy_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(1),
            busy_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, busy_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            busy_backoff,
        }
    }

    /// Run `attempt` until it succeeds, fails permanently or the attempt
    /// ceiling is reached.
    ///
    /// Exhaustion is `Fatal` for a mandatory backend and `Unavailable`
    /// otherwise.
    pub async fn run<T, F, Fut>(
        &self,
        backend: &str,
        mandatory: bool,
        mut attempt: F,
    ) -> Result<T, GenerationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for n in 1..=max_attempts {
            let pause = match attempt(n).await {
                Ok(value) => {
                    if n > 1 {
                        debug!(backend, attempts = n, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Permanent(reason)) => {
                    return Err(GenerationError::Rejected {
                        backend: backend.to_string(),
                        reason,
                    });
                }
                Err(err @ AttemptError::Busy(_)) => {
                    warn!(backend, attempt = n, "Server is busy");
                    last_error = err.message().to_string();
                    self.busy_backoff
                }
                Err(err) => {
                    warn!(backend, attempt = n, error = err.message(), "Request failed");
                    last_error = err.message().to_string();
                    self.backoff
                }
            };

            if n < max_attempts && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        let backend = backend.to_string();
        Err(if mandatory {
            GenerationError::Fatal {
                backend,
                attempts: max_attempts,
                last_error,
            }
        } else {
            GenerationError::Unavailable {
                backend,
                attempts: max_attempts,
                last_error,
            }
        })
    }
}
