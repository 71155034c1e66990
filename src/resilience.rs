//! Storage connection acquisition with bounded retry and operator recovery.
//!
//! Runs on the main thread before the Winit event loop exists, so the waits
//! are plain blocking sleeps. A storage failure never aborts the process: the
//! caller receives `None` and the transport selector degrades to HTTP.
//!
//! ```text
//! attempt ─ok─▶ Some(conn)
//!    │ fail
//!    ├─ retries left ─▶ sleep(backoff) ─▶ attempt
//!    └─ exhausted ─▶ prompt ─Retry────▶ sleep(recovery_backoff) ─▶ new round
//!                           └Continue─▶ None
//! ```

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::{HostError, Result};
use crate::prompt::{OperatorPrompt, RecoveryChoice};
use crate::storage::{StorageOpener, StorageHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    UserCancelled,
}

/// One step of the acquisition, kept only for the duration of startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    /// Recovery round, starting at 1. The operator's "retry" opens a new round.
    pub round: u32,
    /// Position within the round, starting at 1.
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt of each round.
    pub max_retries: u32,
    pub backoff: Duration,
    pub recovery_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
            recovery_backoff: Duration::from_millis(1000),
        }
    }
}

impl From<&StorageConfig> for RetryPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff(),
            recovery_backoff: config.recovery_backoff(),
        }
    }
}

/// Result of [`acquire_connection`]: the connection, if any, and the trail
/// of attempts that produced it.
#[derive(Debug)]
pub struct Acquisition<C> {
    pub connection: Option<C>,
    pub attempts: Vec<ConnectionAttempt>,
}

impl<C> Acquisition<C> {
    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Failed)
            .count()
    }

    pub fn cancelled(&self) -> bool {
        self.attempts
            .last()
            .is_some_and(|a| a.outcome == AttemptOutcome::UserCancelled)
    }
}

/// Opens and validates a storage connection.
///
/// Each round makes `1 + max_retries` attempts separated by `backoff`. When a
/// round is exhausted the operator decides: retry starts a fresh round after
/// `recovery_backoff`, continue returns `None`.
pub fn acquire_connection<O: StorageOpener>(
    opener: &O,
    policy: &RetryPolicy,
    prompt: &dyn OperatorPrompt,
) -> Acquisition<O::Connection> {
    let location = opener.location();
    let mut attempts = Vec::new();
    let mut round = 1;

    loop {
        let mut last_error = String::new();

        for retry in 0..=policy.max_retries {
            let attempt_number = retry + 1;
            match open_and_check(opener) {
                Ok(connection) => {
                    info!(round, attempt = attempt_number, location, "Storage connection established");
                    attempts.push(ConnectionAttempt {
                        round,
                        attempt_number,
                        outcome: AttemptOutcome::Succeeded,
                        error_detail: None,
                    });
                    return Acquisition {
                        connection: Some(connection),
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(round, attempt = attempt_number, location, error = %e, "Storage connection attempt failed");
                    last_error = e.to_string();
                    attempts.push(ConnectionAttempt {
                        round,
                        attempt_number,
                        outcome: AttemptOutcome::Failed,
                        error_detail: Some(last_error.clone()),
                    });
                }
            }

            if retry < policy.max_retries {
                thread::sleep(policy.backoff);
            }
        }

        let tried = policy.max_retries + 1;
        match prompt.ask_retry(&location, &last_error, tried) {
            RecoveryChoice::Retry => {
                info!(round, "Operator requested another storage round");
                thread::sleep(policy.recovery_backoff);
                round += 1;
            }
            RecoveryChoice::Continue => {
                warn!(round, location, "Continuing without storage, HTTP transport only");
                attempts.push(ConnectionAttempt {
                    round,
                    attempt_number: tried,
                    outcome: AttemptOutcome::UserCancelled,
                    error_detail: Some(last_error),
                });
                return Acquisition {
                    connection: None,
                    attempts,
                };
            }
        }
    }
}

fn open_and_check<O: StorageOpener>(opener: &O) -> Result<O::Connection> {
    let connection = opener.open()?;
    if connection.can_connect() {
        Ok(connection)
    } else {
        Err(HostError::StorageUnavailable {
            path: opener.location().into(),
            reason: "reachability check failed".into(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::*;

    pub struct FakeConn {
        pub healthy: bool,
    }

    impl StorageHealth for FakeConn {
        fn can_connect(&self) -> bool {
            self.healthy
        }
    }

    /// Fails `failures` times, then hands out healthy connections.
    pub struct FlakyOpener {
        pub failures: u32,
        pub calls: Cell<u32>,
    }

    impl FlakyOpener {
        pub fn failing(failures: u32) -> Self {
            Self {
                failures,
                calls: Cell::new(0),
            }
        }
    }

    impl StorageOpener for FlakyOpener {
        type Connection = FakeConn;

        fn location(&self) -> String {
            "memory://flaky".into()
        }

        fn open(&self) -> Result<FakeConn> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n <= self.failures {
                Err(HostError::StorageUnavailable {
                    path: "memory://flaky".into(),
                    reason: format!("refused #{n}"),
                })
            } else {
                Ok(FakeConn { healthy: true })
            }
        }
    }

    /// Answers prompts from a script, records how often it was asked.
    pub struct ScriptedPrompt {
        pub answers: RefCell<VecDeque<RecoveryChoice>>,
        pub asked: Cell<u32>,
        pub notices: RefCell<Vec<String>>,
    }

    impl ScriptedPrompt {
        pub fn new(answers: &[RecoveryChoice]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().copied().collect()),
                asked: Cell::new(0),
                notices: RefCell::new(Vec::new()),
            }
        }
    }

    impl OperatorPrompt for ScriptedPrompt {
        fn ask_retry(&self, _location: &str, _last_error: &str, _attempts: u32) -> RecoveryChoice {
            self.asked.set(self.asked.get() + 1);
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or(RecoveryChoice::Continue)
        }

        fn notify(&self, title: &str, _message: &str) {
            self.notices.borrow_mut().push(title.to_string());
        }
    }

    pub fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
            recovery_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_first_attempt_success() {
        let opener = FlakyOpener::failing(0);
        let prompt = ScriptedPrompt::new(&[]);
        let acq = acquire_connection(&opener, &instant(3), &prompt);
        assert!(acq.connection.is_some());
        assert_eq!(acq.attempts.len(), 1);
        assert_eq!(prompt.asked.get(), 0);
    }

    #[test]
    fn test_fails_max_retries_then_succeeds() {
        for max_retries in 1..=5 {
            let opener = FlakyOpener::failing(max_retries);
            let prompt = ScriptedPrompt::new(&[]);
            let acq = acquire_connection(&opener, &instant(max_retries), &prompt);

            assert!(acq.connection.is_some(), "max_retries={max_retries}");
            assert_eq!(acq.failed_attempts(), max_retries as usize);
            assert_eq!(prompt.asked.get(), 0);
            let last = acq.attempts.last().unwrap();
            assert_eq!(last.outcome, AttemptOutcome::Succeeded);
            assert_eq!(last.attempt_number, max_retries + 1);
        }
    }

    #[test]
    fn test_exhausted_then_continue_returns_none() {
        let opener = FlakyOpener::failing(u32::MAX);
        let prompt = ScriptedPrompt::new(&[RecoveryChoice::Continue]);
        let acq = acquire_connection(&opener, &instant(3), &prompt);

        assert!(acq.connection.is_none());
        assert!(acq.cancelled());
        assert_eq!(acq.failed_attempts(), 4);
        assert_eq!(prompt.asked.get(), 1);
        assert!(acq.attempts[0].error_detail.as_deref().unwrap().contains("refused #1"));
    }

    #[test]
    fn test_retry_resets_counter() {
        // Round 1: 3 failures. Round 2: 2 failures then success.
        let opener = FlakyOpener::failing(5);
        let prompt = ScriptedPrompt::new(&[RecoveryChoice::Retry]);
        let acq = acquire_connection(&opener, &instant(2), &prompt);

        assert!(acq.connection.is_some());
        assert_eq!(prompt.asked.get(), 1);
        let last = acq.attempts.last().unwrap();
        assert_eq!(last.round, 2);
        assert_eq!(last.attempt_number, 3);
    }

    #[test]
    fn test_unhealthy_connection_counts_as_failure() {
        struct Unhealthy;
        impl StorageOpener for Unhealthy {
            type Connection = FakeConn;
            fn location(&self) -> String {
                "memory://down".into()
            }
            fn open(&self) -> Result<FakeConn> {
                Ok(FakeConn { healthy: false })
            }
        }

        let prompt = ScriptedPrompt::new(&[RecoveryChoice::Continue]);
        let acq = acquire_connection(&Unhealthy, &instant(1), &prompt);
        assert!(acq.connection.is_none());
        assert_eq!(acq.failed_attempts(), 2);
        assert!(acq.attempts[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("reachability check failed"));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&StorageConfig::default());
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff, Duration::from_millis(500));
        assert_eq!(policy.recovery_backoff, Duration::from_millis(1000));
    }
}
