//! The attempt cascade and its retry state machine.
//!
//! Each attempt targets one (model, credential) pair. The classified
//! failure of an attempt, never the raw HTTP status, decides whether to
//! retry with another credential, concede to the next model, or abort.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::core::cascade::Cascade;
use crate::core::error::EngineError;
use crate::core::provider::{ClassifiedFailure, FailureKind};

/// Where the state machine goes after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    RetryCredential,
    RetryModel,
    Fatal,
}

/// Transition rules for a classified failure, given whether further
/// credentials remain for the current model.
pub fn disposition(kind: FailureKind, credentials_remain: bool) -> Disposition {
    match kind {
        FailureKind::InvalidCredential => Disposition::RetryCredential,
        FailureKind::RateLimited | FailureKind::ServerUnavailable | FailureKind::Transport => {
            if credentials_remain {
                Disposition::RetryCredential
            } else {
                Disposition::RetryModel
            }
        }
        // A bad model name will never succeed with a different credential.
        FailureKind::BadModel => Disposition::RetryModel,
        FailureKind::BadRequest | FailureKind::ContentPolicy => Disposition::Fatal,
    }
}

fn needs_backoff(kind: FailureKind) -> bool {
    matches!(
        kind,
        FailureKind::RateLimited | FailureKind::ServerUnavailable
    )
}

/// Consecutive transport failures tolerated before the invocation aborts.
const MAX_TRANSPORT_STRIKES: u32 = 3;

pub struct Executor {
    /// Pause before retrying after a rate limit or upstream outage, to
    /// avoid hammering a shared limit. Zero in tests.
    pub retry_delay: Duration,
}

impl Executor {
    pub fn new(retry_delay: Duration) -> Self {
        Executor { retry_delay }
    }

    /// Drive the cascade until an attempt is accepted or the attempt space
    /// is exhausted, in which case the last classified failure surfaces.
    pub async fn run<F, Fut>(
        &self,
        cascade: &mut Cascade,
        mut attempt: F,
    ) -> Result<String, EngineError>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<String, EngineError>>,
    {
        let mut last_failure: Option<ClassifiedFailure> = None;
        let mut transport_strikes = 0u32;
        let models = cascade.models().to_vec();

        'models: for model in models {
            let credentials = cascade.usable_credentials();
            for (index, credential) in credentials.iter().enumerate() {
                match attempt(model.clone(), credential.clone()).await {
                    Ok(text) => return Ok(text),
                    Err(EngineError::Completion(failure)) => {
                        debug!(
                            model = %model,
                            kind = ?failure.kind,
                            "attempt failed: {}",
                            failure.message
                        );

                        if failure.kind == FailureKind::Transport {
                            transport_strikes += 1;
                            if transport_strikes >= MAX_TRANSPORT_STRIKES {
                                return Err(EngineError::Completion(failure));
                            }
                        } else {
                            transport_strikes = 0;
                        }

                        if failure.kind == FailureKind::InvalidCredential {
                            cascade.invalidate(credential);
                        }

                        let credentials_remain = index + 1 < credentials.len();
                        let next = disposition(failure.kind, credentials_remain);
                        let backoff = needs_backoff(failure.kind);
                        if next == Disposition::Fatal {
                            return Err(EngineError::Completion(failure));
                        }
                        last_failure = Some(failure);

                        if backoff && !self.retry_delay.is_zero() {
                            sleep(self.retry_delay).await;
                        }
                        match next {
                            Disposition::RetryCredential => continue,
                            Disposition::RetryModel => continue 'models,
                            Disposition::Fatal => unreachable!(),
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        Err(EngineError::Completion(last_failure.unwrap_or_else(
            || ClassifiedFailure::new(FailureKind::BadRequest, "no attempts were possible"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Script = Arc<Mutex<VecDeque<Result<String, EngineError>>>>;
    type Log = Arc<Mutex<Vec<(String, String)>>>;

    fn failure(kind: FailureKind) -> EngineError {
        EngineError::Completion(ClassifiedFailure::new(kind, "scripted"))
    }

    fn scripted(results: Vec<Result<String, EngineError>>) -> (Script, Log) {
        (
            Arc::new(Mutex::new(VecDeque::from(results))),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    async fn run_cascade(
        models: &[&str],
        credentials: &[&str],
        script: Script,
        log: Log,
    ) -> Result<String, EngineError> {
        let mut cascade = Cascade::with_order(
            models.iter().map(|m| m.to_string()).collect(),
            credentials.iter().map(|k| k.to_string()).collect(),
        );
        let executor = Executor::new(Duration::ZERO);
        executor
            .run(&mut cascade, |model, credential| {
                let script = script.clone();
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((model, credential));
                    script
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or_else(|| Err(failure(FailureKind::BadRequest)))
                }
            })
            .await
    }

    fn attempts(log: &Log) -> Vec<(String, String)> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn rate_limits_exhaust_credentials_before_conceding_the_model() {
        let (script, log) = scripted(vec![
            Err(failure(FailureKind::RateLimited)),
            Err(failure(FailureKind::RateLimited)),
            Err(failure(FailureKind::RateLimited)),
            Err(failure(FailureKind::RateLimited)),
        ]);
        let result = run_cascade(&["m1", "m2"], &["k1", "k2"], script, log.clone()).await;

        assert!(matches!(
            result,
            Err(EngineError::Completion(ClassifiedFailure {
                kind: FailureKind::RateLimited,
                ..
            }))
        ));
        let expected: Vec<(String, String)> = [
            ("m1", "k1"),
            ("m1", "k2"),
            ("m2", "k1"),
            ("m2", "k2"),
        ]
        .iter()
        .map(|(m, k)| (m.to_string(), k.to_string()))
        .collect();
        assert_eq!(attempts(&log), expected);
    }

    #[tokio::test]
    async fn invalid_credential_is_excluded_for_later_models() {
        let (script, log) = scripted(vec![
            Err(failure(FailureKind::InvalidCredential)),
            Err(failure(FailureKind::RateLimited)),
            Err(failure(FailureKind::RateLimited)),
        ]);
        let result = run_cascade(&["m1", "m2"], &["k1", "k2"], script, log.clone()).await;

        assert!(result.is_err());
        let expected: Vec<(String, String)> = [("m1", "k1"), ("m1", "k2"), ("m2", "k2")]
            .iter()
            .map(|(m, k)| (m.to_string(), k.to_string()))
            .collect();
        assert_eq!(attempts(&log), expected);
    }

    #[tokio::test]
    async fn bad_model_advances_without_consuming_credential_retries() {
        let (script, log) = scripted(vec![
            Err(failure(FailureKind::BadModel)),
            Ok("answer".to_string()),
        ]);
        let result = run_cascade(&["m1", "m2"], &["k1", "k2"], script, log.clone()).await;

        assert_eq!(result.expect("success"), "answer");
        let expected: Vec<(String, String)> = [("m1", "k1"), ("m2", "k1")]
            .iter()
            .map(|(m, k)| (m.to_string(), k.to_string()))
            .collect();
        assert_eq!(attempts(&log), expected);
    }

    #[tokio::test]
    async fn content_policy_rejection_aborts_immediately() {
        let (script, log) = scripted(vec![Err(failure(FailureKind::ContentPolicy))]);
        let result = run_cascade(&["m1", "m2"], &["k1", "k2"], script, log.clone()).await;

        assert!(matches!(
            result,
            Err(EngineError::Completion(ClassifiedFailure {
                kind: FailureKind::ContentPolicy,
                ..
            }))
        ));
        assert_eq!(attempts(&log).len(), 1);
    }

    #[tokio::test]
    async fn first_accepted_attempt_wins() {
        let (script, log) = scripted(vec![
            Err(failure(FailureKind::ServerUnavailable)),
            Ok("done".to_string()),
        ]);
        let result = run_cascade(&["m1"], &["k1", "k2"], script, log.clone()).await;
        assert_eq!(result.expect("success"), "done");
        assert_eq!(attempts(&log).len(), 2);
    }

    #[tokio::test]
    async fn repeated_transport_failures_become_fatal() {
        let (script, log) = scripted(vec![
            Err(failure(FailureKind::Transport)),
            Err(failure(FailureKind::Transport)),
            Err(failure(FailureKind::Transport)),
            Ok("never reached".to_string()),
        ]);
        let result = run_cascade(&["m1", "m2"], &["k1", "k2"], script, log.clone()).await;

        assert!(matches!(
            result,
            Err(EngineError::Completion(ClassifiedFailure {
                kind: FailureKind::Transport,
                ..
            }))
        ));
        assert_eq!(attempts(&log).len(), 3);
    }

    #[tokio::test]
    async fn non_completion_errors_pass_through() {
        let (script, log) = scripted(vec![Err(EngineError::ToolLoopDidNotConverge)]);
        let result = run_cascade(&["m1", "m2"], &["k1"], script, log.clone()).await;
        assert!(matches!(result, Err(EngineError::ToolLoopDidNotConverge)));
        assert_eq!(attempts(&log).len(), 1);
    }

    #[test]
    fn disposition_table_matches_policy() {
        assert_eq!(
            disposition(FailureKind::InvalidCredential, false),
            Disposition::RetryCredential
        );
        assert_eq!(
            disposition(FailureKind::RateLimited, true),
            Disposition::RetryCredential
        );
        assert_eq!(
            disposition(FailureKind::RateLimited, false),
            Disposition::RetryModel
        );
        assert_eq!(disposition(FailureKind::BadModel, true), Disposition::RetryModel);
        assert_eq!(disposition(FailureKind::BadRequest, true), Disposition::Fatal);
        assert_eq!(
            disposition(FailureKind::ContentPolicy, true),
            Disposition::Fatal
        );
    }
}
