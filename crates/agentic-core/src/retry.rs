//! Error-kind-scoped retry control.
//!
//! [`RetryController`] wraps a whole async operation and retries it only for
//! error kinds it was configured with, each with its own allowance. Provider
//! status errors get special treatment: 5xx responses consume the allowance of
//! their kind, any other status is returned immediately.
//!
//! ```rust,ignore
//! let controller = RetryController::new([(ErrorKind::ProviderStatus, 3)]);
//! let response = controller
//!     .execute_with_retries(|| client.get_model_response(message, &files), DEFAULT_RETRY_WAIT)
//!     .await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wait between attempts when the caller has no preference
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(3);

/// Errors the controller can reason about
pub trait Classify {
    type Kind: Copy + Eq + Hash + fmt::Debug;

    /// Kind used to look up the allowance
    fn kind(&self) -> Self::Kind;

    /// HTTP-like status code when the error is a provider status error
    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// Occurrences seen for one error kind versus the retries it may consume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAllowance {
    pub occurrences: u32,
    pub allowance: u32,
}

impl ErrorAllowance {
    pub const fn new(allowance: u32) -> Self {
        Self {
            occurrences: 0,
            allowance,
        }
    }

    pub const fn record_occurrence(&mut self) {
        self.occurrences += 1;
    }

    /// Still retryable after the occurrence just recorded
    pub const fn has_allowance_remaining(&self) -> bool {
        self.occurrences <= self.allowance
    }
}

/// How long occurrence counts live
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceScope {
    /// Counts accumulate over every call made through the controller
    #[default]
    ControllerLifetime,
    /// Counts are cleared at the start of each call
    PerCall,
}

enum Verdict {
    Retry { occurrences: u32, allowance: u32 },
    Exhausted { allowance: u32 },
    NotConfigured,
    Permanent(u16),
}

/// Retries an operation according to per-kind allowances
#[derive(Debug)]
pub struct RetryController<K> {
    allowances: Mutex<HashMap<K, ErrorAllowance>>,
    total_attempts: AtomicU64,
    scope: AllowanceScope,
}

impl<K: Copy + Eq + Hash + fmt::Debug> RetryController<K> {
    /// One allowance per error kind
    pub fn new(allowances: impl IntoIterator<Item = (K, u32)>) -> Self {
        Self {
            allowances: Mutex::new(
                allowances
                    .into_iter()
                    .map(|(kind, count)| (kind, ErrorAllowance::new(count)))
                    .collect(),
            ),
            total_attempts: AtomicU64::new(0),
            scope: AllowanceScope::default(),
        }
    }

    #[must_use]
    pub const fn with_scope(mut self, scope: AllowanceScope) -> Self {
        self.scope = scope;
        self
    }

    pub const fn scope(&self) -> AllowanceScope {
        self.scope
    }

    /// Attempts made over the controller's lifetime
    pub fn total_attempts(&self) -> u64 {
        self.total_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of the allowance for `kind`, if configured
    pub fn allowance(&self, kind: K) -> Option<ErrorAllowance> {
        self.lock().get(&kind).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, ErrorAllowance>> {
        self.allowances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn consume(&self, kind: K) -> Verdict {
        let mut allowances = self.lock();
        let Some(entry) = allowances.get_mut(&kind) else {
            return Verdict::NotConfigured;
        };
        entry.record_occurrence();
        if entry.has_allowance_remaining() {
            Verdict::Retry {
                occurrences: entry.occurrences,
                allowance: entry.allowance,
            }
        } else {
            Verdict::Exhausted {
                allowance: entry.allowance,
            }
        }
    }

    fn judge<E: Classify<Kind = K>>(&self, err: &E) -> Verdict {
        match err.status_code() {
            Some(status) if (500..600).contains(&status) => self.consume(err.kind()),
            Some(status) => Verdict::Permanent(status),
            None => self.consume(err.kind()),
        }
    }

    /// Run `func` until it succeeds or fails in a way the allowances do not
    /// cover. Sleeps `wait` between attempts.
    pub async fn execute_with_retries<T, E, F, Fut>(&self, mut func: F, wait: Duration) -> Result<T, E>
    where
        E: Classify<Kind = K> + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.scope == AllowanceScope::PerCall {
            for entry in self.lock().values_mut() {
                entry.occurrences = 0;
            }
        }

        loop {
            let attempt = self.total_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(total_attempts = attempt, "Attempting execution");

            let err = match func().await {
                Ok(value) => {
                    tracing::info!(total_attempts = attempt, "Execution succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = err.kind();
            match self.judge(&err) {
                Verdict::Retry { occurrences, allowance } => {
                    tracing::warn!(
                        ?kind,
                        status = ?err.status_code(),
                        occurrences,
                        allowance,
                        error = %err,
                        "Retrying after error"
                    );
                    tokio::time::sleep(wait).await;
                }
                Verdict::Exhausted { allowance } => {
                    tracing::error!(?kind, allowance, error = %err, "Maximum allowances exceeded, no more retries");
                    return Err(err);
                }
                Verdict::NotConfigured => {
                    tracing::error!(?kind, error = %err, "No allowance configured for this error kind, execution stopped");
                    return Err(err);
                }
                Verdict::Permanent(status) => {
                    tracing::error!(?kind, status, error = %err, "Non-retryable provider status");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::{AgentError, ErrorKind};

    fn status(code: u16, message: &str) -> AgentError {
        AgentError::ProviderStatus {
            status: code,
            message: message.into(),
        }
    }

    fn controller() -> RetryController<ErrorKind> {
        RetryController::new([
            (ErrorKind::ToolValidation, 2),
            (ErrorKind::ProviderStatus, 3),
            (ErrorKind::Timeout, 1),
        ])
    }

    /// Replays `script` one entry per call, then succeeds.
    async fn run_script(
        controller: &RetryController<ErrorKind>,
        script: Vec<AgentError>,
    ) -> (Result<&'static str, AgentError>, usize) {
        let calls = AtomicUsize::new(0);
        let script = Mutex::new(script.into_iter());
        let result = controller
            .execute_with_retries(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let next = script.lock().unwrap().next();
                    async move {
                        match next {
                            Some(err) => Err(err),
                            None => Ok("success"),
                        }
                    }
                },
                Duration::from_secs(3),
            )
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_execution() {
        let controller = controller();
        let (result, calls) = run_script(&controller, vec![]).await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls, 1);
        assert_eq!(controller.total_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_kind_retries_then_succeeds() {
        let controller = controller();
        let started = tokio::time::Instant::now();
        let (result, calls) = run_script(
            &controller,
            vec![
                AgentError::ToolValidation("first".into()),
                AgentError::ToolValidation("second".into()),
            ],
        )
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls, 3);
        assert_eq!(controller.allowance(ErrorKind::ToolValidation).unwrap().occurrences, 2);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_kind_allowance_exceeded() {
        let controller = controller();
        let (result, calls) = run_script(
            &controller,
            vec![
                AgentError::ToolValidation("attempt 1".into()),
                AgentError::ToolValidation("attempt 2".into()),
                AgentError::ToolValidation("attempt 3".into()),
            ],
        )
        .await;

        assert!(matches!(result, Err(AgentError::ToolValidation(msg)) if msg == "attempt 3"));
        assert_eq!(calls, 3);
        assert_eq!(controller.allowance(ErrorKind::ToolValidation).unwrap().occurrences, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retried_within_allowance() {
        let controller = controller();
        let (result, calls) = run_script(
            &controller,
            vec![status(500, "a"), status(502, "b"), status(503, "c")],
        )
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls, 4);
        assert_eq!(controller.total_attempts(), 4);
        assert_eq!(controller.allowance(ErrorKind::ProviderStatus).unwrap().occurrences, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_allowance_exceeded() {
        let controller = controller();
        let (result, calls) = run_script(
            &controller,
            vec![status(500, "a"), status(502, "b"), status(503, "c"), status(504, "d")],
        )
        .await;

        assert!(matches!(result, Err(AgentError::ProviderStatus { status: 504, .. })));
        assert_eq!(calls, 4);
        assert_eq!(controller.allowance(ErrorKind::ProviderStatus).unwrap().occurrences, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_status_never_retried() {
        let controller = controller();
        let (result, calls) = run_script(&controller, vec![status(404, "missing")]).await;

        assert!(matches!(result, Err(AgentError::ProviderStatus { status: 404, .. })));
        assert_eq!(calls, 1);
        assert_eq!(controller.allowance(ErrorKind::ProviderStatus).unwrap().occurrences, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_kind_not_retried() {
        let controller = controller();
        let (result, calls) = run_script(&controller, vec![AgentError::Provider("reset".into())]).await;

        assert!(matches!(result, Err(AgentError::Provider(_))));
        assert_eq!(calls, 1);
        assert_eq!(controller.total_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_allowance_still_counts() {
        let controller = RetryController::new([(ErrorKind::Timeout, 0)]);
        let (result, calls) = run_script(&controller, vec![AgentError::Timeout("slow".into())]).await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert_eq!(controller.allowance(ErrorKind::Timeout).unwrap().occurrences, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_without_allowance() {
        let controller = RetryController::new([(ErrorKind::Timeout, 1)]);
        let (result, calls) = run_script(&controller, vec![status(500, "down")]).await;

        assert!(matches!(result, Err(AgentError::ProviderStatus { status: 500, .. })));
        assert_eq!(calls, 1);
        assert!(controller.allowance(ErrorKind::ProviderStatus).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_scope_exhausts_across_calls() {
        let controller = controller();
        let (first, _) = run_script(&controller, vec![AgentError::Timeout("a".into())]).await;
        assert!(first.is_ok());

        let (second, calls) = run_script(&controller, vec![AgentError::Timeout("b".into())]).await;
        assert!(second.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_scope_resets_counts() {
        let controller = controller().with_scope(AllowanceScope::PerCall);
        let (first, _) = run_script(&controller, vec![AgentError::Timeout("a".into())]).await;
        let (second, calls) = run_script(&controller, vec![AgentError::Timeout("b".into())]).await;

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(calls, 2);
        assert_eq!(controller.total_attempts(), 4);
    }
}
