//! RetryExecutor: makes one request/response operation resilient to
//! transient connectivity failures.
//!
//! # Flow
//!
//! ```text
//! execute(ctx, class, op)
//!     │ resolve deadline (caller's, or class default)
//!     ▼
//! ┌──────────────────────────────────────────────┐
//! │ attempt n                                    │
//! │ - acquire handle (connect / reconnect)       │
//! │ - op(handle, deadline) under the deadline    │
//! │ - Ok → return                                │
//! │ - fatal / deadline / cancel → return         │
//! │ - transient → sleep delay(n), next attempt   │
//! └──────────────────────────────────────────────┘
//!     │ n == max_attempts
//!     ▼
//! RetriesExhausted { attempts, last }
//! ```
//!
//! The executor runs on the caller's task. Cancellation is observed during
//! the call, during the backoff sleep and while waiting for the session
//! lock.
//!
//! Replay is blind: the same operation is re-issued after a reconnect with
//! no way to tell whether the failed attempt reached the server. Mutating
//! operations should carry an idempotency token (see `TerminalClient`).

use std::future::Future;
use std::sync::Arc;

use termlink_domain::OperationClass;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::context::{CallContext, DefaultDeadlines, EffectiveDeadline};
use crate::error::{GatewayError, GatewayResult};
use crate::session::{Connection, Session};

/// Executes unary operations with deadline injection and bounded
/// reconnect-and-replay.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    session: Arc<Session>,
    policy: RetryPolicy,
    deadlines: DefaultDeadlines,
}

impl RetryExecutor {
    /// Create an executor over a shared session.
    pub fn new(session: Arc<Session>, policy: RetryPolicy, deadlines: DefaultDeadlines) -> Self {
        Self { session, policy, deadlines }
    }

    /// The session this executor routes through.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` with retries.
    ///
    /// `operation` receives the handle to call and the effective deadline
    /// of the attempt. It may be invoked up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// - Fatal errors, `DeadlineExceeded` and `CancelledByCaller` are
    ///   returned on first occurrence
    /// - `RetriesExhausted` after `max_attempts` transient failures (with a
    ///   budget of one attempt, the transient error itself is returned)
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: Option<&CallContext>,
        class: OperationClass,
        operation: F,
    ) -> GatewayResult<T>
    where
        F: Fn(Connection, Instant) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.run(ctx, class, self.policy.max_attempts, operation).await
    }

    /// Run `operation` exactly once: no reconnect, no replay.
    pub async fn execute_once<T, F, Fut>(
        &self,
        ctx: Option<&CallContext>,
        class: OperationClass,
        operation: F,
    ) -> GatewayResult<T>
    where
        F: Fn(Connection, Instant) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.run(ctx, class, 1, operation).await
    }

    async fn run<T, F, Fut>(
        &self,
        ctx: Option<&CallContext>,
        class: OperationClass,
        max_attempts: u32,
        operation: F,
    ) -> GatewayResult<T>
    where
        F: Fn(Connection, Instant) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let deadline = EffectiveDeadline::resolve(ctx, class, &self.deadlines);
        let cancel = ctx
            .map(|c| c.cancellation_token().clone())
            .unwrap_or_default();

        // Generation of the handle whose failure must be repaired before
        // the next attempt
        let mut failed_generation: Option<u64> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match self.acquire(&cancel, failed_generation).await {
                Ok(connection) => {
                    let generation = connection.generation();
                    match self.call_once(&cancel, deadline, connection, &operation).await {
                        Ok(value) => {
                            if attempt > 1 {
                                debug!(
                                    session_id = %self.session.id(),
                                    attempt,
                                    %class,
                                    "Call succeeded after retry"
                                );
                            }
                            return Ok(value);
                        }
                        Err(e) => {
                            failed_generation = Some(generation);
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                debug!(
                    session_id = %self.session.id(),
                    attempt,
                    %class,
                    error = %error,
                    "Call failed with non-retryable error"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                if max_attempts == 1 {
                    return Err(error);
                }
                warn!(
                    session_id = %self.session.id(),
                    attempts = attempt,
                    %class,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(GatewayError::RetriesExhausted { attempts: attempt, last: Box::new(error) });
            }

            let delay = self.policy.backoff.next_delay(attempt);
            warn!(
                session_id = %self.session.id(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                %class,
                error = %error,
                "Transient failure, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::CancelledByCaller),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Handle for the next attempt: the current one, or a replacement for
    /// `failed_generation`.
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        failed_generation: Option<u64>,
    ) -> GatewayResult<Connection> {
        if cancel.is_cancelled() {
            return Err(GatewayError::CancelledByCaller);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::CancelledByCaller),
            result = async {
                match failed_generation {
                    Some(generation) => self.session.reconnect(generation).await,
                    None => self.session.ensure_connected().await,
                }
            } => result,
        }
    }

    async fn call_once<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        deadline: EffectiveDeadline,
        connection: Connection,
        operation: &F,
    ) -> GatewayResult<T>
    where
        F: Fn(Connection, Instant) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let at = deadline.for_attempt();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::CancelledByCaller),
            outcome = tokio::time::timeout_at(at, operation(connection, at)) => {
                outcome.unwrap_or(Err(GatewayError::DeadlineExceeded))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
