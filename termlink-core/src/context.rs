//! Caller context: deadline and cancellation for one logical operation.
//!
//! A [`CallContext`] travels with every `execute`/`subscribe` call. When it
//! carries no deadline, the executor injects the default for the
//! operation's class from an immutable [`DefaultDeadlines`] table.

use std::time::Duration;

use termlink_domain::OperationClass;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Call Context
// =============================================================================

/// Deadline and cancellation switch supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Cancellable context with no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that shares an existing cancellation token.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { deadline: None, cancel }
    }

    /// Set an absolute deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline_at(Instant::now() + timeout)
    }

    /// Caller-supplied deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancellation token observed by the operation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel every operation using this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Default Deadlines
// =============================================================================

/// Default deadline per operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDeadlines {
    /// Account, quote and symbol queries
    pub informational: Duration,
    /// History range queries
    pub history: Duration,
    /// Order send/close
    pub trading: Duration,
}

impl DefaultDeadlines {
    /// Default deadline for `class`.
    pub fn for_class(&self, class: OperationClass) -> Duration {
        match class {
            OperationClass::Informational => self.informational,
            OperationClass::History => self.history,
            OperationClass::Trading => self.trading,
        }
    }
}

impl Default for DefaultDeadlines {
    fn default() -> Self {
        Self {
            informational: Duration::from_secs(5),
            history: Duration::from_secs(15),
            trading: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Effective Deadline
// =============================================================================

/// Deadline source for the attempts of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EffectiveDeadline {
    /// The caller's own deadline, reused verbatim for every attempt
    Caller(Instant),
    /// Injected class default, re-derived from `now` for every attempt
    Injected(Duration),
}

impl EffectiveDeadline {
    /// Resolve the deadline for a call; an absent context behaves like
    /// [`CallContext::background`].
    pub(crate) fn resolve(
        ctx: Option<&CallContext>,
        class: OperationClass,
        defaults: &DefaultDeadlines,
    ) -> Self {
        match ctx.and_then(CallContext::deadline) {
            Some(deadline) => EffectiveDeadline::Caller(deadline),
            None => EffectiveDeadline::Injected(defaults.for_class(class)),
        }
    }

    /// Deadline for an attempt starting now.
    pub(crate) fn for_attempt(&self) -> Instant {
        match self {
            EffectiveDeadline::Caller(deadline) => *deadline,
            EffectiveDeadline::Injected(timeout) => Instant::now() + *timeout,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_is_kept() {
        let deadline = Instant::now() + Duration::from_millis(1234);
        let ctx = CallContext::background().deadline_at(deadline);

        let effective =
            EffectiveDeadline::resolve(Some(&ctx), OperationClass::Trading, &DefaultDeadlines::default());

        assert_eq!(effective, EffectiveDeadline::Caller(deadline));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(effective.for_attempt(), deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_injected_per_class() {
        let defaults = DefaultDeadlines::default();
        let ctx = CallContext::background();

        let info = EffectiveDeadline::resolve(Some(&ctx), OperationClass::Informational, &defaults);
        let trade = EffectiveDeadline::resolve(Some(&ctx), OperationClass::Trading, &defaults);

        assert_eq!(info, EffectiveDeadline::Injected(Duration::from_secs(5)));
        assert_eq!(trade, EffectiveDeadline::Injected(Duration::from_secs(30)));

        let start = Instant::now();
        assert_eq!(info.for_attempt(), start + Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(info.for_attempt(), start + Duration::from_secs(6));
    }

    #[test]
    fn test_absent_context_behaves_like_background() {
        let defaults = DefaultDeadlines::default();
        let background = CallContext::background();

        assert_eq!(
            EffectiveDeadline::resolve(None, OperationClass::History, &defaults),
            EffectiveDeadline::resolve(Some(&background), OperationClass::History, &defaults),
        );
    }

    #[test]
    fn test_cancel_propagates_to_clones() {
        let ctx = CallContext::background();
        let clone = ctx.clone();

        ctx.cancel();

        assert!(clone.is_cancelled());
    }
}
