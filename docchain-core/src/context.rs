//! Per-operation execution context.
//!
//! An [`OpContext`] travels with every terminal operation. It can carry a parent
//! [`tracing::Span`] that the tracing interceptor nests under, and a caller deadline
//! that is combined with the store's own operation bound.

use std::time::Duration;
use tokio::time::Instant;
use tracing::Span;

/// Execution context passed to every terminal operation.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use docchain::context::OpContext;
///
/// // No parent span, no caller deadline: only the store's bound applies.
/// let ctx = OpContext::background();
///
/// // Nest under the caller's current span and give up after one second.
/// let ctx = OpContext::current().with_timeout(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    parent: Option<Span>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context with no parent span and no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose parent is the span the caller is currently inside.
    pub fn current() -> Self {
        Self::with_parent(Span::current())
    }

    /// A context nested under the given span.
    pub fn with_parent(span: Span) -> Self {
        Self { parent: Some(span), deadline: None }
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The parent span, if one is set and enabled.
    pub fn parent(&self) -> Option<&Span> {
        self.parent
            .as_ref()
            .filter(|span| !span.is_disabled())
    }

    /// The caller deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the caller deadline has already passed.
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// The deadline an operation bounded by `bound` must finish by.
    ///
    /// An expired caller deadline is ignored, so the operation still gets a full `bound`.
    pub(crate) fn effective_deadline(&self, bound: Duration) -> Instant {
        let now = Instant::now();
        let ceiling = now + bound;

        match self.deadline {
            Some(deadline) if deadline > now => deadline.min(ceiling),
            _ => ceiling,
        }
    }
}
