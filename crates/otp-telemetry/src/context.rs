//! Request-scoped context (§9 redesign note: replace the
//! implicit request-scoped logger attached to the request object with
//! an explicit context parameter carrying request-id, clock, and
//! logger, threaded through every component boundary).

use crate::clock::{Clock, SystemClock};
use std::sync::Arc;
use uuid::Uuid;

/// Carried through every AuthOrchestrator/OrderConfirmationEngine call
/// so logs can be correlated by `request_id` and tests can substitute
/// a [`crate::clock::FixedClock`] without touching call signatures.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub clock: Arc<dyn Clock>,
}

impl RequestContext {
    pub fn new(request_id: Uuid, clock: Arc<dyn Clock>) -> Self {
        Self { request_id, clock }
    }

    /// A context for call sites outside an HTTP request (background
    /// jobs, startup) that still need a request-id for log
    /// correlation.
    pub fn generated(clock: Arc<dyn Clock>) -> Self {
        Self::new(Uuid::new_v4(), clock)
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn for_test() -> Self {
        Self::new(Uuid::new_v4(), Arc::new(SystemClock))
    }
}
