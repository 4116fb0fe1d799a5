//! Error taxonomy for the dispatch core.
//!
//! Propagation rules:
//!
//! - `Validation` and `NotFound` surface immediately, no retry.
//! - `SeatsUnavailable` is recovered inside the coordinator (next-ranked
//!   candidate) and only surfaces once candidates are exhausted.
//! - `Contention` is retried inside the seat ledger; it surfaces only after
//!   the CAS retry budget is spent.
//! - `ExternalService` degrades match scoring rather than failing dispatch.
//! - `InvalidState` and `HasActiveBookings` always surface; they indicate a
//!   caller logic error and are never auto-recovered.

use thiserror::Error;

use crate::model::OfferId;
use crate::routing::RoutingError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("seats unavailable: requested {requested}, remaining {remaining}")]
    SeatsUnavailable { requested: u32, remaining: u32 },

    #[error("reservation contention on offer {offer_id} after {attempts} attempt(s)")]
    Contention { offer_id: OfferId, attempts: u32 },

    #[error("offer {offer_id} has {active} active booking(s)")]
    HasActiveBookings { offer_id: OfferId, active: usize },

    #[error("external service failure: {0}")]
    ExternalService(#[from] RoutingError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),
}
