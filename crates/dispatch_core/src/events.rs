//! Fire-and-forget notification events.
//!
//! The core emits an event on every externally-interesting state transition
//! and never awaits delivery; the notification dispatcher behind the sink is
//! an external collaborator.

use serde::{Deserialize, Serialize};

use crate::model::{Booking, BookingId, OfferId, RequestId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchEvent {
    BookingConfirmed {
        booking: Booking,
    },
    BookingReleased {
        booking_id: BookingId,
        offer_id: OfferId,
        seats_restored: u32,
    },
    RequestRejected {
        request_id: RequestId,
    },
    RideCancelled {
        offer_id: Option<OfferId>,
        request_id: Option<RequestId>,
    },
    OfferFull {
        offer_id: OfferId,
    },
    OfferReopened {
        offer_id: OfferId,
    },
    OfferCompleted {
        offer_id: OfferId,
    },
}

/// Event delivery seam. Implementations must not block for long: emission
/// happens inline on dispatch paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DispatchEvent);
}

/// Sink that drops every event; the default when no dispatcher is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: DispatchEvent) {}
}
