//! Domain records: offers, requests, matches, bookings, driver profiles.
//!
//! Identifiers are opaque newtypes over UUIDs; the identity provider that
//! mints driver/passenger ids is an external collaborator, the core only
//! requires them to be stable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::Location;

/// Rating assumed for drivers that have no recorded profile yet.
pub const DEFAULT_DRIVER_RATING: f64 = 4.5;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Identifier of a driver-posted ride offer.
    OfferId
);
id_type!(
    /// Identifier of a passenger ride request.
    RequestId
);
id_type!(
    /// Identifier of a confirmed booking.
    BookingId
);
id_type!(
    /// Opaque driver identity supplied by the identity provider.
    DriverId
);
id_type!(
    /// Opaque passenger identity supplied by the identity provider.
    PassengerId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    Sedan,
    Suv,
    Hatchback,
    Coupe,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Open,
    Full,
    Cancelled,
    Completed,
}

impl OfferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OfferStatus::Cancelled | OfferStatus::Completed)
    }

    /// Exhaustive transition table for offers.
    pub fn can_transition(self, next: OfferStatus) -> bool {
        use OfferStatus::*;
        matches!(
            (self, next),
            (Open, Full)
                | (Full, Open)
                | (Open, Cancelled)
                | (Full, Cancelled)
                | (Open, Completed)
                | (Full, Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Searching,
    Matched,
    Confirmed,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Cancelled)
    }

    /// Exhaustive transition table for requests.
    ///
    /// `Matched -> Searching` covers a failed reservation attempt that
    /// re-enters the search, and `Matched -> Rejected` an exhausted
    /// candidate list; `Confirmed -> Cancelled` is only reachable through a
    /// compensating seat release.
    pub fn can_transition(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Searching, Matched)
                | (Matched, Confirmed)
                | (Matched, Searching)
                | (Searching, Rejected)
                | (Matched, Rejected)
                | (Searching, Cancelled)
                | (Matched, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

/// A driver-posted ride with available seats.
///
/// Owned by the driver; the seat ledger mutates the remaining-seat count and
/// the lifecycle component mutates `status`. Everything else is immutable
/// after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideOffer {
    pub id: OfferId,
    pub driver_id: DriverId,
    pub origin: Location,
    pub destination: Location,
    pub departure_time: DateTime<Utc>,
    pub total_seats: u32,
    pub price_per_seat: f64,
    pub status: OfferStatus,
    pub vehicle_type: VehicleType,
    pub instant_book: bool,
    pub created_at: DateTime<Utc>,
}

impl RideOffer {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.total_seats == 0 {
            return Err(DispatchError::Validation(
                "offer must have at least one seat".into(),
            ));
        }
        if !self.price_per_seat.is_finite() || self.price_per_seat < 0.0 {
            return Err(DispatchError::Validation(format!(
                "price per seat must be finite and non-negative, got {}",
                self.price_per_seat
            )));
        }
        Ok(())
    }
}

/// A passenger's ask for a ride matching certain constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: RequestId,
    pub passenger_id: PassengerId,
    pub pickup: Location,
    pub dropoff: Location,
    pub desired_time: DateTime<Utc>,
    pub seats_needed: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl RideRequest {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.seats_needed == 0 {
            return Err(DispatchError::Validation(
                "request must need at least one seat".into(),
            ));
        }
        Ok(())
    }
}

/// A scored, non-binding pairing of a request to an offer.
///
/// Ephemeral: exists only during negotiation. The coordinator discards
/// matches older than the configured TTL; a match only becomes durable by
/// converting into a [`Booking`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub request_id: RequestId,
    pub offer_id: OfferId,
    pub score: f64,
    pub eta_minutes: f64,
    pub distance_km: f64,
    pub created_at: DateTime<Utc>,
}

/// A confirmed, seat-reserving pairing. Immutable once created; the seat
/// ledger tracks the terminal released flag separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub request_id: RequestId,
    pub offer_id: OfferId,
    pub seats_reserved: u32,
    pub confirmed_at: DateTime<Utc>,
}

/// Driver reputation snapshot; feeds the rating term of match scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: DriverId,
    pub rating: f64,
    pub total_rides: u32,
}

impl DriverProfile {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.rating.is_finite() || !(0.0..=5.0).contains(&self.rating) {
            return Err(DispatchError::Validation(format!(
                "driver rating must be within 0..=5, got {}",
                self.rating
            )));
        }
        Ok(())
    }
}
