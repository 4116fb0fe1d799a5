//! Builders and stub collaborators for tests and benchmarks.
//!
//! Everything here is deterministic where it matters: fixed Berlin
//! coordinates, explicit departure offsets, and providers/sinks that record
//! what was asked of them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::events::{DispatchEvent, EventSink};
use crate::geo::Location;
use crate::model::{
    DriverId, OfferId, OfferStatus, PassengerId, RequestId, RequestStatus, RideOffer, RideRequest,
    VehicleType,
};
use crate::routing::{RouteEstimate, RouteProvider, RoutingError};

/// Alexanderplatz, Berlin.
pub fn berlin() -> Location {
    Location::new(52.5219, 13.4132).expect("valid location")
}

/// A point roughly `km` kilometres north of `base` (1 degree latitude is
/// ~111.19 km).
pub fn north_of(base: Location, km: f64) -> Location {
    Location::new(base.latitude() + km / 111.19, base.longitude()).expect("valid location")
}

pub fn offer_at(origin: Location, departure_time: DateTime<Utc>, seats: u32) -> RideOffer {
    RideOffer {
        id: OfferId::new(),
        driver_id: DriverId::new(),
        origin,
        destination: north_of(origin, 20.0),
        departure_time,
        total_seats: seats,
        price_per_seat: 10.0,
        status: OfferStatus::Open,
        vehicle_type: VehicleType::Sedan,
        instant_book: true,
        created_at: Utc::now(),
    }
}

pub fn request_at(pickup: Location, desired_time: DateTime<Utc>, seats: u32) -> RideRequest {
    RideRequest {
        id: RequestId::new(),
        passenger_id: PassengerId::new(),
        pickup,
        dropoff: north_of(pickup, 20.0),
        desired_time,
        seats_needed: seats,
        status: RequestStatus::Searching,
        created_at: Utc::now(),
    }
}

/// An offer departing in one hour near Alexanderplatz.
pub fn offer_near_berlin(km_north: f64, seats: u32) -> RideOffer {
    offer_at(
        north_of(berlin(), km_north),
        Utc::now() + Duration::hours(1),
        seats,
    )
}

/// A request for pickup at Alexanderplatz in one hour.
pub fn request_in_berlin(seats: u32) -> RideRequest {
    request_at(berlin(), Utc::now() + Duration::hours(1), seats)
}

/// Provider that answers every query with the same estimate.
pub struct StaticRouteProvider {
    pub estimate: RouteEstimate,
}

impl RouteProvider for StaticRouteProvider {
    fn route(&self, _origin: Location, _destination: Location) -> Result<RouteEstimate, RoutingError> {
        Ok(self.estimate)
    }
}

/// Provider that always fails; exercises haversine degradation.
pub struct FailingRouteProvider;

impl RouteProvider for FailingRouteProvider {
    fn route(&self, _origin: Location, _destination: Location) -> Result<RouteEstimate, RoutingError> {
        Err(RoutingError::Unavailable("provider down".into()))
    }
}

/// Delegates to an inner provider while counting calls.
pub struct CountingRouteProvider<P> {
    pub inner: P,
    pub calls: AtomicU32,
}

impl<P> CountingRouteProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: RouteProvider> RouteProvider for CountingRouteProvider<P> {
    fn route(&self, origin: Location, destination: Location) -> Result<RouteEstimate, RoutingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.route(origin, destination)
    }
}

/// Fails the first `failures` calls, then delegates.
pub struct FlakyRouteProvider<P> {
    pub inner: P,
    failures_remaining: AtomicU32,
}

impl<P> FlakyRouteProvider<P> {
    pub fn new(inner: P, failures: u32) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

impl<P: RouteProvider> RouteProvider for FlakyRouteProvider<P> {
    fn route(&self, origin: Location, destination: Location) -> Result<RouteEstimate, RoutingError> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RoutingError::Unavailable("transient failure".into()));
        }
        self.inner.route(origin, destination)
    }
}

/// Sink that stores every emitted event for later assertions.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&DispatchEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: DispatchEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
