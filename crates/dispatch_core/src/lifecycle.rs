//! Ride lifecycle: registries for offers, requests and driver profiles, and
//! the state machines governing their status transitions.
//!
//! Transition legality lives in the exhaustive tables on
//! [`OfferStatus`]/[`RequestStatus`]; this component owns the records and
//! applies transitions atomically under its registry locks. Terminal states
//! (`Cancelled`, `Rejected`, `Completed`) admit no further transition —
//! attempts fail with `InvalidState`.
//!
//! Events are emitted after the registry lock is dropped so a sink may call
//! back into the core without self-deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventSink};
use crate::model::{
    DriverId, DriverProfile, OfferId, OfferStatus, RequestId, RequestStatus, RideOffer,
    RideRequest, DEFAULT_DRIVER_RATING,
};

/// Registries plus transition enforcement for offers and requests.
pub struct RideLifecycle {
    offers: RwLock<HashMap<OfferId, RideOffer>>,
    requests: RwLock<HashMap<RequestId, RideRequest>>,
    drivers: RwLock<HashMap<DriverId, DriverProfile>>,
    events: Arc<dyn EventSink>,
}

impl RideLifecycle {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            offers: RwLock::new(HashMap::new()),
            requests: RwLock::new(HashMap::new()),
            drivers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a validated offer. The stored copy starts `Open`.
    pub fn register_offer(&self, mut offer: RideOffer) -> Result<(), DispatchError> {
        offer.validate()?;
        offer.status = OfferStatus::Open;
        let mut offers = lock_write(&self.offers);
        if offers.contains_key(&offer.id) {
            return Err(DispatchError::InvalidState(format!(
                "offer {} already registered",
                offer.id
            )));
        }
        info!(offer_id = %offer.id, driver_id = %offer.driver_id, "offer registered");
        offers.insert(offer.id, offer);
        Ok(())
    }

    /// Register a validated request. The stored copy starts `Searching`.
    pub fn register_request(&self, mut request: RideRequest) -> Result<(), DispatchError> {
        request.validate()?;
        request.status = RequestStatus::Searching;
        let mut requests = lock_write(&self.requests);
        if requests.contains_key(&request.id) {
            return Err(DispatchError::InvalidState(format!(
                "request {} already registered",
                request.id
            )));
        }
        info!(request_id = %request.id, passenger_id = %request.passenger_id, "request registered");
        requests.insert(request.id, request);
        Ok(())
    }

    pub fn upsert_driver(&self, profile: DriverProfile) -> Result<(), DispatchError> {
        profile.validate()?;
        lock_write(&self.drivers).insert(profile.id, profile);
        Ok(())
    }

    /// Rating used for match scoring; unknown drivers get the default.
    pub fn driver_rating(&self, driver_id: DriverId) -> f64 {
        lock_read(&self.drivers)
            .get(&driver_id)
            .map(|p| p.rating)
            .unwrap_or(DEFAULT_DRIVER_RATING)
    }

    pub fn offer(&self, offer_id: OfferId) -> Result<RideOffer, DispatchError> {
        lock_read(&self.offers)
            .get(&offer_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} unknown")))
    }

    pub fn request(&self, request_id: RequestId) -> Result<RideRequest, DispatchError> {
        lock_read(&self.requests)
            .get(&request_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("request {request_id} unknown")))
    }

    pub fn offer_status(&self, offer_id: OfferId) -> Result<OfferStatus, DispatchError> {
        self.offer(offer_id).map(|o| o.status)
    }

    pub fn request_status(&self, request_id: RequestId) -> Result<RequestStatus, DispatchError> {
        self.request(request_id).map(|r| r.status)
    }

    /// Apply a request transition if the table admits it. Returns the status
    /// the request held before the transition, read under the same write
    /// lock, so callers can branch on where the request came from without a
    /// separate (racy) status read.
    pub fn transition_request(
        &self,
        request_id: RequestId,
        next: RequestStatus,
    ) -> Result<RequestStatus, DispatchError> {
        let mut requests = lock_write(&self.requests);
        let request = requests
            .get_mut(&request_id)
            .ok_or_else(|| DispatchError::NotFound(format!("request {request_id} unknown")))?;
        let prior = request.status;
        if !prior.can_transition(next) {
            return Err(DispatchError::InvalidState(format!(
                "request {request_id} cannot transition {prior:?} -> {next:?}"
            )));
        }
        request.status = next;
        Ok(prior)
    }

    pub fn mark_matched(&self, request_id: RequestId) -> Result<(), DispatchError> {
        self.transition_request(request_id, RequestStatus::Matched)
            .map(|_| ())
    }

    pub fn mark_confirmed(&self, request_id: RequestId) -> Result<(), DispatchError> {
        self.transition_request(request_id, RequestStatus::Confirmed)
            .map(|_| ())
    }

    pub fn mark_rejected(&self, request_id: RequestId) -> Result<(), DispatchError> {
        self.transition_request(request_id, RequestStatus::Rejected)
            .map(|_| ())
    }

    /// Flip a request to `Cancelled` and report the status it held. The
    /// coordinator performs the compensating seat release when the returned
    /// status is `Confirmed`.
    pub fn cancel_request(&self, request_id: RequestId) -> Result<RequestStatus, DispatchError> {
        self.transition_request(request_id, RequestStatus::Cancelled)
    }

    /// Apply an offer transition if the table admits it.
    pub fn transition_offer(
        &self,
        offer_id: OfferId,
        next: OfferStatus,
    ) -> Result<(), DispatchError> {
        let mut offers = lock_write(&self.offers);
        let offer = offers
            .get_mut(&offer_id)
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} unknown")))?;
        if !offer.status.can_transition(next) {
            return Err(DispatchError::InvalidState(format!(
                "offer {offer_id} cannot transition {:?} -> {next:?}",
                offer.status
            )));
        }
        offer.status = next;
        Ok(())
    }

    /// Driver-initiated cancellation. The coordinator checks the ledger for
    /// active bookings before calling this.
    pub fn cancel_offer(&self, offer_id: OfferId) -> Result<(), DispatchError> {
        self.transition_offer(offer_id, OfferStatus::Cancelled)
    }

    /// Completion after departure; `now` must be past the departure time.
    pub fn complete_offer(
        &self,
        offer_id: OfferId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), DispatchError> {
        let departure = self.offer(offer_id)?.departure_time;
        if now < departure {
            return Err(DispatchError::InvalidState(format!(
                "offer {offer_id} cannot complete before departure at {departure}"
            )));
        }
        self.transition_offer(offer_id, OfferStatus::Completed)
    }

    /// Reconcile an offer's status with a remaining seat count, upholding
    /// `Full` iff zero seats remain. Returns the status after reconciling.
    pub fn set_offer_seats(
        &self,
        offer_id: OfferId,
        remaining: u32,
    ) -> Result<OfferStatus, DispatchError> {
        self.reconcile_offer_seats(offer_id, || Ok(remaining))
    }

    /// Reconcile an offer's status against a seat-count source. The source
    /// is consulted under the offer write lock, so two racing reconciliations
    /// each apply the count that is current at their turn — a count read
    /// before the lock cannot reopen an offer another writer just exhausted.
    pub fn reconcile_offer_seats<F>(
        &self,
        offer_id: OfferId,
        remaining: F,
    ) -> Result<OfferStatus, DispatchError>
    where
        F: FnOnce() -> Result<u32, DispatchError>,
    {
        let (status, event) = {
            let mut offers = lock_write(&self.offers);
            let offer = offers
                .get_mut(&offer_id)
                .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} unknown")))?;
            if offer.status.is_terminal() {
                return Err(DispatchError::InvalidState(format!(
                    "offer {offer_id} is terminal ({:?})",
                    offer.status
                )));
            }
            let remaining = remaining()?;
            let event = match (offer.status, remaining) {
                (OfferStatus::Open, 0) => {
                    offer.status = OfferStatus::Full;
                    Some(DispatchEvent::OfferFull { offer_id })
                }
                (OfferStatus::Full, r) if r > 0 => {
                    offer.status = OfferStatus::Open;
                    Some(DispatchEvent::OfferReopened { offer_id })
                }
                _ => None,
            };
            (offer.status, event)
        };
        if let Some(event) = event {
            self.events.emit(event);
        }
        Ok(status)
    }
}

// A poisoned lock still holds consistent registry data; recover it.
fn lock_read<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_write<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::geo::Location;
    use crate::model::{PassengerId, VehicleType};
    use chrono::{Duration, Utc};

    fn lifecycle() -> RideLifecycle {
        RideLifecycle::new(Arc::new(NullEventSink))
    }

    fn sample_offer() -> RideOffer {
        let origin = Location::new(52.52, 13.405).expect("valid location");
        RideOffer {
            id: OfferId::new(),
            driver_id: DriverId::new(),
            origin,
            destination: origin,
            departure_time: Utc::now() + Duration::hours(1),
            total_seats: 3,
            price_per_seat: 12.0,
            status: OfferStatus::Open,
            vehicle_type: VehicleType::Sedan,
            instant_book: true,
            created_at: Utc::now(),
        }
    }

    fn sample_request() -> RideRequest {
        let pickup = Location::new(52.52, 13.405).expect("valid location");
        RideRequest {
            id: RequestId::new(),
            passenger_id: PassengerId::new(),
            pickup,
            dropoff: pickup,
            desired_time: Utc::now() + Duration::hours(1),
            seats_needed: 1,
            status: RequestStatus::Searching,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn request_walks_searching_matched_confirmed() {
        let lifecycle = lifecycle();
        let request = sample_request();
        let id = request.id;
        lifecycle.register_request(request).unwrap();

        lifecycle.mark_matched(id).unwrap();
        lifecycle.mark_confirmed(id).unwrap();
        assert_eq!(lifecycle.request_status(id).unwrap(), RequestStatus::Confirmed);
    }

    #[test]
    fn terminal_request_refuses_all_transitions() {
        let lifecycle = lifecycle();
        let request = sample_request();
        let id = request.id;
        lifecycle.register_request(request).unwrap();
        lifecycle.cancel_request(id).unwrap();

        for next in [
            RequestStatus::Searching,
            RequestStatus::Matched,
            RequestStatus::Confirmed,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
        ] {
            assert!(matches!(
                lifecycle.transition_request(id, next),
                Err(DispatchError::InvalidState(_))
            ));
        }
    }

    #[test]
    fn seat_reconciliation_flips_full_and_back() {
        let lifecycle = lifecycle();
        let offer = sample_offer();
        let id = offer.id;
        lifecycle.register_offer(offer).unwrap();

        assert_eq!(lifecycle.set_offer_seats(id, 0).unwrap(), OfferStatus::Full);
        assert_eq!(lifecycle.set_offer_seats(id, 2).unwrap(), OfferStatus::Open);
        // No-op when nothing changes.
        assert_eq!(lifecycle.set_offer_seats(id, 1).unwrap(), OfferStatus::Open);
    }

    #[test]
    fn reconciliation_applies_the_count_read_at_its_turn() {
        let lifecycle = lifecycle();
        let offer = sample_offer();
        let id = offer.id;
        lifecycle.register_offer(offer).unwrap();

        // The last seat was just taken; the source reads zero.
        assert_eq!(
            lifecycle.reconcile_offer_seats(id, || Ok(0)).unwrap(),
            OfferStatus::Full
        );
        // A writer that loaded a stale count before the lock still consults
        // the source at its turn and must not reopen the offer.
        assert_eq!(
            lifecycle.reconcile_offer_seats(id, || Ok(0)).unwrap(),
            OfferStatus::Full
        );
        // A release makes the source read non-zero again.
        assert_eq!(
            lifecycle.reconcile_offer_seats(id, || Ok(1)).unwrap(),
            OfferStatus::Open
        );
    }

    #[test]
    fn reconciliation_source_errors_leave_status_untouched() {
        let lifecycle = lifecycle();
        let offer = sample_offer();
        let id = offer.id;
        lifecycle.register_offer(offer).unwrap();
        lifecycle.set_offer_seats(id, 0).unwrap();

        let result = lifecycle.reconcile_offer_seats(id, || {
            Err(DispatchError::NotFound("seat cell gone".into()))
        });
        assert!(matches!(result, Err(DispatchError::NotFound(_))));
        assert_eq!(lifecycle.offer_status(id).unwrap(), OfferStatus::Full);
    }

    #[test]
    fn cancel_reports_the_status_it_preempted() {
        let lifecycle = lifecycle();
        let request = sample_request();
        let id = request.id;
        lifecycle.register_request(request).unwrap();
        lifecycle.mark_matched(id).unwrap();
        lifecycle.mark_confirmed(id).unwrap();

        assert_eq!(
            lifecycle.cancel_request(id).unwrap(),
            RequestStatus::Confirmed
        );
        assert_eq!(lifecycle.request_status(id).unwrap(), RequestStatus::Cancelled);
    }

    #[test]
    fn completion_requires_departure_in_the_past() {
        let lifecycle = lifecycle();
        let offer = sample_offer();
        let id = offer.id;
        let departure = offer.departure_time;
        lifecycle.register_offer(offer).unwrap();

        assert!(matches!(
            lifecycle.complete_offer(id, departure - Duration::minutes(5)),
            Err(DispatchError::InvalidState(_))
        ));
        lifecycle
            .complete_offer(id, departure + Duration::minutes(5))
            .unwrap();
        assert_eq!(lifecycle.offer_status(id).unwrap(), OfferStatus::Completed);
    }

    #[test]
    fn unknown_driver_scores_with_default_rating() {
        let lifecycle = lifecycle();
        assert!((lifecycle.driver_rating(DriverId::new()) - DEFAULT_DRIVER_RATING).abs() < 1e-12);

        let driver = DriverProfile {
            id: DriverId::new(),
            rating: 3.2,
            total_rides: 10,
        };
        lifecycle.upsert_driver(driver).unwrap();
        assert!((lifecycle.driver_rating(driver.id) - 3.2).abs() < 1e-12);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let lifecycle = lifecycle();
        let offer = sample_offer();
        lifecycle.register_offer(offer.clone()).unwrap();
        assert!(matches!(
            lifecycle.register_offer(offer),
            Err(DispatchError::InvalidState(_))
        ));
    }
}
