//! The dispatch coordinator: owns the geo index, match engine, seat ledger
//! and lifecycle registries, and drives a request from registration to a
//! confirmed booking or a rejection.
//!
//! Confirmation ordering is fixed: seats are reserved first, the offer side
//! is reconciled next, and the request is marked `Confirmed` last. With that
//! order the only step that can fail after a reservation is the request-side
//! confirm, so a single compensating release always restores consistency.
//! Cancellation is re-checked before every ledger mutation and after every
//! external call, since a cancel can land at any point of the search.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::DispatchParams;
use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventSink};
use crate::geo::GeoIndex;
use crate::ledger::SeatLedger;
use crate::lifecycle::RideLifecycle;
use crate::matching::MatchEngine;
use crate::model::{
    Booking, DriverProfile, Match, OfferId, OfferStatus, RequestId, RequestStatus, RideOffer,
    RideRequest,
};
use crate::routing::{RetryingRouter, RouteProvider};
use crate::telemetry::DispatchTelemetry;

/// Terminal result of a dispatch run. Rejection is an outcome, not an error:
/// it means the search completed and found nothing bookable.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Confirmed(Booking),
    Rejected { request_id: RequestId },
}

/// Entry point of the dispatch core.
pub struct DispatchCoordinator {
    params: DispatchParams,
    geo: Arc<GeoIndex>,
    lifecycle: Arc<RideLifecycle>,
    ledger: Arc<SeatLedger>,
    engine: MatchEngine,
    events: Arc<dyn EventSink>,
    telemetry: Arc<DispatchTelemetry>,
}

impl DispatchCoordinator {
    /// Wire up a coordinator. The route provider is wrapped in a
    /// [`RetryingRouter`] using the configured routing retry policy.
    pub fn new(
        params: DispatchParams,
        router: Arc<dyn RouteProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let telemetry = Arc::new(DispatchTelemetry::default());
        let geo = Arc::new(GeoIndex::new(params.resolution));
        let lifecycle = Arc::new(RideLifecycle::new(events.clone()));
        let ledger = Arc::new(SeatLedger::new(params.cas_retry, telemetry.clone()));
        let retrying: Arc<dyn RouteProvider> =
            Arc::new(RetryingRouter::new(router, params.routing_retry));
        let engine = MatchEngine::new(
            params.matching.clone(),
            retrying,
            lifecycle.clone(),
            geo.clone(),
            telemetry.clone(),
        );
        Self {
            params,
            geo,
            lifecycle,
            ledger,
            engine,
            events,
            telemetry,
        }
    }

    pub fn params(&self) -> &DispatchParams {
        &self.params
    }

    pub fn lifecycle(&self) -> &Arc<RideLifecycle> {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &Arc<SeatLedger> {
        &self.ledger
    }

    pub fn geo(&self) -> &Arc<GeoIndex> {
        &self.geo
    }

    pub fn telemetry(&self) -> &Arc<DispatchTelemetry> {
        &self.telemetry
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn upsert_driver(&self, profile: DriverProfile) -> Result<(), DispatchError> {
        self.lifecycle.upsert_driver(profile)
    }

    /// Register an offer: lifecycle record, seat cell, geo index entry.
    pub fn submit_offer(&self, offer: RideOffer) -> Result<OfferId, DispatchError> {
        let offer_id = offer.id;
        self.lifecycle.register_offer(offer.clone())?;
        self.ledger.open(offer_id, offer.total_seats)?;
        self.geo
            .insert(offer_id, offer.origin, offer.departure_time)?;
        self.telemetry.record_offer_submitted();
        info!(%offer_id, seats = offer.total_seats, "offer submitted");
        Ok(offer_id)
    }

    /// Run the full search for a request: widening rounds, candidate ranking,
    /// seat reservation and confirmation.
    ///
    /// Ranked candidates are walked best-first; a candidate whose seats are
    /// gone is skipped and the next one tried. When every round comes up
    /// empty the request is rejected: plain `Ok(Rejected)` if no seats were
    /// ever contested, `Err(SeatsUnavailable)` if candidates existed but
    /// their capacity was gone. A cancellation observed mid-search aborts
    /// with `InvalidState`.
    pub fn handle_request(&self, request: RideRequest) -> Result<DispatchOutcome, DispatchError> {
        let request_id = request.id;
        self.lifecycle.register_request(request.clone())?;
        self.telemetry.record_request_received();
        info!(%request_id, seats = request.seats_needed, "request received");

        let mut last_denial = None;
        for round in 0..self.params.max_retry_rounds {
            self.ensure_not_cancelled(request_id)?;
            if round > 0 {
                self.telemetry.record_round_widened();
                info!(
                    %request_id,
                    round,
                    radius_km = self.engine.round_radius_km(round),
                    "widening search"
                );
            }

            let matches = self.engine.find_matches(&request, round)?;
            // The engine calls out to the routing provider; a cancel may have
            // landed while it ran.
            self.ensure_not_cancelled(request_id)?;
            if matches.is_empty() {
                debug!(%request_id, round, "round produced no candidates");
                continue;
            }

            self.lifecycle.mark_matched(request_id)?;
            if let Some(booking) = self.walk_candidates(&request, &matches, &mut last_denial)? {
                self.telemetry.record_booking_confirmed();
                self.events
                    .emit(DispatchEvent::BookingConfirmed {
                        booking: booking.clone(),
                    });
                info!(%request_id, booking_id = %booking.id, offer_id = %booking.offer_id, "booking confirmed");
                return Ok(DispatchOutcome::Confirmed(booking));
            }
            // Every candidate fell through; re-enter the search widened.
            self.lifecycle
                .transition_request(request_id, RequestStatus::Searching)?;
        }

        self.lifecycle.mark_rejected(request_id)?;
        self.telemetry.record_request_rejected();
        self.events.emit(DispatchEvent::RequestRejected { request_id });
        info!(%request_id, rounds = self.params.max_retry_rounds, "request rejected");
        if let Some(denial) = last_denial {
            return Err(denial);
        }
        Ok(DispatchOutcome::Rejected { request_id })
    }

    /// Try candidates best-first. `Ok(None)` means all fell through and the
    /// caller should widen; seat denials along the way are recorded in
    /// `last_denial`.
    fn walk_candidates(
        &self,
        request: &RideRequest,
        matches: &[Match],
        last_denial: &mut Option<DispatchError>,
    ) -> Result<Option<Booking>, DispatchError> {
        let ttl = chrono::Duration::from_std(self.params.matching.match_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(3650));
        for candidate in matches {
            if Utc::now() - candidate.created_at >= ttl {
                debug!(request_id = %request.id, offer_id = %candidate.offer_id, "match expired unconverted");
                break;
            }
            self.ensure_not_cancelled(request.id)?;
            // The offer may have been cancelled or filled since scoring.
            match self.lifecycle.offer_status(candidate.offer_id) {
                Ok(OfferStatus::Open) => {}
                Ok(_) | Err(DispatchError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
            match self
                .ledger
                .try_reserve(candidate.offer_id, request.id, request.seats_needed)
            {
                Ok(booking) => return self.confirm(request.id, booking).map(Some),
                Err(DispatchError::SeatsUnavailable {
                    requested,
                    remaining,
                }) => {
                    debug!(
                        offer_id = %candidate.offer_id,
                        requested,
                        remaining,
                        "candidate out of seats, trying next"
                    );
                    *last_denial = Some(DispatchError::SeatsUnavailable {
                        requested,
                        remaining,
                    });
                    continue;
                }
                Err(DispatchError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Reconcile the offer side of a fresh reservation, then confirm the
    /// request. Confirm comes last: if it fails the reservation is the only
    /// thing to undo.
    fn confirm(&self, request_id: RequestId, booking: Booking) -> Result<Booking, DispatchError> {
        let status = self
            .lifecycle
            .reconcile_offer_seats(booking.offer_id, || self.ledger.remaining(booking.offer_id))?;
        if status == OfferStatus::Full {
            // A concurrent booking may have already pulled the offer out.
            match self.geo.remove(booking.offer_id) {
                Ok(()) | Err(DispatchError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if let Err(err) = self.lifecycle.mark_confirmed(request_id) {
            warn!(%request_id, booking_id = %booking.id, %err, "confirm failed, compensating reservation");
            self.compensate(&booking)?;
            return Err(err);
        }
        Ok(booking)
    }

    /// Undo a reservation whose confirmation fell through: release the
    /// seats, reconcile the offer status, and put the offer back into the
    /// geo index if the release reopened it.
    fn compensate(&self, booking: &Booking) -> Result<(), DispatchError> {
        self.ledger.release(booking.id)?;
        let status = self
            .lifecycle
            .reconcile_offer_seats(booking.offer_id, || self.ledger.remaining(booking.offer_id))?;
        if status == OfferStatus::Open {
            let offer = self.lifecycle.offer(booking.offer_id)?;
            self.geo
                .insert(booking.offer_id, offer.origin, offer.departure_time)?;
        }
        self.telemetry.record_compensation();
        self.events.emit(DispatchEvent::BookingReleased {
            booking_id: booking.id,
            offer_id: booking.offer_id,
            seats_restored: booking.seats_reserved,
        });
        Ok(())
    }

    /// Passenger-initiated cancellation. A `Confirmed` request gets its
    /// booking released with the usual offer-side reconciliation.
    pub fn cancel_request(&self, request_id: RequestId) -> Result<(), DispatchError> {
        // The prior status comes out of the transition itself, taken under
        // the registry write lock: a concurrent confirm cannot slip between
        // a separate status read and the cancel.
        let prior = self.lifecycle.cancel_request(request_id)?;

        let mut offer_id = None;
        if prior == RequestStatus::Confirmed {
            if let Some(booking) = self.ledger.active_booking_for_request(request_id) {
                offer_id = Some(booking.offer_id);
                match self.ledger.release(booking.id) {
                    Ok(_remaining) => {
                        let status = self.lifecycle.reconcile_offer_seats(
                            booking.offer_id,
                            || self.ledger.remaining(booking.offer_id),
                        )?;
                        if status == OfferStatus::Open {
                            let offer = self.lifecycle.offer(booking.offer_id)?;
                            self.geo.insert(
                                booking.offer_id,
                                offer.origin,
                                offer.departure_time,
                            )?;
                        }
                        self.events.emit(DispatchEvent::BookingReleased {
                            booking_id: booking.id,
                            offer_id: booking.offer_id,
                            seats_restored: booking.seats_reserved,
                        });
                    }
                    // The offer's seat cell is gone (ride completed or
                    // cancelled); there is nothing to restore.
                    Err(DispatchError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        self.telemetry.record_request_cancelled();
        self.events.emit(DispatchEvent::RideCancelled {
            offer_id,
            request_id: Some(request_id),
        });
        info!(%request_id, "request cancelled");
        Ok(())
    }

    /// Driver-initiated cancellation. Refused while active bookings hold
    /// seats on the offer; passengers must be released first.
    pub fn cancel_offer(&self, offer_id: OfferId) -> Result<(), DispatchError> {
        let active = self.ledger.active_bookings_for(offer_id);
        if active > 0 {
            return Err(DispatchError::HasActiveBookings { offer_id, active });
        }
        self.lifecycle.cancel_offer(offer_id)?;
        self.ledger.close(offer_id)?;
        // A Full offer has already left the index.
        match self.geo.remove(offer_id) {
            Ok(()) | Err(DispatchError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        self.telemetry.record_offer_cancelled();
        self.events.emit(DispatchEvent::RideCancelled {
            offer_id: Some(offer_id),
            request_id: None,
        });
        info!(%offer_id, "offer cancelled");
        Ok(())
    }

    /// Mark a departed offer completed and retire its seat cell. Active
    /// bookings ride along to completion; they do not block it.
    pub fn complete_offer(
        &self,
        offer_id: OfferId,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.lifecycle.complete_offer(offer_id, now)?;
        self.ledger.close(offer_id)?;
        match self.geo.remove(offer_id) {
            Ok(()) | Err(DispatchError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        self.telemetry.record_offer_completed();
        self.events.emit(DispatchEvent::OfferCompleted { offer_id });
        info!(%offer_id, "offer completed");
        Ok(())
    }

    fn ensure_not_cancelled(&self, request_id: RequestId) -> Result<(), DispatchError> {
        if self.lifecycle.request_status(request_id)? == RequestStatus::Cancelled {
            return Err(DispatchError::InvalidState(format!(
                "request {request_id} was cancelled during dispatch"
            )));
        }
        Ok(())
    }
}
