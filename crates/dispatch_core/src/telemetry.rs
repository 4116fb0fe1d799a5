//! Dispatch KPIs: lock-free counters incremented on the hot paths.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter bundle shared across the coordinator, engine and ledger.
#[derive(Debug, Default)]
pub struct DispatchTelemetry {
    requests_received: AtomicU64,
    bookings_confirmed: AtomicU64,
    requests_rejected: AtomicU64,
    requests_cancelled: AtomicU64,
    offers_submitted: AtomicU64,
    offers_cancelled: AtomicU64,
    offers_completed: AtomicU64,
    reservation_conflicts: AtomicU64,
    reservations_denied: AtomicU64,
    routing_fallbacks: AtomicU64,
    seats_released: AtomicU64,
    matches_scored: AtomicU64,
    rounds_widened: AtomicU64,
    compensations: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryCounts {
    pub requests_received: u64,
    pub bookings_confirmed: u64,
    pub requests_rejected: u64,
    pub requests_cancelled: u64,
    pub offers_submitted: u64,
    pub offers_cancelled: u64,
    pub offers_completed: u64,
    pub reservation_conflicts: u64,
    pub reservations_denied: u64,
    pub routing_fallbacks: u64,
    pub seats_released: u64,
    pub matches_scored: u64,
    pub rounds_widened: u64,
    pub compensations: u64,
}

impl DispatchTelemetry {
    pub fn record_request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_booking_confirmed(&self) {
        self.bookings_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_cancelled(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offer_submitted(&self) {
        self.offers_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offer_cancelled(&self) {
        self.offers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offer_completed(&self) {
        self.offers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reservation_conflict(&self) {
        self.reservation_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reservation_denied(&self) {
        self.reservations_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routing_fallback(&self) {
        self.routing_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_seats_released(&self, seats: u64) {
        self.seats_released.fetch_add(seats, Ordering::Relaxed);
    }

    pub fn add_matches_scored(&self, matches: u64) {
        self.matches_scored.fetch_add(matches, Ordering::Relaxed);
    }

    pub fn record_round_widened(&self) {
        self.rounds_widened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compensation(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetryCounts {
        TelemetryCounts {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            bookings_confirmed: self.bookings_confirmed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            offers_submitted: self.offers_submitted.load(Ordering::Relaxed),
            offers_cancelled: self.offers_cancelled.load(Ordering::Relaxed),
            offers_completed: self.offers_completed.load(Ordering::Relaxed),
            reservation_conflicts: self.reservation_conflicts.load(Ordering::Relaxed),
            reservations_denied: self.reservations_denied.load(Ordering::Relaxed),
            routing_fallbacks: self.routing_fallbacks.load(Ordering::Relaxed),
            seats_released: self.seats_released.load(Ordering::Relaxed),
            matches_scored: self.matches_scored.load(Ordering::Relaxed),
            rounds_widened: self.rounds_widened.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
        }
    }
}
