//! Seat accounting with optimistic concurrency.
//!
//! Each open offer gets a versioned seat cell: remaining seats and a version
//! counter packed into one `AtomicU64`. A reservation is a compare-and-swap
//! loop on that cell — the only place in the core where two concurrent
//! requests can contend, and deliberately scoped so reservations against
//! unrelated offers never serialize against each other.
//!
//! Invariants enforced here:
//!
//! - the sum of seats reserved by active bookings never exceeds the offer's
//!   total seats
//! - a request holds at most one active booking
//! - releasing a booking twice restores its seats exactly once

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use crate::config::CasRetryPolicy;
use crate::error::DispatchError;
use crate::model::{Booking, BookingId, OfferId, RequestId};
use crate::telemetry::DispatchTelemetry;

/// Low 32 bits: remaining seats. High 32 bits: version counter.
fn pack(remaining: u32, version: u32) -> u64 {
    ((version as u64) << 32) | remaining as u64
}

fn unpack(state: u64) -> (u32, u32) {
    (state as u32, (state >> 32) as u32)
}

#[derive(Debug)]
struct SeatCell {
    total_seats: u32,
    state: AtomicU64,
}

impl SeatCell {
    fn new(total_seats: u32) -> Self {
        Self {
            total_seats,
            state: AtomicU64::new(pack(total_seats, 0)),
        }
    }

    fn remaining(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).0
    }
}

/// Why a single CAS attempt did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CasFailure {
    /// Not enough seats at the observed state; retrying cannot help.
    Insufficient { remaining: u32 },
    /// Another writer got in between load and store; retry.
    Conflict,
}

/// One reservation attempt against an observed cell state. Split out so the
/// conflict path is deterministic to exercise.
fn try_apply(cell: &SeatCell, observed: u64, seats: u32) -> Result<u32, CasFailure> {
    let (remaining, version) = unpack(observed);
    if seats > remaining {
        return Err(CasFailure::Insufficient { remaining });
    }
    let next = pack(remaining - seats, version.wrapping_add(1));
    cell.state
        .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| remaining - seats)
        .map_err(|_| CasFailure::Conflict)
}

#[derive(Debug, Clone)]
struct BookingRecord {
    booking: Booking,
    released: bool,
}

/// Tracks seat capacity per offer and the bookings holding those seats.
#[derive(Debug)]
pub struct SeatLedger {
    policy: CasRetryPolicy,
    cells: RwLock<HashMap<OfferId, Arc<SeatCell>>>,
    bookings: RwLock<HashMap<BookingId, BookingRecord>>,
    telemetry: Arc<DispatchTelemetry>,
}

impl SeatLedger {
    pub fn new(policy: CasRetryPolicy, telemetry: Arc<DispatchTelemetry>) -> Self {
        Self {
            policy,
            cells: RwLock::new(HashMap::new()),
            bookings: RwLock::new(HashMap::new()),
            telemetry,
        }
    }

    /// Register the seat cell for a newly submitted offer.
    pub fn open(&self, offer_id: OfferId, total_seats: u32) -> Result<(), DispatchError> {
        if total_seats == 0 {
            return Err(DispatchError::Validation(
                "offer must have at least one seat".into(),
            ));
        }
        let mut cells = lock_write(&self.cells);
        if cells.contains_key(&offer_id) {
            return Err(DispatchError::InvalidState(format!(
                "offer {offer_id} already has a seat cell"
            )));
        }
        cells.insert(offer_id, Arc::new(SeatCell::new(total_seats)));
        Ok(())
    }

    /// Drop the seat cell of a cancelled or completed offer.
    pub fn close(&self, offer_id: OfferId) -> Result<(), DispatchError> {
        lock_write(&self.cells)
            .remove(&offer_id)
            .map(|_| ())
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} has no seat cell")))
    }

    pub fn remaining(&self, offer_id: OfferId) -> Result<u32, DispatchError> {
        Ok(self.cell(offer_id)?.remaining())
    }

    pub fn total_seats(&self, offer_id: OfferId) -> Result<u32, DispatchError> {
        Ok(self.cell(offer_id)?.total_seats)
    }

    /// Atomically take `seats` from the offer's remaining count.
    ///
    /// Fails with `SeatsUnavailable` when the observed remaining count is too
    /// small, with `Contention` when the CAS retry budget is exhausted, and
    /// with `InvalidState` when the request already holds an active booking.
    pub fn try_reserve(
        &self,
        offer_id: OfferId,
        request_id: RequestId,
        seats: u32,
    ) -> Result<Booking, DispatchError> {
        if seats == 0 {
            return Err(DispatchError::Validation(
                "cannot reserve zero seats".into(),
            ));
        }
        if self.active_booking_for_request(request_id).is_some() {
            return Err(DispatchError::InvalidState(format!(
                "request {request_id} already holds an active booking"
            )));
        }
        let cell = self.cell(offer_id)?;

        let mut attempt = 0;
        loop {
            if attempt >= self.policy.max_attempts {
                return Err(DispatchError::Contention {
                    offer_id,
                    attempts: attempt,
                });
            }
            let observed = cell.state.load(Ordering::Acquire);
            match try_apply(&cell, observed, seats) {
                Ok(_remaining_after) => break,
                Err(CasFailure::Insufficient { remaining }) => {
                    self.telemetry.record_reservation_denied();
                    return Err(DispatchError::SeatsUnavailable {
                        requested: seats,
                        remaining,
                    });
                }
                Err(CasFailure::Conflict) => {
                    self.telemetry.record_reservation_conflict();
                    attempt += 1;
                    debug!(%offer_id, attempt, "seat CAS conflict, retrying");
                    std::thread::sleep(
                        self.policy
                            .backoff_base
                            .saturating_mul(1u32 << attempt.min(16)),
                    );
                }
            }
        }

        let booking = Booking {
            id: BookingId::new(),
            request_id,
            offer_id,
            seats_reserved: seats,
            confirmed_at: Utc::now(),
        };
        let mut bookings = lock_write(&self.bookings);
        // Re-check under the lock: a racing reservation for the same request
        // may have landed between the optimistic check and our CAS.
        let duplicate = bookings
            .values()
            .any(|r| !r.released && r.booking.request_id == request_id);
        if duplicate {
            drop(bookings);
            self.add_seats_back(&cell, seats);
            return Err(DispatchError::InvalidState(format!(
                "request {request_id} already holds an active booking"
            )));
        }
        bookings.insert(
            booking.id,
            BookingRecord {
                booking: booking.clone(),
                released: false,
            },
        );
        Ok(booking)
    }

    /// Return a booking's seats to its offer. Idempotent: a second release
    /// reports the current remaining count without restoring twice.
    pub fn release(&self, booking_id: BookingId) -> Result<u32, DispatchError> {
        // The write lock is held across the seat restore so a concurrent
        // double-release cannot both observe `released == false`.
        let mut bookings = lock_write(&self.bookings);
        let record = bookings
            .get_mut(&booking_id)
            .ok_or_else(|| DispatchError::NotFound(format!("booking {booking_id} unknown")))?;
        let offer_id = record.booking.offer_id;
        let cell = self.cell(offer_id)?;
        if record.released {
            return Ok(cell.remaining());
        }
        record.released = true;
        let seats = record.booking.seats_reserved;
        drop(bookings);

        let remaining = self.add_seats_back(&cell, seats);
        self.telemetry.add_seats_released(seats as u64);
        Ok(remaining)
    }

    /// Number of unreleased bookings held against an offer.
    pub fn active_bookings_for(&self, offer_id: OfferId) -> usize {
        lock_read(&self.bookings)
            .values()
            .filter(|r| !r.released && r.booking.offer_id == offer_id)
            .count()
    }

    /// The active booking held by a request, if any.
    pub fn active_booking_for_request(&self, request_id: RequestId) -> Option<Booking> {
        lock_read(&self.bookings)
            .values()
            .find(|r| !r.released && r.booking.request_id == request_id)
            .map(|r| r.booking.clone())
    }

    pub fn booking(&self, booking_id: BookingId) -> Option<Booking> {
        lock_read(&self.bookings)
            .get(&booking_id)
            .map(|r| r.booking.clone())
    }

    pub fn is_active(&self, booking_id: BookingId) -> bool {
        lock_read(&self.bookings)
            .get(&booking_id)
            .map(|r| !r.released)
            .unwrap_or(false)
    }

    fn cell(&self, offer_id: OfferId) -> Result<Arc<SeatCell>, DispatchError> {
        lock_read(&self.cells)
            .get(&offer_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} has no seat cell")))
    }

    /// CAS-add seats back, clamped to the offer's total. Always converges:
    /// every conflicting writer makes progress, so the loop is unbounded by
    /// design — a release (including a compensating one) must not fail with
    /// `Contention`.
    fn add_seats_back(&self, cell: &SeatCell, seats: u32) -> u32 {
        loop {
            let observed = cell.state.load(Ordering::Acquire);
            let (remaining, version) = unpack(observed);
            let restored = remaining.saturating_add(seats).min(cell.total_seats);
            let next = pack(restored, version.wrapping_add(1));
            if cell
                .state
                .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return restored;
            }
        }
    }
}

// A poisoned lock still holds consistent booking data; recover it.
fn lock_read<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_write<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
