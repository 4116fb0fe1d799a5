//! Candidate scoring and the ranking order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::config::ScoreWeights;
use crate::model::RideOffer;

/// One offer under consideration, with its current distance/ETA estimate.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub offer: RideOffer,
    pub distance_km: f64,
    pub eta_minutes: f64,
    pub driver_rating: f64,
    pub score: f64,
}

/// Weighted penalty score; lower is better. Terms are normalized against the
/// current search envelope so a widened round keeps the terms comparable.
pub(crate) fn score_candidate(
    weights: &ScoreWeights,
    candidate: &Candidate,
    desired_time: DateTime<Utc>,
    radius_km: f64,
    window_half_width_secs: f64,
    max_price: f64,
) -> f64 {
    let weights = weights.normalized();

    let distance_norm = if radius_km > 0.0 {
        candidate.distance_km / radius_km
    } else {
        0.0
    };
    let deviation_secs = (candidate.offer.departure_time - desired_time)
        .num_seconds()
        .unsigned_abs() as f64;
    let time_norm = if window_half_width_secs > 0.0 {
        deviation_secs / window_half_width_secs
    } else {
        0.0
    };
    let price_norm = if max_price > 0.0 {
        candidate.offer.price_per_seat / max_price
    } else {
        0.0
    };
    let rating_norm = ((5.0 - candidate.driver_rating) / 5.0).clamp(0.0, 1.0);

    weights.distance * distance_norm
        + weights.time_deviation * time_norm
        + weights.price * price_norm
        + weights.rating * rating_norm
}

/// Total ranking order: score ascending, then the tie-break chain — lower
/// price, higher driver rating, earlier offer creation, finally offer id so
/// the order is fully reproducible.
pub(crate) fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.offer.price_per_seat.total_cmp(&b.offer.price_per_seat))
        .then_with(|| b.driver_rating.total_cmp(&a.driver_rating))
        .then_with(|| a.offer.created_at.cmp(&b.offer.created_at))
        .then_with(|| a.offer.id.cmp(&b.offer.id))
}
