use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::MatchingConfig;
use crate::error::DispatchError;
use crate::geo::{GeoIndex, TimeWindow};
use crate::lifecycle::RideLifecycle;
use crate::model::{Match, OfferStatus, RideRequest};
use crate::routing::{estimate_eta_minutes, RouteProvider, AVG_SPEED_KMH};
use crate::telemetry::DispatchTelemetry;

use super::score::{rank, score_candidate, Candidate};

/// Converts a ride request into a ranked list of match candidates.
pub struct MatchEngine {
    config: MatchingConfig,
    router: Arc<dyn RouteProvider>,
    lifecycle: Arc<RideLifecycle>,
    geo: Arc<GeoIndex>,
    telemetry: Arc<DispatchTelemetry>,
}

impl MatchEngine {
    pub fn new(
        config: MatchingConfig,
        router: Arc<dyn RouteProvider>,
        lifecycle: Arc<RideLifecycle>,
        geo: Arc<GeoIndex>,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            config,
            router,
            lifecycle,
            geo,
            telemetry,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Search radius for a given widening round.
    pub fn round_radius_km(&self, round: u32) -> f64 {
        self.config.radius_km * self.config.widen_factor.powi(round as i32)
    }

    /// Departure half-window for a given widening round.
    pub fn round_half_window(&self, round: u32) -> chrono::Duration {
        let widened = self
            .config
            .time_window
            .mul_f64(self.config.widen_factor.powi(round as i32));
        chrono::Duration::from_std(widened).unwrap_or_else(|_| chrono::Duration::days(3650))
    }

    /// Ranked matches for `request`, best first. An empty vec (not an error)
    /// means nothing qualified — the caller widens or rejects.
    ///
    /// Routing refinement is bounded to the top-K candidates and the search
    /// deadline; a candidate whose route cannot be fetched keeps its
    /// haversine estimate.
    pub fn find_matches(
        &self,
        request: &RideRequest,
        round: u32,
    ) -> Result<Vec<Match>, DispatchError> {
        let deadline = Instant::now() + self.config.search_deadline;
        let radius_km = self.round_radius_km(round);
        let half_window = self.round_half_window(round);
        let window = TimeWindow::around(request.desired_time, half_window);

        let hits = self.geo.query_nearby(request.pickup, radius_km, window)?;
        debug!(
            request_id = %request.id,
            round,
            radius_km,
            hits = hits.len(),
            "geo query complete"
        );

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .filter_map(|(offer_id, distance_km)| {
                let offer = self.lifecycle.offer(offer_id).ok()?;
                if offer.status != OfferStatus::Open {
                    return None;
                }
                // A driver does not get matched with their own request.
                if offer.driver_id.0 == request.passenger_id.0 {
                    return None;
                }
                let driver_rating = self.lifecycle.driver_rating(offer.driver_id);
                Some(Candidate {
                    eta_minutes: estimate_eta_minutes(distance_km, AVG_SPEED_KMH),
                    offer,
                    distance_km,
                    driver_rating,
                    score: 0.0,
                })
            })
            .collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Refine the closest candidates through the routing provider; they
        // arrive distance-ascending from the geo index.
        for candidate in candidates.iter_mut().take(self.config.top_k) {
            if Instant::now() >= deadline {
                debug!(request_id = %request.id, "search deadline hit, returning partial refinement");
                break;
            }
            match self
                .router
                .route(candidate.offer.origin, request.pickup)
            {
                Ok(estimate) => {
                    candidate.distance_km = estimate.distance_km;
                    candidate.eta_minutes = estimate.eta_minutes;
                }
                Err(err) => {
                    self.telemetry.record_routing_fallback();
                    warn!(
                        offer_id = %candidate.offer.id,
                        %err,
                        "routing refinement failed, keeping haversine estimate"
                    );
                }
            }
        }

        let max_price = candidates
            .iter()
            .map(|c| c.offer.price_per_seat)
            .fold(0.0_f64, f64::max);
        let window_half_width_secs = half_window.num_seconds() as f64;
        for candidate in candidates.iter_mut() {
            candidate.score = score_candidate(
                &self.config.weights,
                candidate,
                request.desired_time,
                radius_km,
                window_half_width_secs,
                max_price,
            );
        }
        candidates.sort_by(rank);

        self.telemetry.add_matches_scored(candidates.len() as u64);
        let created_at = Utc::now();
        Ok(candidates
            .into_iter()
            .map(|c| Match {
                request_id: request.id,
                offer_id: c.offer.id,
                score: c.score,
                eta_minutes: c.eta_minutes,
                distance_km: c.distance_km,
                created_at,
            })
            .collect())
    }
}
