//! Tunable parameters for matching and dispatch.
//!
//! The defaults below (5 km search radius, ±30 min window, equal scoring
//! weights, top-10 routing refinement) are starting points an operator is
//! expected to tune, not product requirements; everything is exposed through
//! `with_*` builders.

use std::time::Duration;

use h3o::Resolution;
use serde::{Deserialize, Serialize};

/// Default search radius around the pickup point (km).
pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 5.0;

/// Default departure-time half-window (± around the desired time).
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Default multiplier applied to radius and window per widening round.
pub const DEFAULT_WIDEN_FACTOR: f64 = 2.0;

/// Default number of top-ranked candidates refined via the routing provider.
pub const DEFAULT_TOP_K: usize = 10;

/// Default per-request search deadline.
pub const DEFAULT_SEARCH_DEADLINE: Duration = Duration::from_secs(5);

/// Default negotiation TTL for match records.
pub const DEFAULT_MATCH_TTL: Duration = Duration::from_secs(120);

/// Default number of search rounds before a request is rejected.
pub const DEFAULT_MAX_RETRY_ROUNDS: u32 = 3;

/// Scoring weights for match ranking. Each term is normalized to roughly
/// `[0, 1]` before weighting; lower total score is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub distance: f64,
    pub time_deviation: f64,
    pub rating: f64,
    pub price: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            distance: 0.25,
            time_deviation: 0.25,
            rating: 0.25,
            price: 0.25,
        }
    }
}

impl ScoreWeights {
    /// Weights scaled to sum to 1.0; falls back to equal weights when the
    /// configured sum is not positive.
    pub fn normalized(&self) -> ScoreWeights {
        let sum = self.distance + self.time_deviation + self.rating + self.price;
        if !sum.is_finite() || sum <= 0.0 {
            return ScoreWeights::default();
        }
        ScoreWeights {
            distance: self.distance / sum,
            time_deviation: self.time_deviation / sum,
            rating: self.rating / sum,
            price: self.price / sum,
        }
    }
}

/// Match-engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Base search radius around the pickup point (km).
    pub radius_km: f64,
    /// Departure-time half-window around the desired time.
    pub time_window: Duration,
    /// Multiplier applied to radius and window per widening round.
    pub widen_factor: f64,
    /// How many top-ranked candidates get routing-provider refinement.
    pub top_k: usize,
    pub weights: ScoreWeights,
    /// Per-request search deadline; refinement stops here and partial
    /// results are returned.
    pub search_deadline: Duration,
    /// Negotiation TTL; matches older than this are discarded unconverted.
    pub match_ttl: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_SEARCH_RADIUS_KM,
            time_window: DEFAULT_TIME_WINDOW,
            widen_factor: DEFAULT_WIDEN_FACTOR,
            top_k: DEFAULT_TOP_K,
            weights: ScoreWeights::default(),
            search_deadline: DEFAULT_SEARCH_DEADLINE,
            match_ttl: DEFAULT_MATCH_TTL,
        }
    }
}

impl MatchingConfig {
    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = radius_km;
        self
    }

    pub fn with_time_window(mut self, time_window: Duration) -> Self {
        self.time_window = time_window;
        self
    }

    pub fn with_widen_factor(mut self, widen_factor: f64) -> Self {
        self.widen_factor = widen_factor;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_search_deadline(mut self, deadline: Duration) -> Self {
        self.search_deadline = deadline;
        self
    }

    pub fn with_match_ttl(mut self, ttl: Duration) -> Self {
        self.match_ttl = ttl;
        self
    }
}

/// Retry policy for the seat ledger's compare-and-swap loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CasRetryPolicy {
    /// CAS attempts before giving up with `Contention`.
    pub max_attempts: u32,
    /// Base backoff between attempts; doubled per retry.
    pub backoff_base: Duration,
}

impl Default for CasRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base: Duration::from_micros(50),
        }
    }
}

/// Retry policy for external routing calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff; doubled per retry, with jitter.
    pub backoff_base: Duration,
    /// Budget for a single provider call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            call_timeout: Duration::from_secs(2),
        }
    }
}

/// Parameters for building a dispatch coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchParams {
    /// H3 resolution of the geo index (~240m cells at resolution 9).
    pub resolution: Resolution,
    /// Search rounds (with widening) before a request is rejected.
    pub max_retry_rounds: u32,
    pub matching: MatchingConfig,
    pub cas_retry: CasRetryPolicy,
    pub routing_retry: RetryPolicy,
}

impl Default for DispatchParams {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
            max_retry_rounds: DEFAULT_MAX_RETRY_ROUNDS,
            matching: MatchingConfig::default(),
            cas_retry: CasRetryPolicy::default(),
            routing_retry: RetryPolicy::default(),
        }
    }
}

impl DispatchParams {
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_max_retry_rounds(mut self, rounds: u32) -> Self {
        self.max_retry_rounds = rounds;
        self
    }

    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_cas_retry(mut self, policy: CasRetryPolicy) -> Self {
        self.cas_retry = policy;
        self
    }

    pub fn with_routing_retry(mut self, policy: RetryPolicy) -> Self {
        self.routing_retry = policy;
        self
    }
}
