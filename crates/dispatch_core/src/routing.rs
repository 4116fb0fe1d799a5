//! Pluggable route providers: trait abstraction for routing backends.
//!
//! Two implementations, plus a retrying wrapper:
//!
//! - **`HaversineRouteProvider`**: great-circle distance and a flat average
//!   speed. Zero dependencies, infallible — the degradation target when the
//!   external provider is down.
//! - **`OsrmRouteProvider`** (feature `osrm`): calls a local/remote OSRM
//!   HTTP endpoint with a per-call timeout.
//! - **`RetryingRouter`**: wraps any provider with bounded retries and
//!   exponential backoff with jitter.
//!
//! The provider is treated as best-effort: the match engine keeps its
//! haversine estimate when a refined route cannot be obtained.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::geo::{haversine_km, Location};

/// Average city speed for ETA estimation (km/h).
pub const AVG_SPEED_KMH: f64 = 40.0;

/// Result of a route query between two locations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    /// Road-network (or great-circle) distance in kilometres.
    pub distance_km: f64,
    /// Estimated travel time in minutes.
    pub eta_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    #[error("routing provider unavailable: {0}")]
    Unavailable(String),
    #[error("routing call timed out after {0:?}")]
    Timeout(Duration),
    #[error("routing provider rate limited")]
    RateLimited,
}

/// Trait for routing backends. Implementations must be `Send + Sync` so a
/// provider can be shared across concurrent dispatch calls.
pub trait RouteProvider: Send + Sync {
    /// Compute distance and ETA between two locations.
    fn route(&self, origin: Location, destination: Location) -> Result<RouteEstimate, RoutingError>;
}

/// ETA at a flat average speed, in minutes.
pub fn estimate_eta_minutes(distance_km: f64, avg_speed_kmh: f64) -> f64 {
    if distance_km <= 0.0 || avg_speed_kmh <= 0.0 {
        return 0.0;
    }
    (distance_km / avg_speed_kmh) * 60.0
}

/// Great-circle fallback provider; never fails.
#[derive(Debug, Clone, Copy)]
pub struct HaversineRouteProvider {
    pub avg_speed_kmh: f64,
}

impl Default for HaversineRouteProvider {
    fn default() -> Self {
        Self {
            avg_speed_kmh: AVG_SPEED_KMH,
        }
    }
}

impl RouteProvider for HaversineRouteProvider {
    fn route(&self, origin: Location, destination: Location) -> Result<RouteEstimate, RoutingError> {
        let distance_km = haversine_km(origin, destination);
        Ok(RouteEstimate {
            distance_km,
            eta_minutes: estimate_eta_minutes(distance_km, self.avg_speed_kmh),
        })
    }
}

/// Retrying wrapper around a fallible provider.
///
/// Attempts the call `max_retries + 1` times with exponential backoff and
/// jitter, then surfaces the last error. Callers decide whether that error
/// fails the operation or merely degrades it.
pub struct RetryingRouter {
    inner: Arc<dyn RouteProvider>,
    policy: RetryPolicy,
}

impl RetryingRouter {
    pub fn new(inner: Arc<dyn RouteProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff_base;
        let scaled = base.saturating_mul(1u32 << attempt.min(16));
        let jitter_micros = if base.as_micros() > 0 {
            rand::thread_rng().gen_range(0..base.as_micros() as u64)
        } else {
            0
        };
        scaled + Duration::from_micros(jitter_micros)
    }
}

impl RouteProvider for RetryingRouter {
    fn route(&self, origin: Location, destination: Location) -> Result<RouteEstimate, RoutingError> {
        let attempts = self.policy.max_retries + 1;
        let mut last_err = RoutingError::Unavailable("no attempt made".into());
        for attempt in 0..attempts {
            match self.inner.route(origin, destination) {
                Ok(estimate) => return Ok(estimate),
                Err(err) => {
                    warn!(attempt, %err, "routing attempt failed");
                    last_err = err;
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.backoff_for(attempt));
                    }
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(feature = "osrm")]
pub mod osrm {
    //! OSRM HTTP provider (blocking client, per-call timeout).

    use super::*;
    use reqwest::blocking::Client;

    #[derive(Debug, Deserialize)]
    struct OsrmResponse {
        code: String,
        #[serde(default)]
        routes: Vec<OsrmRoute>,
    }

    #[derive(Debug, Deserialize)]
    struct OsrmRoute {
        /// Metres.
        distance: f64,
        /// Seconds.
        duration: f64,
    }

    /// Routes via an OSRM `route/v1/driving` endpoint.
    pub struct OsrmRouteProvider {
        client: Client,
        endpoint: String,
        call_timeout: Duration,
    }

    impl OsrmRouteProvider {
        pub fn new(endpoint: impl Into<String>, call_timeout: Duration) -> Result<Self, RoutingError> {
            let client = Client::builder()
                .timeout(call_timeout)
                .build()
                .map_err(|err| RoutingError::Unavailable(err.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.into(),
                call_timeout,
            })
        }
    }

    impl RouteProvider for OsrmRouteProvider {
        fn route(
            &self,
            origin: Location,
            destination: Location,
        ) -> Result<RouteEstimate, RoutingError> {
            let url = format!(
                "{}/route/v1/driving/{},{};{},{}?overview=false",
                self.endpoint.trim_end_matches('/'),
                origin.longitude(),
                origin.latitude(),
                destination.longitude(),
                destination.latitude(),
            );
            let response = self.client.get(&url).send().map_err(|err| {
                if err.is_timeout() {
                    RoutingError::Timeout(self.call_timeout)
                } else {
                    RoutingError::Unavailable(err.to_string())
                }
            })?;
            if response.status().as_u16() == 429 {
                return Err(RoutingError::RateLimited);
            }
            let body: OsrmResponse = response
                .json()
                .map_err(|err| RoutingError::Unavailable(err.to_string()))?;
            if body.code != "Ok" {
                return Err(RoutingError::Unavailable(format!(
                    "osrm returned code {}",
                    body.code
                )));
            }
            let route = body
                .routes
                .first()
                .ok_or_else(|| RoutingError::Unavailable("osrm returned no routes".into()))?;
            Ok(RouteEstimate {
                distance_km: route.distance / 1000.0,
                eta_minutes: route.duration / 60.0,
            })
        }
    }
}
