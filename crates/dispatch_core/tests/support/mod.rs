#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::{DispatchParams, MatchingConfig, RetryPolicy};
use dispatch_core::dispatch::DispatchCoordinator;
use dispatch_core::events::{EventSink, NullEventSink};
use dispatch_core::routing::{HaversineRouteProvider, RouteProvider};

/// Params with sleep-free retry policies so tests never wait on backoff.
pub fn fast_params() -> DispatchParams {
    DispatchParams::default().with_routing_retry(RetryPolicy {
        max_retries: 0,
        backoff_base: Duration::from_micros(10),
        call_timeout: Duration::from_secs(1),
    })
}

pub fn fast_params_with_matching(matching: MatchingConfig) -> DispatchParams {
    fast_params().with_matching(matching)
}

/// Coordinator with a haversine router and no event sink.
pub fn coordinator() -> DispatchCoordinator {
    coordinator_with(
        Arc::new(HaversineRouteProvider::default()),
        Arc::new(NullEventSink),
    )
}

pub fn coordinator_with(
    router: Arc<dyn RouteProvider>,
    events: Arc<dyn EventSink>,
) -> DispatchCoordinator {
    DispatchCoordinator::new(fast_params(), router, events)
}

pub fn coordinator_with_params(
    params: DispatchParams,
    router: Arc<dyn RouteProvider>,
    events: Arc<dyn EventSink>,
) -> DispatchCoordinator {
    DispatchCoordinator::new(params, router, events)
}
