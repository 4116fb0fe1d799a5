mod support;

use std::sync::Arc;

use dispatch_core::config::{MatchingConfig, ScoreWeights};
use dispatch_core::events::NullEventSink;
use dispatch_core::model::{DriverProfile, PassengerId};
use dispatch_core::routing::HaversineRouteProvider;
use dispatch_core::test_helpers::{
    offer_near_berlin, request_in_berlin, CountingRouteProvider, FailingRouteProvider,
};

use support::{coordinator, coordinator_with, coordinator_with_params, fast_params_with_matching};

#[test]
fn closer_offers_rank_first() {
    let coordinator = coordinator();
    let near = coordinator
        .submit_offer(offer_near_berlin(0.5, 3))
        .expect("submit near");
    let mid = coordinator
        .submit_offer(offer_near_berlin(2.0, 3))
        .expect("submit mid");
    let far = coordinator
        .submit_offer(offer_near_berlin(4.0, 3))
        .expect("submit far");

    let request = request_in_berlin(1);
    let matches = coordinator
        .engine()
        .find_matches(&request, 0)
        .expect("find matches");

    let order: Vec<_> = matches.iter().map(|m| m.offer_id).collect();
    assert_eq!(order, vec![near, mid, far]);
    assert!(matches[0].score <= matches[1].score);
    assert!(matches[1].score <= matches[2].score);
}

#[test]
fn ranking_is_deterministic_across_runs() {
    let coordinator = coordinator();
    for km in [0.4, 0.8, 1.2, 1.6, 2.0] {
        coordinator
            .submit_offer(offer_near_berlin(km, 2))
            .expect("submit offer");
    }
    let request = request_in_berlin(1);

    let first = coordinator
        .engine()
        .find_matches(&request, 0)
        .expect("first run");
    let second = coordinator
        .engine()
        .find_matches(&request, 0)
        .expect("second run");

    let first_ids: Vec<_> = first.iter().map(|m| m.offer_id).collect();
    let second_ids: Vec<_> = second.iter().map(|m| m.offer_id).collect();
    assert_eq!(first_ids, second_ids);
}

#[test]
fn cheaper_offer_wins_when_price_is_all_that_differs() {
    let matching = MatchingConfig::default().with_weights(ScoreWeights {
        distance: 0.0,
        time_deviation: 0.0,
        rating: 0.0,
        price: 1.0,
    });
    let coordinator = coordinator_with_params(
        fast_params_with_matching(matching),
        Arc::new(HaversineRouteProvider::default()),
        Arc::new(NullEventSink),
    );

    let mut pricey = offer_near_berlin(1.0, 2);
    pricey.price_per_seat = 25.0;
    let mut cheap = offer_near_berlin(1.0, 2);
    cheap.price_per_seat = 8.0;
    let pricey_id = coordinator.submit_offer(pricey).expect("submit pricey");
    let cheap_id = coordinator.submit_offer(cheap).expect("submit cheap");

    let matches = coordinator
        .engine()
        .find_matches(&request_in_berlin(1), 0)
        .expect("find matches");
    let order: Vec<_> = matches.iter().map(|m| m.offer_id).collect();
    assert_eq!(order, vec![cheap_id, pricey_id]);
}

#[test]
fn higher_rated_driver_wins_when_rating_is_all_that_differs() {
    let matching = MatchingConfig::default().with_weights(ScoreWeights {
        distance: 0.0,
        time_deviation: 0.0,
        rating: 1.0,
        price: 0.0,
    });
    let coordinator = coordinator_with_params(
        fast_params_with_matching(matching),
        Arc::new(HaversineRouteProvider::default()),
        Arc::new(NullEventSink),
    );

    let low = offer_near_berlin(1.0, 2);
    let high = offer_near_berlin(1.0, 2);
    coordinator
        .upsert_driver(DriverProfile {
            id: low.driver_id,
            rating: 2.0,
            total_rides: 40,
        })
        .expect("low driver");
    coordinator
        .upsert_driver(DriverProfile {
            id: high.driver_id,
            rating: 5.0,
            total_rides: 120,
        })
        .expect("high driver");
    let low_id = coordinator.submit_offer(low).expect("submit low");
    let high_id = coordinator.submit_offer(high).expect("submit high");

    let matches = coordinator
        .engine()
        .find_matches(&request_in_berlin(1), 0)
        .expect("find matches");
    let order: Vec<_> = matches.iter().map(|m| m.offer_id).collect();
    assert_eq!(order, vec![high_id, low_id]);
}

#[test]
fn routing_outage_degrades_to_haversine_estimates() {
    let coordinator = coordinator_with(Arc::new(FailingRouteProvider), Arc::new(NullEventSink));
    coordinator
        .submit_offer(offer_near_berlin(1.0, 2))
        .expect("submit offer");
    coordinator
        .submit_offer(offer_near_berlin(2.5, 2))
        .expect("submit offer");

    let matches = coordinator
        .engine()
        .find_matches(&request_in_berlin(1), 0)
        .expect("find matches");

    assert_eq!(matches.len(), 2, "outage must not drop candidates");
    assert!(matches.iter().all(|m| m.distance_km > 0.0));
    assert!(coordinator.telemetry().snapshot().routing_fallbacks >= 2);
}

#[test]
fn routing_refinement_is_bounded_to_top_k() {
    let counting = Arc::new(CountingRouteProvider::new(HaversineRouteProvider::default()));
    let matching = MatchingConfig::default().with_top_k(2);
    let coordinator = coordinator_with_params(
        fast_params_with_matching(matching),
        counting.clone(),
        Arc::new(NullEventSink),
    );
    for km in [0.5, 1.0, 1.5, 2.0, 2.5] {
        coordinator
            .submit_offer(offer_near_berlin(km, 2))
            .expect("submit offer");
    }

    let matches = coordinator
        .engine()
        .find_matches(&request_in_berlin(1), 0)
        .expect("find matches");

    assert_eq!(matches.len(), 5);
    assert_eq!(counting.calls(), 2, "only the top-k candidates get refined");
}

#[test]
fn drivers_never_match_their_own_request() {
    let coordinator = coordinator();
    let offer = offer_near_berlin(1.0, 2);
    let driver_id = offer.driver_id;
    let offer_id = coordinator.submit_offer(offer).expect("submit offer");

    let mut own = request_in_berlin(1);
    own.passenger_id = PassengerId(driver_id.0);
    let matches = coordinator
        .engine()
        .find_matches(&own, 0)
        .expect("find matches");
    assert!(matches.is_empty(), "a driver must not be offered their own ride");

    // Anyone else still gets the offer.
    let other = request_in_berlin(1);
    let matches = coordinator
        .engine()
        .find_matches(&other, 0)
        .expect("find matches");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].offer_id, offer_id);
}

#[test]
fn offers_outside_radius_or_window_are_not_candidates() {
    let coordinator = coordinator();
    coordinator
        .submit_offer(offer_near_berlin(20.0, 2))
        .expect("submit distant offer");
    let mut late = offer_near_berlin(1.0, 2);
    late.departure_time = late.departure_time + chrono::Duration::hours(6);
    coordinator.submit_offer(late).expect("submit late offer");

    let matches = coordinator
        .engine()
        .find_matches(&request_in_berlin(1), 0)
        .expect("find matches");
    assert!(matches.is_empty());
}
