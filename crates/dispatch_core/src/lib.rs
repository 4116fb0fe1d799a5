pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod geo;
pub mod ledger;
pub mod lifecycle;
pub mod matching;
pub mod model;
pub mod routing;
pub mod telemetry;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
