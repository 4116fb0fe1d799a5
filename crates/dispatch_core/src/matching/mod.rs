//! Request-to-offer matching: candidate collection, weighted scoring, and
//! deterministic ranking.
//!
//! The engine queries the geo index around the pickup point, scores each
//! open offer by normalized distance, departure deviation, driver rating and
//! price, refines the top-K candidates through the routing provider, and
//! returns ranked [`Match`](crate::model::Match) records. Routing failures
//! degrade to the haversine estimate; they never fail the search.

pub mod engine;
mod score;

pub use engine::MatchEngine;
