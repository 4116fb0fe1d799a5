//! Geospatial primitives: validated coordinates, haversine distance, and the
//! H3-backed offer index.
//!
//! This module provides:
//!
//! - **Location**: lat/lng pair validated to `[-90,90]×[-180,180]` with
//!   longitude wrap normalization
//! - **haversine_km**: great-circle distance between two locations
//! - **GeoIndex**: H3 cell → offer mappings answering "open offers with an
//!   origin within radius R and a departure inside window W"
//!
//! Default resolution is 9 (~240m cell size). Queries expand a grid disk of
//! rings covering the radius and then exact-filter by haversine distance, so
//! a radius spanning the antimeridian or a pole needs no special casing: H3
//! cells carry no longitude seam.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::model::OfferId;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Grid-disk cache capacity; repeated queries around hot pickup points reuse
/// the ring expansion.
const RING_CACHE_CAPACITY: usize = 1_000;

/// Mean hexagon edge length in km per H3 resolution, used to size the ring
/// expansion of a radius query.
const MEAN_EDGE_KM: [f64; 16] = [
    1107.712591,
    418.676005,
    158.244655,
    59.810857,
    22.606379,
    8.544408,
    3.229482,
    1.220629,
    0.461354,
    0.174375,
    0.065907,
    0.024910,
    0.009415,
    0.003559,
    0.001348,
    0.000509,
];

/// Hard cap on ring expansion so a widened radius cannot degenerate into a
/// near-global scan at fine resolutions.
const MAX_RING_COUNT: u32 = 128;

/// A validated geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    latitude: f64,
    longitude: f64,
}

impl Location {
    /// Build a location, validating latitude to `[-90, 90]` and normalizing
    /// longitude into `[-180, 180)` (wrap-around inputs such as `190` are
    /// accepted and folded).
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, DispatchError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(DispatchError::Validation(format!(
                "latitude must be within [-90, 90], got {latitude}"
            )));
        }
        if !longitude.is_finite() {
            return Err(DispatchError::Validation(format!(
                "longitude must be finite, got {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude: normalize_longitude(longitude),
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// H3 cell containing this location at the given resolution.
    pub fn to_cell(&self, resolution: Resolution) -> Result<CellIndex, DispatchError> {
        let latlng = LatLng::new(self.latitude, self.longitude)
            .map_err(|err| DispatchError::Validation(err.to_string()))?;
        Ok(latlng.to_cell(resolution))
    }
}

/// Fold a longitude into `[-180, 180)`.
fn normalize_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

/// Great-circle distance between two locations in kilometres.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Inclusive departure-time window for index queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `center ± half_width`.
    pub fn around(center: DateTime<Utc>, half_width: chrono::Duration) -> Self {
        Self {
            start: center - half_width,
            end: center + half_width,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[derive(Debug, Clone, Copy)]
struct OfferEntry {
    cell: CellIndex,
    origin: Location,
    departure_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct IndexInner {
    offers_by_cell: HashMap<CellIndex, Vec<OfferId>>,
    entries: HashMap<OfferId, OfferEntry>,
}

impl IndexInner {
    fn detach(&mut self, offer_id: OfferId) -> Option<OfferEntry> {
        let entry = self.entries.remove(&offer_id)?;
        if let Some(ids) = self.offers_by_cell.get_mut(&entry.cell) {
            ids.retain(|id| *id != offer_id);
            if ids.is_empty() {
                self.offers_by_cell.remove(&entry.cell);
            }
        }
        Some(entry)
    }

    fn attach(&mut self, offer_id: OfferId, entry: OfferEntry) {
        self.offers_by_cell
            .entry(entry.cell)
            .or_default()
            .push(offer_id);
        self.entries.insert(offer_id, entry);
    }
}

/// Spatial index over open offer origins.
///
/// Shared by handle: queries take a read lock, mutation a write lock, so
/// concurrent radius queries never block each other. The coordinator keeps
/// the index in sync with offer status — only `Open` offers live here.
#[derive(Debug)]
pub struct GeoIndex {
    resolution: Resolution,
    inner: RwLock<IndexInner>,
    ring_cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GeoIndex {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            inner: RwLock::new(IndexInner::default()),
            ring_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(RING_CACHE_CAPACITY).expect("cache size must be non-zero"),
            )),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Register or re-register an offer origin. Upsert semantics: inserting
    /// an already-known id moves it (re-entry of a reopened offer).
    pub fn insert(
        &self,
        offer_id: OfferId,
        origin: Location,
        departure_time: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let cell = origin.to_cell(self.resolution)?;
        let mut inner = write_lock(&self.inner);
        inner.detach(offer_id);
        inner.attach(
            offer_id,
            OfferEntry {
                cell,
                origin,
                departure_time,
            },
        );
        Ok(())
    }

    /// Remove an offer from the index. `NotFound` for ids the index does not
    /// hold.
    pub fn remove(&self, offer_id: OfferId) -> Result<(), DispatchError> {
        let mut inner = write_lock(&self.inner);
        inner
            .detach(offer_id)
            .map(|_| ())
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} not in geo index")))
    }

    /// Move an indexed offer to a new origin.
    pub fn update_location(
        &self,
        offer_id: OfferId,
        origin: Location,
    ) -> Result<(), DispatchError> {
        let cell = origin.to_cell(self.resolution)?;
        let mut inner = write_lock(&self.inner);
        let entry = inner
            .detach(offer_id)
            .ok_or_else(|| DispatchError::NotFound(format!("offer {offer_id} not in geo index")))?;
        inner.attach(
            offer_id,
            OfferEntry {
                cell,
                origin,
                departure_time: entry.departure_time,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offers with an origin within `radius_km` of `point` and a departure
    /// inside `window`, ordered by distance ascending (ties by id so the
    /// ordering is reproducible). An empty result is not an error.
    pub fn query_nearby(
        &self,
        point: Location,
        radius_km: f64,
        window: TimeWindow,
    ) -> Result<Vec<(OfferId, f64)>, DispatchError> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(DispatchError::Validation(format!(
                "query radius must be positive, got {radius_km}"
            )));
        }
        let center = point.to_cell(self.resolution)?;
        let k = ring_count(self.resolution, radius_km);
        let cells = self.grid_disk_cached(center, k);

        let inner = read_lock(&self.inner);
        let mut hits = Vec::new();
        for cell in &cells {
            let Some(ids) = inner.offers_by_cell.get(cell) else {
                continue;
            };
            for id in ids {
                let Some(entry) = inner.entries.get(id) else {
                    continue;
                };
                if !window.contains(entry.departure_time) {
                    continue;
                }
                let distance = haversine_km(point, entry.origin);
                if distance <= radius_km {
                    hits.push((*id, distance));
                }
            }
        }
        drop(inner);

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    fn grid_disk_cached(&self, center: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.ring_cache.lock() {
            Ok(guard) => guard,
            // Compute without the cache if the mutex is poisoned.
            Err(_) => return center.grid_disk::<Vec<_>>(k),
        };
        cache
            .get_or_insert((center, k), || center.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new(Resolution::Nine)
    }
}

/// Number of hexagon rings needed so the disk covers `radius_km`, with one
/// ring of margin; the exact haversine filter trims the overshoot.
fn ring_count(resolution: Resolution, radius_km: f64) -> u32 {
    let edge = MEAN_EDGE_KM[usize::from(u8::from(resolution))];
    // Cell-center spacing is edge * sqrt(3) for a hex grid.
    let spacing = edge * 1.732;
    let rings = (radius_km / spacing).ceil() as u32 + 1;
    rings.min(MAX_RING_COUNT)
}

// A poisoned lock still holds consistent index data; recover it.
fn read_lock(lock: &RwLock<IndexInner>) -> std::sync::RwLockReadGuard<'_, IndexInner> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(lock: &RwLock<IndexInner>) -> std::sync::RwLockWriteGuard<'_, IndexInner> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
