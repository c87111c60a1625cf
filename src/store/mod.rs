/// Storage abstraction shared by the connection, event and feed engines
///
/// The engines speak only to the [`Store`] capability set: entity CRUD,
/// ordered sets, plain sets, geo structures, secondary lookups, id sequences
/// and unread cursors. Three drivers implement it:
/// - [`MemoryStore`]: process-local maps, used by tests and single-node dev
/// - [`RedisStore`]: the key-value layout
/// - [`SqliteStore`]: the relational layout
///
/// No operation spans more than one key atomically. Every write is
/// idempotent so that a retried sequence converges.

pub mod keys;
mod kv;
mod memory;
mod sqlite;

pub use keys::{CursorKey, EntityKey, IdScope, IndexKey, SecondaryNamespace};
pub use kv::RedisStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::ops::Bound;
use thiserror::Error;

/// Storage driver failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[cfg(test)]
    #[error("injected failure: {0}")]
    Injected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Score interval for ordered-set reads, ascending
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: Bound<f64>,
    pub max: Bound<f64>,
}

impl ScoreRange {
    pub fn all() -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Unbounded,
        }
    }

    /// Strictly greater than `score`
    pub fn above(score: f64) -> Self {
        Self {
            min: Bound::Excluded(score),
            max: Bound::Unbounded,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        let lower = match self.min {
            Bound::Included(min) => score >= min,
            Bound::Excluded(min) => score > min,
            Bound::Unbounded => true,
        };
        let upper = match self.max {
            Bound::Included(max) => score <= max,
            Bound::Excluded(max) => score < max,
            Bound::Unbounded => true,
        };
        lower && upper
    }
}

/// Ordered-set entry
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// Members of a range read, in range order
pub fn members_of(entries: &[ScoredMember]) -> Vec<String> {
    entries.iter().map(|entry| entry.member.clone()).collect()
}

/// Geo search hit, nearest first
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub member: String,
    pub distance_m: f64,
}

/// Capability set every storage driver provides
#[async_trait]
pub trait Store: Send + Sync {
    /// Short driver name for logs
    fn driver(&self) -> &'static str;

    /// Round-trip to the backing store
    async fn ping(&self) -> StoreResult<()>;

    /// Next id of a monotonic sequence; unique, not necessarily dense
    async fn generate_id(&self, scope: IdScope) -> StoreResult<i64>;

    async fn put_entity(&self, key: &EntityKey, value: &[u8]) -> StoreResult<()>;

    /// Write only when the key is vacant. Returns whether the write happened.
    async fn put_entity_if_absent(&self, key: &EntityKey, value: &[u8]) -> StoreResult<bool>;

    async fn get_entity(&self, key: &EntityKey) -> StoreResult<Option<Vec<u8>>>;

    /// Returns whether something was removed
    async fn delete_entity(&self, key: &EntityKey) -> StoreResult<bool>;

    /// Re-adding an existing member updates its score
    async fn ordered_set_add(&self, key: &IndexKey, score: f64, member: &str) -> StoreResult<()>;

    async fn ordered_set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()>;

    /// Members within `range`, ascending by score
    async fn ordered_set_range(
        &self,
        key: &IndexKey,
        range: ScoreRange,
    ) -> StoreResult<Vec<ScoredMember>>;

    async fn ordered_set_count(&self, key: &IndexKey, range: ScoreRange) -> StoreResult<u64>;

    async fn ordered_set_score(&self, key: &IndexKey, member: &str) -> StoreResult<Option<f64>>;

    async fn set_add(&self, key: &IndexKey, member: &str) -> StoreResult<()>;

    async fn set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()>;

    async fn set_contains(&self, key: &IndexKey, member: &str) -> StoreResult<bool>;

    /// Unordered members, at most `limit` when given
    async fn set_scan(&self, key: &IndexKey, limit: Option<usize>) -> StoreResult<Vec<String>>;

    async fn set_count(&self, key: &IndexKey) -> StoreResult<u64>;

    async fn geo_add(&self, key: &IndexKey, lat: f64, lon: f64, member: &str) -> StoreResult<()>;

    async fn geo_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()>;

    /// Members within `radius_m` metres of (lat, lon), nearest first
    async fn geo_search(
        &self,
        key: &IndexKey,
        lat: f64,
        lon: f64,
        radius_m: f64,
        limit: usize,
    ) -> StoreResult<Vec<GeoHit>>;

    async fn secondary_put(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<()>;

    /// Claim a lookup key. Returns false when another value already holds it.
    async fn secondary_put_if_absent(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<bool>;

    async fn secondary_get(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<Option<String>>;

    async fn secondary_delete(&self, namespace: &SecondaryNamespace, key: &str)
        -> StoreResult<()>;

    /// Atomically store `max(current, value)` and return the stored value
    async fn cursor_advance(&self, key: &CursorKey, value: i64) -> StoreResult<i64>;

    async fn cursor_get(&self, key: &CursorKey) -> StoreResult<Option<i64>>;
}

/// Read and decode a JSON entity
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    key: &EntityKey,
) -> StoreResult<Option<T>> {
    match store.get_entity(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Corrupt {
                key: key.render(),
                reason: e.to_string(),
            }
        })?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON entity
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn Store,
    key: &EntityKey,
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put_entity(key, &bytes).await
}

/// Encode and write a JSON entity only when the key is vacant
pub async fn put_json_if_absent<T: Serialize + Sync>(
    store: &dyn Store,
    key: &EntityKey,
    value: &T,
) -> StoreResult<bool> {
    let bytes = serde_json::to_vec(value)?;
    store.put_entity_if_absent(key, &bytes).await
}

const EARTH_RADIUS_M: f64 = 6_372_797.560_856;

/// Great-circle distance in metres, same earth radius Redis uses
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((lon2 - lon1) / 2.0).sin();
    2.0 * EARTH_RADIUS_M * (u * u + lat1.cos() * lat2.cos() * v * v).sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_range_bounds() {
        let range = ScoreRange::above(10.0);
        assert!(!range.contains(10.0));
        assert!(range.contains(10.5));
        assert!(ScoreRange::all().contains(-1.0));
    }

    #[test]
    fn test_haversine_known_distance() {
        // Berlin Alexanderplatz to Brandenburg Gate is roughly 2.3 km
        let distance = haversine_distance(52.5219, 13.4132, 52.5163, 13.3777);
        assert!((2_300.0..2_600.0).contains(&distance), "{}", distance);
        assert_eq!(haversine_distance(1.0, 1.0, 1.0, 1.0), 0.0);
    }
}
