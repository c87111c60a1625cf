/// Key-value layout on Redis
///
/// Entities are plain string values, indexes are native Redis structures:
/// - ordered sets (`ZADD`) for author time indexes, feeds and read cursors
/// - sets (`SADD`) for follower/followee, object and location indexes
/// - geo sets (`GEOADD`) for event coordinates
/// - hashes (`HSET`) for email, username, token and social lookups
use super::{
    CursorKey, EntityKey, GeoHit, IdScope, IndexKey, ScoreRange, ScoredMember,
    SecondaryNamespace, Store, StoreError, StoreResult,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::ops::Bound;
use tracing::{debug, error, info};

/// Redis storage driver
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    scan_batch: usize,
}

impl RedisStore {
    /// Connect to Redis and keep a multiplexed, auto-reconnecting handle
    pub async fn connect(url: &str, key_prefix: &str, scan_batch: usize) -> StoreResult<Self> {
        info!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            StoreError::Redis(e)
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            StoreError::Redis(e)
        })?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            scan_batch: scan_batch.max(1),
        })
    }

    fn build_key(&self, rendered: String) -> String {
        format!("{}{}", self.key_prefix, rendered)
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

/// Render a score bound in ZRANGEBYSCORE syntax
fn score_bound(bound: Bound<f64>, unbounded: &str) -> String {
    match bound {
        Bound::Included(score) => score.to_string(),
        Bound::Excluded(score) => format!("({}", score),
        Bound::Unbounded => unbounded.to_string(),
    }
}

#[async_trait]
impl Store for RedisStore {
    fn driver(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn generate_id(&self, scope: IdScope) -> StoreResult<i64> {
        let mut conn = self.conn();
        let id: i64 = conn.incr(self.build_key(scope.render()), 1).await?;
        Ok(id)
    }

    async fn put_entity(&self, key: &EntityKey, value: &[u8]) -> StoreResult<()> {
        let mut conn = self.conn();
        let key = self.build_key(key.render());
        debug!("Redis SET: {}", key);
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn put_entity_if_absent(&self, key: &EntityKey, value: &[u8]) -> StoreResult<bool> {
        let mut conn = self.conn();
        let written: bool = conn.set_nx(self.build_key(key.render()), value).await?;
        Ok(written)
    }

    async fn get_entity(&self, key: &EntityKey) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = conn.get(self.build_key(key.render())).await?;
        Ok(value)
    }

    async fn delete_entity(&self, key: &EntityKey) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(self.build_key(key.render())).await?;
        Ok(removed > 0)
    }

    async fn ordered_set_add(&self, key: &IndexKey, score: f64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.zadd(self.build_key(key.render()), member, score).await?;
        Ok(())
    }

    async fn ordered_set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.zrem(self.build_key(key.render()), member).await?;
        Ok(())
    }

    async fn ordered_set_range(
        &self,
        key: &IndexKey,
        range: ScoreRange,
    ) -> StoreResult<Vec<ScoredMember>> {
        let mut conn = self.conn();
        let entries: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(
                self.build_key(key.render()),
                score_bound(range.min, "-inf"),
                score_bound(range.max, "+inf"),
            )
            .await?;
        Ok(entries
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn ordered_set_count(&self, key: &IndexKey, range: ScoreRange) -> StoreResult<u64> {
        let mut conn = self.conn();
        let count: u64 = conn
            .zcount(
                self.build_key(key.render()),
                score_bound(range.min, "-inf"),
                score_bound(range.max, "+inf"),
            )
            .await?;
        Ok(count)
    }

    async fn ordered_set_score(&self, key: &IndexKey, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.conn();
        let score: Option<f64> = conn.zscore(self.build_key(key.render()), member).await?;
        Ok(score)
    }

    async fn set_add(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.sadd(self.build_key(key.render()), member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.srem(self.build_key(key.render()), member).await?;
        Ok(())
    }

    async fn set_contains(&self, key: &IndexKey, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let present: bool = conn.sismember(self.build_key(key.render()), member).await?;
        Ok(present)
    }

    async fn set_scan(&self, key: &IndexKey, limit: Option<usize>) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let key = self.build_key(key.render());
        let limit = limit.unwrap_or(usize::MAX);
        let mut members = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SSCAN")
                .arg(&key)
                .arg(cursor)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await?;
            members.extend(batch);
            if next == 0 || members.len() >= limit {
                break;
            }
            cursor = next;
        }

        // SSCAN may return an element more than once
        members.sort();
        members.dedup();
        members.truncate(limit);
        Ok(members)
    }

    async fn set_count(&self, key: &IndexKey) -> StoreResult<u64> {
        let mut conn = self.conn();
        let count: u64 = conn.scard(self.build_key(key.render())).await?;
        Ok(count)
    }

    async fn geo_add(&self, key: &IndexKey, lat: f64, lon: f64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("GEOADD")
            .arg(self.build_key(key.render()))
            .arg(lon)
            .arg(lat)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn geo_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        // Geo sets are ordered sets underneath
        let mut conn = self.conn();
        let _: i64 = conn.zrem(self.build_key(key.render()), member).await?;
        Ok(())
    }

    async fn geo_search(
        &self,
        key: &IndexKey,
        lat: f64,
        lon: f64,
        radius_m: f64,
        limit: usize,
    ) -> StoreResult<Vec<GeoHit>> {
        let mut conn = self.conn();
        let hits: Vec<(String, f64)> = redis::cmd("GEOSEARCH")
            .arg(self.build_key(key.render()))
            .arg("FROMLONLAT")
            .arg(lon)
            .arg(lat)
            .arg("BYRADIUS")
            .arg(radius_m)
            .arg("m")
            .arg("ASC")
            .arg("COUNT")
            .arg(limit.max(1))
            .arg("WITHDIST")
            .query_async(&mut conn)
            .await?;
        Ok(hits
            .into_iter()
            .map(|(member, distance_m)| GeoHit { member, distance_m })
            .collect())
    }

    async fn secondary_put(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.hset(self.build_key(namespace.render()), key, value).await?;
        Ok(())
    }

    async fn secondary_put_if_absent(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.conn();
        let written: bool = conn
            .hset_nx(self.build_key(namespace.render()), key, value)
            .await?;
        Ok(written)
    }

    async fn secondary_get(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.hget(self.build_key(namespace.render()), key).await?;
        Ok(value)
    }

    async fn secondary_delete(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let _: i64 = conn.hdel(self.build_key(namespace.render()), key).await?;
        Ok(())
    }

    async fn cursor_advance(&self, key: &CursorKey, value: i64) -> StoreResult<i64> {
        let mut conn = self.conn();
        let set = self.build_key(key.render_set());
        // ZADD GT only ever raises an existing score, which makes the write a
        // server-side max()
        let (stored,): (Option<f64>,) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&set)
            .arg("GT")
            .arg(value)
            .arg(&key.user_id)
            .ignore()
            .cmd("ZSCORE")
            .arg(&set)
            .arg(&key.user_id)
            .query_async(&mut conn)
            .await?;
        Ok(stored.map(|score| score as i64).unwrap_or(value))
    }

    async fn cursor_get(&self, key: &CursorKey) -> StoreResult<Option<i64>> {
        let mut conn = self.conn();
        let score: Option<f64> = conn
            .zscore(self.build_key(key.render_set()), &key.user_id)
            .await?;
        Ok(score.map(|score| score as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds_syntax() {
        assert_eq!(score_bound(Bound::Unbounded, "-inf"), "-inf");
        assert_eq!(score_bound(Bound::Excluded(2000.0), "-inf"), "(2000");
        assert_eq!(score_bound(Bound::Included(1000.0), "+inf"), "1000");
    }
}
