/// In-process storage driver
///
/// Keeps every structure in maps behind one async mutex. Each trait call
/// takes the lock once, so individual operations are atomic just like a
/// single Redis command.
use super::{
    haversine_distance, CursorKey, EntityKey, GeoHit, IdScope, IndexKey, ScoreRange,
    ScoredMember, SecondaryNamespace, Store, StoreResult,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    ids: HashMap<String, i64>,
    entities: HashMap<String, Vec<u8>>,
    ordered: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, BTreeSet<String>>,
    geo: HashMap<String, HashMap<String, (f64, f64)>>,
    secondary: HashMap<String, HashMap<String, String>>,
    cursors: HashMap<String, HashMap<String, i64>>,
    /// Pending injected failures of `ordered_set_add`, per rendered key
    #[cfg(test)]
    ordered_add_faults: HashMap<String, usize>,
}

/// Storage driver backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` `ordered_set_add` calls on `key` fail.
    /// Used to exercise partial fan-out.
    #[cfg(test)]
    pub async fn fail_ordered_set_adds(&self, key: &IndexKey, times: usize) {
        let mut state = self.state.lock().await;
        state.ordered_add_faults.insert(key.render(), times);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn driver(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn generate_id(&self, scope: IdScope) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let counter = state.ids.entry(scope.render()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn put_entity(&self, key: &EntityKey, value: &[u8]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.entities.insert(key.render(), value.to_vec());
        Ok(())
    }

    async fn put_entity_if_absent(&self, key: &EntityKey, value: &[u8]) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let rendered = key.render();
        if state.entities.contains_key(&rendered) {
            return Ok(false);
        }
        state.entities.insert(rendered, value.to_vec());
        Ok(true)
    }

    async fn get_entity(&self, key: &EntityKey) -> StoreResult<Option<Vec<u8>>> {
        let state = self.state.lock().await;
        Ok(state.entities.get(&key.render()).cloned())
    }

    async fn delete_entity(&self, key: &EntityKey) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.entities.remove(&key.render()).is_some())
    }

    async fn ordered_set_add(&self, key: &IndexKey, score: f64, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let rendered = key.render();
        #[cfg(test)]
        if let Some(remaining) = state.ordered_add_faults.get_mut(&rendered) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(super::StoreError::Injected(format!("ordered_set_add {}", rendered)));
            }
        }
        state
            .ordered
            .entry(rendered)
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn ordered_set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.ordered.get_mut(&key.render()) {
            set.remove(member);
        }
        Ok(())
    }

    async fn ordered_set_range(
        &self,
        key: &IndexKey,
        range: ScoreRange,
    ) -> StoreResult<Vec<ScoredMember>> {
        let state = self.state.lock().await;
        let mut members: Vec<ScoredMember> = state
            .ordered
            .get(&key.render())
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| range.contains(**score))
                    .map(|(member, score)| ScoredMember {
                        member: member.clone(),
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
        Ok(members)
    }

    async fn ordered_set_count(&self, key: &IndexKey, range: ScoreRange) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .ordered
            .get(&key.render())
            .map(|set| set.values().filter(|score| range.contains(**score)).count() as u64)
            .unwrap_or(0))
    }

    async fn ordered_set_score(&self, key: &IndexKey, member: &str) -> StoreResult<Option<f64>> {
        let state = self.state.lock().await;
        Ok(state
            .ordered
            .get(&key.render())
            .and_then(|set| set.get(member).copied()))
    }

    async fn set_add(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(key.render())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.sets.get_mut(&key.render()) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_contains(&self, key: &IndexKey, member: &str) -> StoreResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(&key.render())
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn set_scan(&self, key: &IndexKey, limit: Option<usize>) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(&key.render())
            .map(|set| {
                set.iter()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_count(&self, key: &IndexKey) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(&key.render())
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn geo_add(&self, key: &IndexKey, lat: f64, lon: f64, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .geo
            .entry(key.render())
            .or_default()
            .insert(member.to_string(), (lat, lon));
        Ok(())
    }

    async fn geo_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(points) = state.geo.get_mut(&key.render()) {
            points.remove(member);
        }
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
        let state = self.state.lock().await;
        let mut hits: Vec<GeoHit> = state
            .geo
            .get(&key.render())
            .map(|points| {
                points
                    .iter()
                    .map(|(member, (p_lat, p_lon))| GeoHit {
                        member: member.clone(),
                        distance_m: haversine_distance(lat, lon, *p_lat, *p_lon),
                    })
                    .filter(|hit| hit.distance_m <= radius_m)
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn secondary_put(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .secondary
            .entry(namespace.render())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn secondary_put_if_absent(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let lookup = state.secondary.entry(namespace.render()).or_default();
        if lookup.contains_key(key) {
            return Ok(false);
        }
        lookup.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn secondary_get(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .secondary
            .get(&namespace.render())
            .and_then(|lookup| lookup.get(key).cloned()))
    }

    async fn secondary_delete(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(lookup) = state.secondary.get_mut(&namespace.render()) {
            lookup.remove(key);
        }
        Ok(())
    }

    async fn cursor_advance(&self, key: &CursorKey, value: i64) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let cursor = state
            .cursors
            .entry(key.render_set())
            .or_default()
            .entry(key.user_id.clone())
            .or_insert(value);
        *cursor = (*cursor).max(value);
        Ok(*cursor)
    }

    async fn cursor_get(&self, key: &CursorKey) -> StoreResult<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .cursors
            .get(&key.render_set())
            .and_then(|cursors| cursors.get(&key.user_id).copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tenant;

    fn tenant() -> Tenant {
        Tenant::new(1, 1)
    }

    #[tokio::test]
    async fn test_generate_id_is_monotonic_per_scope() {
        let store = MemoryStore::new();
        assert_eq!(store.generate_id(IdScope::AppEvent(tenant())).await.unwrap(), 1);
        assert_eq!(store.generate_id(IdScope::AppEvent(tenant())).await.unwrap(), 2);
        assert_eq!(store.generate_id(IdScope::AppUser(tenant())).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ordered_set_dedups_and_orders() {
        let store = MemoryStore::new();
        let key = IndexKey::Feed(tenant(), "u".into());
        store.ordered_set_add(&key, 2000.0, "a:2").await.unwrap();
        store.ordered_set_add(&key, 1000.0, "a:1").await.unwrap();
        store.ordered_set_add(&key, 2000.0, "a:2").await.unwrap();

        let members = store.ordered_set_range(&key, ScoreRange::all()).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member, "a:1");
        assert_eq!(store.ordered_set_count(&key, ScoreRange::above(1000.0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        let key = IndexKey::Feed(tenant(), "u".into());
        store.fail_ordered_set_adds(&key, 1).await;
        assert!(store.ordered_set_add(&key, 1.0, "a:1").await.is_err());
        assert!(store.ordered_set_add(&key, 1.0, "a:1").await.is_ok());
    }

    #[tokio::test]
    async fn test_cursor_never_rewinds() {
        let store = MemoryStore::new();
        let key = CursorKey::new(tenant(), "u");
        assert_eq!(store.cursor_get(&key).await.unwrap(), None);
        assert_eq!(store.cursor_advance(&key, 2000).await.unwrap(), 2000);
        assert_eq!(store.cursor_advance(&key, 1000).await.unwrap(), 2000);
        assert_eq!(store.cursor_get(&key).await.unwrap(), Some(2000));
    }

    #[tokio::test]
    async fn test_geo_search_radius_and_limit() {
        let store = MemoryStore::new();
        let key = IndexKey::EventsGeo(tenant());
        store.geo_add(&key, 52.5219, 13.4132, "near").await.unwrap();
        store.geo_add(&key, 48.1371, 11.5754, "far").await.unwrap();

        let hits = store.geo_search(&key, 52.5200, 13.4100, 1_000.0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].member, "near");

        let nearest = store.geo_search(&key, 52.5200, 13.4100, f64::MAX, 1).await.unwrap();
        assert_eq!(nearest.len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_claim() {
        let store = MemoryStore::new();
        let ns = SecondaryNamespace::UserEmail(tenant());
        assert!(store.secondary_put_if_absent(&ns, "a@b.c", "1").await.unwrap());
        assert!(!store.secondary_put_if_absent(&ns, "a@b.c", "2").await.unwrap());
        assert_eq!(store.secondary_get(&ns, "a@b.c").await.unwrap().as_deref(), Some("1"));
    }
}
