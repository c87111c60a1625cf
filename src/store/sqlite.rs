/// Relational layout on SQLite
///
/// Entities live in one table per kind, keyed by their tenant columns, with
/// the JSON document in `data`. User email and username, and the `enabled`
/// flag of users, connections and events, are copied into indexed columns.
/// Derived indexes (feeds, follower sets, object and location sets, geo
/// points) live in generic index tables keyed by the rendered index key.
use super::{
    haversine_distance, CursorKey, EntityKey, GeoHit, IdScope, IndexKey, ScoreRange,
    ScoredMember, SecondaryNamespace, Store, StoreResult,
};
use crate::db;
use async_trait::async_trait;
use sqlx::sqlite::SqliteArguments;
use sqlx::{query::Query, Row, Sqlite, SqlitePool};
use std::ops::Bound;
use tracing::debug;

/// Metres per degree of latitude
const METRES_PER_DEGREE: f64 = 111_320.0;

/// SQLite storage driver
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

/// Column value of an entity primary key
#[derive(Debug, Clone)]
enum KeyValue {
    Int(i64),
    Text(String),
}

/// Table and primary-key columns addressed by an [`EntityKey`]
struct EntityLocation {
    table: &'static str,
    columns: &'static [&'static str],
    values: Vec<KeyValue>,
}

impl EntityLocation {
    fn of(key: &EntityKey) -> Self {
        use KeyValue::{Int, Text};
        match key {
            EntityKey::Account(id) => Self {
                table: "accounts",
                columns: &["id"],
                values: vec![Int(*id)],
            },
            EntityKey::AccountUser {
                account_id,
                user_id,
            } => Self {
                table: "account_users",
                columns: &["account_id", "id"],
                values: vec![Int(*account_id), Int(*user_id)],
            },
            EntityKey::Application(t) => Self {
                table: "applications",
                columns: &["account_id", "id"],
                values: vec![Int(t.account_id), Int(t.application_id)],
            },
            EntityKey::User(t, id) => Self {
                table: "application_users",
                columns: &["account_id", "application_id", "id"],
                values: vec![Int(t.account_id), Int(t.application_id), Text(id.clone())],
            },
            EntityKey::Connection {
                tenant,
                from,
                to,
                connection_type,
            } => Self {
                table: "connections",
                columns: &["account_id", "application_id", "user_from", "user_to", "type"],
                values: vec![
                    Int(tenant.account_id),
                    Int(tenant.application_id),
                    Text(from.clone()),
                    Text(to.clone()),
                    Text(connection_type.as_str().to_string()),
                ],
            },
            EntityKey::Event {
                tenant,
                author,
                event_id,
            } => Self {
                table: "events",
                columns: &["account_id", "application_id", "user_id", "id"],
                values: vec![
                    Int(tenant.account_id),
                    Int(tenant.application_id),
                    Text(author.clone()),
                    Int(*event_id),
                ],
            },
            EntityKey::AccountUserSession {
                account_id,
                user_id,
            } => Self {
                table: "sessions",
                columns: &["account_id", "application_id", "user_id"],
                values: vec![Int(*account_id), Int(0), Text(user_id.to_string())],
            },
            EntityKey::UserSession(t, id) => Self {
                table: "sessions",
                columns: &["account_id", "application_id", "user_id"],
                values: vec![Int(t.account_id), Int(t.application_id), Text(id.clone())],
            },
        }
    }

    fn predicate(&self) -> String {
        self.columns
            .iter()
            .map(|column| format!("{} = ?", column))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn bind<'q>(
        &self,
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for value in &self.values {
            query = match value {
                KeyValue::Int(v) => query.bind(*v),
                KeyValue::Text(v) => query.bind(v.clone()),
            };
        }
        query
    }

    fn insert_sql(&self, document: &[DocumentColumn], on_conflict: &str) -> String {
        let mut columns: Vec<&str> = self.columns.to_vec();
        columns.extend(document.iter().map(|column| column.name));
        columns.push("data");
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            self.table,
            columns.join(", "),
            placeholders,
            self.columns.join(", "),
            on_conflict
        )
    }
}

/// Indexed column copied out of an entity document
struct DocumentColumn {
    name: &'static str,
    value: Option<KeyValue>,
}

impl DocumentColumn {
    /// Columns kept for `key`, read from its JSON document.
    /// Values that are absent or not JSON land as NULL.
    fn of(key: &EntityKey, data: &[u8]) -> Vec<Self> {
        let names: &[&'static str] = match key {
            EntityKey::User(..) => &["email", "user_name", "enabled"],
            EntityKey::Connection { .. } | EntityKey::Event { .. } => &["enabled"],
            _ => return Vec::new(),
        };
        let document = serde_json::from_slice::<serde_json::Value>(data).ok();
        names
            .iter()
            .map(|name| {
                let value = document
                    .as_ref()
                    .and_then(|document| document.get(*name))
                    .and_then(|value| match value {
                        serde_json::Value::Bool(flag) => Some(KeyValue::Int(i64::from(*flag))),
                        serde_json::Value::String(text) => {
                            Some(KeyValue::Text(crate::validation::lookup_key(text)))
                        }
                        _ => None,
                    });
                DocumentColumn { name: *name, value }
            })
            .collect()
    }

    fn bind<'q>(
        columns: &[Self],
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for column in columns {
            query = match &column.value {
                Some(KeyValue::Int(v)) => query.bind(*v),
                Some(KeyValue::Text(v)) => query.bind(v.clone()),
                None => query.bind(None::<String>),
            };
        }
        query
    }

    /// `DO UPDATE` clause refreshing the document and its columns
    fn upsert_clause(columns: &[Self]) -> String {
        let mut assignments = vec!["data = excluded.data".to_string()];
        assignments.extend(
            columns
                .iter()
                .map(|column| format!("{0} = excluded.{0}", column.name)),
        );
        format!("DO UPDATE SET {}", assignments.join(", "))
    }
}

/// Render score bounds as a SQL predicate plus the values to bind
fn score_predicate(range: &ScoreRange) -> (String, Vec<f64>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    match range.min {
        Bound::Included(v) => {
            clauses.push(" AND score >= ?");
            values.push(v);
        }
        Bound::Excluded(v) => {
            clauses.push(" AND score > ?");
            values.push(v);
        }
        Bound::Unbounded => {}
    }
    match range.max {
        Bound::Included(v) => {
            clauses.push(" AND score <= ?");
            values.push(v);
        }
        Bound::Excluded(v) => {
            clauses.push(" AND score < ?");
            values.push(v);
        }
        Bound::Unbounded => {}
    }
    (clauses.concat(), values)
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open a pool on `path` and apply the embedded migrations
    pub async fn open(path: &std::path::Path, options: db::DatabaseOptions) -> StoreResult<Self> {
        let pool = db::create_pool(path, options).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Fresh migrated in-memory database
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = db::create_memory_pool().await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn driver(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> StoreResult<()> {
        db::test_connection(&self.db).await
    }

    async fn generate_id(&self, scope: IdScope) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO id_sequences (scope, value) VALUES (?1, 1)
             ON CONFLICT (scope) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(scope.render())
        .fetch_one(&self.db)
        .await?;
        Ok(id)
    }

    async fn put_entity(&self, key: &EntityKey, value: &[u8]) -> StoreResult<()> {
        let location = EntityLocation::of(key);
        let document = DocumentColumn::of(key, value);
        let sql = location.insert_sql(&document, &DocumentColumn::upsert_clause(&document));
        debug!("put_entity: {}", key.render());
        DocumentColumn::bind(&document, location.bind(sqlx::query(&sql)))
            .bind(value.to_vec())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn put_entity_if_absent(&self, key: &EntityKey, value: &[u8]) -> StoreResult<bool> {
        let location = EntityLocation::of(key);
        let document = DocumentColumn::of(key, value);
        let sql = location.insert_sql(&document, "DO NOTHING");
        let result = DocumentColumn::bind(&document, location.bind(sqlx::query(&sql)))
            .bind(value.to_vec())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_entity(&self, key: &EntityKey) -> StoreResult<Option<Vec<u8>>> {
        let location = EntityLocation::of(key);
        let sql = format!("SELECT data FROM {} WHERE {}", location.table, location.predicate());
        let row = location.bind(sqlx::query(&sql)).fetch_optional(&self.db).await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<Vec<u8>, _>("data")?),
            None => None,
        })
    }

    async fn delete_entity(&self, key: &EntityKey) -> StoreResult<bool> {
        let location = EntityLocation::of(key);
        let sql = format!("DELETE FROM {} WHERE {}", location.table, location.predicate());
        let result = location.bind(sqlx::query(&sql)).execute(&self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ordered_set_add(&self, key: &IndexKey, score: f64, member: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO ordered_set_members (set_key, member, score) VALUES (?1, ?2, ?3)
             ON CONFLICT (set_key, member) DO UPDATE SET score = excluded.score",
        )
        .bind(key.render())
        .bind(member)
        .bind(score)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn ordered_set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM ordered_set_members WHERE set_key = ?1 AND member = ?2")
            .bind(key.render())
            .bind(member)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn ordered_set_range(
        &self,
        key: &IndexKey,
        range: ScoreRange,
    ) -> StoreResult<Vec<ScoredMember>> {
        let (predicate, bounds) = score_predicate(&range);
        let sql = format!(
            "SELECT member, score FROM ordered_set_members WHERE set_key = ?{}
             ORDER BY score ASC, member ASC",
            predicate
        );
        let mut query = sqlx::query(&sql).bind(key.render());
        for bound in bounds {
            query = query.bind(bound);
        }
        let rows = query.fetch_all(&self.db).await?;
        rows.iter()
            .map(|row| -> StoreResult<ScoredMember> {
                Ok(ScoredMember {
                    member: row.try_get("member")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    async fn ordered_set_count(&self, key: &IndexKey, range: ScoreRange) -> StoreResult<u64> {
        let (predicate, bounds) = score_predicate(&range);
        let sql = format!(
            "SELECT COUNT(*) FROM ordered_set_members WHERE set_key = ?{}",
            predicate
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(key.render());
        for bound in bounds {
            query = query.bind(bound);
        }
        let count = query.fetch_one(&self.db).await?;
        Ok(count.max(0) as u64)
    }

    async fn ordered_set_score(&self, key: &IndexKey, member: &str) -> StoreResult<Option<f64>> {
        let score = sqlx::query_scalar::<_, f64>(
            "SELECT score FROM ordered_set_members WHERE set_key = ?1 AND member = ?2",
        )
        .bind(key.render())
        .bind(member)
        .fetch_optional(&self.db)
        .await?;
        Ok(score)
    }

    async fn set_add(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO set_members (set_key, member) VALUES (?1, ?2)
             ON CONFLICT (set_key, member) DO NOTHING",
        )
        .bind(key.render())
        .bind(member)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM set_members WHERE set_key = ?1 AND member = ?2")
            .bind(key.render())
            .bind(member)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_contains(&self, key: &IndexKey, member: &str) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM set_members WHERE set_key = ?1 AND member = ?2",
        )
        .bind(key.render())
        .bind(member)
        .fetch_optional(&self.db)
        .await?;
        Ok(found.is_some())
    }

    async fn set_scan(&self, key: &IndexKey, limit: Option<usize>) -> StoreResult<Vec<String>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let members = sqlx::query_scalar::<_, String>(
            "SELECT member FROM set_members WHERE set_key = ?1 ORDER BY member LIMIT ?2",
        )
        .bind(key.render())
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(members)
    }

    async fn set_count(&self, key: &IndexKey) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM set_members WHERE set_key = ?1",
        )
        .bind(key.render())
        .fetch_one(&self.db)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn geo_add(&self, key: &IndexKey, lat: f64, lon: f64, member: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO geo_points (set_key, member, latitude, longitude) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (set_key, member)
             DO UPDATE SET latitude = excluded.latitude, longitude = excluded.longitude",
        )
        .bind(key.render())
        .bind(member)
        .bind(lat)
        .bind(lon)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn geo_remove(&self, key: &IndexKey, member: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM geo_points WHERE set_key = ?1 AND member = ?2")
            .bind(key.render())
            .bind(member)
            .execute(&self.db)
            .await?;
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
        // Prefilter with a bounding box unless it would wrap a pole or the
        // antimeridian, then compute exact distances
        let lat_delta = radius_m / METRES_PER_DEGREE;
        let lon_scale = lat.to_radians().cos() * METRES_PER_DEGREE;
        let boxed = lat.abs() + lat_delta < 89.0 && lon_scale > 0.0 && {
            let lon_delta = radius_m / lon_scale;
            lon.abs() + lon_delta < 180.0
        };

        let rows = if boxed {
            let lon_delta = radius_m / lon_scale;
            sqlx::query(
                "SELECT member, latitude, longitude FROM geo_points
                 WHERE set_key = ?1 AND latitude BETWEEN ?2 AND ?3
                 AND longitude BETWEEN ?4 AND ?5",
            )
            .bind(key.render())
            .bind(lat - lat_delta)
            .bind(lat + lat_delta)
            .bind(lon - lon_delta)
            .bind(lon + lon_delta)
            .fetch_all(&self.db)
            .await?
        } else {
            sqlx::query("SELECT member, latitude, longitude FROM geo_points WHERE set_key = ?1")
                .bind(key.render())
                .fetch_all(&self.db)
                .await?
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let p_lat: f64 = row.try_get("latitude")?;
            let p_lon: f64 = row.try_get("longitude")?;
            let distance_m = haversine_distance(lat, lon, p_lat, p_lon);
            if distance_m <= radius_m {
                hits.push(GeoHit {
                    member: row.try_get("member")?,
                    distance_m,
                });
            }
        }
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
        sqlx::query(
            "INSERT INTO secondary_index (namespace, lookup_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, lookup_key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace.render())
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn secondary_put_if_absent(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
        value: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO secondary_index (namespace, lookup_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, lookup_key) DO NOTHING",
        )
        .bind(namespace.render())
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn secondary_get(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM secondary_index WHERE namespace = ?1 AND lookup_key = ?2",
        )
        .bind(namespace.render())
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(value)
    }

    async fn secondary_delete(
        &self,
        namespace: &SecondaryNamespace,
        key: &str,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM secondary_index WHERE namespace = ?1 AND lookup_key = ?2")
            .bind(namespace.render())
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn cursor_advance(&self, key: &CursorKey, value: i64) -> StoreResult<i64> {
        let stored: i64 = sqlx::query_scalar(
            "INSERT INTO read_cursors (account_id, application_id, user_id, last_read)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (account_id, application_id, user_id)
             DO UPDATE SET last_read = MAX(last_read, excluded.last_read)
             RETURNING last_read",
        )
        .bind(key.tenant.account_id)
        .bind(key.tenant.application_id)
        .bind(&key.user_id)
        .bind(value)
        .fetch_one(&self.db)
        .await?;
        Ok(stored)
    }

    async fn cursor_get(&self, key: &CursorKey) -> StoreResult<Option<i64>> {
        let stored = sqlx::query_scalar::<_, i64>(
            "SELECT last_read FROM read_cursors
             WHERE account_id = ?1 AND application_id = ?2 AND user_id = ?3",
        )
        .bind(key.tenant.account_id)
        .bind(key.tenant.application_id)
        .bind(&key.user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionType, Tenant};

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_entity_round_trip_per_table() {
        let store = store().await;
        let t = Tenant::new(1, 2);
        let keys = vec![
            EntityKey::Account(1),
            EntityKey::Application(t),
            EntityKey::User(t, "u1".into()),
            EntityKey::connection(t, "u1", "u2", ConnectionType::Follow),
            EntityKey::event(t, "u1", 7),
            EntityKey::UserSession(t, "u1".into()),
            EntityKey::AccountUserSession {
                account_id: 1,
                user_id: 3,
            },
        ];

        for key in &keys {
            store.put_entity(key, b"{\"v\":1}").await.unwrap();
            assert!(!store.put_entity_if_absent(key, b"{}").await.unwrap());
            assert_eq!(store.get_entity(key).await.unwrap().unwrap(), b"{\"v\":1}".to_vec());
        }

        for key in &keys {
            assert!(store.delete_entity(key).await.unwrap());
            assert!(store.get_entity(key).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_connection_types_are_distinct_rows() {
        let store = store().await;
        let t = Tenant::new(1, 1);
        let follow = EntityKey::connection(t, "a", "b", ConnectionType::Follow);
        let friend = EntityKey::connection(t, "a", "b", ConnectionType::Friend);
        assert!(store.put_entity_if_absent(&follow, b"1").await.unwrap());
        assert!(store.put_entity_if_absent(&friend, b"2").await.unwrap());
    }

    #[tokio::test]
    async fn test_document_columns_are_queryable() {
        let store = store().await;
        let t = Tenant::new(1, 1);
        let user = serde_json::json!({"email": " Ada@Example.io", "user_name": "Ada", "enabled": true});
        store
            .put_entity(&EntityKey::User(t, "u1".into()), user.to_string().as_bytes())
            .await
            .unwrap();

        let found: Option<String> = sqlx::query_scalar(
            "SELECT id FROM application_users
             WHERE account_id = ?1 AND application_id = ?2 AND email = ?3",
        )
        .bind(t.account_id)
        .bind(t.application_id)
        .bind("ada@example.io")
        .fetch_optional(&store.db)
        .await
        .unwrap();
        assert_eq!(found.as_deref(), Some("u1"));

        let edge = |enabled: bool| serde_json::json!({"enabled": enabled}).to_string();
        let pending = EntityKey::connection(t, "a", "b", ConnectionType::Follow);
        let confirmed = EntityKey::connection(t, "c", "b", ConnectionType::Follow);
        assert!(store.put_entity_if_absent(&pending, edge(false).as_bytes()).await.unwrap());
        assert!(store.put_entity_if_absent(&confirmed, edge(true).as_bytes()).await.unwrap());

        let incoming = |enabled: bool| {
            sqlx::query_scalar::<_, String>(
                "SELECT user_from FROM connections
                 WHERE account_id = ?1 AND application_id = ?2 AND user_to = ?3 AND enabled = ?4",
            )
            .bind(t.account_id)
            .bind(t.application_id)
            .bind("b")
            .bind(i64::from(enabled))
            .fetch_all(&store.db)
        };
        assert_eq!(incoming(true).await.unwrap(), vec!["c".to_string()]);
        assert_eq!(incoming(false).await.unwrap(), vec!["a".to_string()]);

        // Upserts refresh the columns along with the document
        store.put_entity(&pending, edge(true).as_bytes()).await.unwrap();
        assert_eq!(incoming(true).await.unwrap().len(), 2);
        assert!(incoming(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequences_and_ranges() {
        let store = store().await;
        let t = Tenant::new(1, 1);
        assert_eq!(store.generate_id(IdScope::AppEvent(t)).await.unwrap(), 1);
        assert_eq!(store.generate_id(IdScope::AppEvent(t)).await.unwrap(), 2);

        let feed = IndexKey::Feed(t, "u".into());
        store.ordered_set_add(&feed, 1000.0, "a:1").await.unwrap();
        store.ordered_set_add(&feed, 2000.0, "a:2").await.unwrap();
        store.ordered_set_add(&feed, 2000.0, "a:2").await.unwrap();

        let all = store.ordered_set_range(&feed, ScoreRange::all()).await.unwrap();
        assert_eq!(all.len(), 2);
        let unread = store.ordered_set_range(&feed, ScoreRange::above(1000.0)).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].member, "a:2");
        assert_eq!(store.ordered_set_count(&feed, ScoreRange::above(2000.0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic() {
        let store = store().await;
        let key = CursorKey::new(Tenant::new(1, 1), "u");
        assert_eq!(store.cursor_advance(&key, 2000).await.unwrap(), 2000);
        assert_eq!(store.cursor_advance(&key, 1500).await.unwrap(), 2000);
        assert_eq!(store.cursor_get(&key).await.unwrap(), Some(2000));
    }

    #[tokio::test]
    async fn test_sets_and_geo() {
        let store = store().await;
        let t = Tenant::new(1, 1);
        let followers = IndexKey::Followers(t, "a".into());
        store.set_add(&followers, "b").await.unwrap();
        store.set_add(&followers, "b").await.unwrap();
        store.set_add(&followers, "c").await.unwrap();
        assert_eq!(store.set_count(&followers).await.unwrap(), 2);
        assert_eq!(store.set_scan(&followers, Some(1)).await.unwrap().len(), 1);
        store.set_remove(&followers, "b").await.unwrap();
        assert!(!store.set_contains(&followers, "b").await.unwrap());

        let geo = IndexKey::EventsGeo(t);
        store.geo_add(&geo, 52.5219, 13.4132, "a:1").await.unwrap();
        store.geo_add(&geo, 48.1371, 11.5754, "a:2").await.unwrap();
        let hits = store.geo_search(&geo, 52.52, 13.41, 2_000.0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].member, "a:1");
        let nearest = store.geo_search(&geo, 52.52, 13.41, 40_000_000.0, 2).await.unwrap();
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].member, "a:1");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("murmur.db");
        let key = EntityKey::User(Tenant::new(1, 1), "u1".into());

        let store = SqliteStore::open(&path, db::DatabaseOptions::default()).await.unwrap();
        store.put_entity(&key, b"{}").await.unwrap();
        drop(store);

        let store = SqliteStore::open(&path, db::DatabaseOptions::default()).await.unwrap();
        assert_eq!(store.get_entity(&key).await.unwrap(), Some(b"{}".to_vec()));
    }
}
