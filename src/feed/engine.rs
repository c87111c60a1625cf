/// Feed reads
///
/// A feed is an ordered set of event references scored by creation time.
/// Reading it resolves the references, drops entries whose event is gone or
/// disabled, and advances the reader's cursor to the newest score returned.
/// The cursor only moves forward; the store keeps `max(old, new)`.
use super::{FeedPage, UnreadCount};
use crate::{
    error::ApiResult,
    events::{sort_newest_first, EventEngine},
    metrics,
    models::{Event, EventRef, Tenant},
    store::{members_of, CursorKey, IndexKey, ScoreRange, ScoredMember, Store},
    users::UserDirectory,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct FeedEngine {
    store: Arc<dyn Store>,
    events: Arc<EventEngine>,
    users: Arc<UserDirectory>,
}

impl FeedEngine {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventEngine>, users: Arc<UserDirectory>) -> Self {
        Self { store, events, users }
    }

    async fn last_read(&self, tenant: Tenant, user_id: &str) -> ApiResult<i64> {
        Ok(self
            .store
            .cursor_get(&CursorKey::new(tenant, user_id))
            .await?
            .unwrap_or(0))
    }

    /// Resolve feed entries to live events, newest first. Entries pointing
    /// at deleted events are pruned from the feed.
    async fn resolve(&self, tenant: Tenant, user_id: &str, entries: &[ScoredMember]) -> ApiResult<Vec<Event>> {
        let loaded = self
            .events
            .load(tenant, &members_of(entries))
            .await?;

        let present: HashSet<String> = loaded
            .iter()
            .map(|event| event.reference().to_member())
            .collect();
        let feed = IndexKey::Feed(tenant, user_id.to_string());
        for entry in entries {
            let dangling = EventRef::parse_member(&entry.member).is_some() && !present.contains(&entry.member);
            if dangling {
                debug!(%tenant, user = user_id, member = %entry.member, "read_feed: pruning dangling entry");
                self.store.ordered_set_remove(&feed, &entry.member).await?;
            }
        }

        let mut events: Vec<Event> = loaded.into_iter().filter(|event| event.enabled).collect();
        sort_newest_first(&mut events);
        Ok(events)
    }

    async fn advance(&self, tenant: Tenant, user_id: &str, events: &[Event]) -> ApiResult<()> {
        if let Some(newest) = events.iter().map(|event| event.created_at.timestamp()).max() {
            let stored = self
                .store
                .cursor_advance(&CursorKey::new(tenant, user_id), newest)
                .await?;
            debug!(%tenant, user = user_id, last_read = stored, "read_feed: cursor advanced");
        }
        Ok(())
    }

    async fn page(&self, tenant: Tenant, events: Vec<Event>, unread_events_count: u64) -> ApiResult<FeedPage> {
        let authors: Vec<String> = events.iter().map(|event| event.user_id.clone()).collect();
        let users = self.users.hydrate(tenant, &authors).await?;
        Ok(FeedPage {
            events,
            unread_events_count,
            users,
        })
    }

    /// Whole feed plus the number of entries newer than the cursor
    pub async fn user_feed(&self, tenant: Tenant, user_id: &str) -> ApiResult<FeedPage> {
        let last_read = self.last_read(tenant, user_id).await?;
        let entries = self
            .store
            .ordered_set_range(&IndexKey::Feed(tenant, user_id.to_string()), ScoreRange::all())
            .await?;

        let events = self.resolve(tenant, user_id, &entries).await?;
        let unread = events
            .iter()
            .filter(|event| event.created_at.timestamp() > last_read)
            .count() as u64;

        self.advance(tenant, user_id, &events).await?;
        metrics::record_feed_read("feed");
        self.page(tenant, events, unread).await
    }

    /// Entries newer than the cursor only
    pub async fn unread_feed(&self, tenant: Tenant, user_id: &str) -> ApiResult<FeedPage> {
        let last_read = self.last_read(tenant, user_id).await?;
        let entries = self
            .store
            .ordered_set_range(
                &IndexKey::Feed(tenant, user_id.to_string()),
                ScoreRange::above(last_read as f64),
            )
            .await?;

        let events = self.resolve(tenant, user_id, &entries).await?;
        let unread = events.len() as u64;

        self.advance(tenant, user_id, &events).await?;
        metrics::record_feed_read("unread");
        self.page(tenant, events, unread).await
    }

    /// Number of entries newer than the cursor. Leaves the cursor alone.
    pub async fn unread_count(&self, tenant: Tenant, user_id: &str) -> ApiResult<UnreadCount> {
        let last_read = self.last_read(tenant, user_id).await?;
        let unread_events_count = self
            .store
            .ordered_set_count(
                &IndexKey::Feed(tenant, user_id.to_string()),
                ScoreRange::above(last_read as f64),
            )
            .await?;

        metrics::record_feed_read("unread_count");
        Ok(UnreadCount { unread_events_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FanoutConfig;
    use crate::events::EventBody;
    use crate::graph::GraphIndex;
    use crate::models::{ApplicationUser, Connection, ConnectionType, Visibility};
    use crate::store::{EntityKey, MemoryStore, SqliteStore};
    use crate::test_support::MutableClock;
    use chrono::Utc;
    use mockable::Clock;
    use std::collections::BTreeMap;

    const READER: &str = "00000000-0000-5000-8000-000000000001";
    const AUTHOR: &str = "00000000-0000-5000-8000-000000000002";

    struct Fixture {
        store: Arc<dyn Store>,
        clock: Arc<MutableClock>,
        events: Arc<EventEngine>,
        feed: FeedEngine,
        tenant: Tenant,
    }

    async fn fixture() -> Fixture {
        fixture_on(Arc::new(MemoryStore::new())).await
    }

    async fn fixture_on(store: Arc<dyn Store>) -> Fixture {
        let dyn_store = store.clone();
        let clock = Arc::new(MutableClock::at(1_700_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let graph = Arc::new(GraphIndex::new(dyn_store.clone()));
        let users = Arc::new(UserDirectory::new(dyn_store.clone()));
        let events = Arc::new(EventEngine::new(
            dyn_store.clone(),
            graph.clone(),
            users.clone(),
            dyn_clock,
            FanoutConfig {
                follower_cap: 0,
                scan_batch: 300,
            },
        ));
        let feed = FeedEngine::new(dyn_store, events.clone(), users.clone());
        let tenant = Tenant::new(1, 1);

        let now = Utc::now();
        for id in [READER, AUTHOR] {
            users
                .put(&ApplicationUser {
                    id: id.to_string(),
                    account_id: 1,
                    application_id: 1,
                    custom_id: None,
                    user_name: Some(format!("user-{}", &id[id.len() - 1..])),
                    email: None,
                    password_hash: "secret-hash".to_string(),
                    first_name: None,
                    last_name: None,
                    url: None,
                    metadata: None,
                    social_ids: BTreeMap::new(),
                    enabled: true,
                    activated: true,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }
        let mut edge = Connection::new(READER, AUTHOR, ConnectionType::Follow, now);
        edge.enabled = true;
        graph.link(tenant, &edge).await.unwrap();

        Fixture {
            store,
            clock,
            events,
            feed,
            tenant,
        }
    }

    impl Fixture {
        async fn post(&self) -> Event {
            self.clock.advance_seconds(10);
            self.events
                .create(
                    self.tenant,
                    AUTHOR,
                    EventBody {
                        verb: Some("like".to_string()),
                        visibility: Some(Visibility::Connections),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_feed_then_unread_cycle() {
        let f = fixture().await;
        for _ in 0..3 {
            f.post().await;
        }

        let page = f.feed.user_feed(f.tenant, READER).await.unwrap();
        assert_eq!(page.events.len(), 3);
        assert_eq!(page.unread_events_count, 3);
        assert!(page.events[0].created_at > page.events[2].created_at);
        assert!(page.users.contains_key(AUTHOR));

        let unread = f.feed.unread_feed(f.tenant, READER).await.unwrap();
        assert!(unread.is_empty());

        f.post().await;
        assert_eq!(f.feed.unread_count(f.tenant, READER).await.unwrap().unread_events_count, 1);
        // Counting does not consume
        assert_eq!(f.feed.unread_count(f.tenant, READER).await.unwrap().unread_events_count, 1);

        let unread = f.feed.unread_feed(f.tenant, READER).await.unwrap();
        assert_eq!(unread.events.len(), 1);
        assert_eq!(f.feed.unread_count(f.tenant, READER).await.unwrap().unread_events_count, 0);
    }

    #[tokio::test]
    async fn test_cursor_never_rewinds() {
        let f = fixture().await;
        f.post().await;
        let newest = f.post().await;

        let cursor = CursorKey::new(f.tenant, READER);
        f.store
            .cursor_advance(&cursor, newest.created_at.timestamp() + 100)
            .await
            .unwrap();

        let page = f.feed.user_feed(f.tenant, READER).await.unwrap();
        assert_eq!(page.unread_events_count, 0);
        assert_eq!(
            f.store.cursor_get(&cursor).await.unwrap(),
            Some(newest.created_at.timestamp() + 100)
        );
    }

    #[tokio::test]
    async fn test_duplicates_and_dangling_entries() {
        let f = fixture().await;
        let event = f.post().await;
        let gone = f.post().await;

        let feed = IndexKey::Feed(f.tenant, READER.to_string());
        // Retried fan-out writes the same member again
        f.store
            .ordered_set_add(&feed, event.score(), &event.reference().to_member())
            .await
            .unwrap();
        f.store
            .delete_entity(&EntityKey::event(f.tenant, AUTHOR, gone.id))
            .await
            .unwrap();

        let page = f.feed.user_feed(f.tenant, READER).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].id, event.id);
        assert_eq!(
            f.store
                .ordered_set_range(&feed, ScoreRange::all())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_hydrated_users_are_sanitized() {
        let f = fixture().await;
        f.post().await;

        let page = f.feed.user_feed(f.tenant, READER).await.unwrap();
        let json = serde_json::to_string(&page).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("password"));
    }

    /// Interleaved feed reads and an outside advance leave the largest value
    async fn assert_concurrent_reads_keep_max(f: Fixture) {
        f.post().await;
        f.post().await;
        let newest = f.post().await.created_at.timestamp();
        let cursor = CursorKey::new(f.tenant, READER);

        let (full, unread, stale, ahead) = tokio::join!(
            f.feed.user_feed(f.tenant, READER),
            f.feed.unread_feed(f.tenant, READER),
            f.store.cursor_advance(&cursor, newest - 20),
            f.store.cursor_advance(&cursor, newest + 50),
        );
        full.unwrap();
        unread.unwrap();
        stale.unwrap();
        ahead.unwrap();
        assert_eq!(f.store.cursor_get(&cursor).await.unwrap(), Some(newest + 50));

        let (full, unread) = tokio::join!(
            f.feed.user_feed(f.tenant, READER),
            f.feed.unread_feed(f.tenant, READER),
        );
        assert_eq!(full.unwrap().unread_events_count, 0);
        assert!(unread.unwrap().is_empty());
        assert_eq!(f.store.cursor_get(&cursor).await.unwrap(), Some(newest + 50));
    }

    #[tokio::test]
    async fn test_concurrent_reads_keep_max_cursor_in_memory() {
        assert_concurrent_reads_keep_max(fixture().await).await;
    }

    #[tokio::test]
    async fn test_concurrent_reads_keep_max_cursor_in_sqlite() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        assert_concurrent_reads_keep_max(fixture_on(store).await).await;
    }

    #[tokio::test]
    async fn test_concurrent_reads_advance_to_newest() {
        let f = fixture().await;
        f.post().await;
        let newest = f.post().await.created_at.timestamp();

        let (first, second) = tokio::join!(
            f.feed.user_feed(f.tenant, READER),
            f.feed.unread_feed(f.tenant, READER),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(
            f.store.cursor_get(&CursorKey::new(f.tenant, READER)).await.unwrap(),
            Some(newest)
        );
    }
}
