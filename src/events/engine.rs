/// Event writes, index maintenance and fan-out on write
///
/// An enabled event is reachable from the author's time index, its object,
/// location and geo indexes, and the feed of every follower (unless it is
/// private). Disabling or deleting an event walks the same indexes in
/// reverse. Nothing here is transactional: every step is idempotent, so a
/// retried create or toggle converges on the same state.
use super::{sort_newest_first, EventBody, EventQuery};
use crate::{
    config::FanoutConfig,
    error::{ApiError, ApiResult, ErrorCode},
    graph::GraphIndex,
    metrics,
    models::{Event, EventRef, Tenant, Visibility},
    store::{self, members_of, EntityKey, IdScope, IndexKey, ScoreRange, Store},
    users::UserDirectory,
};
use mockable::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct EventEngine {
    store: Arc<dyn Store>,
    graph: Arc<GraphIndex>,
    users: Arc<UserDirectory>,
    clock: Arc<dyn Clock>,
    fanout: FanoutConfig,
}

impl EventEngine {
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<GraphIndex>,
        users: Arc<UserDirectory>,
        clock: Arc<dyn Clock>,
        fanout: FanoutConfig,
    ) -> Self {
        Self {
            store,
            graph,
            users,
            clock,
            fanout,
        }
    }

    /// Write a new event and fan it out
    pub async fn create(&self, tenant: Tenant, author_id: &str, body: EventBody) -> ApiResult<Event> {
        body.validate_new()?;

        let author = self
            .users
            .get(tenant, author_id)
            .await?
            .ok_or(ApiError::Code(ErrorCode::UserNotFound))?;
        if !author.enabled {
            return Err(ErrorCode::UserDisabled.into());
        }

        let now = self.clock.utc();
        let id = self.store.generate_id(IdScope::AppEvent(tenant)).await?;
        let event = Event {
            id,
            user_id: author.id,
            verb: body.verb.unwrap_or_default(),
            language: body.language,
            priority: body.priority,
            location: body.location.filter(|location| !location.is_empty()),
            latitude: body.latitude,
            longitude: body.longitude,
            object: body.object,
            target: body.target,
            metadata: body.metadata,
            visibility: body.visibility.unwrap_or(Visibility::Connections),
            tags: body.tags.unwrap_or_default(),
            enabled: body.enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        let key = EntityKey::event(tenant, &event.user_id, id);
        store::put_json(self.store.as_ref(), &key, &event).await?;

        if event.enabled {
            self.index(tenant, &event).await?;
            self.fan_out(tenant, &event).await?;
        }

        info!(%tenant, author = %event.user_id, event_id = id, "create_event: event created");
        Ok(event)
    }

    pub async fn read(&self, tenant: Tenant, author_id: &str, event_id: i64) -> ApiResult<Event> {
        store::get_json(self.store.as_ref(), &EntityKey::event(tenant, author_id, event_id))
            .await?
            .ok_or(ApiError::Code(ErrorCode::EventNotFound))
    }

    /// Toggle `enabled`. Payload fields are immutable.
    pub async fn update(
        &self,
        tenant: Tenant,
        author_id: &str,
        event_id: i64,
        body: EventBody,
    ) -> ApiResult<Event> {
        let mut event = self.read(tenant, author_id, event_id).await?;
        if body.changes_payload(&event) {
            return Err(ErrorCode::ImmutableEventField.into());
        }

        let key = EntityKey::event(tenant, author_id, event_id);
        let enabled = body.enabled.unwrap_or(event.enabled);
        event.updated_at = self.clock.utc();

        match (event.enabled, enabled) {
            (true, false) => {
                self.unfan(tenant, &event).await?;
                self.unindex(tenant, &event).await?;
                event.enabled = false;
                store::put_json(self.store.as_ref(), &key, &event).await?;
            }
            (false, true) => {
                event.enabled = true;
                store::put_json(self.store.as_ref(), &key, &event).await?;
                self.index(tenant, &event).await?;
                self.fan_out(tenant, &event).await?;
            }
            _ => {
                store::put_json(self.store.as_ref(), &key, &event).await?;
            }
        }

        debug!(%tenant, author = author_id, event_id, enabled, "update_event: event updated");
        Ok(event)
    }

    /// Remove an event from every index and feed, then drop the row
    pub async fn delete(&self, tenant: Tenant, author_id: &str, event_id: i64) -> ApiResult<()> {
        let event = self.read(tenant, author_id, event_id).await?;

        self.unfan(tenant, &event).await?;
        self.unindex(tenant, &event).await?;
        self.store
            .delete_entity(&EntityKey::event(tenant, author_id, event_id))
            .await?;

        info!(%tenant, author = author_id, event_id, "delete_event: event deleted");
        Ok(())
    }

    /// Enabled events of `author_id`, newest first. Private events are
    /// only listed for their author.
    pub async fn list_by_author(
        &self,
        tenant: Tenant,
        author_id: &str,
        viewer_id: &str,
    ) -> ApiResult<Vec<Event>> {
        let entries = self
            .store
            .ordered_set_range(&IndexKey::UserEvents(tenant, author_id.to_string()), ScoreRange::all())
            .await?;
        let mut events = self
            .load(tenant, &members_of(&entries))
            .await?;

        let own = author_id == viewer_id;
        let follows = own || self.graph.follows(tenant, viewer_id, author_id).await?;
        events.retain(|event| {
            event.enabled
                && (own
                    || event.visibility == Visibility::Public
                    || (event.visibility == Visibility::Connections && follows))
        });
        sort_newest_first(&mut events);
        Ok(events)
    }

    /// Geo, object or location search as seen by `viewer_id`
    pub async fn search(&self, tenant: Tenant, viewer_id: &str, query: EventQuery) -> ApiResult<Vec<Event>> {
        let members: Vec<String> = match &query {
            EventQuery::Geo {
                latitude,
                longitude,
                radius_m,
                limit,
            } => self
                .store
                .geo_search(&IndexKey::EventsGeo(tenant), *latitude, *longitude, *radius_m, *limit)
                .await?
                .into_iter()
                .map(|hit| hit.member)
                .collect(),
            EventQuery::Object(object) => {
                self.store
                    .set_scan(&IndexKey::EventsByObject(tenant, object.clone()), None)
                    .await?
            }
            EventQuery::Location(location) => {
                self.store
                    .set_scan(&IndexKey::EventsByLocation(tenant, location.clone()), None)
                    .await?
            }
        };

        let mut events = self.load(tenant, &members).await?;

        let mut follows: HashMap<String, bool> = HashMap::new();
        let mut visible = Vec::with_capacity(events.len());
        for event in events.drain(..) {
            if !event.enabled {
                continue;
            }
            let allowed = match event.visibility {
                _ if event.user_id == viewer_id => true,
                Visibility::Public => true,
                Visibility::Private => false,
                Visibility::Connections => match follows.get(&event.user_id) {
                    Some(follows) => *follows,
                    None => {
                        let follows_author =
                            self.graph.follows(tenant, viewer_id, &event.user_id).await?;
                        follows.insert(event.user_id.clone(), follows_author);
                        follows_author
                    }
                },
            };
            if allowed {
                visible.push(event);
            }
        }

        sort_newest_first(&mut visible);
        debug!(%tenant, ?query, hits = visible.len(), "search_events: search finished");
        Ok(visible)
    }

    /// Copy the author's fan-out-able events into a new follower's feed,
    /// keeping their original scores
    pub async fn backfill(&self, tenant: Tenant, follower_id: &str, author_id: &str) -> ApiResult<usize> {
        let entries = self
            .store
            .ordered_set_range(&IndexKey::UserEvents(tenant, author_id.to_string()), ScoreRange::all())
            .await?;
        let events = self
            .load(tenant, &members_of(&entries))
            .await?;

        let feed = IndexKey::Feed(tenant, follower_id.to_string());
        let mut copied = 0;
        for event in events.iter().filter(|event| event.enabled && event.visibility.fans_out()) {
            if let Err(e) = self
                .store
                .ordered_set_add(&feed, event.score(), &event.reference().to_member())
                .await
            {
                warn!(%tenant, follower = follower_id, author = author_id, "backfill: feed write failed: {}", e);
                metrics::record_error("storage", "backfill");
                return Err(e.into());
            }
            copied += 1;
        }

        metrics::record_backfill(copied);
        debug!(%tenant, follower = follower_id, author = author_id, copied, "backfill: feed back-filled");
        Ok(copied)
    }

    /// Drop every event of `author_id` from the follower's feed
    pub async fn remove_author_from_feed(
        &self,
        tenant: Tenant,
        follower_id: &str,
        author_id: &str,
    ) -> ApiResult<usize> {
        let feed = IndexKey::Feed(tenant, follower_id.to_string());
        let entries = self.store.ordered_set_range(&feed, ScoreRange::all()).await?;

        let mut removed = 0;
        for entry in entries {
            let by_author = EventRef::parse_member(&entry.member)
                .map(|reference| reference.author == author_id)
                .unwrap_or(false);
            if by_author {
                self.store.ordered_set_remove(&feed, &entry.member).await?;
                removed += 1;
            }
        }

        metrics::record_unfanout(removed);
        debug!(%tenant, follower = follower_id, author = author_id, removed, "remove_author_from_feed: feed pruned");
        Ok(removed)
    }

    async fn index(&self, tenant: Tenant, event: &Event) -> ApiResult<()> {
        let member = event.reference().to_member();

        self.store
            .ordered_set_add(&IndexKey::UserEvents(tenant, event.user_id.clone()), event.score(), &member)
            .await?;
        if let Some(object) = &event.object {
            self.store
                .set_add(&IndexKey::EventsByObject(tenant, object.id.clone()), &member)
                .await?;
        }
        if let Some(location) = &event.location {
            self.store
                .set_add(&IndexKey::EventsByLocation(tenant, location.clone()), &member)
                .await?;
        }
        if let Some((latitude, longitude)) = event.geo() {
            self.store
                .geo_add(&IndexKey::EventsGeo(tenant), latitude, longitude, &member)
                .await?;
        }
        Ok(())
    }

    async fn unindex(&self, tenant: Tenant, event: &Event) -> ApiResult<()> {
        let member = event.reference().to_member();

        if let Some((_, _)) = event.geo() {
            self.store.geo_remove(&IndexKey::EventsGeo(tenant), &member).await?;
        }
        if let Some(location) = &event.location {
            self.store
                .set_remove(&IndexKey::EventsByLocation(tenant, location.clone()), &member)
                .await?;
        }
        if let Some(object) = &event.object {
            self.store
                .set_remove(&IndexKey::EventsByObject(tenant, object.id.clone()), &member)
                .await?;
        }
        self.store
            .ordered_set_remove(&IndexKey::UserEvents(tenant, event.user_id.clone()), &member)
            .await?;
        Ok(())
    }

    /// Insert the event into every current follower's feed
    async fn fan_out(&self, tenant: Tenant, event: &Event) -> ApiResult<usize> {
        if !event.visibility.fans_out() {
            return Ok(0);
        }

        let followers = self
            .graph
            .followers(tenant, &event.user_id, self.fanout.cap())
            .await?;
        let member = event.reference().to_member();
        let score = event.score();

        let mut written = 0;
        for follower in &followers {
            if let Err(e) = self
                .store
                .ordered_set_add(&IndexKey::Feed(tenant, follower.clone()), score, &member)
                .await
            {
                warn!(
                    %tenant,
                    event_id = event.id,
                    follower = %follower,
                    written,
                    "fan_out: feed write failed: {}", e
                );
                metrics::record_fanout(written);
                metrics::record_error("storage", "fan_out");
                return Err(e.into());
            }
            written += 1;
        }

        metrics::record_fanout(written);
        debug!(%tenant, event_id = event.id, written, "fan_out: event fanned out");
        Ok(written)
    }

    /// Remove the event from every follower's feed. Linear in followers.
    async fn unfan(&self, tenant: Tenant, event: &Event) -> ApiResult<usize> {
        let followers = self.graph.followers(tenant, &event.user_id, None).await?;
        let member = event.reference().to_member();

        for follower in &followers {
            if let Err(e) = self
                .store
                .ordered_set_remove(&IndexKey::Feed(tenant, follower.clone()), &member)
                .await
            {
                warn!(%tenant, event_id = event.id, follower = %follower, "unfan: feed removal failed: {}", e);
                metrics::record_error("storage", "unfan");
                return Err(e.into());
            }
        }

        metrics::record_unfanout(followers.len());
        Ok(followers.len())
    }

    /// Resolve index members to stored events, each loaded once.
    /// Dangling members are skipped.
    pub(crate) async fn load(&self, tenant: Tenant, members: &[String]) -> ApiResult<Vec<Event>> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for member in members {
            let Some(reference) = EventRef::parse_member(member) else {
                warn!(%tenant, member = %member, "load_events: malformed index member");
                continue;
            };
            if !seen.insert(reference.clone()) {
                continue;
            }
            let key = EntityKey::event(tenant, reference.author, reference.id);
            if let Some(event) = store::get_json::<Event>(self.store.as_ref(), &key).await? {
                events.push(event);
            }
        }
        Ok(events)
    }
}
