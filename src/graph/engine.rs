/// Connection state machine
///
/// An edge moves PENDING -> ENABLED on confirm, ENABLED -> DISABLED on
/// update, and back to PENDING when created again. Disabled rows are kept so
/// a repeated create re-enables instead of inserting a duplicate.
///
/// Friend edges are two directed rows written in lockstep. When the mirror
/// write is lost the friend list repairs it on the next read.
///
/// Confirm runs: write edge, followee index, follower index, back-fill.
/// Delete runs: follower index, followee index, feed removal, drop edge.
use super::GraphIndex;
use crate::{
    error::{ApiError, ApiResult, ErrorCode},
    events::EventEngine,
    metrics,
    models::{ApplicationUser, Connection, ConnectionType, Tenant},
    store::{self, EntityKey, Store},
    users::UserDirectory,
};
use mockable::Clock;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConnectionEngine {
    store: Arc<dyn Store>,
    index: Arc<GraphIndex>,
    users: Arc<UserDirectory>,
    events: Arc<EventEngine>,
    clock: Arc<dyn Clock>,
}

impl ConnectionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        index: Arc<GraphIndex>,
        users: Arc<UserDirectory>,
        events: Arc<EventEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            index,
            users,
            events,
            clock,
        }
    }

    async fn edge(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
    ) -> ApiResult<Option<Connection>> {
        let key = EntityKey::connection(tenant, from, to, connection_type);
        Ok(store::get_json(self.store.as_ref(), &key).await?)
    }

    async fn put_edge(&self, tenant: Tenant, edge: &Connection) -> ApiResult<()> {
        let key = EntityKey::connection(
            tenant,
            &edge.user_from_id,
            &edge.user_to_id,
            edge.connection_type,
        );
        Ok(store::put_json(self.store.as_ref(), &key, edge).await?)
    }

    /// Another enabled edge type still joins `from -> to`
    async fn still_connected(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        except: ConnectionType,
    ) -> ApiResult<bool> {
        for connection_type in ConnectionType::ALL {
            if connection_type == except {
                continue;
            }
            if let Some(edge) = self.edge(tenant, from, to, connection_type).await? {
                if edge.enabled {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Fetch one edge
    pub async fn get(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
    ) -> ApiResult<Connection> {
        self.edge(tenant, from, to, connection_type)
            .await?
            .ok_or(ApiError::Code(ErrorCode::ConnectionNotFound))
    }

    /// Edge types present between `from` and `to`
    pub async fn types_between(&self, tenant: Tenant, from: &str, to: &str) -> ApiResult<Vec<ConnectionType>> {
        let mut types = Vec::new();
        for connection_type in ConnectionType::ALL {
            if self.edge(tenant, from, to, connection_type).await?.is_some() {
                types.push(connection_type);
            }
        }
        Ok(types)
    }

    /// Persist a pending edge and, unless `enabled == Some(false)`, confirm it
    pub async fn create(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
        enabled: Option<bool>,
    ) -> ApiResult<Connection> {
        let existing = self.check_creatable(tenant, from, to, connection_type).await?;

        let now = self.clock.utc();
        let edge = match existing {
            Some(mut existing) => {
                existing.confirmed_at = None;
                existing.updated_at = now;
                existing
            }
            None => Connection::new(from, to, connection_type, now),
        };
        self.put_edge(tenant, &edge).await?;

        if connection_type == ConnectionType::Friend {
            let mirror = self.edge(tenant, to, from, ConnectionType::Friend).await?;
            if !mirror.as_ref().map(|mirror| mirror.enabled).unwrap_or(false) {
                self.put_edge(tenant, &edge.mirror()).await?;
            }
        }

        metrics::record_connection_operation("create", connection_type.as_str());
        debug!(%tenant, from, to, connection_type = connection_type.as_str(), "create_connection: edge pending");

        if enabled.unwrap_or(true) {
            return self.confirm(tenant, from, to, connection_type).await;
        }
        Ok(edge)
    }

    /// Reject a create that cannot succeed, before anything is written.
    /// Returns the pending or disabled edge a create would reuse.
    async fn check_creatable(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
    ) -> ApiResult<Option<Connection>> {
        if from == to {
            return Err(ErrorCode::SelfConnection.into());
        }
        self.users.require_active(tenant, from).await?;
        self.users.require_active(tenant, to).await?;

        match self.edge(tenant, from, to, connection_type).await? {
            Some(existing) if existing.enabled => Err(ErrorCode::ConnectionExists.into()),
            existing => Ok(existing),
        }
    }

    /// Enable a pending or disabled edge. Friend edges confirm their mirror.
    pub async fn confirm(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
    ) -> ApiResult<Connection> {
        let mut edge = self.get(tenant, from, to, connection_type).await?;
        self.enable(tenant, &mut edge).await?;

        if connection_type == ConnectionType::Friend {
            let mut mirror = self
                .edge(tenant, to, from, ConnectionType::Friend)
                .await?
                .unwrap_or_else(|| edge.mirror());
            self.enable(tenant, &mut mirror).await?;
        }

        metrics::record_connection_operation("confirm", connection_type.as_str());
        info!(%tenant, from, to, connection_type = connection_type.as_str(), "confirm_connection: edge enabled");
        Ok(edge)
    }

    async fn enable(&self, tenant: Tenant, edge: &mut Connection) -> ApiResult<()> {
        let now = self.clock.utc();
        edge.enabled = true;
        edge.confirmed_at = Some(now);
        edge.updated_at = now;

        self.put_edge(tenant, edge).await?;
        self.index.link(tenant, edge).await?;
        self.events
            .backfill(tenant, &edge.user_from_id, &edge.user_to_id)
            .await?;
        Ok(())
    }

    async fn disable(&self, tenant: Tenant, edge: &mut Connection) -> ApiResult<()> {
        let from = edge.user_from_id.clone();
        let to = edge.user_to_id.clone();
        let still_connected = self
            .still_connected(tenant, &from, &to, edge.connection_type)
            .await?;

        self.index.unlink(tenant, edge, still_connected).await?;
        if !still_connected {
            self.events.remove_author_from_feed(tenant, &from, &to).await?;
        }

        edge.enabled = false;
        edge.updated_at = self.clock.utc();
        self.put_edge(tenant, edge).await
    }

    /// Change `enabled` or `type` of an existing edge
    pub async fn update(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
        patch: crate::graph::ConnectionPatch,
    ) -> ApiResult<Connection> {
        let mut existing = self.get(tenant, from, to, connection_type).await?;

        let moved = patch.user_from_id.as_deref().map(|id| id != from).unwrap_or(false)
            || patch.user_to_id.as_deref().map(|id| id != to).unwrap_or(false);
        if moved {
            return Err(ErrorCode::ImmutableConnectionField.into());
        }

        let enabled = patch.enabled.unwrap_or(existing.enabled);
        let new_type = patch.connection_type.unwrap_or(connection_type);

        if new_type != connection_type {
            // New edge first so a rejected change leaves the old one in place
            let replacement = self.create(tenant, from, to, new_type, Some(enabled)).await?;
            self.delete(tenant, from, to, connection_type).await?;
            return Ok(replacement);
        }

        match (existing.enabled, enabled) {
            (true, false) => {
                self.disable(tenant, &mut existing).await?;
                if connection_type == ConnectionType::Friend {
                    if let Some(mut mirror) = self.edge(tenant, to, from, connection_type).await? {
                        if mirror.enabled {
                            self.disable(tenant, &mut mirror).await?;
                        }
                    }
                }
                metrics::record_connection_operation("disable", connection_type.as_str());
                info!(%tenant, from, to, "update_connection: edge disabled");
                Ok(existing)
            }
            (false, true) => self.confirm(tenant, from, to, connection_type).await,
            _ => Ok(existing),
        }
    }

    /// Remove the edge, its index entries and the author's events from
    /// the follower's feed. Friend edges take their mirror along.
    pub async fn delete(
        &self,
        tenant: Tenant,
        from: &str,
        to: &str,
        connection_type: ConnectionType,
    ) -> ApiResult<()> {
        let edge = self.get(tenant, from, to, connection_type).await?;
        self.remove(tenant, &edge).await?;

        if connection_type == ConnectionType::Friend {
            if let Some(mirror) = self.edge(tenant, to, from, connection_type).await? {
                self.remove(tenant, &mirror).await?;
            }
        }

        metrics::record_connection_operation("delete", connection_type.as_str());
        info!(%tenant, from, to, connection_type = connection_type.as_str(), "delete_connection: edge deleted");
        Ok(())
    }

    async fn remove(&self, tenant: Tenant, edge: &Connection) -> ApiResult<()> {
        let from = &edge.user_from_id;
        let to = &edge.user_to_id;
        let still_connected = self
            .still_connected(tenant, from, to, edge.connection_type)
            .await?;

        self.index.unlink(tenant, edge, still_connected).await?;
        if !still_connected {
            self.events.remove_author_from_feed(tenant, from, to).await?;
        }
        self.store
            .delete_entity(&EntityKey::connection(tenant, from, to, edge.connection_type))
            .await?;
        Ok(())
    }

    /// Users `user_id` follows
    pub async fn followees(&self, tenant: Tenant, user_id: &str) -> ApiResult<Vec<ApplicationUser>> {
        let ids = self.index.followees(tenant, user_id).await?;
        self.users
            .load_active(tenant, &ids)
            .await
    }

    /// Users following `user_id`
    pub async fn followers(&self, tenant: Tenant, user_id: &str) -> ApiResult<Vec<ApplicationUser>> {
        let ids = self.index.followers(tenant, user_id, None).await?;
        self.users
            .load_active(tenant, &ids)
            .await
    }

    /// Friends of `user_id`. Entries without a live edge are dropped and
    /// missing mirrors are rewritten.
    pub async fn friends(&self, tenant: Tenant, user_id: &str) -> ApiResult<Vec<ApplicationUser>> {
        let ids = self.index.friends(tenant, user_id).await?;

        let mut confirmed = Vec::with_capacity(ids.len());
        for friend_id in ids {
            let edge = match self.edge(tenant, user_id, &friend_id, ConnectionType::Friend).await? {
                Some(edge) if edge.enabled => edge,
                _ => {
                    warn!(%tenant, user = user_id, friend = %friend_id, "list_friends: dropping stale index entry");
                    self.index.forget_friend(tenant, user_id, &friend_id).await?;
                    continue;
                }
            };

            let mirror = self
                .edge(tenant, &friend_id, user_id, ConnectionType::Friend)
                .await?;
            if !mirror.map(|mirror| mirror.enabled).unwrap_or(false) {
                warn!(%tenant, user = user_id, friend = %friend_id, "list_friends: repairing friend mirror");
                let mirror = edge.mirror();
                self.put_edge(tenant, &mirror).await?;
                self.index.link(tenant, &mirror).await?;
                self.events.backfill(tenant, &friend_id, user_id).await?;
            }

            confirmed.push(friend_id);
        }

        self.users
            .load_active(tenant, &confirmed)
            .await
    }

    /// Connect `user_id` to every local user registered under one of
    /// `external_ids` on `platform`. Failures for single ids are logged and
    /// skipped; the users actually connected are returned.
    pub async fn social_connect(
        &self,
        tenant: Tenant,
        user_id: &str,
        platform: &str,
        external_ids: &[String],
        connection_type: ConnectionType,
    ) -> ApiResult<Vec<ApplicationUser>> {
        if platform.trim().is_empty() {
            return Err(ErrorCode::SocialPlatformMissing.into());
        }

        let mut connected = Vec::new();
        for external_id in external_ids {
            let other = match self.users.by_social_id(tenant, platform, external_id).await {
                Ok(Some(other)) if other != user_id => other,
                Ok(_) => continue,
                Err(e) => {
                    warn!(%tenant, user = user_id, platform, external_id = %external_id, "social_connect: lookup failed: {}", e);
                    continue;
                }
            };

            let already = matches!(
                self.edge(tenant, user_id, &other, connection_type).await,
                Ok(Some(edge)) if edge.enabled
            );
            if !already {
                if let Err(e) = self
                    .create(tenant, user_id, &other, connection_type, Some(true))
                    .await
                {
                    warn!(%tenant, user = user_id, other = %other, "social_connect: connect failed: {}", e);
                    continue;
                }
            }

            match self.users.get(tenant, &other).await {
                Ok(Some(user)) if user.enabled => connected.push(user),
                Ok(_) => {}
                Err(e) => warn!(%tenant, other = %other, "social_connect: user reload failed: {}", e),
            }
        }

        info!(%tenant, user = user_id, platform, connected = connected.len(), "social_connect: finished");
        Ok(connected)
    }
}
