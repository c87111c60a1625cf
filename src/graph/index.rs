/// Follower, followee and friend indexes
///
/// The sets are derived views of the edge rows. `followees(u)` and
/// `followers(u)` hold users joined by an enabled edge of any type;
/// `friends(u)` holds only enabled friend edges.
use crate::{
    models::{Connection, ConnectionType, Relation, Tenant},
    store::{IndexKey, Store, StoreResult},
};
use std::sync::Arc;

pub struct GraphIndex {
    store: Arc<dyn Store>,
}

impl GraphIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Add an enabled edge: followee side first, follower side second
    pub async fn link(&self, tenant: Tenant, edge: &Connection) -> StoreResult<()> {
        let from = &edge.user_from_id;
        let to = &edge.user_to_id;

        self.store
            .set_add(&IndexKey::Followees(tenant, from.clone()), to)
            .await?;
        self.store
            .set_add(&IndexKey::Followers(tenant, to.clone()), from)
            .await?;
        if edge.connection_type == ConnectionType::Friend {
            self.store
                .set_add(&IndexKey::Friends(tenant, from.clone()), to)
                .await?;
        }
        Ok(())
    }

    /// Drop an edge from the indexes: follower side first, followee side
    /// second. The pair stays in both when another enabled edge still
    /// joins it.
    pub async fn unlink(&self, tenant: Tenant, edge: &Connection, still_connected: bool) -> StoreResult<()> {
        let from = &edge.user_from_id;
        let to = &edge.user_to_id;

        if edge.connection_type == ConnectionType::Friend {
            self.store
                .set_remove(&IndexKey::Friends(tenant, from.clone()), to)
                .await?;
        }
        if !still_connected {
            self.store
                .set_remove(&IndexKey::Followers(tenant, to.clone()), from)
                .await?;
            self.store
                .set_remove(&IndexKey::Followees(tenant, from.clone()), to)
                .await?;
        }
        Ok(())
    }

    /// Drop a stale friend entry without touching follow indexes
    pub async fn forget_friend(&self, tenant: Tenant, user_id: &str, friend_id: &str) -> StoreResult<()> {
        self.store
            .set_remove(&IndexKey::Friends(tenant, user_id.to_string()), friend_id)
            .await
    }

    pub async fn followers(&self, tenant: Tenant, user_id: &str, limit: Option<usize>) -> StoreResult<Vec<String>> {
        self.store
            .set_scan(&IndexKey::Followers(tenant, user_id.to_string()), limit)
            .await
    }

    pub async fn followees(&self, tenant: Tenant, user_id: &str) -> StoreResult<Vec<String>> {
        self.store
            .set_scan(&IndexKey::Followees(tenant, user_id.to_string()), None)
            .await
    }

    pub async fn friends(&self, tenant: Tenant, user_id: &str) -> StoreResult<Vec<String>> {
        self.store
            .set_scan(&IndexKey::Friends(tenant, user_id.to_string()), None)
            .await
    }

    /// `followee` is in the followee set of `follower`
    pub async fn follows(&self, tenant: Tenant, follower: &str, followee: &str) -> StoreResult<bool> {
        self.store
            .set_contains(&IndexKey::Followees(tenant, follower.to_string()), followee)
            .await
    }

    /// (friends, followers, followees)
    pub async fn counts(&self, tenant: Tenant, user_id: &str) -> StoreResult<(u64, u64, u64)> {
        let user = user_id.to_string();
        let friends = self.store.set_count(&IndexKey::Friends(tenant, user.clone())).await?;
        let followers = self.store.set_count(&IndexKey::Followers(tenant, user.clone())).await?;
        let followees = self.store.set_count(&IndexKey::Followees(tenant, user)).await?;
        Ok((friends, followers, followees))
    }

    /// How `viewer` relates to `other`
    pub async fn relation(&self, tenant: Tenant, viewer: &str, other: &str) -> StoreResult<Relation> {
        let viewer = viewer.to_string();
        Ok(Relation {
            is_friend: self
                .store
                .set_contains(&IndexKey::Friends(tenant, viewer.clone()), other)
                .await?,
            is_follower: self
                .store
                .set_contains(&IndexKey::Followers(tenant, viewer.clone()), other)
                .await?,
            is_followed: self
                .store
                .set_contains(&IndexKey::Followees(tenant, viewer), other)
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn enabled(from: &str, to: &str, connection_type: ConnectionType) -> Connection {
        let mut edge = Connection::new(from, to, connection_type, Utc::now());
        edge.enabled = true;
        edge
    }

    #[tokio::test]
    async fn test_link_and_unlink() {
        let graph = GraphIndex::new(Arc::new(MemoryStore::new()));
        let tenant = Tenant::new(1, 1);
        let edge = enabled("a", "b", ConnectionType::Friend);

        graph.link(tenant, &edge).await.unwrap();
        graph.link(tenant, &edge).await.unwrap();
        assert_eq!(graph.followers(tenant, "b", None).await.unwrap(), vec!["a"]);
        assert_eq!(graph.followees(tenant, "a").await.unwrap(), vec!["b"]);
        assert_eq!(graph.friends(tenant, "a").await.unwrap(), vec!["b"]);
        assert_eq!(graph.counts(tenant, "a").await.unwrap(), (1, 0, 1));

        let relation = graph.relation(tenant, "a", "b").await.unwrap();
        assert!(relation.is_friend && relation.is_followed && !relation.is_follower);

        graph.unlink(tenant, &edge, true).await.unwrap();
        assert!(graph.friends(tenant, "a").await.unwrap().is_empty());
        assert!(graph.follows(tenant, "a", "b").await.unwrap());

        graph.unlink(tenant, &edge, false).await.unwrap();
        assert!(!graph.follows(tenant, "a", "b").await.unwrap());
        assert!(graph.followers(tenant, "b", None).await.unwrap().is_empty());
    }
}
