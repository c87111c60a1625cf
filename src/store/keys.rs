/// Typed keys for the storage abstraction
///
/// Engines never build key strings by hand. The key-value driver renders the
/// types below into colon-delimited strings; the relational driver maps
/// entity keys onto table columns and uses the rendered form of index keys as
/// the set identifier.
use crate::models::{ConnectionType, Tenant};

/// Scope of a monotonic id sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdScope {
    Account,
    AccountUser(i64),
    Application(i64),
    AppUser(Tenant),
    AppEvent(Tenant),
}

impl IdScope {
    pub fn render(&self) -> String {
        match self {
            IdScope::Account => "ids:acs".to_string(),
            IdScope::AccountUser(account_id) => format!("ids:ac:{}:u", account_id),
            IdScope::Application(account_id) => format!("ids:ac:{}:a", account_id),
            IdScope::AppUser(t) => format!("ids:ac:{}:a:{}:u", t.account_id, t.application_id),
            IdScope::AppEvent(t) => format!("ids:ac:{}:a:{}:e", t.account_id, t.application_id),
        }
    }
}

/// Primary key of a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Account(i64),
    AccountUser {
        account_id: i64,
        user_id: i64,
    },
    Application(Tenant),
    User(Tenant, String),
    Connection {
        tenant: Tenant,
        from: String,
        to: String,
        connection_type: ConnectionType,
    },
    Event {
        tenant: Tenant,
        author: String,
        event_id: i64,
    },
    AccountUserSession {
        account_id: i64,
        user_id: i64,
    },
    UserSession(Tenant, String),
}

impl EntityKey {
    pub fn connection(
        tenant: Tenant,
        from: impl Into<String>,
        to: impl Into<String>,
        connection_type: ConnectionType,
    ) -> Self {
        EntityKey::Connection {
            tenant,
            from: from.into(),
            to: to.into(),
            connection_type,
        }
    }

    pub fn event(tenant: Tenant, author: impl Into<String>, event_id: i64) -> Self {
        EntityKey::Event {
            tenant,
            author: author.into(),
            event_id,
        }
    }

    pub fn render(&self) -> String {
        match self {
            EntityKey::Account(id) => format!("acc:{}", id),
            EntityKey::AccountUser {
                account_id,
                user_id,
            } => format!("acc:{}:user:{}", account_id, user_id),
            EntityKey::Application(t) => app_prefix(t),
            EntityKey::User(t, id) => format!("{}:user:{}", app_prefix(t), id),
            EntityKey::Connection {
                tenant,
                from,
                to,
                connection_type,
            } => format!(
                "{}:user:{}:connection:{}:{}",
                app_prefix(tenant),
                from,
                to,
                connection_type.as_str()
            ),
            EntityKey::Event {
                tenant,
                author,
                event_id,
            } => format!("{}:user:{}:event:{}", app_prefix(tenant), author, event_id),
            EntityKey::AccountUserSession {
                account_id,
                user_id,
            } => format!("acc:{}:user:{}:sess", account_id, user_id),
            EntityKey::UserSession(t, id) => format!("{}:user:{}:sess", app_prefix(t), id),
        }
    }
}

/// Identifier of a set, ordered set or geo structure
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// Application ids of an account
    Applications(i64),
    /// User ids of an application
    Users(Tenant),
    /// Users that `user` follows (any enabled edge from `user`)
    Followees(Tenant, String),
    /// Users following `user` (any enabled edge to `user`)
    Followers(Tenant, String),
    /// Enabled friend edges from `user`
    Friends(Tenant, String),
    /// Author's own events, scored by created_at
    UserEvents(Tenant, String),
    /// Materialized feed of a recipient, scored by created_at
    Feed(Tenant, String),
    EventsGeo(Tenant),
    EventsByObject(Tenant, String),
    EventsByLocation(Tenant, String),
}

impl IndexKey {
    pub fn render(&self) -> String {
        match self {
            IndexKey::Applications(account_id) => format!("acc:{}:apps", account_id),
            IndexKey::Users(t) => format!("{}:users", app_prefix(t)),
            IndexKey::Followees(t, user) => format!("{}:user:{}:followees", app_prefix(t), user),
            IndexKey::Followers(t, user) => format!("{}:user:{}:followers", app_prefix(t), user),
            IndexKey::Friends(t, user) => format!("{}:user:{}:friends", app_prefix(t), user),
            IndexKey::UserEvents(t, user) => format!("{}:user:{}:events", app_prefix(t), user),
            IndexKey::Feed(t, user) => format!("{}:user:{}:feed", app_prefix(t), user),
            IndexKey::EventsGeo(t) => format!("{}:events:geo", app_prefix(t)),
            IndexKey::EventsByObject(t, object) => {
                format!("{}:events:object:{}", app_prefix(t), object)
            }
            IndexKey::EventsByLocation(t, location) => {
                format!("{}:events:location:{}", app_prefix(t), location)
            }
        }
    }
}

/// Namespace of a secondary lookup (hash in the key-value layout)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecondaryNamespace {
    /// Account auth token -> account id
    AccountToken,
    /// Application auth token -> "account_id:application_id"
    ApplicationToken,
    AccountUserEmail(i64),
    AccountUserName(i64),
    /// Account-user session token -> account user id
    AccountUserSession(i64),
    UserEmail(Tenant),
    UserName(Tenant),
    /// Application-user session token -> user id
    UserSession(Tenant),
    /// External platform id -> user id
    Social(Tenant, String),
}

impl SecondaryNamespace {
    pub fn render(&self) -> String {
        match self {
            SecondaryNamespace::AccountToken => "tokens:acc".to_string(),
            SecondaryNamespace::ApplicationToken => "tokens:app".to_string(),
            SecondaryNamespace::AccountUserEmail(a) => format!("acc:{}:byemail", a),
            SecondaryNamespace::AccountUserName(a) => format!("acc:{}:byuname", a),
            SecondaryNamespace::AccountUserSession(a) => format!("acc:{}:sessions", a),
            SecondaryNamespace::UserEmail(t) => format!("{}:byemail", app_prefix(t)),
            SecondaryNamespace::UserName(t) => format!("{}:byuname", app_prefix(t)),
            SecondaryNamespace::UserSession(t) => format!("{}:sessions", app_prefix(t)),
            SecondaryNamespace::Social(t, platform) => {
                format!("{}:social:{}", app_prefix(t), platform)
            }
        }
    }
}

/// Unread cursor of one application user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub tenant: Tenant,
    pub user_id: String,
}

impl CursorKey {
    pub fn new(tenant: Tenant, user_id: impl Into<String>) -> Self {
        Self {
            tenant,
            user_id: user_id.into(),
        }
    }

    /// All cursors of an application live in one ordered set
    pub fn render_set(&self) -> String {
        format!("{}:cursors", app_prefix(&self.tenant))
    }
}

fn app_prefix(tenant: &Tenant) -> String {
    format!("acc:{}:app:{}", tenant.account_id, tenant.application_id)
}
