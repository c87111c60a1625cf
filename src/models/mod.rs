/// Domain entities shared by the engines and the storage drivers
///
/// Every persisted entity is serialized as JSON through the storage layer, so
/// the serde layout of these types is also the on-disk layout.

mod account;
mod connection;
mod event;
mod tenant;
mod user;

pub use account::{Account, AccountUser, Application};
pub use connection::{Connection, ConnectionState, ConnectionType};
pub use event::{Event, EventObject, EventRef, Visibility};
pub use tenant::{Tenant, TenantContext};
pub use user::{ApplicationUser, Relation, SanitizedUser, Session};
