/// Murmur - social graph, activity feed and event backend
///
/// Multi-tenant service: accounts own applications, applications own
/// users, and users connect, publish events and read their feeds.

pub mod account;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod feed;
pub mod graph;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod store;
pub mod test_support;
pub mod users;
pub mod validation;
