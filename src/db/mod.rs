//! Storage layer: bounded SQLite pool, tenant-scoped access, and one
//! submodule per entity family (spec §3).

pub mod audit;
pub mod conversations;
pub mod credentials;
pub mod dead_letters;
pub mod delivery_logs;
pub mod models;
pub mod outbound;
pub mod pool;
pub mod tenant;
pub mod tenants;
pub mod webhook_events;
pub mod window;

pub use pool::Db;
pub use tenant::{TenantResolver, TenantScope};
