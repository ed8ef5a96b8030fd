pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod participants;
pub mod redis;
pub mod schema;
pub mod store;
pub mod types;

pub use config::Config;
pub use context::HarvestContext;
pub use db::DbPool;
pub use error::{HarvestError, HarvestResult};
pub use events::{EventSink, NotifyEvent};
pub use redis::RedisPool;
pub use store::{MemoryStore, PgStore, Store};
pub use types::{Actor, Donation, DonationStatus, Role};
