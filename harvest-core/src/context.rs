use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool as create_db_pool, run_migrations};
use crate::redis::{create_pool as create_redis_pool, RedisPool};
use crate::store::{PgStore, Store};

/// Shared handles every service is built from.
#[derive(Clone)]
pub struct HarvestContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub redis_pool: Option<RedisPool>,
}

impl HarvestContext {
    /// Connects to PostgreSQL (migrating it) and, when configured, Redis.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        run_migrations(&config.database).await?;
        let db_pool = create_db_pool(&config.database).await?;

        let redis_pool = match config.redis.url.as_deref() {
            Some(url) => Some(create_redis_pool(url).await?),
            None => {
                tracing::info!("REDIS_URL not set, unread counts will be read from the database");
                None
            }
        };

        Ok(HarvestContext {
            config: Arc::new(config),
            store: Arc::new(PgStore::new(db_pool)),
            redis_pool,
        })
    }

    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        HarvestContext {
            config: Arc::new(config),
            store,
            redis_pool: None,
        }
    }
}
