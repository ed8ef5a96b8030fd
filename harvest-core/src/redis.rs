use anyhow::{anyhow, Result};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use uuid::Uuid;

pub type RedisPool = Arc<Client>;
pub type RedisConnection = MultiplexedConnection;

pub async fn create_pool(url: &str) -> Result<RedisPool> {
    tracing::info!("Setting up Redis connection");
    tracing::info!("Redis URL: {}", mask_redis_url(url));

    let client = Client::open(url)
        .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to connect to Redis: {}", e))?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| anyhow!("Failed to ping Redis: {}", e))?;

    tracing::info!("Redis connection established");

    Ok(Arc::new(client))
}

pub async fn get_connection(pool: &RedisPool) -> Result<RedisConnection> {
    pool.get_multiplexed_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to get Redis connection: {}", e))
}

pub fn unread_key(user_id: Uuid) -> String {
    format!("UNREAD:{}", user_id)
}

// Counters are only adjusted when present. A missing key is re-seeded from
// the store on the next read, so INCR/DECR must not create it.
const INCR_IF_PRESENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCR', KEYS[1])
end
return false
";

const DECR_IF_POSITIVE: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return false
end
if tonumber(current) <= 0 then
    return 0
end
return redis.call('DECR', KEYS[1])
";

/// Returns `None` when the counter does not exist yet.
pub async fn incr_unread(pool: &RedisPool, user_id: Uuid) -> Result<Option<i64>> {
    let mut conn = get_connection(pool).await?;
    let script = redis::Script::new(INCR_IF_PRESENT);
    let count: Option<i64> = script.key(unread_key(user_id)).invoke_async(&mut conn).await?;
    Ok(count)
}

/// Decrements without going below zero. Returns `None` when the counter
/// does not exist yet.
pub async fn decr_unread(pool: &RedisPool, user_id: Uuid) -> Result<Option<i64>> {
    let mut conn = get_connection(pool).await?;
    let script = redis::Script::new(DECR_IF_POSITIVE);
    let count: Option<i64> = script.key(unread_key(user_id)).invoke_async(&mut conn).await?;
    Ok(count)
}

pub async fn reset_unread(pool: &RedisPool, user_id: Uuid) -> Result<()> {
    let mut conn = get_connection(pool).await?;
    let _: () = conn.set(unread_key(user_id), 0).await?;
    Ok(())
}

pub async fn get_unread(pool: &RedisPool, user_id: Uuid) -> Result<Option<i64>> {
    let mut conn = get_connection(pool).await?;
    let count: Option<i64> = conn.get(unread_key(user_id)).await?;
    Ok(count)
}

pub async fn set_unread(pool: &RedisPool, user_id: Uuid, count: i64) -> Result<()> {
    let mut conn = get_connection(pool).await?;
    let _: () = conn.set(unread_key(user_id), count).await?;
    Ok(())
}

fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        let (_credentials, after_at) = url.split_at(at_pos);
        format!("redis://****{}", after_at)
    } else {
        url.to_string()
    }
}
