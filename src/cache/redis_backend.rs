//! Redis cache backend.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::fmt;
use std::time::Duration;

use super::traits::CacheStore;

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

/// Redis-backed [`CacheStore`] shared by every process pointed at the same
/// server.
#[derive(Clone)]
pub struct RedisCache {
  conn: ConnectionManager,
  compare_and_delete: Script,
}

impl fmt::Debug for RedisCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RedisCache")
      .field("conn", &"<ConnectionManager>")
      .finish()
  }
}

impl RedisCache {
  pub async fn connect(redis_url: &str) -> Result<Self> {
    let client = redis::Client::open(redis_url)
      .map_err(|e| eyre!("Invalid redis url {}: {}", redis_url, e))?;
    let conn = ConnectionManager::new(client)
      .await
      .map_err(|e| eyre!("Failed to connect to redis at {}: {}", redis_url, e))?;

    Ok(Self {
      conn,
      compare_and_delete: Script::new(COMPARE_AND_DELETE),
    })
  }
}

/// Redis rejects `EX 0`; round sub-second TTLs up.
fn ttl_secs(ttl: Duration) -> u64 {
  ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    let mut conn = self.conn.clone();
    let value: Option<String> = conn
      .get(key)
      .await
      .map_err(|e| eyre!("redis GET {} failed: {}", key, e))?;
    Ok(value)
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
    let mut conn = self.conn.clone();
    let _: () = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .arg("EX")
      .arg(ttl_secs(ttl))
      .query_async(&mut conn)
      .await
      .map_err(|e| eyre!("redis SET {} failed: {}", key, e))?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    let mut conn = self.conn.clone();
    let _: i64 = conn
      .del(key)
      .await
      .map_err(|e| eyre!("redis DEL {} failed: {}", key, e))?;
    Ok(())
  }

  async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
    let mut conn = self.conn.clone();
    // Nil reply when the key already exists
    let reply: Option<String> = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .arg("NX")
      .arg("EX")
      .arg(ttl_secs(ttl))
      .query_async(&mut conn)
      .await
      .map_err(|e| eyre!("redis SET NX {} failed: {}", key, e))?;
    Ok(reply.is_some())
  }

  async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
    let mut conn = self.conn.clone();
    let deleted: i64 = self
      .compare_and_delete
      .key(key)
      .arg(expected)
      .invoke_async(&mut conn)
      .await
      .map_err(|e| eyre!("redis compare-and-delete {} failed: {}", key, e))?;
    Ok(deleted > 0)
  }
}
