//! Redis-backed [`Store`] (feature `redis`).
//!
//! Integers live in plain string keys (GET/SET/INCRBY). The item list is a
//! Redis list rewritten with DEL + RPUSH in one MULTI/EXEC pipeline, so
//! readers never observe a half-written batch.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url, "Connected to redis store");
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn set_list(&self, key: &str, items: Vec<String>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !items.is_empty() {
            pipe.rpush(key, items).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, StoreError> {
        let start = start.max(0);
        if end <= start {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        // LRANGE bounds are inclusive.
        let items: Vec<String> = conn
            .lrange(key, start as isize, (end - 1) as isize)
            .await?;
        Ok(items)
    }
}
