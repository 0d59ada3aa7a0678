//! In-process [`Store`] implementation.
//!
//! Clones share the same underlying map, so several window caches built from
//! clones of one `InMemoryStore` behave like processes sharing one server.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{Store, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Int(i64),
    List(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.entries.lock().await.get(key) {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(Value::List(_)) => Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Value::Int(value));
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().await;
        let slot = entries.entry(key.to_string()).or_insert(Value::Int(0));
        match slot {
            Value::Int(v) => {
                *v += delta;
                Ok(*v)
            }
            Value::List(_) => Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    async fn set_list(&self, key: &str, items: Vec<String>) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Value::List(items));
        Ok(())
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().await;
        let list = match entries.get(key) {
            None => return Ok(Vec::new()),
            Some(Value::List(list)) => list,
            Some(Value::Int(_)) => {
                return Err(StoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: "a list",
                })
            }
        };

        let len = list.len() as i64;
        let start = start.clamp(0, len) as usize;
        let end = end.clamp(0, len) as usize;
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(list[start..end].to_vec())
    }
}
