//! Shared keyed store with pub/sub notification.
//!
//! The store is the only coordination medium between sessions, the
//! supervisor and the control API. [`RedisStore`] is the production
//! backend; [`MemoryStore`] backs tests and embedded runs.

pub mod keys;
mod memory_impl;
mod models;
mod redis_impl;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

pub use memory_impl::MemoryStore;
pub use models::{CallRequest, CtrlRequest, Device, Item, Measurement, Term, TermItem};
pub use redis_impl::RedisStore;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone)]
pub struct StoreMessage {
    pub channel: String,
    pub payload: String,
}

/// Handle for an active pub/sub subscription.
///
/// Dropping the handle stops the reader task.
pub struct Subscription {
    rx: mpsc::Receiver<StoreMessage>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<StoreMessage>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Receive the next message; None when the connection is gone.
    pub async fn recv(&mut self) -> Option<StoreMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Keyed store operations used by the gateway.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// All fields of a hash; empty map when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Set all given fields of a hash.
    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> Result<()>;

    /// Delete keys.
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Key existence.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Append to a list.
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;

    /// Append to a list, trimming it to the last `cap` entries.
    async fn rpush_bounded(&self, key: &str, value: &str, cap: usize) -> Result<()>;

    /// List slice; Redis index semantics (negative from the end).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Single list element.
    async fn lindex(&self, key: &str, index: isize) -> Result<Option<String>>;

    /// Keys matching a glob pattern.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>>;

    /// Publish a message.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to the given channels.
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;

    /// Write the forward term-item binding and its reverse protocol mapping
    /// in one step. The two keys index the same record and must never be
    /// observable half-written.
    async fn put_binding(
        &self,
        forward_key: &str,
        mapping_key: &str,
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        self.hset_all(forward_key, fields).await?;
        self.hset_all(mapping_key, fields).await
    }
}

/// Simple glob matcher for `*` wildcards, shared by the memory backend and
/// tests. Matches the subset of patterns the gateway actually uses.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // pattern ends with '*'
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("HS:MAPPING:*", "HS:MAPPING:IEC104:d1:100"));
        assert!(glob_match("LST:DATA:d1:*", "LST:DATA:d1:t1:i1"));
        assert!(glob_match("HS:TERM_ITEM:*:i1", "HS:TERM_ITEM:t9:i1"));
        assert!(glob_match("LST:DATA:*:t1:*", "LST:DATA:d1:t1:i1"));
        assert!(glob_match("HS:MAPPING:*:d1:*", "HS:MAPPING:IEC104:d1:7"));

        assert!(!glob_match("LST:DATA:d1:*", "LST:FRAME:d1"));
        assert!(!glob_match("HS:TERM_ITEM:*:i1", "HS:TERM_ITEM:t9:i2"));
        assert!(!glob_match("SET:DEVICE", "SET:DEVICE_TERM:d1"));
        assert!(glob_match("SET:DEVICE", "SET:DEVICE"));
    }
}
