//! In-memory store backend.
//!
//! DashMap-backed, with a broadcast bus standing in for pub/sub. Used by
//! tests and single-process runs without a Redis server.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{broadcast, mpsc};

use super::{glob_match, Store, StoreMessage, Subscription};
use crate::error::Result;

/// In-memory implementation of [`Store`].
pub struct MemoryStore {
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, DashSet<String>>,
    lists: DashMap<String, VecDeque<String>>,
    bus: broadcast::Sender<StoreMessage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            hashes: DashMap::new(),
            sets: DashMap::new(),
            lists: DashMap::new(),
            bus,
        }
    }

    fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.hashes.iter().map(|e| e.key().clone()).collect();
        keys.extend(self.sets.iter().map(|e| e.key().clone()));
        keys.extend(self.lists.iter().map(|e| e.key().clone()));
        keys
    }

    fn resolve_index(len: usize, index: isize) -> Option<usize> {
        if index >= 0 {
            let i = index as usize;
            (i < len).then_some(i)
        } else {
            len.checked_sub(index.unsigned_abs())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|e| e.clone()).unwrap_or_default())
    }

    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.hashes.remove(key);
            self.sets.remove(key);
            self.lists.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.hashes.contains_key(key)
            || self.sets.contains_key(key)
            || self.lists.contains_key(key))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(set) = self.sets.get(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().map(|m| m.clone()).collect())
            .unwrap_or_default())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn rpush_bounded(&self, key: &str, value: &str, cap: usize) -> Result<()> {
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        while list.len() > cap {
            list.pop_front();
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let Some(list) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        let start = if start < 0 {
            len.saturating_sub(start.unsigned_abs())
        } else {
            (start as usize).min(len)
        };
        let stop = if stop < 0 {
            match len.checked_sub(stop.unsigned_abs()) {
                Some(i) => i,
                None => return Ok(Vec::new()),
            }
        } else {
            (stop as usize).min(len - 1)
        };
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list.iter().skip(start).take(stop - start + 1).cloned().collect())
    }

    async fn lindex(&self, key: &str, index: isize) -> Result<Option<String>> {
        Ok(self.lists.get(key).and_then(|list| {
            Self::resolve_index(list.len(), index).and_then(|i| list.get(i).cloned())
        }))
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .all_keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No subscribers is not an error, same as PUBLISH to nobody
        let _ = self.bus.send(StoreMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut bus_rx = self.bus.subscribe();
        let channels: Vec<String> = channels.to_vec();
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(msg) => {
                        if channels.iter().any(|c| c == &msg.channel)
                            && tx.send(msg).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx, task))
    }
}
