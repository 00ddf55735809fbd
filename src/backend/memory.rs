//! In-process key-value backend.
//!
//! Expiry is evaluated against the injected clock on every access: a key past
//! its deadline is removed and treated as absent, whatever the caller.

use crate::backend::KvBackend;
use crate::clock::SharedClock;
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Value {
    List(VecDeque<String>),
    Text(String),
    /// (score, member), kept sorted by score.
    Sorted(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }
}

/// A `HashMap`-backed [`KvBackend`].
#[derive(Debug)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryKv {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, BackendError> {
        self.entries
            .lock()
            .map_err(|_| BackendError::Unavailable("memory backend lock poisoned".to_string()))
    }

    /// Lock the map and drop `key` if it has expired.
    fn live(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, Entry>>, BackendError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(entries)
    }
}

fn wrong_type(key: &str) -> BackendError {
    BackendError::WrongType {
        key: key.to_string(),
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn list_push_front(&self, key: &str, value: String) -> Result<usize, BackendError> {
        let mut entries = self.live(key)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value);
                Ok(list.len())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<(), BackendError> {
        let mut entries = self.live(key)?;
        let remove = match entries.get_mut(key) {
            None => return Ok(()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                if start > stop || start >= list.len() {
                    list.clear();
                } else {
                    list.truncate(stop + 1);
                    list.drain(..start);
                }
                list.is_empty()
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if remove {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, BackendError> {
        let entries = self.live(key)?;
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                if start > stop {
                    return Ok(Vec::new());
                }
                Ok(list
                    .iter()
                    .skip(start)
                    .take(stop - start + 1)
                    .cloned()
                    .collect())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, BackendError> {
        let entries = self.live(key)?;
        match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn list_drop_tail_while(
        &self,
        key: &str,
        pred: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> Result<usize, BackendError> {
        let mut entries = self.live(key)?;
        let (dropped, remove) = match entries.get_mut(key) {
            None => return Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let mut dropped = 0;
                while list.back().is_some_and(|tail| pred(tail.as_str())) {
                    list.pop_back();
                    dropped += 1;
                }
                (dropped, list.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if remove {
            entries.remove(key);
        }
        Ok(dropped)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        let now = self.clock.now();
        let mut entries = self.live(key)?;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let entries = self.live(key)?;
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut entries = self.live(key)?;
        Ok(entries.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        entries.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn sorted_add(&self, key: &str, score: i64, member: String) -> Result<(), BackendError> {
        let mut entries = self.live(key)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Sorted(set) => {
                set.retain(|(_, m)| m != &member);
                let at = set.partition_point(|(s, _)| *s <= score);
                set.insert(at, (score, member));
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn sorted_remove_below(&self, key: &str, min_score: i64) -> Result<usize, BackendError> {
        let mut entries = self.live(key)?;
        match entries.get_mut(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => {
                let cut = set.partition_point(|(s, _)| *s < min_score);
                set.drain(..cut);
                Ok(cut)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn sorted_len(&self, key: &str) -> Result<usize, BackendError> {
        let entries = self.live(key)?;
        match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(set.len()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
