//! In-process counter store.
//!
//! Implements the same protocol as [`RedisStore`] against a process-local
//! map, for tests and single-process deployments. Atomicity is trivial here
//! (one mutex around the whole map), but expiry behavior, the script cache,
//! and reply conventions mirror Redis so the limiters cannot tell the two
//! apart.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CounterStore, KeyExpiry, ScriptHash, StoreError};

struct Entry {
    value: i64,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    scripts: HashMap<ScriptHash, String>,
}

/// Counter store held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached script, as `SCRIPT FLUSH` (or a store restart)
    /// would. Subsequent invocations by hash report `ScriptMissing`.
    pub fn flush_scripts(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.clear();
    }

    /// Remove a key's expiry, as `PERSIST` would. Used to manufacture the
    /// anomalous no-expiry state the limiter self-heals from.
    pub fn persist(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.keys.get_mut(key) {
            entry.deadline = None;
        }
    }
}

impl Inner {
    /// Drop the key if its deadline has passed, mirroring how an expired
    /// Redis key reads as absent.
    fn evict_if_expired(&mut self, key: &str) {
        if let Some(entry) = self.keys.get(key) {
            if matches!(entry.deadline, Some(d) if d <= Instant::now()) {
                self.keys.remove(key);
            }
        }
    }

    fn init_if_absent(&mut self, key: &str, value: i64, ttl: Duration) {
        self.evict_if_expired(key);
        if !self.keys.contains_key(key) {
            self.keys.insert(
                key.to_string(),
                Entry {
                    value,
                    deadline: Some(Instant::now() + ttl),
                },
            );
        }
    }
}

fn script_hash(source: &str) -> ScriptHash {
    // Stands in for the SHA-1 Redis computes; only identity matters here.
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn script_args(args: &[i64]) -> Result<(i64, Duration), StoreError> {
    match args {
        [threshold, ttl_ms, ..] if *ttl_ms >= 0 => {
            Ok((*threshold, Duration::from_millis(*ttl_ms as u64)))
        }
        _ => Err(StoreError::UnexpectedReply(format!(
            "bad script arguments: {:?}",
            args
        ))),
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn load_script(&self, source: &str) -> Result<ScriptHash, StoreError> {
        let hash = script_hash(source);
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.insert(hash.clone(), source.to_string());
        Ok(hash)
    }

    async fn run_script(&self, hash: &str, key: &str, args: &[i64]) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let source = match inner.scripts.get(hash) {
            Some(source) => source.clone(),
            None => return Err(StoreError::ScriptMissing),
        };

        // Recognizes the two command shapes the limiters load (conditional
        // set followed by DECRBY or by GET); this is not a Lua interpreter.
        let (threshold, ttl) = script_args(args)?;
        if source.contains("DECRBY") {
            let amount = match args {
                [_, _, amount] => *amount,
                _ => {
                    return Err(StoreError::UnexpectedReply(
                        "decrement script takes three arguments".into(),
                    ))
                }
            };
            inner.init_if_absent(key, threshold, ttl);
            let entry = inner.keys.get_mut(key).unwrap();
            entry.value -= amount;
            Ok(entry.value)
        } else if source.contains("GET") {
            inner.init_if_absent(key, threshold, ttl);
            Ok(inner.keys[key].value)
        } else {
            Err(StoreError::UnexpectedReply(format!(
                "unsupported script: {}",
                source
            )))
        }
    }

    async fn increment_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.evict_if_expired(key);
        // As in Redis, an absent key is created at zero with no expiry.
        let entry = inner.keys.entry(key.to_string()).or_insert(Entry {
            value: 0,
            deadline: None,
        });
        entry.value += amount;
        Ok(entry.value)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<KeyExpiry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.evict_if_expired(key);
        Ok(match inner.keys.get(key) {
            None => KeyExpiry::Missing,
            Some(Entry { deadline: None, .. }) => KeyExpiry::Unset,
            Some(Entry {
                deadline: Some(d), ..
            }) => KeyExpiry::After(d.saturating_duration_since(Instant::now())),
        })
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.evict_if_expired(key);
        match inner.keys.get_mut(key) {
            Some(entry) => {
                entry.deadline = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.evict_if_expired(key);
        Ok(inner.keys.get(key).map(|e| e.value))
    }
}
