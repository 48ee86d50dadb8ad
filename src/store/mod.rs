//! Counter store abstraction.
//!
//! The limiters never talk to Redis directly; they go through the
//! [`CounterStore`] trait, which exposes exactly the store protocol the
//! fixed-window algorithm needs: server-side script loading and invocation,
//! an atomic increment, and expiry inspection/repair. The trait abstracts
//! over the Redis-backed [`RedisStore`] and the in-process [`MemoryStore`].

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Content-hash handle of a loaded server-side script.
pub type ScriptHash = String;

/// Errors reported by a counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store no longer knows the script hash (evicted or the store
    /// restarted). Recoverable: reload the script and retry once.
    #[error("Script not cached by the store")]
    ScriptMissing,

    /// Transport or server failure. Not retried; propagated to the caller.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but not with the reply shape the protocol expects.
    #[error("Unexpected reply from store: {0}")]
    UnexpectedReply(String),
}

/// Remaining lifetime of a counter key, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExpiry {
    /// The key does not exist.
    Missing,
    /// The key exists but carries no expiry. This state must never occur
    /// under correct operation and is repaired by the limiter when seen.
    Unset,
    /// The key exists and expires after the given duration.
    After(Duration),
}

/// Operations a counter store must provide.
///
/// Atomicity contract: `run_script` executes the whole script as one
/// uninterruptible unit relative to every other command on the same store,
/// and `increment_by` is a single atomic command that never disturbs the
/// key's expiry. Everything the limiters guarantee is built on those two
/// properties.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Load a script into the store's script cache, returning its hash.
    async fn load_script(&self, source: &str) -> Result<ScriptHash, StoreError>;

    /// Invoke a previously loaded script by hash against one key.
    ///
    /// A hash the store does not recognize is reported as
    /// [`StoreError::ScriptMissing`], distinct from transport failures.
    async fn run_script(&self, hash: &str, key: &str, args: &[i64]) -> Result<i64, StoreError>;

    /// Atomically add `amount` to the key's value, returning the new value.
    /// The key's expiry is left untouched.
    async fn increment_by(&self, key: &str, amount: i64) -> Result<i64, StoreError>;

    /// Report the key's remaining time to live.
    async fn remaining_ttl(&self, key: &str) -> Result<KeyExpiry, StoreError>;

    /// Set the key's expiry. Returns `false` if the key does not exist.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Read the key's current value, if present.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;
}
