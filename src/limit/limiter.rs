//! Single-window limiter implementation.
//!
//! One `Limiter` enforces one threshold-per-interval policy on one counter
//! key in the shared store. The initialize-if-absent and decrement steps run
//! as a single server-side script, so concurrent callers on the same key are
//! serialized by the store and the aggregate grants within a window never
//! exceed the threshold. A caller that drives the counter negative
//! over-subscribed the window and compensates by returning the unavailable
//! portion with a plain increment.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::trace;

use crate::error::Result;
use crate::store::{CounterStore, KeyExpiry, ScriptHash, StoreError};

use super::events::{EventSink, LimiterEvent, TracingSink};
use super::policy::Policy;

/// Key prefix used when the caller does not supply a namespace.
pub const DEFAULT_NAMESPACE: &str = "tollgate";

/// Conditionally seeds the counter to the threshold with the window's expiry,
/// then decrements, as one uninterruptible unit.
const OBTAIN_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2], 'NX')
return redis.call('DECRBY', KEYS[1], ARGV[3])
"#;

/// Conditionally seeds the counter, then reads it. Never decrements.
const REMAINS_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2], 'NX')
return tonumber(redis.call('GET', KEYS[1]))
"#;

/// A server-side script with its lazily-cached content-hash handle.
///
/// Each limiter instance caches its own handles; a store that has evicted a
/// script is answered by reloading from source and retrying once.
struct Script {
    source: &'static str,
    hash: RwLock<Option<ScriptHash>>,
}

impl Script {
    fn new(source: &'static str) -> Self {
        Self {
            source,
            hash: RwLock::new(None),
        }
    }

    async fn handle(
        &self,
        store: &dyn CounterStore,
    ) -> std::result::Result<ScriptHash, StoreError> {
        if let Some(hash) = self.hash.read().unwrap().clone() {
            return Ok(hash);
        }
        self.reload(store).await
    }

    async fn reload(
        &self,
        store: &dyn CounterStore,
    ) -> std::result::Result<ScriptHash, StoreError> {
        let hash = store.load_script(self.source).await?;
        *self.hash.write().unwrap() = Some(hash.clone());
        Ok(hash)
    }
}

/// Rate limiter for a single fixed window.
///
/// Stateless apart from the cached script handles; it is safe to point any
/// number of instances (in any number of processes) at the same key.
pub struct Limiter {
    store: Arc<dyn CounterStore>,
    name: String,
    namespace: String,
    policy: Policy,
    key: String,
    interval_ms: i64,
    obtain_script: Script,
    remains_script: Script,
    events: Arc<dyn EventSink>,
}

impl Limiter {
    /// Create a limiter for `policy` on the counter named `name`, under the
    /// default namespace.
    pub fn new(store: Arc<dyn CounterStore>, name: impl Into<String>, policy: Policy) -> Self {
        let name = name.into();
        let namespace = DEFAULT_NAMESPACE.to_string();
        let key = derive_key(&namespace, &name);
        let interval_ms = i64::try_from(policy.interval().as_millis()).unwrap_or(i64::MAX);
        Self {
            store,
            name,
            namespace,
            policy,
            key,
            interval_ms,
            obtain_script: Script::new(OBTAIN_SCRIPT),
            remains_script: Script::new(REMAINS_SCRIPT),
            events: Arc::new(TracingSink),
        }
    }

    /// Re-key the limiter under a different namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.key = derive_key(&self.namespace, &self.name);
        self
    }

    /// Replace the diagnostic event sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The limiter's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The derived counter key in the store.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The enforced policy.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Current counter value, initializing an absent counter to the
    /// threshold first. Never decrements.
    pub async fn remains(&self) -> Result<i64> {
        let threshold = self.policy.threshold() as i64;
        let value = self
            .run(&self.remains_script, &[threshold, self.interval_ms])
            .await?;

        if value <= 0 {
            self.heal_missing_expiry().await?;
        }

        trace!(key = %self.key, value = value, "Read remaining counter");
        Ok(value)
    }

    /// Try to take `count` tokens from the current window.
    ///
    /// Returns the granted amount, always within `0..=count`. A request that
    /// drives the counter negative is partially granted: the unavailable
    /// portion is atomically returned to the counter without touching its
    /// expiry.
    pub async fn obtain(&self, count: u64) -> Result<u64> {
        if count == 0 {
            return Ok(0);
        }

        // Anything above the threshold can never be granted in full, so the
        // charge is capped there; this also keeps the decrement within the
        // store's counter range.
        let want = count.min(self.policy.threshold());
        let threshold = self.policy.threshold() as i64;
        let taken = self
            .run(
                &self.obtain_script,
                &[threshold, self.interval_ms, want as i64],
            )
            .await?;

        let granted = if taken >= 0 {
            want
        } else {
            let overflow = taken.unsigned_abs();
            let to_return = overflow.min(want);
            // The compensating increment deliberately skips the conditional
            // initialize step: re-running it could reset an existing expiry.
            self.store.increment_by(&self.key, to_return as i64).await?;
            want - to_return
        };

        if granted == 0 {
            self.heal_missing_expiry().await?;
        }

        trace!(
            key = %self.key,
            requested = count,
            granted = granted,
            "Obtained window tokens"
        );
        Ok(granted)
    }

    /// Invoke a script, transparently reloading it once if the store has
    /// evicted it. A second miss after reloading is fatal.
    async fn run(&self, script: &Script, args: &[i64]) -> Result<i64> {
        let hash = script.handle(self.store.as_ref()).await?;
        match self.store.run_script(&hash, &self.key, args).await {
            Err(StoreError::ScriptMissing) => {
                let hash = script.reload(self.store.as_ref()).await?;
                self.events.record(LimiterEvent::ScriptReloaded {
                    key: self.key.clone(),
                });
                let value = self.store.run_script(&hash, &self.key, args).await;
                Ok(value.map_err(|e| match e {
                    StoreError::ScriptMissing => {
                        StoreError::Unavailable("script evicted again after reload".to_string())
                    }
                    other => other,
                })?)
            }
            other => Ok(other?),
        }
    }

    /// Repair a counter key that exists without any expiry. The anomalous
    /// state must never arise from this limiter's own operations, but it has
    /// been observed in shared stores; a key without an expiry would pin its
    /// window open forever.
    async fn heal_missing_expiry(&self) -> Result<()> {
        if self.store.remaining_ttl(&self.key).await? == KeyExpiry::Unset {
            let ttl = self.policy.interval();
            self.store.set_expiry(&self.key, ttl).await?;
            self.events.record(LimiterEvent::ExpiryRepaired {
                key: self.key.clone(),
                ttl,
            });
        }
        Ok(())
    }
}

fn derive_key(namespace: &str, name: &str) -> String {
    format!("{}:{}_remains", namespace, name)
}
