//! Composite limiter: several window policies gated as one.
//!
//! Each tier is an independent [`Limiter`] on its own collision-free key.
//! An `obtain` threads the granted amount through the tiers in order, so a
//! request is only charged against a tier when every earlier tier let some
//! of it through. By convention callers list tiers finest-interval-first so
//! the fastest-to-reset tier blocks before slower tiers are charged; this
//! is a heuristic, not required for correctness.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::store::CounterStore;

use super::events::EventSink;
use super::limiter::Limiter;
use super::policy::Policy;

/// An ordered chain of single-window limiters sharing one base name.
pub struct Composite {
    name: String,
    limiters: Vec<Limiter>,
}

impl Composite {
    /// Create one limiter per policy, in the given order.
    ///
    /// Tier keys embed the tier index and the tier's own threshold/interval,
    /// so distinct tiers under one base name never share a counter.
    pub fn new(
        store: Arc<dyn CounterStore>,
        name: impl Into<String>,
        policies: Vec<Policy>,
    ) -> Self {
        let name = name.into();
        let limiters = policies
            .into_iter()
            .enumerate()
            .map(|(i, policy)| {
                Limiter::new(store.clone(), format!("{}_{}_{}", i, name, policy), policy)
            })
            .collect();
        Self { name, limiters }
    }

    /// Re-key every tier under a different namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.limiters = self
            .limiters
            .into_iter()
            .map(|l| l.with_namespace(namespace.clone()))
            .collect();
        self
    }

    /// Replace the diagnostic event sink on every tier.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.limiters = self
            .limiters
            .into_iter()
            .map(|l| l.with_events(events.clone()))
            .collect();
        self
    }

    /// The composite's base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-tier limiters, in gating order.
    pub fn tiers(&self) -> &[Limiter] {
        &self.limiters
    }

    /// Try to take `count` tokens from every tier.
    ///
    /// Each tier is asked for what the previous tier granted; iteration
    /// stops at the first tier that grants nothing, leaving later tiers
    /// uncharged. The result never exceeds what any single tier allows.
    pub async fn obtain(&self, count: u64) -> Result<u64> {
        let mut count = count;
        for limiter in &self.limiters {
            count = limiter.obtain(count).await?;
            if count == 0 {
                break;
            }
        }
        Ok(count)
    }

    /// Remaining counts per tier name.
    ///
    /// A diagnostic snapshot, not an atomic cross-tier read: the values may
    /// already disagree with each other by the time the caller sees them.
    pub async fn remains(&self) -> Result<HashMap<String, i64>> {
        let mut result = HashMap::with_capacity(self.limiters.len());
        for limiter in &self.limiters {
            result.insert(limiter.name().to_string(), limiter.remains().await?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::Rng;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_name() -> String {
        format!("test{}", rand::thread_rng().gen_range(0..u64::MAX))
    }

    /// The documentation example: 2/s, 9/5s, 20/20s, 42/60s.
    fn tiered_policies() -> Vec<Policy> {
        vec![
            Policy::per_seconds(2, 1).unwrap(),
            Policy::per_seconds(9, 5).unwrap(),
            Policy::per_seconds(20, 20).unwrap(),
            Policy::per_seconds(42, 60).unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_tier_keys_are_distinct() {
        let store = Arc::new(MemoryStore::new());
        let composite = Composite::new(store, "api", tiered_policies());

        let keys: HashSet<&str> = composite.tiers().iter().map(|l| l.key()).collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(
            composite.tiers()[0].key(),
            "tollgate:0_api_2/1000ms_remains"
        );
    }

    #[tokio::test]
    async fn test_same_policy_in_two_tiers_does_not_collide() {
        let store = Arc::new(MemoryStore::new());
        let policy = Policy::per_seconds(5, 1).unwrap();
        let composite = Composite::new(store, "dup", vec![policy, policy]);

        let keys: HashSet<&str> = composite.tiers().iter().map(|l| l.key()).collect();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_obtain_bounded_by_strictest_tier() {
        let store = Arc::new(MemoryStore::new());
        let composite = Composite::new(store, test_name(), tiered_policies());

        // The first tier allows only 2, so 2 is all that comes through.
        assert_eq!(composite.obtain(5).await.unwrap(), 2);
        assert_eq!(composite.obtain(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blocked_request_leaves_later_tiers_uncharged() {
        let store = Arc::new(MemoryStore::new());
        let composite = Composite::new(store.clone(), test_name(), tiered_policies());

        assert_eq!(composite.obtain(1).await.unwrap(), 1);
        assert_eq!(composite.obtain(1).await.unwrap(), 1);
        // Third call is blocked by the 2/s tier.
        assert_eq!(composite.obtain(1).await.unwrap(), 0);

        // The slower tiers were charged twice, not three times.
        let second_tier = &composite.tiers()[1];
        assert_eq!(store.get(second_tier.key()).await.unwrap(), Some(7));
        let last_tier = &composite.tiers()[3];
        assert_eq!(store.get(last_tier.key()).await.unwrap(), Some(40));
    }

    #[tokio::test]
    async fn test_partial_grant_propagates_down_the_chain() {
        let store = Arc::new(MemoryStore::new());
        let policies = vec![
            Policy::per_seconds(10, 1).unwrap(),
            Policy::per_seconds(3, 5).unwrap(),
        ];
        let composite = Composite::new(store, test_name(), policies);

        // First tier grants all 10; the second caps the result at 3.
        assert_eq!(composite.obtain(10).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_every_tier_keeps_its_own_cap() {
        let store = Arc::new(MemoryStore::new());
        let policies = vec![
            Policy::new(2, Duration::from_millis(100)).unwrap(),
            Policy::new(3, Duration::from_millis(10_000)).unwrap(),
        ];
        let composite = Composite::new(store, test_name(), policies);

        let mut total = 0;
        for _ in 0..4 {
            total += composite.obtain(1).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }

        // The fast tier resets along the way, but the slow tier's cap of 3
        // still bounds the total.
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_remains_reports_every_tier() {
        let store = Arc::new(MemoryStore::new());
        let composite = Composite::new(store, "api", tiered_policies());

        composite.obtain(1).await.unwrap();
        let remains = composite.remains().await.unwrap();

        assert_eq!(remains.len(), 4);
        assert_eq!(remains["0_api_2/1000ms"], 1);
        assert_eq!(remains["1_api_9/5000ms"], 8);
        assert_eq!(remains["2_api_20/20000ms"], 19);
        assert_eq!(remains["3_api_42/60000ms"], 41);
    }

    #[tokio::test]
    async fn test_namespace_applies_to_every_tier() {
        let store = Arc::new(MemoryStore::new());
        let composite =
            Composite::new(store, "api", tiered_policies()).with_namespace("billing");

        for tier in composite.tiers() {
            assert!(tier.key().starts_with("billing:"));
        }
    }

    #[tokio::test]
    async fn test_empty_composite_grants_everything() {
        let store = Arc::new(MemoryStore::new());
        let composite = Composite::new(store, test_name(), Vec::new());

        // No tiers means nothing to enforce.
        assert_eq!(composite.obtain(7).await.unwrap(), 7);
        assert!(composite.remains().await.unwrap().is_empty());
    }
}
