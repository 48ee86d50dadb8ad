//! Diagnostic events emitted by the limiters.
//!
//! Anomalies the limiter absorbs (a repaired expiry, a reloaded script) are
//! reported through an injected [`EventSink`] rather than written straight
//! to a log stream, so tests can assert on the events themselves. The
//! default sink forwards to `tracing`.

use std::time::Duration;

use tracing::{debug, warn};

/// A recovered anomaly, described after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A counter key was found with no expiry and was given one. This state
    /// must never arise under correct operation but has been observed.
    ExpiryRepaired { key: String, ttl: Duration },

    /// The store had evicted a script; it was reloaded and the operation
    /// retried.
    ScriptReloaded { key: String },
}

/// Receiver for diagnostic events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: LimiterEvent);
}

/// Default sink: structured `tracing` output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: LimiterEvent) {
        match event {
            LimiterEvent::ExpiryRepaired { key, ttl } => {
                warn!(
                    key = %key,
                    ttl_ms = ttl.as_millis() as u64,
                    "Counter key had no expiry; repaired"
                );
            }
            LimiterEvent::ScriptReloaded { key } => {
                debug!(key = %key, "Reloaded counter script after store eviction");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{EventSink, LimiterEvent};

    /// Collects events for assertions.
    #[derive(Default)]
    pub struct CollectingSink {
        events: Mutex<Vec<LimiterEvent>>,
    }

    impl CollectingSink {
        pub fn events(&self) -> Vec<LimiterEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for CollectingSink {
        fn record(&self, event: LimiterEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
