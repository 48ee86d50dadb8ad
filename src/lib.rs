//! Tollgate - Distributed Fixed-Window Rate Limiting
//!
//! This crate enforces shared usage quotas across any number of independent,
//! possibly concurrent callers by coordinating through one shared Redis
//! counter. Correctness does not rely on in-process locking: the
//! initialize-and-decrement step runs as a single server-side script, so the
//! aggregate grants within one window never exceed the window's threshold no
//! matter how callers interleave.
//!
//! Two limiters compose bottom-up: [`Limiter`] enforces one
//! threshold-per-interval policy on one counter key, and [`Composite`] chains
//! several of them so that every tier is charged consistently.

pub mod config;
pub mod error;
pub mod limit;
pub mod store;

pub use error::{Result, TollgateError};
pub use limit::{Composite, EventSink, Limiter, LimiterEvent, Policy, TracingSink};
pub use store::{CounterStore, KeyExpiry, StoreError};
