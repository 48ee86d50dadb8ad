//! Rate limiting logic.

mod composite;
mod events;
mod limiter;
mod policy;

pub use composite::Composite;
pub use events::{EventSink, LimiterEvent, TracingSink};
pub use limiter::{Limiter, DEFAULT_NAMESPACE};
pub use policy::Policy;
