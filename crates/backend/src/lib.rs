//! Live metrics backends used by online checks.
//!
//! Checks that need facts outside the rule text, such as metric types or
//! external labels, ask a [`MetricsBackend`]. [`CachedBackend`] memoises
//! answers and makes concurrent identical lookups share one request.

mod backend;
mod cached;
pub mod error;
mod lock;
mod static_backend;

pub use backend::{MetricType, MetricsBackend};
pub use cached::CachedBackend;
pub use error::BackendError;
pub use lock::{KeyGuard, KeyLock};
pub use static_backend::StaticBackend;
