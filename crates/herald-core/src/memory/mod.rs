//! In-process store, cache and queue.
//!
//! Used by tests and by single-process deployments that do not need
//! durability across restarts.

mod cache;
mod queue;
mod store;

pub use cache::{CachedEntry, LocalCache};
pub use queue::{InMemoryQueue, QueueSnapshot};
pub use store::InMemoryStore;
