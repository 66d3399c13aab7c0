//! Event-driven cache invalidation.
//!
//! Domain code describes *what changed* with an [`InvalidationEvent`]; the
//! [`InvalidationEngine`] turns it into keys and patterns and evicts them.
//! [`InvalidationQueue`] moves that work off the request path.

mod engine;
mod events;
mod queue;

pub use engine::{InvalidationEngine, KeyGenerator};
pub use events::{InvalidationEvent, default_keys};
pub use queue::InvalidationQueue;
