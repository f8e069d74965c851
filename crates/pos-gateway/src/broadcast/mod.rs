//! Event broadcasting
//!
//! In-process listeners and the state replayed to late-joining clients.

mod listeners;
mod replay;

pub use listeners::{Listener, ListenerId, ListenerRegistry};
pub use replay::{ErrorHistory, MetricsCache, ReplayCache};
