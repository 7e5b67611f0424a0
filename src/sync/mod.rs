//! Write-ahead sync queue and the coordinator that drains it.
//!
//! - Operations are persisted before the server has confirmed them
//! - Replay runs right after enqueue (when online) and on every
//!   offline-to-online transition
//! - Failed entries stay queued with a retry counter and a backoff gate

pub mod backoff;
pub mod connectivity;
pub mod coordinator;
pub mod queue;

pub use connectivity::{Connectivity, ConnectivityProbe};
pub use coordinator::{SyncCoordinator, SyncReport};
pub use queue::{Operation, OutboundRequest};
