//! Notifications for clients of the topology.
//!
//! Observers learn about role changes, the answer to a start request and
//! completed handovers.

use std::sync::Arc;

use crate::topology::Role;

/// Events that can be emitted by the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
   /// Sent for every role the engine adopts, including a repeat of the
   /// current one.
   RoleChanged { role: Role },
   StartCfm { success: bool },
   HandoverComplete,
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: TopologyEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
