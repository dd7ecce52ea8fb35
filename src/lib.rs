//! Role arbitration for a pair of true-wireless earbuds.
//!
//! [`Topology`] is the synchronous engine: feed it [`Input`]s and carry out
//! the [`Command`]s it returns. [`TopologyService`] wraps it in a tokio actor
//! that also owns the procedure timers.

pub mod config;
pub mod error;
pub mod event;
pub mod service;
pub mod topology;

pub use config::Config;
pub use error::{Result, TopologyError};
pub use event::{EventBus, EventSender, TopologyEvent};
pub use service::{Platform, TopologyService};
pub use topology::{Command, Input, Role, RuleEvents, Topology};
