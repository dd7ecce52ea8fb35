//! Error types for the topology engine.
//!
//! Procedure outcomes (failed, timeout) are ordinary values and never appear
//! here. This module only covers programmer errors, malformed peer payloads,
//! configuration I/O and a dead service actor.

use thiserror::Error;

/// Main error type for the topology engine.
#[derive(Error, Debug)]
pub enum TopologyError {
   #[error("Invariant violated: {what}")]
   InvariantViolation { what: &'static str },

   #[error("Peer signalling error: {0}")]
   PeerSig(#[from] PeerSigError),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Topology service has been shut down")]
   ServiceShutdown,
}

impl TopologyError {
   pub const fn invariant(what: &'static str) -> Self {
      Self::InvariantViolation { what }
   }

   pub const fn is_invariant_violation(&self) -> bool {
      matches!(self, Self::InvariantViolation { .. })
   }
}

/// Error type for peer signalling frames.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PeerSigError {
   /// Frame is shorter than the fixed header plus event mask
   #[error("Frame too short: expected {expected} bytes, got {actual}")]
   TooShort { expected: usize, actual: usize },

   /// Type discriminant is not one we know
   #[error("Unknown message type: 0x{kind:02x}")]
   UnknownType { kind: u8 },
}

/// Convenience type alias for Results with `TopologyError`.
pub type Result<T> = std::result::Result<T, TopologyError>;
