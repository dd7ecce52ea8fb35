//! Peer signalling frames exchanged between the two earbuds.
//!
//! A frame is one type byte followed by a little-endian 64-bit rule event
//! mask. Both earbuds must agree on this layout bit for bit.

use log::debug;
use smallvec::SmallVec;

use crate::{
   error::{PeerSigError, Result},
   topology::events::RuleEvents,
};

/// Raw peer signalling payload.
pub type Packet = SmallVec<[u8; 16]>;

/// Type byte plus the event mask.
pub const FRAME_LEN: usize = 1 + size_of::<u64>();

/// Type discriminant of a peer signalling frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display)]
pub enum PeerSigKind {
   RemoteRuleEvent = 0x00,
   StaticHandoverCommand = 0x01,
}

/// Decoded peer signalling frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSigMessage {
   pub kind: PeerSigKind,
   pub events: RuleEvents,
}

impl PeerSigMessage {
   pub const fn remote_rule_event(events: RuleEvents) -> Self {
      Self {
         kind: PeerSigKind::RemoteRuleEvent,
         events,
      }
   }

   pub const fn static_handover_command() -> Self {
      Self {
         kind: PeerSigKind::StaticHandoverCommand,
         events: RuleEvents::STATIC_HANDOVER,
      }
   }

   /// Events to inject into the receiver's active rule set.
   pub const fn rule_events(&self) -> RuleEvents {
      match self.kind {
         PeerSigKind::RemoteRuleEvent => self.events,
         PeerSigKind::StaticHandoverCommand => RuleEvents::STATIC_HANDOVER,
      }
   }

   pub fn encode(&self) -> Packet {
      [self.kind as u8]
         .into_iter()
         .chain(self.events.bits().to_le_bytes())
         .collect()
   }

   pub fn decode(data: &[u8]) -> Result<Self> {
      debug!("Peer sig rx: {}", hex::encode(data));

      let Some((&kind, rest)) = data.split_first() else {
         return Err(
            PeerSigError::TooShort {
               expected: FRAME_LEN,
               actual: 0,
            }
            .into(),
         );
      };

      let Some(kind) = PeerSigKind::from_repr(kind) else {
         return Err(PeerSigError::UnknownType { kind }.into());
      };

      let Some(mask) = rest.first_chunk::<8>() else {
         return Err(
            PeerSigError::TooShort {
               expected: FRAME_LEN,
               actual: data.len(),
            }
            .into(),
         );
      };

      if data.len() > FRAME_LEN {
         debug!("Ignoring {} trailing peer sig bytes", data.len() - FRAME_LEN);
      }

      Ok(Self {
         kind,
         events: RuleEvents::from_bits(u64::from_le_bytes(*mask)),
      })
   }
}
