//! Rule events.
//!
//! Each event is one bit of a 64-bit set. Bit positions are shared with the
//! peer earbud over peer signalling, so existing positions must never move.

use std::{
   fmt,
   ops::{BitOr, BitOrAssign},
};

use serde::{Deserialize, Serialize};

/// Set of rule events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RuleEvents(u64);

impl RuleEvents {
   pub const NONE: Self = Self(0);
   pub const ALL: Self = Self(u64::MAX);

   pub const STARTUP: Self = Self(1 << 0);
   pub const NO_PEER: Self = Self(1 << 1);
   pub const PEER_PAIRED: Self = Self(1 << 2);

   pub const IN_CASE: Self = Self(1 << 3);
   pub const OUT_CASE: Self = Self(1 << 4);
   pub const PEER_IN_CASE: Self = Self(1 << 5);
   pub const PEER_OUT_CASE: Self = Self(1 << 6);

   pub const ROLE_SWITCH: Self = Self(1 << 7);
   pub const ROLE_SELECTED_PRIMARY: Self = Self(1 << 8);
   pub const ROLE_SELECTED_SECONDARY: Self = Self(1 << 9);
   pub const ROLE_SELECTED_ACTING_PRIMARY: Self = Self(1 << 10);

   pub const PEER_LINKLOSS: Self = Self(1 << 11);
   pub const HANDSET_LINKLOSS: Self = Self(1 << 12);

   pub const PEER_CONNECTED_BREDR: Self = Self(1 << 13);
   pub const PEER_DISCONNECTED_BREDR: Self = Self(1 << 14);

   pub const HANDSET_CONNECTED_BREDR: Self = Self(1 << 15);
   pub const HANDSET_CONNECTED_A2DP: Self = Self(1 << 16);
   pub const HANDSET_CONNECTED_AVRCP: Self = Self(1 << 17);
   pub const HANDSET_CONNECTED_HFP: Self = Self(1 << 18);

   pub const HANDSET_DISCONNECTED_BREDR: Self = Self(1 << 19);
   pub const HANDSET_DISCONNECTED_A2DP: Self = Self(1 << 20);
   pub const HANDSET_DISCONNECTED_AVRCP: Self = Self(1 << 21);
   pub const HANDSET_DISCONNECTED_HFP: Self = Self(1 << 22);

   pub const DFU_ROLE: Self = Self(1 << 23);
   pub const DFU_ROLE_COMPLETE: Self = Self(1 << 24);

   pub const FAILED_PEER_CONNECT: Self = Self(1 << 25);

   pub const HANDOVER: Self = Self(1 << 26);
   pub const HANDOVER_RETRY: Self = Self(1 << 27);
   pub const HANDOVER_FAILED: Self = Self(1 << 28);
   pub const HANDOVER_FAILURE_HANDLED: Self = Self(1 << 29);

   pub const STATIC_HANDOVER: Self = Self(1 << 30);
   pub const STATIC_HANDOVER_FAILED: Self = Self(1 << 31);

   pub const PROHIBIT_CONNECT_TO_HANDSET: Self = Self(1 << 32);
   pub const HANDSET_PAIRED: Self = Self(1 << 33);

   pub const fn from_bits(bits: u64) -> Self {
      Self(bits)
   }

   pub const fn bits(self) -> u64 {
      self.0
   }

   pub const fn union(self, other: Self) -> Self {
      Self(self.0 | other.0)
   }

   pub const fn difference(self, other: Self) -> Self {
      Self(self.0 & !other.0)
   }

   pub const fn contains(self, other: Self) -> bool {
      self.0 & other.0 == other.0
   }

   pub const fn intersects(self, other: Self) -> bool {
      self.0 & other.0 != 0
   }

   pub const fn is_empty(self) -> bool {
      self.0 == 0
   }

   pub fn insert(&mut self, other: Self) {
      self.0 |= other.0;
   }

   pub fn remove(&mut self, other: Self) {
      self.0 &= !other.0;
   }

   /// Iterates the set one single-bit event at a time, lowest bit first.
   pub fn iter(self) -> impl Iterator<Item = Self> {
      let mut rest = self.0;
      std::iter::from_fn(move || {
         if rest == 0 {
            return None;
         }
         let bit = rest & rest.wrapping_neg();
         rest &= !bit;
         Some(Self(bit))
      })
   }

   /// Name of a single-bit event, if it is one we define.
   pub fn name(self) -> Option<&'static str> {
      EVENT_NAMES
         .iter()
         .find(|(event, _)| *event == self)
         .map(|(_, name)| *name)
   }
}

const EVENT_NAMES: &[(RuleEvents, &str)] = &[
   (RuleEvents::STARTUP, "startup"),
   (RuleEvents::NO_PEER, "no_peer"),
   (RuleEvents::PEER_PAIRED, "peer_paired"),
   (RuleEvents::IN_CASE, "in_case"),
   (RuleEvents::OUT_CASE, "out_case"),
   (RuleEvents::PEER_IN_CASE, "peer_in_case"),
   (RuleEvents::PEER_OUT_CASE, "peer_out_case"),
   (RuleEvents::ROLE_SWITCH, "role_switch"),
   (RuleEvents::ROLE_SELECTED_PRIMARY, "role_selected_primary"),
   (RuleEvents::ROLE_SELECTED_SECONDARY, "role_selected_secondary"),
   (RuleEvents::ROLE_SELECTED_ACTING_PRIMARY, "role_selected_acting_primary"),
   (RuleEvents::PEER_LINKLOSS, "peer_linkloss"),
   (RuleEvents::HANDSET_LINKLOSS, "handset_linkloss"),
   (RuleEvents::PEER_CONNECTED_BREDR, "peer_connected_bredr"),
   (RuleEvents::PEER_DISCONNECTED_BREDR, "peer_disconnected_bredr"),
   (RuleEvents::HANDSET_CONNECTED_BREDR, "handset_connected_bredr"),
   (RuleEvents::HANDSET_CONNECTED_A2DP, "handset_connected_a2dp"),
   (RuleEvents::HANDSET_CONNECTED_AVRCP, "handset_connected_avrcp"),
   (RuleEvents::HANDSET_CONNECTED_HFP, "handset_connected_hfp"),
   (RuleEvents::HANDSET_DISCONNECTED_BREDR, "handset_disconnected_bredr"),
   (RuleEvents::HANDSET_DISCONNECTED_A2DP, "handset_disconnected_a2dp"),
   (RuleEvents::HANDSET_DISCONNECTED_AVRCP, "handset_disconnected_avrcp"),
   (RuleEvents::HANDSET_DISCONNECTED_HFP, "handset_disconnected_hfp"),
   (RuleEvents::DFU_ROLE, "dfu_role"),
   (RuleEvents::DFU_ROLE_COMPLETE, "dfu_role_complete"),
   (RuleEvents::FAILED_PEER_CONNECT, "failed_peer_connect"),
   (RuleEvents::HANDOVER, "handover"),
   (RuleEvents::HANDOVER_RETRY, "handover_retry"),
   (RuleEvents::HANDOVER_FAILED, "handover_failed"),
   (RuleEvents::HANDOVER_FAILURE_HANDLED, "handover_failure_handled"),
   (RuleEvents::STATIC_HANDOVER, "static_handover"),
   (RuleEvents::STATIC_HANDOVER_FAILED, "static_handover_failed"),
   (RuleEvents::PROHIBIT_CONNECT_TO_HANDSET, "prohibit_connect_to_handset"),
   (RuleEvents::HANDSET_PAIRED, "handset_paired"),
];

impl BitOr for RuleEvents {
   type Output = Self;

   fn bitor(self, rhs: Self) -> Self {
      self.union(rhs)
   }
}

impl BitOrAssign for RuleEvents {
   fn bitor_assign(&mut self, rhs: Self) {
      self.insert(rhs);
   }
}

impl fmt::Display for RuleEvents {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      if self.is_empty() {
         return f.write_str("none");
      }
      let mut first = true;
      for event in self.iter() {
         if !first {
            f.write_str("|")?;
         }
         first = false;
         match event.name() {
            Some(name) => f.write_str(name)?,
            None => write!(f, "bit{}", event.0.trailing_zeros())?,
         }
      }
      Ok(())
   }
}
