//! Topology state shared by guards, procedures and the controller.
//!
//! One owned value replaces the per-module globals a firmware build would
//! use. Guards only read it; procedures and the controller mutate it.

use serde::Serialize;

use crate::topology::{
   BdAddr, PhyState, Profiles, Role,
   goals::{GoalId, GoalSet},
   io::HandoverRecommendation,
};

/// Addresses assigned to the pair when peer pairing completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerPairing {
   pub primary: BdAddr,
   pub secondary: BdAddr,
}

/// What the device database remembers about the handset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandsetRecord {
   pub addr: BdAddr,
   /// Set once the handset has ever had an ACL with us.
   pub was_connected: bool,
   /// Profiles connected during the last session.
   pub last_profiles: Profiles,
}

impl HandsetRecord {
   pub const fn new(addr: BdAddr) -> Self {
      Self {
         addr,
         was_connected: false,
         last_profiles: Profiles::NONE,
      }
   }
}

/// View of the device database and link state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceDb {
   /// Address currently in use by the radio.
   pub own_addr: BdAddr,
   pub peer: Option<PeerPairing>,
   pub handset: Option<HandsetRecord>,
   pub handset_profiles: Profiles,
   pub handset_acl: bool,
   pub peer_acl: bool,
}

impl DeviceDb {
   pub fn primary_addr(&self) -> Option<BdAddr> {
      self.peer.map(|p| p.primary)
   }

   pub fn secondary_addr(&self) -> Option<BdAddr> {
      self.peer.map(|p| p.secondary)
   }

   pub fn handset_addr(&self) -> Option<BdAddr> {
      self.handset.map(|h| h.addr)
   }

   /// Address of the other earbud given the address we currently use.
   pub fn peer_addr(&self) -> Option<BdAddr> {
      let pairing = self.peer?;
      if self.own_addr == pairing.primary {
         Some(pairing.secondary)
      } else {
         Some(pairing.primary)
      }
   }

   pub fn is_peer(&self, addr: BdAddr) -> bool {
      self
         .peer
         .is_some_and(|p| addr == p.primary || addr == p.secondary)
   }

   pub fn is_handset(&self, addr: BdAddr) -> bool {
      self.handset.is_some_and(|h| h.addr == addr)
   }

   /// True when the radio is using the primary address of the pair.
   pub fn is_primary_addr(&self) -> bool {
      self.peer.is_some_and(|p| p.primary == self.own_addr)
   }
}

/// Latest handover recommendation and the attempt counter.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HandoverInfo {
   pub recommendation: Option<HandoverRecommendation>,
   pub retry_count: u8,
}

impl HandoverInfo {
   pub fn clear(&mut self) {
      *self = Self::default();
   }
}

/// Process-wide topology state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopologyState {
   pub role: Role,
   pub phy: PhyState,
   pub peer_phy: PhyState,
   pub db: DeviceDb,
   pub active_goals: GoalSet,
   pub handover: HandoverInfo,
   pub hdma_created: bool,
   pub app_prohibit_handover: bool,
   pub prohibit_connect_to_handset: bool,
   /// Phy in/out of case events are held back while set.
   pub suppress_events: bool,
   pub state_proxy_ready: bool,
   pub started: bool,
   pub start_cfm_needed: bool,
}

impl TopologyState {
   pub fn new(own_addr: BdAddr) -> Self {
      Self {
         db: DeviceDb {
            own_addr,
            ..DeviceDb::default()
         },
         ..Self::default()
      }
   }

   pub const fn in_case(&self) -> bool {
      self.phy.is_in_case()
   }

   pub const fn is_goal_active(&self, goal: GoalId) -> bool {
      self.active_goals.contains(goal)
   }

   pub fn is_any_goal_active(&self, goals: &[GoalId]) -> bool {
      goals.iter().any(|g| self.is_goal_active(*g))
   }

   pub const fn peer_connected(&self) -> bool {
      self.db.peer_acl
   }

   pub const fn handset_connected(&self) -> bool {
      self.db.handset_acl
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   const PRIMARY: BdAddr = BdAddr([0, 0, 0, 0, 0, 1]);
   const SECONDARY: BdAddr = BdAddr([0, 0, 0, 0, 0, 2]);

   #[test]
   fn test_peer_addr_follows_own_address() {
      let mut db = DeviceDb {
         own_addr: PRIMARY,
         peer: Some(PeerPairing {
            primary: PRIMARY,
            secondary: SECONDARY,
         }),
         ..DeviceDb::default()
      };
      assert_eq!(db.peer_addr(), Some(SECONDARY));
      assert!(db.is_primary_addr());

      db.own_addr = SECONDARY;
      assert_eq!(db.peer_addr(), Some(PRIMARY));
      assert!(!db.is_primary_addr());
      assert!(db.is_peer(PRIMARY));
   }

   #[test]
   fn test_no_pairing() {
      let state = TopologyState::new(PRIMARY);
      assert_eq!(state.db.peer_addr(), None);
      assert!(!state.db.is_peer(PRIMARY));
      assert_eq!(state.role, Role::None);
      assert!(state.active_goals.is_empty());
   }
}
