//! Goal table: what each goal runs and how it coexists with other goals.

use std::fmt;

use serde::{Serialize, Serializer};
use strum::{EnumCount, IntoEnumIterator};

use crate::topology::{
   events::RuleEvents,
   procedures::{ProcResult, ProcedureId},
   script::{self, Script},
};

/// A goal a rule can select.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::FromRepr,
   strum::Display,
   strum::EnumIter,
   strum::EnumCount,
)]
#[strum(serialize_all = "snake_case")]
pub enum GoalId {
   PairPeer,
   FindRole,
   SecondaryConnectPeer,
   PrimaryConnectPeerProfiles,
   PrimaryDisconnectPeerProfiles,
   PrimaryConnectablePeer,
   NoRoleIdle,
   ConnectHandset,
   DisconnectHandset,
   ConnectableHandset,
   LeConnectableHandset,
   AllowHandsetConnect,
   BecomePrimary,
   BecomeSecondary,
   BecomeActingPrimary,
   SetPrimaryAddress,
   SetPrimaryAddressAndFindRole,
   RoleSwitchToSecondary,
   NoRoleFindRole,
   CancelFindRole,
   PrimaryFindRole,
   DfuRole,
   DfuPrimary,
   DfuSecondary,
   DfuInCase,
   ReleasePeer,
   SecondaryStaticHandover,
   PrimaryStaticHandoverInCase,
   DynamicHandover,
   DynamicHandoverFailure,
}

/// Set of goals, one bit per [`GoalId`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GoalSet(u64);

impl GoalSet {
   pub const EMPTY: Self = Self(0);

   pub const fn of(goals: &[GoalId]) -> Self {
      let mut bits = 0;
      let mut i = 0;
      while i < goals.len() {
         bits |= 1 << goals[i] as u64;
         i += 1;
      }
      Self(bits)
   }

   pub const fn single(goal: GoalId) -> Self {
      Self(1 << goal as u64)
   }

   pub const fn bits(self) -> u64 {
      self.0
   }

   pub const fn contains(self, goal: GoalId) -> bool {
      self.0 & Self::single(goal).0 != 0
   }

   pub const fn is_empty(self) -> bool {
      self.0 == 0
   }

   pub const fn difference(self, other: Self) -> Self {
      Self(self.0 & !other.0)
   }

   pub fn insert(&mut self, goal: GoalId) {
      self.0 |= Self::single(goal).0;
   }

   pub fn remove(&mut self, goal: GoalId) {
      self.0 &= !Self::single(goal).0;
   }

   pub fn iter(self) -> impl Iterator<Item = GoalId> {
      GoalId::iter().filter(move |g| self.contains(*g))
   }
}

impl fmt::Display for GoalSet {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      if self.is_empty() {
         return f.write_str("none");
      }
      for (i, goal) in self.iter().enumerate() {
         if i > 0 {
            f.write_str("|")?;
         }
         write!(f, "{goal}")?;
      }
      Ok(())
   }
}

impl Serialize for GoalSet {
   fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.collect_seq(self.iter().map(|g| g.to_string()))
   }
}

/// What a goal does while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalAction {
   Procedure(ProcedureId),
   Script(&'static Script),
}

/// How a new goal behaves when other goals are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
   /// Queue until every active goal has cleared.
   Wait,
   /// Flush the queue, cancel every active goal, then run.
   Cancel,
   /// Run alongside the listed goals, wait for anything else.
   Concurrent(GoalSet),
}

#[derive(Debug, Clone, Copy)]
pub struct GoalEntry {
   pub id: GoalId,
   pub action: GoalAction,
   pub contention: Contention,
   /// Goal cancelled (and unqueued) when this one is requested.
   pub exclusive: Option<GoalId>,
   pub success: Option<RuleEvents>,
   pub timeout: Option<RuleEvents>,
   pub failed: Option<RuleEvents>,
}

impl GoalEntry {
   /// Rule event raised when the goal finishes with `result`.
   pub const fn event_for(&self, result: ProcResult) -> Option<RuleEvents> {
      match result {
         ProcResult::Success => self.success,
         ProcResult::Timeout => self.timeout,
         ProcResult::Failed => self.failed,
      }
   }
}

const fn goal(id: GoalId, action: GoalAction) -> GoalEntry {
   GoalEntry {
      id,
      action,
      contention: Contention::Wait,
      exclusive: None,
      success: None,
      timeout: None,
      failed: None,
   }
}

const fn procedure(id: GoalId, proc: ProcedureId) -> GoalEntry {
   goal(id, GoalAction::Procedure(proc))
}

const fn scripted(id: GoalId, script: &'static Script) -> GoalEntry {
   goal(id, GoalAction::Script(script))
}

const fn cancelling(entry: GoalEntry) -> GoalEntry {
   GoalEntry {
      contention: Contention::Cancel,
      ..entry
   }
}

const fn concurrent(entry: GoalEntry, with: &[GoalId]) -> GoalEntry {
   GoalEntry {
      contention: Contention::Concurrent(GoalSet::of(with)),
      ..entry
   }
}

const fn exclusive(entry: GoalEntry, other: GoalId) -> GoalEntry {
   GoalEntry {
      exclusive: Some(other),
      ..entry
   }
}

const fn on_success(entry: GoalEntry, event: RuleEvents) -> GoalEntry {
   GoalEntry {
      success: Some(event),
      ..entry
   }
}

const fn on_timeout(entry: GoalEntry, event: RuleEvents) -> GoalEntry {
   GoalEntry {
      timeout: Some(event),
      ..entry
   }
}

const fn on_failed(entry: GoalEntry, event: RuleEvents) -> GoalEntry {
   GoalEntry {
      failed: Some(event),
      ..entry
   }
}

use GoalId as G;

/// Indexed by [`GoalId`].
static GOALS: [GoalEntry; GoalId::COUNT] = [
   on_success(scripted(G::PairPeer, &script::PAIR_PEER), RuleEvents::PEER_PAIRED),
   procedure(G::FindRole, ProcedureId::FindRole),
   on_failed(
      on_timeout(
         procedure(G::SecondaryConnectPeer, ProcedureId::SecConnectPeer),
         RuleEvents::FAILED_PEER_CONNECT,
      ),
      RuleEvents::FAILED_PEER_CONNECT,
   ),
   exclusive(
      concurrent(
         procedure(G::PrimaryConnectPeerProfiles, ProcedureId::ConnectPeerProfiles),
         &[G::PrimaryConnectablePeer, G::ConnectableHandset, G::ConnectHandset],
      ),
      G::PrimaryDisconnectPeerProfiles,
   ),
   exclusive(
      procedure(G::PrimaryDisconnectPeerProfiles, ProcedureId::DisconnectPeerProfiles),
      G::PrimaryConnectPeerProfiles,
   ),
   on_timeout(
      concurrent(
         procedure(G::PrimaryConnectablePeer, ProcedureId::PriConnectablePeer),
         &[G::PrimaryConnectPeerProfiles, G::ConnectHandset, G::ConnectableHandset],
      ),
      RuleEvents::FAILED_PEER_CONNECT,
   ),
   cancelling(scripted(G::NoRoleIdle, &script::NO_ROLE_IDLE)),
   exclusive(
      concurrent(
         procedure(G::ConnectHandset, ProcedureId::ConnectHandset),
         &[G::PrimaryConnectPeerProfiles, G::PrimaryConnectablePeer, G::ConnectableHandset],
      ),
      G::DisconnectHandset,
   ),
   exclusive(procedure(G::DisconnectHandset, ProcedureId::DisconnectHandset), G::ConnectHandset),
   concurrent(
      procedure(G::ConnectableHandset, ProcedureId::ConnectableHandset),
      &[G::PrimaryConnectablePeer, G::PrimaryConnectPeerProfiles, G::ConnectHandset],
   ),
   procedure(G::LeConnectableHandset, ProcedureId::LeConnectableHandset),
   procedure(G::AllowHandsetConnect, ProcedureId::AllowHandsetConnect),
   cancelling(scripted(G::BecomePrimary, &script::BECOME_PRIMARY)),
   cancelling(scripted(G::BecomeSecondary, &script::BECOME_SECONDARY)),
   scripted(G::BecomeActingPrimary, &script::BECOME_ACTING_PRIMARY),
   scripted(G::SetPrimaryAddress, &script::SET_PRIMARY_ADDRESS),
   scripted(G::SetPrimaryAddressAndFindRole, &script::PRIMARY_ADDRESS_FIND_ROLE),
   scripted(G::RoleSwitchToSecondary, &script::ROLE_SWITCH_TO_SECONDARY),
   scripted(G::NoRoleFindRole, &script::NO_ROLE_FIND_ROLE),
   procedure(G::CancelFindRole, ProcedureId::CancelFindRole),
   scripted(G::PrimaryFindRole, &script::PRIMARY_FIND_ROLE),
   scripted(G::DfuRole, &script::DFU_ROLE),
   scripted(G::DfuPrimary, &script::DFU_PRIMARY),
   scripted(G::DfuSecondary, &script::DFU_SECONDARY),
   procedure(G::DfuInCase, ProcedureId::DfuInCase),
   procedure(G::ReleasePeer, ProcedureId::ReleasePeer),
   on_failed(
      cancelling(scripted(G::SecondaryStaticHandover, &script::SECONDARY_STATIC_HANDOVER)),
      RuleEvents::STATIC_HANDOVER_FAILED,
   ),
   on_failed(
      cancelling(scripted(
         G::PrimaryStaticHandoverInCase,
         &script::PRIMARY_STATIC_HANDOVER_IN_CASE,
      )),
      RuleEvents::STATIC_HANDOVER_FAILED,
   ),
   on_failed(
      on_timeout(
         scripted(G::DynamicHandover, &script::DYNAMIC_HANDOVER),
         RuleEvents::HANDOVER_RETRY,
      ),
      RuleEvents::HANDOVER_FAILED,
   ),
   on_success(
      scripted(G::DynamicHandoverFailure, &script::DYNAMIC_HANDOVER_FAILURE),
      RuleEvents::HANDOVER_FAILURE_HANDLED,
   ),
];

pub fn entry(goal: GoalId) -> &'static GoalEntry {
   &GOALS[goal as usize]
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_table_is_indexed_by_id() {
      for (i, entry) in GOALS.iter().enumerate() {
         assert_eq!(entry.id as usize, i, "{}", entry.id);
      }
   }

   #[test]
   fn test_exclusivity_is_symmetric() {
      for entry in &GOALS {
         if let Some(other) = entry.exclusive {
            assert_eq!(super::entry(other).exclusive, Some(entry.id));
         }
      }
   }

   #[test]
   fn test_concurrent_group_is_mutual() {
      for entry in &GOALS {
         if let Contention::Concurrent(with) = entry.contention {
            for other in with.iter() {
               let Contention::Concurrent(back) = super::entry(other).contention else {
                  panic!("{other} is not concurrent");
               };
               assert!(back.contains(entry.id), "{other} does not list {}", entry.id);
            }
         }
      }
   }

   #[test]
   fn test_completion_events() {
      let handover = entry(GoalId::DynamicHandover);
      assert_eq!(handover.event_for(ProcResult::Timeout), Some(RuleEvents::HANDOVER_RETRY));
      assert_eq!(handover.event_for(ProcResult::Failed), Some(RuleEvents::HANDOVER_FAILED));
      assert_eq!(handover.event_for(ProcResult::Success), None);
      assert_eq!(
         entry(GoalId::PairPeer).event_for(ProcResult::Success),
         Some(RuleEvents::PEER_PAIRED)
      );
   }

   #[test]
   fn test_goal_set() {
      let mut set = GoalSet::of(&[GoalId::FindRole, GoalId::DynamicHandover]);
      assert!(set.contains(GoalId::FindRole));
      assert!(!set.contains(GoalId::PairPeer));
      assert_eq!(set.to_string(), "find_role|dynamic_handover");
      assert_eq!(serde_json::to_string(&set).unwrap(), r#"["find_role","dynamic_handover"]"#);

      set.remove(GoalId::FindRole);
      set.remove(GoalId::DynamicHandover);
      assert!(set.is_empty());
      assert_eq!(set.to_string(), "none");
   }
}
