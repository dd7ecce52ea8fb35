//! Rules used while secondary.

use crate::{
   config::Config,
   topology::{
      events::RuleEvents,
      goals::GoalId,
      rules::{RuleAction, RuleEntry, always, rule},
      state::TopologyState,
   },
};

fn peer_lost_find_role(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.is_goal_active(GoalId::SecondaryStaticHandover) && !state.in_case())
}

/// Also used after a failed connect: only worth searching when the primary
/// is known and not already connected.
fn connect_peer(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(
      state.db.primary_addr().is_some() && !state.in_case() && !state.peer_connected(),
   )
}

fn no_role_idle(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.in_case())
}

fn static_handover_command(state: &TopologyState, config: &Config) -> RuleAction {
   RuleAction::run_if(!state.in_case() && !config.fixed_role)
}

fn out_of_case(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.in_case())
}

use GoalId as G;
use RuleEvents as E;

pub(super) static RULES: &[RuleEntry] = &[
   rule(E::PEER_LINKLOSS, peer_lost_find_role, G::NoRoleFindRole),
   rule(E::PEER_DISCONNECTED_BREDR, peer_lost_find_role, G::NoRoleFindRole),
   rule(E::FAILED_PEER_CONNECT, connect_peer, G::NoRoleFindRole),
   rule(E::ROLE_SWITCH, connect_peer, G::SecondaryConnectPeer),
   rule(E::IN_CASE, no_role_idle, G::NoRoleIdle),
   rule(E::DFU_ROLE, always, G::DfuRole),
   rule(E::STATIC_HANDOVER, static_handover_command, G::SecondaryStaticHandover),
   rule(E::STATIC_HANDOVER_FAILED, out_of_case, G::NoRoleFindRole),
];

#[cfg(test)]
mod tests {
   use super::*;
   use crate::topology::{
      BdAddr, PhyState, Role,
      rules::{RuleSet, RuleSetId},
      state::PeerPairing,
   };

   fn secondary_state() -> TopologyState {
      let primary = BdAddr([0, 0, 0, 0, 0, 1]);
      let secondary = BdAddr([0, 0, 0, 0, 0, 2]);
      let mut state = TopologyState::new(secondary);
      state.role = Role::Secondary;
      state.phy = PhyState::InEar;
      state.db.peer = Some(PeerPairing { primary, secondary });
      state
   }

   #[test]
   fn test_peer_link_loss_finds_role() {
      let state = secondary_state();
      let config = Config::default();
      let mut rules = RuleSet::new(RuleSetId::Secondary);
      let decisions = rules.set_event(RuleEvents::PEER_LINKLOSS, &state, &config);
      assert_eq!(decisions.len(), 1);
      assert_eq!(decisions[0].goal, GoalId::NoRoleFindRole);
      assert_eq!(decisions[0].origin, RuleSetId::Secondary);
   }

   #[test]
   fn test_static_handover_ignored_in_case_or_fixed_role() {
      let mut state = secondary_state();
      let config = Config::default();
      assert_eq!(static_handover_command(&state, &config), RuleAction::RUN);

      let fixed = Config {
         fixed_role: true,
         ..Config::default()
      };
      assert_eq!(static_handover_command(&state, &fixed), RuleAction::Ignore);

      state.phy = PhyState::InCase;
      assert_eq!(static_handover_command(&state, &config), RuleAction::Ignore);
   }

   #[test]
   fn test_connected_peer_is_not_reconnected() {
      let mut state = secondary_state();
      state.db.peer_acl = true;
      assert_eq!(connect_peer(&state, &Config::default()), RuleAction::Ignore);
   }
}
