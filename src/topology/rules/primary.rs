//! Rules used while primary or without a role.

use log::debug;

use crate::{
   config::Config,
   topology::{
      Profiles, Role,
      events::RuleEvents,
      goals::GoalId,
      procedures::{FindRoleMode, ProcParams},
      rules::{RuleAction, RuleEntry, always, rule},
      state::TopologyState,
   },
};

/// Why the handset is being connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectReason {
   RoleSwitch,
   OutOfCase,
   Pairing,
   LinkLoss,
}

const DYNAMIC_HANDOVER_GOALS: &[GoalId] = &[GoalId::DynamicHandover, GoalId::DynamicHandoverFailure];

fn peer_paired_in_case(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.in_case())
}

fn peer_paired_out_of_case(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.in_case())
}

fn no_role_idle(state: &TopologyState, config: &Config) -> RuleAction {
   if !state.in_case() || state.is_goal_active(GoalId::PairPeer) || state.db.peer.is_none() {
      return RuleAction::Ignore;
   }
   // Let the handover heuristic react to the case first.
   if !config.fixed_role && state.hdma_created {
      return RuleAction::Defer;
   }
   if state.is_any_goal_active(DYNAMIC_HANDOVER_GOALS)
      || state.is_goal_active(GoalId::PrimaryStaticHandoverInCase)
   {
      return RuleAction::Defer;
   }
   RuleAction::RUN
}

fn find_role(state: &TopologyState, _: &Config) -> RuleAction {
   if state.in_case()
      || state.is_any_goal_active(DYNAMIC_HANDOVER_GOALS)
      || state.is_any_goal_active(&[
         GoalId::PairPeer,
         GoalId::PrimaryStaticHandoverInCase,
         GoalId::NoRoleFindRole,
      ])
   {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::FindRole(FindRoleMode::Bounded))
}

fn cancel_find_role(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.in_case() && !state.is_goal_active(GoalId::PrimaryStaticHandoverInCase))
}

fn selected_primary(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.in_case())
}

fn no_role_selected_secondary(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.in_case() && state.role == Role::None)
}

fn primary_selected_secondary(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.in_case() && state.role.is_primary())
}

fn peer_lost_find_role(state: &TopologyState, _: &Config) -> RuleAction {
   if state.in_case() || !state.role.is_primary() {
      return RuleAction::Ignore;
   }
   if state.is_any_goal_active(&[GoalId::NoRoleIdle, GoalId::NoRoleFindRole]) {
      return RuleAction::Defer;
   }
   if state.is_goal_active(GoalId::PrimaryStaticHandoverInCase)
      || state.db.secondary_addr().is_none()
      || state.peer_connected()
   {
      return RuleAction::Ignore;
   }
   RuleAction::RUN
}

fn enable_connectable_peer(state: &TopologyState, _: &Config) -> RuleAction {
   if state.db.secondary_addr().is_none()
      || state.in_case()
      || state.peer_connected()
      || state.role == Role::ActingPrimary
   {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Enable(true))
}

fn disable_connectable_peer(state: &TopologyState, _: &Config) -> RuleAction {
   if state.db.secondary_addr().is_none() || !state.peer_connected() {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Enable(false))
}

fn connect_peer_profiles(state: &TopologyState, config: &Config) -> RuleAction {
   if state.in_case() {
      return RuleAction::Ignore;
   }
   debug!("Connecting peer profiles {}", config.peer_profiles);
   RuleAction::Run(ProcParams::Profiles(config.peer_profiles))
}

fn release_peer(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.in_case())
}

fn enable_connectable_handset(state: &TopologyState, _: &Config) -> RuleAction {
   if state.is_goal_active(GoalId::PrimaryStaticHandoverInCase)
      || state.db.handset_addr().is_none()
      || state.handset_connected()
      || state.in_case()
      || !state.role.is_primary()
   {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Enable(true))
}

fn disable_connectable_handset(state: &TopologyState, _: &Config) -> RuleAction {
   if state.db.handset_addr().is_none() || !state.handset_connected() {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Enable(false))
}

fn allow_handset_connect(state: &TopologyState, _: &Config) -> RuleAction {
   if state.in_case() || !state.role.is_primary() {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Enable(true))
}

fn enable_le_connectable_handset(state: &TopologyState, _: &Config) -> RuleAction {
   if state.in_case() {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Enable(true))
}

/// Which profiles to bring back, or `None` when the handset should be left
/// alone.
fn handset_profiles(state: &TopologyState, reason: ConnectReason) -> Option<Profiles> {
   if state.in_case() || state.prohibit_connect_to_handset {
      return None;
   }
   let handset = state.db.handset?;

   let media = Profiles::A2DP | Profiles::AVRCP | Profiles::HFP;
   if reason != ConnectReason::LinkLoss && state.db.handset_profiles.intersects(media) {
      debug!("Handset already has {} connected", state.db.handset_profiles);
      return None;
   }

   if !handset.was_connected && reason != ConnectReason::OutOfCase {
      return None;
   }
   let mut profiles = handset.last_profiles;
   if matches!(reason, ConnectReason::OutOfCase | ConnectReason::Pairing) {
      profiles = profiles | Profiles::HFP | Profiles::A2DP;
   }
   debug!("Handset connect for {reason}: {profiles}");
   Some(profiles)
}

fn connect_handset(state: &TopologyState, reason: ConnectReason) -> RuleAction {
   match handset_profiles(state, reason) {
      Some(profiles) => RuleAction::Run(ProcParams::Profiles(profiles)),
      None => RuleAction::Ignore,
   }
}

fn role_switch_connect_handset(state: &TopologyState, _: &Config) -> RuleAction {
   connect_handset(state, ConnectReason::RoleSwitch)
}

fn link_loss_connect_handset(state: &TopologyState, _: &Config) -> RuleAction {
   connect_handset(state, ConnectReason::LinkLoss)
}

fn out_of_case_connect_handset(state: &TopologyState, _: &Config) -> RuleAction {
   if !state.role.is_primary() {
      return RuleAction::Ignore;
   }
   connect_handset(state, ConnectReason::OutOfCase)
}

fn pairing_connect_handset(state: &TopologyState, _: &Config) -> RuleAction {
   if !state.role.is_primary() {
      return RuleAction::Ignore;
   }
   connect_handset(state, ConnectReason::Pairing)
}

fn disconnect_handset(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.handset_connected())
}

fn handover_allowed(state: &TopologyState, config: &Config) -> bool {
   !state.app_prohibit_handover
      && !config.fixed_role
      && !state.is_any_goal_active(DYNAMIC_HANDOVER_GOALS)
}

fn handover_start(state: &TopologyState, config: &Config) -> RuleAction {
   if !config.dynamic_handover_supported || !handover_allowed(state, config) {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Handover { delay: false })
}

fn static_handover_start(state: &TopologyState, config: &Config) -> RuleAction {
   if config.dynamic_handover_supported || !handover_allowed(state, config) {
      return RuleAction::Ignore;
   }
   RuleAction::run_if(state.peer_connected())
}

fn handover_retry(state: &TopologyState, config: &Config) -> RuleAction {
   if state.app_prohibit_handover || config.fixed_role {
      return RuleAction::Ignore;
   }
   RuleAction::Run(ProcParams::Handover { delay: true })
}

fn handover_failure_handled(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.in_case())
}

use GoalId as G;
use RuleEvents as E;

pub(super) static RULES: &[RuleEntry] = &[
   rule(E::NO_PEER, always, G::PairPeer),
   rule(E::PEER_PAIRED, peer_paired_in_case, G::SetPrimaryAddress),
   rule(E::PEER_PAIRED, peer_paired_out_of_case, G::SetPrimaryAddressAndFindRole),
   rule(E::STATIC_HANDOVER_FAILED, no_role_idle, G::NoRoleIdle),
   rule(E::STATIC_HANDOVER_FAILED, find_role, G::FindRole),
   rule(E::IN_CASE, cancel_find_role, G::CancelFindRole),
   rule(E::OUT_CASE, find_role, G::FindRole),
   rule(E::ROLE_SELECTED_PRIMARY, selected_primary, G::BecomePrimary),
   rule(E::ROLE_SELECTED_SECONDARY, no_role_selected_secondary, G::BecomeSecondary),
   rule(E::ROLE_SELECTED_ACTING_PRIMARY, selected_primary, G::BecomeActingPrimary),
   rule(E::ROLE_SELECTED_SECONDARY, primary_selected_secondary, G::RoleSwitchToSecondary),
   rule(E::PEER_LINKLOSS, peer_lost_find_role, G::PrimaryFindRole),
   rule(E::PEER_DISCONNECTED_BREDR, peer_lost_find_role, G::PrimaryFindRole),
   rule(E::DFU_ROLE, always, G::DfuRole),
   rule(E::FAILED_PEER_CONNECT, peer_lost_find_role, G::PrimaryFindRole),
   rule(E::ROLE_SWITCH, enable_connectable_peer, G::PrimaryConnectablePeer),
   rule(E::PEER_CONNECTED_BREDR, disable_connectable_peer, G::PrimaryConnectablePeer),
   rule(E::PEER_CONNECTED_BREDR, connect_peer_profiles, G::PrimaryConnectPeerProfiles),
   rule(E::PEER_CONNECTED_BREDR, release_peer, G::ReleasePeer),
   rule(E::HANDSET_DISCONNECTED_BREDR, enable_connectable_handset, G::ConnectableHandset),
   rule(E::HANDSET_LINKLOSS, link_loss_connect_handset, G::ConnectHandset),
   rule(E::IN_CASE, no_role_idle, G::NoRoleIdle),
   rule(E::ROLE_SWITCH, enable_connectable_handset, G::ConnectableHandset),
   rule(E::ROLE_SWITCH, allow_handset_connect, G::AllowHandsetConnect),
   rule(E::ROLE_SWITCH, enable_le_connectable_handset, G::LeConnectableHandset),
   rule(E::ROLE_SWITCH, role_switch_connect_handset, G::ConnectHandset),
   rule(E::OUT_CASE, out_of_case_connect_handset, G::ConnectHandset),
   rule(E::HANDSET_PAIRED, pairing_connect_handset, G::ConnectHandset),
   rule(E::HANDSET_CONNECTED_BREDR, disable_connectable_handset, G::ConnectableHandset),
   rule(E::PROHIBIT_CONNECT_TO_HANDSET, disconnect_handset, G::DisconnectHandset),
   rule(E::HANDOVER, handover_start, G::DynamicHandover),
   rule(E::HANDOVER, static_handover_start, G::PrimaryStaticHandoverInCase),
   rule(E::HANDOVER_RETRY, handover_retry, G::DynamicHandover),
   rule(E::HANDOVER_FAILED, always, G::DynamicHandoverFailure),
   rule(E::HANDOVER_FAILURE_HANDLED, handover_failure_handled, G::NoRoleIdle),
];

#[cfg(test)]
mod tests {
   use super::*;
   use crate::topology::{
      BdAddr, PhyState,
      state::{HandsetRecord, PeerPairing},
   };

   const PRIMARY: BdAddr = BdAddr([0, 0, 0, 0, 0, 1]);
   const SECONDARY: BdAddr = BdAddr([0, 0, 0, 0, 0, 2]);
   const HANDSET: BdAddr = BdAddr([0, 0, 0, 0, 0, 3]);

   fn primary_state() -> TopologyState {
      let mut state = TopologyState::new(PRIMARY);
      state.role = Role::Primary;
      state.phy = PhyState::OutOfEar;
      state.db.peer = Some(PeerPairing {
         primary: PRIMARY,
         secondary: SECONDARY,
      });
      state.db.handset = Some(HandsetRecord {
         addr: HANDSET,
         was_connected: true,
         last_profiles: Profiles::A2DP | Profiles::HFP,
      });
      state
   }

   #[test]
   fn test_link_loss_reconnects_last_profiles() {
      let mut state = primary_state();
      state.db.handset_profiles = Profiles::AVRCP;
      assert_eq!(
         link_loss_connect_handset(&state, &Config::default()),
         RuleAction::Run(ProcParams::Profiles(Profiles::A2DP | Profiles::HFP))
      );
   }

   #[test]
   fn test_role_switch_skips_already_connected_handset() {
      let mut state = primary_state();
      state.db.handset_profiles = Profiles::HFP;
      assert_eq!(
         role_switch_connect_handset(&state, &Config::default()),
         RuleAction::Ignore
      );
   }

   #[test]
   fn test_out_of_case_adds_media_profiles_for_new_handset() {
      let mut state = primary_state();
      state.db.handset = Some(HandsetRecord::new(HANDSET));
      assert_eq!(
         out_of_case_connect_handset(&state, &Config::default()),
         RuleAction::Run(ProcParams::Profiles(Profiles::HFP | Profiles::A2DP))
      );
      state.role = Role::Secondary;
      assert_eq!(pairing_connect_handset(&state, &Config::default()), RuleAction::Ignore);
   }

   #[test]
   fn test_pairing_needs_a_previous_connection() {
      let mut state = primary_state();
      state.db.handset = Some(HandsetRecord::new(HANDSET));
      assert_eq!(pairing_connect_handset(&state, &Config::default()), RuleAction::Ignore);

      state.db.handset = Some(HandsetRecord {
         addr: HANDSET,
         was_connected: true,
         last_profiles: Profiles::AVRCP,
      });
      assert_eq!(
         pairing_connect_handset(&state, &Config::default()),
         RuleAction::Run(ProcParams::Profiles(
            Profiles::AVRCP | Profiles::HFP | Profiles::A2DP
         ))
      );
   }

   #[test]
   fn test_prohibited_handset_connect() {
      let mut state = primary_state();
      state.prohibit_connect_to_handset = true;
      assert_eq!(link_loss_connect_handset(&state, &Config::default()), RuleAction::Ignore);
   }

   #[test]
   fn test_in_case_defers_during_dynamic_handover() {
      let mut state = primary_state();
      state.phy = PhyState::InCase;
      state.active_goals.insert(GoalId::DynamicHandover);
      assert_eq!(no_role_idle(&state, &Config::default()), RuleAction::Defer);

      state.active_goals.remove(GoalId::DynamicHandover);
      state.hdma_created = true;
      assert_eq!(no_role_idle(&state, &Config::default()), RuleAction::Defer);

      let config = Config {
         fixed_role: true,
         ..Config::default()
      };
      assert_eq!(no_role_idle(&state, &config), RuleAction::RUN);
   }

   #[test]
   fn test_peer_lost_find_role() {
      let mut state = primary_state();
      let config = Config::default();
      assert_eq!(peer_lost_find_role(&state, &config), RuleAction::RUN);

      state.active_goals.insert(GoalId::NoRoleIdle);
      assert_eq!(peer_lost_find_role(&state, &config), RuleAction::Defer);

      state.active_goals.remove(GoalId::NoRoleIdle);
      state.db.peer_acl = true;
      assert_eq!(peer_lost_find_role(&state, &config), RuleAction::Ignore);

      state.db.peer_acl = false;
      state.role = Role::None;
      assert_eq!(peer_lost_find_role(&state, &config), RuleAction::Ignore);
   }

   #[test]
   fn test_handover_picks_dynamic_or_static() {
      let mut state = primary_state();
      state.db.peer_acl = true;
      let dynamic = Config::default();
      assert_eq!(
         handover_start(&state, &dynamic),
         RuleAction::Run(ProcParams::Handover { delay: false })
      );
      assert_eq!(static_handover_start(&state, &dynamic), RuleAction::Ignore);

      let fixed = Config {
         dynamic_handover_supported: false,
         ..Config::default()
      };
      assert_eq!(handover_start(&state, &fixed), RuleAction::Ignore);
      assert_eq!(static_handover_start(&state, &fixed), RuleAction::RUN);

      state.app_prohibit_handover = true;
      assert_eq!(handover_start(&state, &dynamic), RuleAction::Ignore);
      assert_eq!(handover_retry(&state, &dynamic), RuleAction::Ignore);
   }

   #[test]
   fn test_acting_primary_is_not_connectable_for_peer() {
      let mut state = primary_state();
      let config = Config::default();
      assert_eq!(
         enable_connectable_peer(&state, &config),
         RuleAction::Run(ProcParams::Enable(true))
      );
      state.role = Role::ActingPrimary;
      assert_eq!(enable_connectable_peer(&state, &config), RuleAction::Ignore);
   }
}
