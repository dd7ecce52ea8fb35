//! Rules used while a firmware upgrade owns the role.

use crate::{
   config::Config,
   topology::{
      events::RuleEvents,
      goals::GoalId,
      procedures::ProcParams,
      rules::{RuleAction, RuleEntry, always, rule},
      state::TopologyState,
   },
};

fn out_of_case(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(state.phy.is_out_of_case())
}

fn in_case(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(!state.phy.is_out_of_case())
}

/// A secondary that lost the primary while upgrading in the case reconnects.
fn secondary_link_loss(state: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::run_if(
      !state.db.is_primary_addr()
         && state.db.primary_addr().is_some()
         && state.in_case()
         && !state.peer_connected(),
   )
}

fn enable_connectable_handset(_: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::Run(ProcParams::Enable(true))
}

use GoalId as G;
use RuleEvents as E;

pub(super) static RULES: &[RuleEntry] = &[
   rule(E::IN_CASE, always, G::DfuInCase),
   rule(E::OUT_CASE, always, G::NoRoleFindRole),
   rule(E::DFU_ROLE_COMPLETE, out_of_case, G::NoRoleFindRole),
   rule(E::DFU_ROLE_COMPLETE, in_case, G::NoRoleIdle),
   rule(E::ROLE_SELECTED_PRIMARY, always, G::DfuPrimary),
   rule(E::PEER_LINKLOSS, secondary_link_loss, G::SecondaryConnectPeer),
   rule(E::ROLE_SELECTED_SECONDARY, always, G::DfuSecondary),
   rule(E::HANDSET_DISCONNECTED_BREDR, enable_connectable_handset, G::ConnectableHandset),
];
