//! Topology controller.
//!
//! Owns the state, the three rule sets and the goal dispatcher. Every
//! [`Input`] updates the state, is offered to the running procedures and is
//! then turned into rule events for the rule set of the current role. The
//! resulting internal messages are drained before the next input is taken.

use log::{debug, info, warn};
use serde_json::json;

use crate::{
   config::Config,
   error::{Result, TopologyError},
   event::{EventSender, TopologyEvent},
   topology::{
      BdAddr, PhyState, Profiles, Role, Transport,
      dispatcher::{Dispatcher, GoalOutcome},
      events::RuleEvents,
      goals::{self, GoalId},
      io::{Command, FindRoleOutcome, GoalDecision, HandoverReason, Input, Message, Outbox, PowerPrepare},
      peer_sig::PeerSigMessage,
      procedures::{ProcContext, ProcResult},
      rules::{RuleSet, RuleSetId},
      state::{DeviceDb, HandsetRecord, TopologyState},
   },
};

/// Rule set that receives events while in `role`.
const fn routing(role: Role) -> Option<RuleSetId> {
   match role {
      Role::None | Role::Primary | Role::ActingPrimary => Some(RuleSetId::Primary),
      Role::Secondary => Some(RuleSetId::Secondary),
      Role::Dfu => Some(RuleSetId::Dfu),
      Role::Shutdown => None,
   }
}

const PROFILE_EVENTS: &[(Profiles, RuleEvents, RuleEvents)] = &[
   (
      Profiles::A2DP,
      RuleEvents::HANDSET_CONNECTED_A2DP,
      RuleEvents::HANDSET_DISCONNECTED_A2DP,
   ),
   (
      Profiles::AVRCP,
      RuleEvents::HANDSET_CONNECTED_AVRCP,
      RuleEvents::HANDSET_DISCONNECTED_AVRCP,
   ),
   (
      Profiles::HFP,
      RuleEvents::HANDSET_CONNECTED_HFP,
      RuleEvents::HANDSET_DISCONNECTED_HFP,
   ),
];

fn profile_events(profiles: Profiles, connected: bool) -> RuleEvents {
   PROFILE_EVENTS
      .iter()
      .filter(|(profile, ..)| profiles.contains(*profile))
      .fold(RuleEvents::NONE, |acc, (_, up, down)| {
         acc | if connected { *up } else { *down }
      })
}

/// The role arbitration engine.
pub struct Topology {
   config: Config,
   state: TopologyState,
   out: Outbox,
   dispatcher: Dispatcher,
   /// Indexed by [`RuleSetId`].
   rules: [RuleSet; 3],
   observers: Vec<EventSender>,
   halted: bool,
}

impl Topology {
   pub fn new(config: Config, own_addr: BdAddr) -> Self {
      Self::with_device_db(config, DeviceDb {
         own_addr,
         ..DeviceDb::default()
      })
   }

   /// Starts from a device database restored by the embedder.
   pub fn with_device_db(config: Config, db: DeviceDb) -> Self {
      let mut state = TopologyState::new(db.own_addr);
      state.db = db;
      Self {
         config,
         state,
         out: Outbox::default(),
         dispatcher: Dispatcher::new(),
         rules: [
            RuleSet::new(RuleSetId::Primary),
            RuleSet::new(RuleSetId::Secondary),
            RuleSet::new(RuleSetId::Dfu),
         ],
         observers: Vec::new(),
         halted: false,
      }
   }

   pub fn register_observer(&mut self, observer: EventSender) {
      self.observers.push(observer);
   }

   pub const fn state(&self) -> &TopologyState {
      &self.state
   }

   pub const fn config(&self) -> &Config {
      &self.config
   }

   pub const fn role(&self) -> Role {
      self.state.role
   }

   pub const fn is_goal_active(&self, goal: GoalId) -> bool {
      self.state.is_goal_active(goal)
   }

   /// Events currently set in one rule set.
   pub fn rule_events(&self, id: RuleSetId) -> RuleEvents {
      self.rules[id as usize].events()
   }

   /// True once an invariant violation stopped the engine.
   pub const fn is_halted(&self) -> bool {
      self.halted
   }

   /// Frame that sets `events` in the peer's active rule set.
   pub fn send_remote_rule_event(&self, events: RuleEvents) -> Command {
      let frame = PeerSigMessage::remote_rule_event(events).encode();
      debug!("Peer sig tx: {}", hex::encode(&frame));
      Command::PeerSigTx(frame)
   }

   pub fn status_json(&self) -> serde_json::Value {
      json!({
         "role": self.state.role.to_string(),
         "phy": self.state.phy.to_string(),
         "peer_phy": self.state.peer_phy.to_string(),
         "active_goals": self.state.active_goals,
         "pending_goals": self
            .dispatcher
            .pending_goals()
            .map(|g| g.to_string())
            .collect::<Vec<_>>(),
         "rule_events": {
            "primary": self.rule_events(RuleSetId::Primary).to_string(),
            "secondary": self.rule_events(RuleSetId::Secondary).to_string(),
            "dfu": self.rule_events(RuleSetId::Dfu).to_string(),
         },
         "db": self.state.db,
         "handover": self.state.handover,
         "hdma_created": self.state.hdma_created,
         "halted": self.halted,
      })
   }

   /// Processes one input to quiescence and returns the commands it produced.
   ///
   /// An error is always an invariant violation; the engine refuses further
   /// input afterwards.
   pub fn handle(&mut self, input: Input) -> Result<Vec<Command>> {
      if self.halted {
         return Err(TopologyError::invariant("input after the engine halted"));
      }
      if let Err(e) = self.process(input) {
         self.halted = true;
         self.out.queue.clear();
         return Err(e);
      }
      Ok(std::mem::take(&mut self.out.commands))
   }

   fn process(&mut self, input: Input) -> Result<()> {
      debug!("Input {input:?} in role {}", self.state.role);
      self.update_state(&input);
      self
         .dispatcher
         .handle_input(&mut ProcContext::new(&mut self.state, &self.config, &mut self.out), &input);
      self.translate(input);
      self.drain()
   }

   fn notify(&self, event: TopologyEvent) {
      for observer in &self.observers {
         observer.emit(event);
      }
   }

   // === State ===

   /// Bookkeeping that procedures and guards rely on seeing before the input
   /// itself is handled.
   fn update_state(&mut self, input: &Input) {
      let db = &mut self.state.db;
      match *input {
         Input::AclConnected {
            addr,
            transport: Transport::BrEdr,
         } => {
            if db.is_peer(addr) {
               db.peer_acl = true;
            } else if let Some(handset) = db.handset.as_mut().filter(|h| h.addr == addr) {
               handset.was_connected = true;
               db.handset_acl = true;
            }
         },
         Input::AclDisconnected {
            addr,
            transport: Transport::BrEdr,
            ..
         } => {
            if db.is_peer(addr) {
               db.peer_acl = false;
            } else if db.is_handset(addr) {
               db.handset_acl = false;
               db.handset_profiles = Profiles::NONE;
            }
         },
         Input::HandsetConnected { addr } => {
            if !db.is_handset(addr) {
               db.handset = Some(HandsetRecord::new(addr));
            }
            if let Some(handset) = db.handset.as_mut() {
               handset.was_connected = true;
            }
            db.handset_acl = true;
         },
         Input::HandsetDisconnected { addr, .. } if db.is_handset(addr) => {
            db.handset_acl = false;
            db.handset_profiles = Profiles::NONE;
         },
         Input::HandsetPaired { addr } => {
            if !db.is_handset(addr) {
               db.handset = Some(HandsetRecord::new(addr));
            }
         },
         Input::HandsetProfileConnected(profiles) => {
            db.handset_profiles = db.handset_profiles | profiles;
            if let Some(handset) = db.handset.as_mut() {
               handset.last_profiles = handset.last_profiles | profiles;
            }
         },
         Input::HandsetProfileDisconnected(profiles) => {
            db.handset_profiles = db.handset_profiles.difference(profiles);
         },
         Input::PeerPairCfm(Some(pairing)) => {
            info!("Peer paired: primary {} secondary {}", pairing.primary, pairing.secondary);
            db.peer = Some(pairing);
         },
         Input::StateProxyReady => self.state.state_proxy_ready = true,
         _ => {},
      }
   }

   /// HDMA exists exactly while both links and the state proxy are up.
   fn update_hdma(&mut self) {
      let wanted =
         self.state.handset_connected() && self.state.peer_connected() && self.state.state_proxy_ready;
      if wanted == self.state.hdma_created {
         return;
      }
      self.state.hdma_created = wanted;
      if wanted {
         debug!("Creating HDMA");
         self.out.command(Command::CreateHdma);
      } else {
         debug!("Destroying HDMA");
         self.out.command(Command::DestroyHdma);
         self.state.handover.recommendation = None;
      }
   }

   // === Input translation ===

   fn translate(&mut self, input: Input) {
      match input {
         Input::Start => self.start(),
         Input::PhyState(phy) => self.phy_state(phy),
         Input::PeerPhyState(phy) => {
            let old = self.state.peer_phy;
            self.state.peer_phy = phy;
            if phy.is_in_case() && !old.is_in_case() {
               self.reset_event(RuleEvents::PEER_OUT_CASE);
               self.set_event(RuleEvents::PEER_IN_CASE);
            } else if phy.is_out_of_case() && !old.is_out_of_case() {
               self.reset_event(RuleEvents::PEER_IN_CASE);
               self.set_event(RuleEvents::PEER_OUT_CASE);
            }
         },
         Input::StateProxyReady => self.update_hdma(),
         Input::AclConnected {
            addr,
            transport: Transport::BrEdr,
         } => {
            if self.state.db.is_peer(addr) {
               self.set_event(RuleEvents::PEER_CONNECTED_BREDR);
            }
            self.update_hdma();
         },
         Input::AclDisconnected {
            addr,
            transport: Transport::BrEdr,
            reason,
         } => {
            if self.state.db.is_peer(addr) {
               self.set_event(if reason.is_link_loss() {
                  RuleEvents::PEER_LINKLOSS
               } else {
                  RuleEvents::PEER_DISCONNECTED_BREDR
               });
            }
            self.update_hdma();
         },
         Input::HandsetConnected { .. } => {
            self.set_event(RuleEvents::HANDSET_CONNECTED_BREDR);
            self.update_hdma();
         },
         Input::HandsetDisconnected { addr, link_loss } => {
            if !self.state.db.is_handset(addr) {
               warn!("Disconnect from unknown handset {addr}");
               return;
            }
            self.set_event(if link_loss {
               RuleEvents::HANDSET_LINKLOSS
            } else {
               RuleEvents::HANDSET_DISCONNECTED_BREDR
            });
            self.update_hdma();
         },
         Input::HandsetProfileConnected(profiles) => {
            let events = profile_events(profiles, true);
            if !events.is_empty() {
               self.set_event(events);
            }
         },
         Input::HandsetProfileDisconnected(profiles) => {
            let events = profile_events(profiles, false);
            if !events.is_empty() {
               self.set_event(events);
            }
         },
         Input::HandsetPaired { .. } => self.set_event(RuleEvents::HANDSET_PAIRED),
         Input::FindRoleResult(outcome) => self.find_role_result(outcome),
         Input::PeerSigRx(frame) => match PeerSigMessage::decode(&frame) {
            Ok(message) => self.set_event(message.rule_events()),
            Err(e) => warn!("Dropping peer sig frame {}: {e}", hex::encode(&frame)),
         },
         Input::HandoverRecommendation(recommendation) => {
            debug!(
               "Handover recommended: {} ({})",
               recommendation.reason, recommendation.urgency
            );
            self.state.handover.recommendation = Some(recommendation);
            self.maybe_request_handover();
         },
         Input::HandoverRecommendationCancel => {
            debug!("Handover recommendation withdrawn");
            self.state.handover.recommendation = None;
         },
         Input::ProhibitHandover(prohibit) => {
            self.state.app_prohibit_handover = prohibit;
            if !prohibit {
               self.maybe_request_handover();
            }
         },
         Input::ProhibitHandsetConnect(prohibit) => {
            self.state.prohibit_connect_to_handset = prohibit;
            if prohibit {
               self.set_event(RuleEvents::PROHIBIT_CONNECT_TO_HANDSET);
            }
         },
         Input::DfuStarted => self.set_event(RuleEvents::DFU_ROLE),
         Input::DfuCompleted => self.set_event(RuleEvents::DFU_ROLE_COMPLETE),
         Input::PowerPrepare(prepare) => self.power_prepare(prepare),
         Input::PowerPrepareAbort => {
            if self.state.role == Role::Shutdown {
               info!("Power off aborted");
               self.set_role(Role::None);
            }
         },
         // Consumed by procedures only.
         _ => {},
      }
   }

   fn start(&mut self) {
      if !self.state.started {
         info!("Topology start");
         self.state.started = true;
         self.state.start_cfm_needed = true;
         self.set_event(if self.state.db.peer.is_some() {
            RuleEvents::PEER_PAIRED
         } else {
            RuleEvents::NO_PEER
         });
      } else if matches!(self.state.role, Role::Primary | Role::ActingPrimary | Role::Secondary) {
         self.confirm_start(true);
      } else {
         self.state.start_cfm_needed = true;
      }
   }

   fn confirm_start(&mut self, success: bool) {
      self.state.start_cfm_needed = false;
      info!("Start confirmed: {success}");
      self.notify(TopologyEvent::StartCfm { success });
   }

   fn phy_state(&mut self, phy: PhyState) {
      let old = self.state.phy;
      self.state.phy = phy;
      if self.state.suppress_events {
         debug!("Phy {phy} held back");
         return;
      }
      if phy.is_in_case() && !old.is_in_case() {
         self.reset_event(RuleEvents::OUT_CASE);
         self.set_event(RuleEvents::IN_CASE);
      } else if phy.is_out_of_case() && !old.is_out_of_case() {
         self.reset_event(RuleEvents::IN_CASE);
         self.set_event(RuleEvents::OUT_CASE);
      }
   }

   fn find_role_result(&mut self, outcome: FindRoleOutcome) {
      let event = match outcome {
         FindRoleOutcome::NoPeer => RuleEvents::NO_PEER,
         FindRoleOutcome::Primary => RuleEvents::ROLE_SELECTED_PRIMARY,
         FindRoleOutcome::Secondary => RuleEvents::ROLE_SELECTED_SECONDARY,
         FindRoleOutcome::ActingPrimary => RuleEvents::ROLE_SELECTED_ACTING_PRIMARY,
         FindRoleOutcome::Cancelled => return,
      };
      info!("Find role: {outcome}");
      if self.state.start_cfm_needed && outcome != FindRoleOutcome::NoPeer {
         self.confirm_start(true);
      }
      self.set_event(event);
   }

   fn maybe_request_handover(&mut self) {
      let Some(recommendation) = self.state.handover.recommendation else {
         return;
      };
      if recommendation.reason != HandoverReason::InCase {
         return;
      }
      if self.state.app_prohibit_handover {
         debug!("Handover prohibited by the application");
         return;
      }
      if self.state.is_goal_active(GoalId::DynamicHandover) {
         debug!("Handover already running");
         return;
      }
      self.set_event(RuleEvents::HANDOVER);
   }

   fn power_prepare(&mut self, prepare: PowerPrepare) {
      info!("Preparing for {prepare}");
      if self.state.role.is_primary() && self.state.peer_connected() {
         let frame = PeerSigMessage::static_handover_command().encode();
         debug!("Peer sig tx: {}", hex::encode(&frame));
         self.out.command(Command::PeerSigTx(frame));
      }
      self.set_role(Role::Shutdown);
      self.out.command(Command::PowerPrepareResponse);
   }

   // === Rule sets ===

   fn set_event(&mut self, events: RuleEvents) {
      let Some(id) = routing(self.state.role) else {
         debug!("Dropping {events} in role {}", self.state.role);
         return;
      };
      let decisions = self.rules[id as usize].set_event(events, &self.state, &self.config);
      self.post_decisions(decisions);
   }

   fn reset_event(&mut self, events: RuleEvents) {
      if let Some(id) = routing(self.state.role) {
         self.rules[id as usize].reset_event(events);
      }
   }

   fn check_rules(&mut self) {
      if let Some(id) = routing(self.state.role) {
         let decisions = self.rules[id as usize].check(&self.state, &self.config);
         self.post_decisions(decisions);
      }
   }

   fn post_decisions(&mut self, decisions: Vec<GoalDecision>) {
      for decision in decisions {
         self.out.post(Message::GoalDecision(decision));
      }
   }

   // === Roles ===

   fn set_role(&mut self, role: Role) {
      let old = self.state.role;
      self.state.role = role;
      self.notify(TopologyEvent::RoleChanged { role });
      if old == role {
         return;
      }
      info!("Role {old} -> {role}");
      if old.is_primary() && role.is_primary() {
         return;
      }

      self.state.handover.clear();
      if role != Role::Shutdown {
         self.out.command(Command::ConfigureProfiles(role));
      }

      match role {
         Role::None => {
            let pending = self
               .rules
               .iter()
               .fold(RuleEvents::NONE, |acc, rules| acc | rules.events());
            for rules in &mut self.rules {
               rules.reset();
            }
            if pending.intersects(RuleEvents::IN_CASE | RuleEvents::OUT_CASE) {
               if self.state.phy.is_in_case() {
                  self.set_event(RuleEvents::IN_CASE);
               } else if self.state.phy.is_out_of_case() {
                  self.set_event(RuleEvents::OUT_CASE);
               }
            }
         },
         Role::Secondary => {
            self.rules[RuleSetId::Primary as usize].reset();
            self.set_event(RuleEvents::ROLE_SWITCH);
            self.reevaluate_in_case();
         },
         Role::Primary | Role::ActingPrimary => {
            self.rules[RuleSetId::Secondary as usize].reset();
            self.set_event(RuleEvents::ROLE_SWITCH);
            self.reevaluate_in_case();
         },
         Role::Dfu | Role::Shutdown => {},
      }

      if self.state.start_cfm_needed
         && matches!(role, Role::Primary | Role::ActingPrimary | Role::Secondary)
      {
         self.confirm_start(true);
      }
   }

   /// An in-case event consumed under the old role is replayed to the new one.
   fn reevaluate_in_case(&mut self) {
      if self.state.in_case() {
         self.set_event(RuleEvents::IN_CASE);
      }
   }

   // === Message queue ===

   fn drain(&mut self) -> Result<()> {
      while let Some(message) = self.out.queue.pop_front() {
         self.dispatch(message)?;
      }
      Ok(())
   }

   fn dispatch(&mut self, message: Message) -> Result<()> {
      match message {
         Message::Started(proc) => debug!("Procedure {proc} started"),
         Message::Complete(proc, result) => {
            let mut ctx = ProcContext::new(&mut self.state, &self.config, &mut self.out);
            if let Some(outcome) = self.dispatcher.on_complete(proc, result, &mut ctx)? {
               self.goal_ended(outcome);
            }
         },
         Message::Cancelled(proc, result) => {
            if let Some(outcome) = self.dispatcher.on_cancelled(proc, result)? {
               self.goal_ended(outcome);
            }
         },
         Message::SetRole(role) => self.set_role(role),
         Message::SetEvent(events) => self.set_event(events),
         Message::ResetEvent(events) => self.reset_event(events),
         Message::GoalDecision(decision) => {
            let mut ctx = ProcContext::new(&mut self.state, &self.config, &mut self.out);
            self.dispatcher.add_goal(decision, false, &mut ctx)?;
            self.rules[decision.origin as usize].set_rule_complete(decision.goal);
            if routing(self.state.role) == Some(decision.origin) {
               self.check_rules();
            }
         },
         Message::ReplayGoal(decision) => {
            let mut ctx = ProcContext::new(&mut self.state, &self.config, &mut self.out);
            self.dispatcher.add_goal(decision, true, &mut ctx)?;
         },
      }
      Ok(())
   }

   fn goal_ended(&mut self, outcome: GoalOutcome) {
      let goal = outcome.goal();
      let mut ctx = ProcContext::new(&mut self.state, &self.config, &mut self.out);
      self.dispatcher.clear_goal(goal, &mut ctx);

      let GoalOutcome::Finished { result, .. } = outcome else {
         debug!("Goal {goal} cancelled");
         self.check_rules();
         return;
      };
      debug!("Goal {goal} finished: {result}");

      if goal == GoalId::DynamicHandover {
         match result {
            ProcResult::Success => {
               info!("Handover complete");
               self.state.handover.clear();
               self.notify(TopologyEvent::HandoverComplete);
            },
            ProcResult::Failed => {
               info!("Handover abandoned");
               self.state.handover.clear();
            },
            ProcResult::Timeout => {},
         }
      }

      match goals::entry(goal).event_for(result) {
         Some(event) => self.set_event(event),
         None => self.check_rules(),
      }
   }
}

#[cfg(test)]
mod tests {
   use std::{sync::Arc, time::Duration};

   use parking_lot::Mutex;

   use super::*;
   use crate::{
      event::EventBus,
      topology::{
         DisconnectReason,
         io::{HandoverRecommendation, HandoverStatus, HandoverUrgency, RequestStatus, ScanKind, ScanStatus},
         procedures::{
            ProcedureId,
            testing::{HANDSET, PRIMARY, SECONDARY},
         },
         state::PeerPairing,
      },
   };

   #[derive(Default)]
   struct Recorder(Mutex<Vec<TopologyEvent>>);

   impl EventBus for Recorder {
      fn emit(&self, event: TopologyEvent) {
         self.0.lock().push(event);
      }
   }

   impl Recorder {
      fn events(&self) -> Vec<TopologyEvent> {
         self.0.lock().clone()
      }
   }

   fn init_logging() {
      let _ = env_logger::builder().is_test(true).try_init();
   }

   fn paired_db(own_addr: BdAddr) -> DeviceDb {
      DeviceDb {
         own_addr,
         peer: Some(PeerPairing {
            primary: PRIMARY,
            secondary: SECONDARY,
         }),
         handset: Some(HandsetRecord {
            addr: HANDSET,
            was_connected: true,
            last_profiles: Profiles::NONE,
         }),
         ..DeviceDb::default()
      }
   }

   fn engine(config: Config, db: DeviceDb) -> (Topology, Arc<Recorder>) {
      init_logging();
      let recorder = Arc::new(Recorder::default());
      let mut topology = Topology::with_device_db(config, db);
      topology.register_observer(recorder.clone());
      (topology, recorder)
   }

   fn with_role(config: Config, role: Role) -> (Topology, Arc<Recorder>) {
      let own = if role == Role::Secondary { SECONDARY } else { PRIMARY };
      let (mut t, recorder) = engine(config, paired_db(own));
      t.state.role = role;
      t.state.phy = PhyState::InEar;
      t.state.started = true;
      (t, recorder)
   }

   fn feed(t: &mut Topology, inputs: impl IntoIterator<Item = Input>) -> Vec<Command> {
      inputs
         .into_iter()
         .flat_map(|input| t.handle(input).unwrap())
         .collect()
   }

   fn acl_up(addr: BdAddr) -> Input {
      Input::AclConnected {
         addr,
         transport: Transport::BrEdr,
      }
   }

   fn acl_down(addr: BdAddr, reason: DisconnectReason) -> Input {
      Input::AclDisconnected {
         addr,
         transport: Transport::BrEdr,
         reason,
      }
   }

   fn scan_cfms() -> [Input; 2] {
      [ScanKind::BredrScan, ScanKind::LeScan].map(|kind| Input::ScanCfm {
         kind,
         status: ScanStatus::Success,
      })
   }

   fn in_case_recommendation() -> Input {
      Input::HandoverRecommendation(HandoverRecommendation {
         reason: HandoverReason::InCase,
         urgency: HandoverUrgency::High,
         timestamp_ms: 0,
      })
   }

   /// Primary with both links, peer profiles and HDMA up, in the case.
   fn primary_in_case(config: Config) -> (Topology, Arc<Recorder>) {
      let (mut t, recorder) = with_role(config, Role::Primary);
      let commands = feed(&mut t, [
         acl_up(SECONDARY),
         Input::PeerProfilesConnectCfm { success: true },
         acl_up(HANDSET),
         Input::StateProxyReady,
      ]);
      assert!(commands.contains(&Command::CreateHdma));
      assert!(t.state.hdma_created);

      feed(&mut t, [Input::PhyState(PhyState::InCase)]);
      // The handover heuristic gets the first say.
      assert!(!t.is_goal_active(GoalId::NoRoleIdle));
      (t, recorder)
   }

   #[test]
   fn test_pair_peer_then_find_role() {
      let (mut t, recorder) = engine(Config::default(), DeviceDb {
         own_addr: PRIMARY,
         ..DeviceDb::default()
      });
      let commands = feed(&mut t, [Input::Start]);
      assert_eq!(commands, vec![Command::PairPeer]);
      assert!(t.is_goal_active(GoalId::PairPeer));

      let commands = feed(&mut t, [Input::PeerPairCfm(Some(PeerPairing {
         primary: PRIMARY,
         secondary: SECONDARY,
      }))]);
      assert!(!t.is_goal_active(GoalId::PairPeer));
      assert!(t.is_goal_active(GoalId::SetPrimaryAddressAndFindRole));
      assert!(commands.contains(&Command::BredrScan(false)));
      assert!(!t.rule_events(RuleSetId::Primary).contains(RuleEvents::NO_PEER));

      let commands = feed(&mut t, scan_cfms().into_iter().chain(scan_cfms()));
      assert!(commands.contains(&Command::OverrideAddress(PRIMARY)));
      assert!(commands.contains(&Command::FindRole {
         timeout: Some(Duration::from_secs(3))
      }));
      assert!(!recorder.events().iter().any(|e| matches!(e, TopologyEvent::StartCfm { .. })));

      let commands = feed(&mut t, [Input::FindRoleResult(FindRoleOutcome::Primary)]);
      assert_eq!(t.role(), Role::Primary);
      assert!(commands.contains(&Command::ConfigureProfiles(Role::Primary)));
      assert!(commands.contains(&Command::PeerPageScan(true)));
      assert_eq!(
         recorder
            .events()
            .iter()
            .filter(|e| matches!(e, TopologyEvent::StartCfm { success: true }))
            .count(),
         1
      );
   }

   #[test]
   fn test_handset_link_loss_reconnects_last_profiles() {
      let (mut t, _) = with_role(Config::default(), Role::Primary);
      feed(&mut t, [
         acl_up(HANDSET),
         Input::HandsetConnected { addr: HANDSET },
         Input::HandsetProfileConnected(Profiles::A2DP),
         Input::HandsetProfileConnected(Profiles::HFP),
      ]);
      assert_eq!(t.state.db.handset_profiles, Profiles::A2DP | Profiles::HFP);

      let commands = feed(&mut t, [
         acl_down(HANDSET, DisconnectReason::ConnectionTimeout),
         Input::HandsetDisconnected {
            addr: HANDSET,
            link_loss: true,
         },
      ]);
      assert!(commands.contains(&Command::ConnectHandset {
         addr: HANDSET,
         profiles: Profiles::A2DP | Profiles::HFP,
      }));
      assert!(t.is_goal_active(GoalId::ConnectHandset));
      // Link loss is not an explicit disconnect.
      assert!(!commands.contains(&Command::HandsetConnectable(true)));
      assert!(!t.rule_events(RuleSetId::Primary).contains(RuleEvents::HANDSET_DISCONNECTED_BREDR));

      feed(&mut t, [
         Input::HandsetProfileConnected(Profiles::A2DP),
         Input::HandsetProfileConnected(Profiles::HFP),
      ]);
      assert!(!t.is_goal_active(GoalId::ConnectHandset));
   }

   #[test]
   fn test_handset_service_disconnect_makes_connectable() {
      let (mut t, _) = with_role(Config::default(), Role::Primary);
      let commands = feed(&mut t, [acl_up(HANDSET)]);
      assert!(commands.is_empty());

      let commands = feed(&mut t, [Input::HandsetConnected { addr: HANDSET }]);
      assert_eq!(commands, vec![Command::HandsetConnectable(false)]);

      // The ACL stays up; only the handset service went away.
      let commands = feed(&mut t, [Input::HandsetDisconnected {
         addr: HANDSET,
         link_loss: false,
      }]);
      assert_eq!(commands, vec![Command::HandsetConnectable(true)]);
      assert!(!t.state.handset_connected());
      assert!(!t.is_goal_active(GoalId::ConnectHandset));
      assert!(!t.rule_events(RuleSetId::Primary).contains(RuleEvents::HANDSET_LINKLOSS));
   }

   #[test]
   fn test_in_case_waits_for_dynamic_handover() {
      let (mut t, recorder) = primary_in_case(Config::default());

      let commands = feed(&mut t, [in_case_recommendation()]);
      assert!(commands.contains(&Command::Handover { addr: HANDSET }));
      assert!(t.is_goal_active(GoalId::DynamicHandover));
      assert!(!t.is_goal_active(GoalId::NoRoleIdle));

      let commands = feed(&mut t, [Input::HandoverStatus(HandoverStatus::Success)]);
      assert_eq!(t.role(), Role::Secondary);
      assert!(commands.contains(&Command::ConfigureProfiles(Role::Secondary)));
      assert!(!t.is_goal_active(GoalId::DynamicHandover));
      assert!(t.is_goal_active(GoalId::NoRoleIdle));
      assert!(t.rule_events(RuleSetId::Primary).is_empty());

      let events = recorder.events();
      assert!(events.contains(&TopologyEvent::HandoverComplete));
      assert!(events.contains(&TopologyEvent::RoleChanged {
         role: Role::Secondary
      }));
   }

   #[test]
   fn test_handover_retries_then_gives_up() {
      let config = Config {
         handover_max_retry_attempts: 2,
         ..Config::default()
      };
      let (mut t, recorder) = primary_in_case(config);
      feed(&mut t, [in_case_recommendation()]);

      let commands = feed(&mut t, [Input::HandoverStatus(HandoverStatus::Vetoed)]);
      assert_eq!(t.state.handover.retry_count, 1);
      assert!(t.is_goal_active(GoalId::DynamicHandover));
      assert!(commands.contains(&Command::StartTimer {
         proc: ProcedureId::Handover,
         after: Duration::from_millis(250),
      }));
      assert!(!commands.iter().any(|c| matches!(c, Command::Handover { .. })));

      let commands = feed(&mut t, [Input::TimerExpired(ProcedureId::Handover)]);
      assert_eq!(commands, vec![Command::Handover { addr: HANDSET }]);

      let commands = feed(&mut t, [Input::HandoverStatus(HandoverStatus::Vetoed)]);
      assert!(!t.is_goal_active(GoalId::DynamicHandover));
      assert!(commands.contains(&Command::HandsetLeConnectable(true)));
      assert!(t.is_goal_active(GoalId::NoRoleIdle));
      assert_eq!(t.role(), Role::Primary);
      assert_eq!(t.state.handover.retry_count, 0);
      assert!(t.state.handover.recommendation.is_none());
      assert!(!recorder.events().contains(&TopologyEvent::HandoverComplete));
   }

   #[test]
   fn test_secondary_peer_link_loss_finds_role() {
      let (mut t, _) = with_role(Config::default(), Role::Secondary);
      t.state.db.peer_acl = true;

      let commands = feed(&mut t, [acl_down(PRIMARY, DisconnectReason::ConnectionTimeout)]);
      assert!(t.is_goal_active(GoalId::NoRoleFindRole));
      assert!(t.state.suppress_events);
      assert!(commands.contains(&Command::BredrScan(false)));

      let commands = feed(&mut t, scan_cfms());
      assert!(commands.contains(&Command::TerminateAllAcls));

      let commands = feed(
         &mut t,
         [Input::AclCloseAllCfm]
            .into_iter()
            .chain(scan_cfms()),
      );
      assert_eq!(t.role(), Role::None);
      assert_eq!(t.state.db.own_addr, PRIMARY);
      assert!(commands.contains(&Command::OverrideAddress(PRIMARY)));
      assert!(commands.contains(&Command::FindRole {
         timeout: Some(Duration::from_secs(5))
      }));
      assert!(!t.state.suppress_events);
   }

   #[test]
   fn test_events_reach_only_the_role_rule_set() {
      let (mut t, _) = with_role(Config::default(), Role::Secondary);
      let commands = feed(&mut t, [Input::HandsetDisconnected {
         addr: HANDSET,
         link_loss: true,
      }]);
      assert!(commands.is_empty());
      assert!(t.rule_events(RuleSetId::Primary).is_empty());
      assert!(t.rule_events(RuleSetId::Secondary).contains(RuleEvents::HANDSET_LINKLOSS));

      let (mut t, _) = with_role(Config::default(), Role::Shutdown);
      feed(&mut t, [Input::PhyState(PhyState::InCase)]);
      for id in [RuleSetId::Primary, RuleSetId::Secondary, RuleSetId::Dfu] {
         assert!(t.rule_events(id).is_empty());
      }
   }

   #[test]
   fn test_shutdown_sends_static_handover_command() {
      let (mut t, recorder) = with_role(Config::default(), Role::Primary);
      t.state.db.peer_acl = true;

      let commands = feed(&mut t, [Input::PowerPrepare(PowerPrepare::Shutdown)]);
      let frame = PeerSigMessage::static_handover_command().encode();
      assert_eq!(commands, vec![
         Command::PeerSigTx(frame.clone()),
         Command::PowerPrepareResponse
      ]);
      assert_eq!(t.role(), Role::Shutdown);
      assert!(recorder.events().contains(&TopologyEvent::RoleChanged {
         role: Role::Shutdown
      }));

      feed(&mut t, [Input::PowerPrepareAbort]);
      assert_eq!(t.role(), Role::None);

      let (mut peer, _) = with_role(Config::default(), Role::Secondary);
      peer.state.db.peer_acl = true;
      let commands = feed(&mut peer, [Input::PeerSigRx(frame)]);
      assert!(peer.is_goal_active(GoalId::SecondaryStaticHandover));
      assert!(commands.contains(&Command::StartTimer {
         proc: ProcedureId::WaitPeerLinkDrop,
         after: Duration::from_millis(1000),
      }));

      let commands = feed(&mut peer, [acl_down(PRIMARY, DisconnectReason::RemoteTerminated)]);
      assert!(!peer.is_goal_active(GoalId::NoRoleFindRole));
      assert!(commands.contains(&Command::BredrScan(false)));
   }

   #[test]
   fn test_dfu_routes_to_dfu_rules() {
      let (mut t, _) = with_role(Config::default(), Role::Primary);
      let commands = feed(&mut t, [Input::DfuStarted]);
      assert_eq!(t.role(), Role::Dfu);
      assert!(commands.contains(&Command::CancelFindRole));
      assert!(commands.contains(&Command::ConfigureProfiles(Role::Dfu)));
      assert!(!t.is_goal_active(GoalId::DfuRole));

      let commands = feed(&mut t, [Input::DfuCompleted]);
      assert!(t.is_goal_active(GoalId::NoRoleFindRole));
      assert!(commands.contains(&Command::BredrScan(false)));
      assert!(t.rule_events(RuleSetId::Primary).is_empty());
   }

   #[test]
   fn test_malformed_peer_sig_is_dropped() {
      let (mut t, _) = with_role(Config::default(), Role::Secondary);
      let commands = feed(&mut t, [Input::PeerSigRx([0x7f, 0x00].into_iter().collect())]);
      assert!(commands.is_empty());
      assert!(!t.is_halted());
   }

   #[test]
   fn test_remote_rule_event_frame() {
      let (t, _) = with_role(Config::default(), Role::Primary);
      let Command::PeerSigTx(frame) = t.send_remote_rule_event(RuleEvents::HANDSET_PAIRED) else {
         panic!("expected a peer sig frame");
      };
      assert_eq!(
         PeerSigMessage::decode(&frame).unwrap().rule_events(),
         RuleEvents::HANDSET_PAIRED
      );
   }

   #[test]
   fn test_repeat_start_confirms_immediately() {
      let (mut t, recorder) = with_role(Config::default(), Role::Primary);
      feed(&mut t, [Input::Start]);
      assert_eq!(recorder.events(), vec![TopologyEvent::StartCfm { success: true }]);
      assert!(!t.state.start_cfm_needed);
   }

   #[test]
   fn test_prohibit_handset_connect_disconnects() {
      let (mut t, _) = with_role(Config::default(), Role::Primary);
      feed(&mut t, [acl_up(HANDSET)]);
      let commands = feed(&mut t, [Input::ProhibitHandsetConnect(true)]);
      assert!(commands.contains(&Command::DisconnectHandset));

      feed(&mut t, [Input::HandsetDisconnectCfm {
         status: RequestStatus::Success,
      }]);
      assert!(!t.is_goal_active(GoalId::DisconnectHandset));

      // Reconnects are refused while prohibited.
      let commands = feed(&mut t, [
         acl_down(HANDSET, DisconnectReason::ConnectionTimeout),
         Input::HandsetDisconnected {
            addr: HANDSET,
            link_loss: true,
         },
      ]);
      assert!(!commands.iter().any(|c| matches!(c, Command::ConnectHandset { .. })));
   }

   #[test]
   fn test_invariant_violation_halts() {
      let (mut t, _) = engine(Config::default(), DeviceDb {
         own_addr: PRIMARY,
         ..DeviceDb::default()
      });
      feed(&mut t, [Input::PhyState(PhyState::InCase)]);
      let frame = PeerSigMessage::remote_rule_event(RuleEvents::PEER_PAIRED).encode();
      feed(&mut t, [Input::PeerSigRx(frame)]);
      assert!(t.is_goal_active(GoalId::SetPrimaryAddress));

      t.handle(scan_cfms()[0].clone()).unwrap();
      let err = t.handle(scan_cfms()[1].clone()).unwrap_err();
      assert!(err.is_invariant_violation());
      assert!(t.is_halted());
      assert!(t.handle(Input::Start).is_err());
   }

   #[test]
   fn test_status_json() {
      let (mut t, _) = with_role(Config::default(), Role::Primary);
      feed(&mut t, [Input::HandsetDisconnected {
         addr: HANDSET,
         link_loss: true,
      }]);
      let status = t.status_json();
      assert_eq!(status["role"], "primary");
      assert_eq!(status["active_goals"], json!(["connect_handset"]));
      assert_eq!(status["halted"], false);
   }
}
