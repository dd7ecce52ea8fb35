//! Procedures: atomic asynchronous actions.
//!
//! Every procedure confirms its start, reports exactly one completion per
//! run and answers every cancel with exactly one cancel confirmation. All
//! confirmations travel through the engine's message queue, so a caller never
//! sees a callback re-entrantly.

mod find_role;
mod handover;
mod handset;
mod oneshot;
mod peer;
mod radio;

use std::time::Duration;

use log::debug;
use strum::IntoEnumIterator;

use crate::{
   config::Config,
   error::{Result, TopologyError},
   topology::{
      Profiles, Role,
      events::RuleEvents,
      io::{Command, Input, Message, Outbox},
      state::TopologyState,
   },
};

/// Identifies a procedure. There is a single instance of each.
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
pub enum ProcedureId {
   PairPeer,
   FindRole,
   CancelFindRole,
   SecConnectPeer,
   PriConnectablePeer,
   ConnectPeerProfiles,
   DisconnectPeerProfiles,
   ConnectHandset,
   DisconnectHandset,
   ConnectableHandset,
   LeConnectableHandset,
   AllowHandsetConnect,
   PermitBt,
   ProhibitBt,
   PermitLeConnections,
   ProhibitLeConnections,
   DisconnectLeConnections,
   CleanConnections,
   SetAddress,
   SetRole,
   EventSuppress,
   ReleasePeer,
   CommandRoleSwitch,
   WaitPeerLinkDrop,
   Handover,
   DfuInCase,
}

/// Result of a procedure run or of a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProcResult {
   Success,
   Failed,
   Timeout,
}

/// How long find-role searches for the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindRoleMode {
   /// First search after start-up.
   Initial,
   Bounded,
   Continuous,
}

/// Which of the pair's addresses to adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AddressKind {
   Primary,
   Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SuppressMode {
   Suppress,
   ExposeInCase,
   ExposeOutCase,
}

/// Parameters for a procedure, chosen by a guard or fixed by a script step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcParams {
   #[default]
   None,
   Enable(bool),
   FindRole(FindRoleMode),
   Profiles(Profiles),
   Address(AddressKind),
   Role(Role),
   Suppress(SuppressMode),
   Handover {
      delay: bool,
   },
   /// Script steps only: use the parameters the goal was started with.
   FromGoal,
}

impl ProcParams {
   pub const fn enable(self) -> Option<bool> {
      match self {
         Self::Enable(enable) => Some(enable),
         _ => None,
      }
   }
}

/// Access a procedure has while it runs.
pub struct ProcContext<'a> {
   pub state: &'a mut TopologyState,
   pub config: &'a Config,
   out: &'a mut Outbox,
}

impl<'a> ProcContext<'a> {
   pub(crate) fn new(state: &'a mut TopologyState, config: &'a Config, out: &'a mut Outbox) -> Self {
      Self { state, config, out }
   }

   pub fn command(&mut self, command: Command) {
      self.out.command(command);
   }

   pub(crate) fn post(&mut self, message: Message) {
      self.out.post(message);
   }

   pub fn started(&mut self, proc: ProcedureId) {
      self.out.post(Message::Started(proc));
   }

   pub fn complete(&mut self, proc: ProcedureId, result: ProcResult) {
      debug!("Procedure {proc} complete: {result}");
      self.out.post(Message::Complete(proc, result));
   }

   pub fn cancelled(&mut self, proc: ProcedureId, result: ProcResult) {
      debug!("Procedure {proc} cancelled: {result}");
      self.out.post(Message::Cancelled(proc, result));
   }

   pub fn start_timer(&mut self, proc: ProcedureId, after: Duration) {
      self.out.command(Command::StartTimer { proc, after });
   }

   pub fn cancel_timer(&mut self, proc: ProcedureId) {
      self.out.command(Command::CancelTimer(proc));
   }

   pub fn set_role(&mut self, role: Role) {
      self.out.post(Message::SetRole(role));
   }

   pub fn set_event(&mut self, events: RuleEvents) {
      self.out.post(Message::SetEvent(events));
   }

   pub fn reset_event(&mut self, events: RuleEvents) {
      self.out.post(Message::ResetEvent(events));
   }
}

/// Start/complete/cancel contract shared by every procedure.
pub trait Procedure: Send {
   fn id(&self) -> ProcedureId;

   fn is_active(&self) -> bool;

   /// Begins the action. Errors are invariant violations, not outcomes.
   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()>;

   /// Stops the action; must lead to exactly one cancel confirmation.
   fn cancel(&mut self, ctx: &mut ProcContext<'_>);

   /// Inbound notification, delivered only while the procedure is active.
   fn handle(&mut self, _ctx: &mut ProcContext<'_>, _input: &Input) {}
}

fn build(id: ProcedureId) -> Box<dyn Procedure> {
   match id {
      ProcedureId::PairPeer => Box::new(peer::PairPeer::default()),
      ProcedureId::FindRole => Box::new(find_role::FindRole::default()),
      ProcedureId::SecConnectPeer => Box::new(peer::SecConnectPeer::default()),
      ProcedureId::PriConnectablePeer => Box::new(peer::PriConnectablePeer::default()),
      ProcedureId::ConnectPeerProfiles => Box::new(peer::PeerProfiles::connect()),
      ProcedureId::DisconnectPeerProfiles => Box::new(peer::PeerProfiles::disconnect()),
      ProcedureId::ConnectHandset => Box::new(handset::ConnectHandset::default()),
      ProcedureId::DisconnectHandset => Box::new(handset::DisconnectHandset::default()),
      ProcedureId::PermitBt => Box::new(radio::RadioActivity::permit()),
      ProcedureId::ProhibitBt => Box::new(radio::RadioActivity::prohibit()),
      ProcedureId::CleanConnections => Box::new(radio::CleanConnections::default()),
      ProcedureId::CommandRoleSwitch => Box::new(peer::CommandRoleSwitch::default()),
      ProcedureId::WaitPeerLinkDrop => Box::new(peer::WaitPeerLinkDrop::default()),
      ProcedureId::Handover => Box::new(handover::Handover::default()),
      ProcedureId::CancelFindRole
      | ProcedureId::ConnectableHandset
      | ProcedureId::LeConnectableHandset
      | ProcedureId::AllowHandsetConnect
      | ProcedureId::PermitLeConnections
      | ProcedureId::ProhibitLeConnections
      | ProcedureId::DisconnectLeConnections
      | ProcedureId::SetAddress
      | ProcedureId::SetRole
      | ProcedureId::EventSuppress
      | ProcedureId::ReleasePeer
      | ProcedureId::DfuInCase => Box::new(oneshot::Oneshot::new(id)),
   }
}

/// The single instance of every procedure, indexed by [`ProcedureId`].
pub(crate) struct Procedures {
   procs: Vec<Box<dyn Procedure>>,
}

impl Procedures {
   pub fn new() -> Self {
      Self {
         procs: ProcedureId::iter().map(build).collect(),
      }
   }

   fn get_mut(&mut self, id: ProcedureId) -> &mut dyn Procedure {
      self.procs[id as usize].as_mut()
   }

   pub fn is_active(&self, id: ProcedureId) -> bool {
      self.procs[id as usize].is_active()
   }

   pub fn start(
      &mut self,
      id: ProcedureId,
      ctx: &mut ProcContext<'_>,
      params: ProcParams,
   ) -> Result<()> {
      let proc = self.get_mut(id);
      if proc.is_active() {
         return Err(TopologyError::invariant("procedure started while already active"));
      }
      debug!("Procedure {id} start {params:?}");
      proc.start(ctx, params)
   }

   /// Cancels a running procedure. An inactive procedure has already queued
   /// its completion, which stands in for the cancel confirmation.
   pub fn cancel(&mut self, id: ProcedureId, ctx: &mut ProcContext<'_>) {
      let proc = self.get_mut(id);
      if !proc.is_active() {
         debug!("Procedure {id} cancel ignored, completion already queued");
         return;
      }
      debug!("Procedure {id} cancel");
      proc.cancel(ctx);
   }

   pub fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      for proc in self.procs.iter_mut().filter(|p| p.is_active()) {
         proc.handle(ctx, input);
      }
   }
}

#[cfg(test)]
pub(crate) mod testing {
   use super::*;
   use crate::topology::{BdAddr, state::PeerPairing};

   pub const PRIMARY: BdAddr = BdAddr([0x00, 0x02, 0x5B, 0x00, 0x00, 0x01]);
   pub const SECONDARY: BdAddr = BdAddr([0x00, 0x02, 0x5B, 0x00, 0x00, 0x02]);
   pub const HANDSET: BdAddr = BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

   /// Owns everything a [`ProcContext`] borrows.
   pub struct Harness {
      pub state: TopologyState,
      pub config: Config,
      pub out: Outbox,
   }

   impl Harness {
      pub fn new() -> Self {
         let mut state = TopologyState::new(PRIMARY);
         state.db.peer = Some(PeerPairing {
            primary: PRIMARY,
            secondary: SECONDARY,
         });
         Self {
            state,
            config: Config::default(),
            out: Outbox::default(),
         }
      }

      pub fn ctx(&mut self) -> ProcContext<'_> {
         ProcContext::new(&mut self.state, &self.config, &mut self.out)
      }

      pub fn take_commands(&mut self) -> Vec<Command> {
         std::mem::take(&mut self.out.commands)
      }

      pub fn take_messages(&mut self) -> Vec<Message> {
         self.out.queue.drain(..).collect()
      }

      /// Completion or cancel confirmations, skipping start confirmations.
      pub fn outcomes(&mut self) -> Vec<Message> {
         self
            .take_messages()
            .into_iter()
            .filter(|m| !matches!(m, Message::Started(_)))
            .collect()
      }
   }
}

#[cfg(test)]
mod tests {
   use super::{testing::Harness, *};
   use strum::EnumCount;

   #[test]
   fn test_registry_is_indexed_by_id() {
      let procs = Procedures::new();
      assert_eq!(procs.procs.len(), ProcedureId::COUNT);
      for (i, proc) in procs.procs.iter().enumerate() {
         assert_eq!(proc.id() as usize, i);
         assert!(!proc.is_active());
      }
   }

   #[test]
   fn test_double_start_is_invariant_violation() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      procs
         .start(ProcedureId::FindRole, &mut h.ctx(), ProcParams::FindRole(FindRoleMode::Continuous))
         .unwrap();
      let err = procs
         .start(ProcedureId::FindRole, &mut h.ctx(), ProcParams::FindRole(FindRoleMode::Continuous))
         .unwrap_err();
      assert!(err.is_invariant_violation());
   }

   #[test]
   fn test_cancel_of_finished_procedure_is_silent() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      procs
         .start(ProcedureId::ReleasePeer, &mut h.ctx(), ProcParams::None)
         .unwrap();
      h.take_messages();
      procs.cancel(ProcedureId::ReleasePeer, &mut h.ctx());
      assert!(h.take_messages().is_empty());
   }
}
