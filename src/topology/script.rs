//! Scripts: ordered procedure lists run as one logical procedure.

use log::{debug, warn};

use crate::{
   error::{Result, TopologyError},
   topology::{
      Profiles, Role,
      procedures::{
         AddressKind, FindRoleMode, ProcContext, ProcParams, ProcResult, ProcedureId, Procedures,
         SuppressMode,
      },
   },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStep {
   pub proc: ProcedureId,
   pub params: ProcParams,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Script {
   pub name: &'static str,
   pub steps: &'static [ScriptStep],
}

const fn step(proc: ProcedureId, params: ProcParams) -> ScriptStep {
   ScriptStep { proc, params }
}

const fn plain(proc: ProcedureId) -> ScriptStep {
   step(proc, ProcParams::None)
}

const fn enable(proc: ProcedureId, enable: bool) -> ScriptStep {
   step(proc, ProcParams::Enable(enable))
}

const fn set_role(role: Role) -> ScriptStep {
   step(ProcedureId::SetRole, ProcParams::Role(role))
}

const fn set_address(kind: AddressKind) -> ScriptStep {
   step(ProcedureId::SetAddress, ProcParams::Address(kind))
}

const fn find_role(mode: FindRoleMode) -> ScriptStep {
   step(ProcedureId::FindRole, ProcParams::FindRole(mode))
}

const fn suppress(mode: SuppressMode) -> ScriptStep {
   step(ProcedureId::EventSuppress, ProcParams::Suppress(mode))
}

/// Every profile shared with the peer.
pub const PEER_PROFILES_ALL: Profiles = Profiles::from_bits(
   Profiles::A2DP.bits()
      | Profiles::SCOFWD.bits()
      | Profiles::PEERSIG.bits()
      | Profiles::HANDOVER.bits()
      | Profiles::MIRROR.bits(),
);

const DISCONNECT_ALL_PEER_PROFILES: ScriptStep =
   step(ProcedureId::DisconnectPeerProfiles, ProcParams::Profiles(PEER_PROFILES_ALL));

pub static PAIR_PEER: Script = Script {
   name: "pair_peer",
   steps: &[plain(ProcedureId::PairPeer)],
};

pub static NO_ROLE_IDLE: Script = Script {
   name: "no_role_idle",
   steps: &[
      enable(ProcedureId::ConnectableHandset, false),
      enable(ProcedureId::PriConnectablePeer, false),
      enable(ProcedureId::AllowHandsetConnect, false),
      plain(ProcedureId::DisconnectHandset),
      DISCONNECT_ALL_PEER_PROFILES,
      plain(ProcedureId::CancelFindRole),
      plain(ProcedureId::ProhibitBt),
      plain(ProcedureId::ProhibitLeConnections),
      enable(ProcedureId::LeConnectableHandset, false),
      plain(ProcedureId::CleanConnections),
      set_address(AddressKind::Primary),
      set_role(Role::None),
      plain(ProcedureId::PermitBt),
      plain(ProcedureId::PermitLeConnections),
   ],
};

pub static NO_ROLE_FIND_ROLE: Script = Script {
   name: "no_role_find_role",
   steps: &[
      suppress(SuppressMode::Suppress),
      plain(ProcedureId::ProhibitBt),
      plain(ProcedureId::ProhibitLeConnections),
      plain(ProcedureId::CleanConnections),
      set_address(AddressKind::Primary),
      set_role(Role::None),
      plain(ProcedureId::PermitBt),
      plain(ProcedureId::PermitLeConnections),
      suppress(SuppressMode::ExposeOutCase),
      find_role(FindRoleMode::Bounded),
   ],
};

pub static PRIMARY_FIND_ROLE: Script = Script {
   name: "primary_find_role",
   steps: &[find_role(FindRoleMode::Continuous)],
};

pub static BECOME_PRIMARY: Script = Script {
   name: "become_primary",
   steps: &[set_role(Role::Primary)],
};

pub static BECOME_ACTING_PRIMARY: Script = Script {
   name: "become_acting_primary",
   steps: &[set_role(Role::ActingPrimary)],
};

pub static BECOME_SECONDARY: Script = Script {
   name: "become_secondary",
   steps: &[
      plain(ProcedureId::ProhibitBt),
      plain(ProcedureId::CleanConnections),
      set_address(AddressKind::Secondary),
      set_role(Role::Secondary),
      plain(ProcedureId::PermitBt),
   ],
};

pub static ROLE_SWITCH_TO_SECONDARY: Script = Script {
   name: "role_switch_to_secondary",
   steps: &[
      plain(ProcedureId::DisconnectHandset),
      DISCONNECT_ALL_PEER_PROFILES,
      plain(ProcedureId::ProhibitBt),
      plain(ProcedureId::ProhibitLeConnections),
      plain(ProcedureId::CleanConnections),
      set_address(AddressKind::Secondary),
      set_role(Role::Secondary),
      plain(ProcedureId::PermitBt),
      plain(ProcedureId::PermitLeConnections),
      plain(ProcedureId::SecConnectPeer),
   ],
};

pub static SET_PRIMARY_ADDRESS: Script = Script {
   name: "set_primary_address",
   steps: &[
      plain(ProcedureId::ProhibitBt),
      set_address(AddressKind::Primary),
      plain(ProcedureId::PermitBt),
   ],
};

pub static PRIMARY_ADDRESS_FIND_ROLE: Script = Script {
   name: "primary_address_find_role",
   steps: &[
      plain(ProcedureId::ProhibitBt),
      plain(ProcedureId::ProhibitLeConnections),
      set_address(AddressKind::Primary),
      plain(ProcedureId::PermitBt),
      plain(ProcedureId::PermitLeConnections),
      find_role(FindRoleMode::Initial),
   ],
};

pub static SECONDARY_STATIC_HANDOVER: Script = Script {
   name: "secondary_static_handover",
   steps: &[
      plain(ProcedureId::WaitPeerLinkDrop),
      plain(ProcedureId::ProhibitBt),
      set_address(AddressKind::Primary),
      plain(ProcedureId::PermitBt),
      set_role(Role::Primary),
      find_role(FindRoleMode::Continuous),
   ],
};

pub static PRIMARY_STATIC_HANDOVER_IN_CASE: Script = Script {
   name: "primary_static_handover_in_case",
   steps: &[
      plain(ProcedureId::CommandRoleSwitch),
      enable(ProcedureId::ConnectableHandset, false),
      enable(ProcedureId::AllowHandsetConnect, false),
      enable(ProcedureId::PriConnectablePeer, false),
      enable(ProcedureId::LeConnectableHandset, false),
      plain(ProcedureId::CancelFindRole),
      plain(ProcedureId::CleanConnections),
      set_role(Role::None),
   ],
};

pub static DYNAMIC_HANDOVER: Script = Script {
   name: "dynamic_handover",
   steps: &[
      enable(ProcedureId::LeConnectableHandset, false),
      plain(ProcedureId::DisconnectLeConnections),
      step(ProcedureId::Handover, ProcParams::FromGoal),
      set_role(Role::Secondary),
   ],
};

pub static DYNAMIC_HANDOVER_FAILURE: Script = Script {
   name: "dynamic_handover_failure",
   steps: &[enable(ProcedureId::LeConnectableHandset, true)],
};

pub static DFU_ROLE: Script = Script {
   name: "dfu_role",
   steps: &[plain(ProcedureId::CancelFindRole), set_role(Role::Dfu)],
};

pub static DFU_PRIMARY: Script = Script {
   name: "dfu_primary",
   steps: &[set_role(Role::Primary)],
};

pub static DFU_SECONDARY: Script = Script {
   name: "dfu_secondary",
   steps: &[set_address(AddressKind::Secondary), set_role(Role::Secondary)],
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum EngineState {
   #[default]
   Idle,
   Active,
   Cancelling,
}

/// How a script run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptOutcome {
   Finished(ProcResult),
   Cancelled(ProcResult),
}

/// Runs one script at a time, step by step.
#[derive(Debug, Default)]
pub(crate) struct ScriptEngine {
   state: EngineState,
   script: Option<&'static Script>,
   next_step: usize,
   goal_params: ProcParams,
}

impl ScriptEngine {
   pub fn is_idle(&self) -> bool {
      self.state == EngineState::Idle
   }

   /// Procedure of the step currently running.
   pub fn current_step(&self) -> Option<ProcedureId> {
      if self.is_idle() {
         return None;
      }
      let script = self.script?;
      let index = self.next_step.checked_sub(1)?;
      script.steps.get(index).map(|s| s.proc)
   }

   pub fn start(
      &mut self,
      script: &'static Script,
      params: ProcParams,
      procs: &mut Procedures,
      ctx: &mut ProcContext<'_>,
   ) -> Result<()> {
      if !self.is_idle() {
         return Err(TopologyError::invariant("script started while another is running"));
      }
      debug!("Script {} start", script.name);
      self.state = EngineState::Active;
      self.script = Some(script);
      self.next_step = 0;
      self.goal_params = params;
      self.start_next(procs, ctx)
   }

   fn start_next(&mut self, procs: &mut Procedures, ctx: &mut ProcContext<'_>) -> Result<()> {
      let script = self
         .script
         .ok_or(TopologyError::invariant("script step without a script"))?;
      let step = script
         .steps
         .get(self.next_step)
         .ok_or(TopologyError::invariant("script ran past its last step"))?;
      let params = match step.params {
         ProcParams::FromGoal => self.goal_params,
         params => params,
      };
      debug!("Script {} step {} {}", script.name, self.next_step, step.proc);
      self.next_step += 1;
      procs.start(step.proc, ctx, params)
   }

   fn finish(&mut self) {
      if let Some(script) = self.script.take() {
         debug!("Script {} finished", script.name);
      }
      self.state = EngineState::Idle;
      self.next_step = 0;
      self.goal_params = ProcParams::None;
   }

   /// Cancels the running step. The outcome arrives with that step's
   /// confirmation.
   pub fn cancel(&mut self, procs: &mut Procedures, ctx: &mut ProcContext<'_>) {
      if self.state != EngineState::Active {
         return;
      }
      self.state = EngineState::Cancelling;
      if let Some(proc) = self.current_step() {
         procs.cancel(proc, ctx);
      }
   }

   /// A step completed. Returns the script outcome once the run ends.
   pub fn on_complete(
      &mut self,
      proc: ProcedureId,
      result: ProcResult,
      procs: &mut Procedures,
      ctx: &mut ProcContext<'_>,
   ) -> Result<Option<ScriptOutcome>> {
      if self.current_step() != Some(proc) {
         warn!("Ignoring completion of {proc}, not the running script step");
         return Ok(None);
      }
      match self.state {
         EngineState::Idle => Ok(None),
         // The step finished before it saw the cancel.
         EngineState::Cancelling => {
            self.finish();
            Ok(Some(ScriptOutcome::Cancelled(result)))
         },
         EngineState::Active => {
            let remaining = self
               .script
               .is_some_and(|s| self.next_step < s.steps.len());
            if result == ProcResult::Success && remaining {
               self.start_next(procs, ctx)?;
               Ok(None)
            } else {
               self.finish();
               Ok(Some(ScriptOutcome::Finished(result)))
            }
         },
      }
   }

   /// A step confirmed its cancel.
   pub fn on_cancelled(&mut self, proc: ProcedureId, result: ProcResult) -> Option<ScriptOutcome> {
      if self.state != EngineState::Cancelling || self.current_step() != Some(proc) {
         warn!("Ignoring cancel confirmation of {proc}");
         return None;
      }
      self.finish();
      Some(ScriptOutcome::Cancelled(result))
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::topology::{
      io::{Command, FindRoleOutcome, Input, Message, ScanKind, ScanStatus},
      procedures::testing::Harness,
   };

   /// Drives the engine the way the dispatcher does, feeding queued
   /// completions back until the run ends.
   fn drain(
      engine: &mut ScriptEngine,
      procs: &mut Procedures,
      h: &mut Harness,
   ) -> Option<ScriptOutcome> {
      while let Some(message) = h.out.queue.pop_front() {
         let outcome = match message {
            Message::Complete(proc, result) => engine
               .on_complete(proc, result, procs, &mut h.ctx())
               .unwrap(),
            Message::Cancelled(proc, result) => engine.on_cancelled(proc, result),
            _ => None,
         };
         if outcome.is_some() {
            return outcome;
         }
      }
      None
   }

   fn scan_cfms(procs: &mut Procedures, h: &mut Harness) {
      for kind in [ScanKind::BredrScan, ScanKind::LeScan] {
         procs.handle(&mut h.ctx(), &Input::ScanCfm {
            kind,
            status: ScanStatus::Success,
         });
      }
   }

   #[test]
   fn test_steps_run_in_order() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();

      engine
         .start(&SET_PRIMARY_ADDRESS, ProcParams::None, &mut procs, &mut h.ctx())
         .unwrap();
      assert_eq!(engine.current_step(), Some(ProcedureId::ProhibitBt));
      assert_eq!(drain(&mut engine, &mut procs, &mut h), None);

      scan_cfms(&mut procs, &mut h);
      assert_eq!(drain(&mut engine, &mut procs, &mut h), None);
      assert_eq!(engine.current_step(), Some(ProcedureId::PermitBt));

      scan_cfms(&mut procs, &mut h);
      assert_eq!(
         drain(&mut engine, &mut procs, &mut h),
         Some(ScriptOutcome::Finished(ProcResult::Success))
      );
      assert!(engine.is_idle());
      assert!(h.out.commands.contains(&Command::OverrideAddress(h.state.db.primary_addr().unwrap())));
   }

   #[test]
   fn test_failure_stops_script_and_propagates() {
      let mut h = Harness::new();
      h.state.db.peer = None;
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();

      // Wait-for-link-drop fails without a paired peer.
      engine
         .start(&SECONDARY_STATIC_HANDOVER, ProcParams::None, &mut procs, &mut h.ctx())
         .unwrap();
      assert_eq!(
         drain(&mut engine, &mut procs, &mut h),
         Some(ScriptOutcome::Finished(ProcResult::Failed))
      );
      assert!(!h.out.commands.contains(&Command::BredrScan(false)));
   }

   #[test]
   fn test_cancel_forwards_step_result() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();

      engine
         .start(&PRIMARY_FIND_ROLE, ProcParams::None, &mut procs, &mut h.ctx())
         .unwrap();
      assert_eq!(drain(&mut engine, &mut procs, &mut h), None);

      engine.cancel(&mut procs, &mut h.ctx());
      procs.handle(&mut h.ctx(), &Input::FindRoleResult(FindRoleOutcome::Cancelled));
      assert_eq!(
         drain(&mut engine, &mut procs, &mut h),
         Some(ScriptOutcome::Cancelled(ProcResult::Success))
      );
      assert!(engine.is_idle());
   }

   #[test]
   fn test_completion_while_cancelling_confirms_cancel() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();

      engine
         .start(&BECOME_PRIMARY, ProcParams::None, &mut procs, &mut h.ctx())
         .unwrap();
      // The set-role step completed synchronously; its completion is queued.
      engine.cancel(&mut procs, &mut h.ctx());
      assert_eq!(
         drain(&mut engine, &mut procs, &mut h),
         Some(ScriptOutcome::Cancelled(ProcResult::Success))
      );
   }

   #[test]
   fn test_from_goal_params_reach_the_step() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();

      engine
         .start(&DYNAMIC_HANDOVER, ProcParams::Handover { delay: true }, &mut procs, &mut h.ctx())
         .unwrap();
      drain(&mut engine, &mut procs, &mut h);
      assert_eq!(engine.current_step(), Some(ProcedureId::Handover));
      assert!(h.out.commands.iter().any(|c| matches!(
         c,
         Command::StartTimer {
            proc: ProcedureId::Handover,
            ..
         }
      )));
   }

   #[test]
   fn test_second_script_is_invariant_violation() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();
      engine
         .start(&PRIMARY_FIND_ROLE, ProcParams::None, &mut procs, &mut h.ctx())
         .unwrap();
      let err = engine
         .start(&DFU_ROLE, ProcParams::None, &mut procs, &mut h.ctx())
         .unwrap_err();
      assert!(err.is_invariant_violation());
   }

   #[test]
   fn test_stale_completion_is_ignored() {
      let mut h = Harness::new();
      let mut procs = Procedures::new();
      let mut engine = ScriptEngine::default();
      let outcome = engine
         .on_complete(ProcedureId::PermitBt, ProcResult::Success, &mut procs, &mut h.ctx())
         .unwrap();
      assert_eq!(outcome, None);
   }
}
