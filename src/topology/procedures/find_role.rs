//! Find role: ask the peer find-role service to negotiate roles.
//!
//! Any role outcome completes the procedure; the controller turns the outcome
//! itself into a rule event.

use log::debug;

use crate::{
   error::{Result, TopologyError},
   topology::{
      io::{Command, FindRoleOutcome, Input},
      procedures::{FindRoleMode, ProcContext, ProcParams, ProcResult, Procedure, ProcedureId},
   },
};

#[derive(Default)]
pub struct FindRole {
   active: bool,
   cancelling: bool,
}

impl FindRole {
   fn reset(&mut self) {
      self.active = false;
      self.cancelling = false;
   }
}

impl Procedure for FindRole {
   fn id(&self) -> ProcedureId {
      ProcedureId::FindRole
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()> {
      let ProcParams::FindRole(mode) = params else {
         return Err(TopologyError::invariant("find role needs a mode"));
      };
      let timeout = match mode {
         FindRoleMode::Initial => Some(ctx.config.initial_peer_find_role_timeout()),
         FindRoleMode::Bounded => Some(ctx.config.find_role_timeout()),
         FindRoleMode::Continuous => None,
      };
      self.active = true;
      ctx.command(Command::FindRole { timeout });
      ctx.started(self.id());
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.cancelling = true;
      ctx.command(Command::CancelFindRole);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      let Input::FindRoleResult(outcome) = input else {
         return;
      };
      let cancelling = self.cancelling;
      self.reset();
      match outcome {
         FindRoleOutcome::Cancelled if cancelling => ctx.cancelled(self.id(), ProcResult::Success),
         FindRoleOutcome::Cancelled => {
            debug!("Find role cancelled by another goal");
            ctx.complete(self.id(), ProcResult::Success);
         },
         _ if cancelling => ctx.cancelled(self.id(), ProcResult::Success),
         _ => ctx.complete(self.id(), ProcResult::Success),
      }
   }
}
