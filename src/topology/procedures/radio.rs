//! Radio activity and ACL housekeeping.

use log::{debug, warn};

use crate::{
   error::Result,
   topology::{
      io::{Command, Input, ScanKind, ScanStatus},
      procedures::{ProcContext, ProcParams, ProcResult, Procedure, ProcedureId},
   },
};

/// Permit or prohibit BR/EDR scanning, LE scanning and LE advertising.
/// Completes once both scan managers have confirmed.
pub struct RadioActivity {
   permit: bool,
   bredr_pending: bool,
   le_pending: bool,
}

impl RadioActivity {
   pub const fn permit() -> Self {
      Self {
         permit: true,
         bredr_pending: false,
         le_pending: false,
      }
   }

   pub const fn prohibit() -> Self {
      Self {
         permit: false,
         ..Self::permit()
      }
   }
}

impl Procedure for RadioActivity {
   fn id(&self) -> ProcedureId {
      if self.permit {
         ProcedureId::PermitBt
      } else {
         ProcedureId::ProhibitBt
      }
   }

   fn is_active(&self) -> bool {
      self.bredr_pending || self.le_pending
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      self.bredr_pending = true;
      self.le_pending = true;
      ctx.command(Command::BredrScan(self.permit));
      ctx.command(Command::LeAdvertising(self.permit));
      ctx.command(Command::LeScan(self.permit));
      ctx.started(self.id());
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.bredr_pending = false;
      self.le_pending = false;
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      let Input::ScanCfm { kind, status } = input else {
         return;
      };
      match (kind, status) {
         (ScanKind::LeScan, ScanStatus::Busy) => {
            debug!("LE scan manager busy, repeating request");
            ctx.command(Command::LeScan(self.permit));
            return;
         },
         (_, ScanStatus::Failed) => warn!("{kind} request failed"),
         _ => {},
      }
      match kind {
         ScanKind::BredrScan => self.bredr_pending = false,
         ScanKind::LeScan => self.le_pending = false,
         ScanKind::LeAdvertising => return,
      }
      if !self.is_active() {
         ctx.complete(self.id(), ProcResult::Success);
      }
   }
}

/// Terminate every ACL. Completes on confirmation or after a short timeout.
#[derive(Default)]
pub struct CleanConnections {
   active: bool,
}

impl CleanConnections {
   fn finish(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.complete(self.id(), ProcResult::Success);
   }
}

impl Procedure for CleanConnections {
   fn id(&self) -> ProcedureId {
      ProcedureId::CleanConnections
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      self.active = true;
      ctx.command(Command::TerminateAllAcls);
      let timeout = ctx.config.clean_connections_timeout();
      ctx.start_timer(self.id(), timeout);
      ctx.started(self.id());
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancel_timer(self.id());
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      match input {
         Input::AclCloseAllCfm => {
            ctx.cancel_timer(self.id());
            self.finish(ctx);
         },
         Input::TimerExpired(ProcedureId::CleanConnections) => {
            debug!("ACL close timed out, carrying on");
            self.finish(ctx);
         },
         _ => {},
      }
   }
}
