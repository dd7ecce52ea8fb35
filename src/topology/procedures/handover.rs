//! Dynamic handover of the primary role to the peer.

use log::{debug, info, warn};

use crate::{
   error::Result,
   topology::{
      io::{Command, HandoverStatus, Input},
      procedures::{ProcContext, ProcParams, ProcResult, Procedure, ProcedureId},
   },
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Stage {
   #[default]
   Idle,
   /// Retry back-off before the attempt.
   Delay,
   /// Request handed to the handover profile.
   InFlight,
}

#[derive(Default)]
pub struct Handover {
   stage: Stage,
}

impl Handover {
   fn attempt(&mut self, ctx: &mut ProcContext<'_>) {
      let addr = ctx.state.db.handset_addr();
      match addr {
         Some(addr) if ctx.state.handset_connected() => {
            info!("Handover attempt {} towards {addr}", ctx.state.handover.retry_count + 1);
            self.stage = Stage::InFlight;
            ctx.command(Command::Handover { addr });
         },
         _ => {
            debug!("Handover without a connected handset");
            self.finish(ctx, ProcResult::Failed);
         },
      }
   }

   fn finish(&mut self, ctx: &mut ProcContext<'_>, result: ProcResult) {
      self.stage = Stage::Idle;
      ctx.complete(self.id(), result);
   }

   fn status(&mut self, ctx: &mut ProcContext<'_>, status: HandoverStatus) {
      let result = match status {
         HandoverStatus::Success => {
            ctx.state.handover.retry_count = 0;
            ProcResult::Success
         },
         HandoverStatus::Timeout | HandoverStatus::Vetoed => {
            let info = &mut ctx.state.handover;
            info.retry_count = info.retry_count.saturating_add(1);
            if info.retry_count >= ctx.config.handover_max_retry_attempts {
               warn!("Handover {status} after {} attempts, giving up", info.retry_count);
               info.retry_count = 0;
               ProcResult::Failed
            } else {
               ProcResult::Timeout
            }
         },
         _ => {
            warn!("Handover failed: {status}");
            ctx.state.handover.retry_count = 0;
            ProcResult::Failed
         },
      };
      self.finish(ctx, result);
   }
}

impl Procedure for Handover {
   fn id(&self) -> ProcedureId {
      ProcedureId::Handover
   }

   fn is_active(&self) -> bool {
      self.stage != Stage::Idle
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()> {
      ctx.started(self.id());
      if matches!(params, ProcParams::Handover { delay: true }) {
         self.stage = Stage::Delay;
         let after = ctx.config.handover_retry_timeout();
         ctx.start_timer(self.id(), after);
      } else {
         self.attempt(ctx);
      }
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      let result = match self.stage {
         // The profile cannot abort a handover once requested.
         Stage::InFlight => ProcResult::Failed,
         Stage::Delay => {
            ctx.cancel_timer(self.id());
            ProcResult::Success
         },
         Stage::Idle => ProcResult::Success,
      };
      self.stage = Stage::Idle;
      ctx.cancelled(self.id(), result);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      match (self.stage, input) {
         (Stage::Delay, Input::TimerExpired(ProcedureId::Handover)) => self.attempt(ctx),
         (Stage::InFlight, Input::HandoverStatus(status)) => self.status(ctx, *status),
         _ => {},
      }
   }
}
