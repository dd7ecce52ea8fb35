//! Handset connection procedures.

use std::time::Duration;

use log::{debug, warn};

use crate::{
   error::{Result, TopologyError},
   topology::{
      BdAddr, Profiles, Transport,
      io::{Command, Input, RequestStatus},
      procedures::{ProcContext, ProcParams, ProcResult, Procedure, ProcedureId},
   },
};

/// Connect the handset with a set of profiles.
///
/// Find-role scanning is blocked while paging the handset. If find-role asks
/// to prepare for role selection the connect is stopped and the prepare is
/// answered once the stop is confirmed.
#[derive(Default)]
pub struct ConnectHandset {
   handset: Option<BdAddr>,
   pending: Profiles,
   prepare_requested: bool,
   scanning_blocked: bool,
}

impl ConnectHandset {
   fn respond_to_prepare(&mut self, ctx: &mut ProcContext<'_>) {
      if self.prepare_requested {
         self.prepare_requested = false;
         ctx.command(Command::FindRolePrepareResponse);
      }
   }

   fn unblock_scanning(&mut self, ctx: &mut ProcContext<'_>) {
      if self.scanning_blocked {
         self.scanning_blocked = false;
         ctx.command(Command::FindRoleScanning(true));
      }
   }

   fn reset(&mut self, ctx: &mut ProcContext<'_>) {
      self.respond_to_prepare(ctx);
      self.unblock_scanning(ctx);
      ctx.command(Command::FindRolePrepareClient(false));
      ctx.cancel_timer(self.id());
      self.handset = None;
      self.pending = Profiles::NONE;
   }

   fn finish(&mut self, ctx: &mut ProcContext<'_>, result: ProcResult) {
      self.reset(ctx);
      ctx.complete(self.id(), result);
   }

   fn profiles_connected(&mut self, ctx: &mut ProcContext<'_>, profiles: Profiles) {
      self.pending = self.pending.difference(profiles);
      if self.pending.is_empty() {
         self.finish(ctx, ProcResult::Success);
      } else {
         debug!("Handset connect waiting for {}", self.pending);
      }
   }
}

impl Procedure for ConnectHandset {
   fn id(&self) -> ProcedureId {
      ProcedureId::ConnectHandset
   }

   fn is_active(&self) -> bool {
      self.handset.is_some()
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()> {
      let ProcParams::Profiles(profiles) = params else {
         return Err(TopologyError::invariant("handset connect needs a profile mask"));
      };
      let addr = ctx
         .state
         .db
         .handset_addr()
         .ok_or(TopologyError::invariant("handset connect without a paired handset"))?;

      self.handset = Some(addr);
      self.pending = profiles;
      self.prepare_requested = false;
      self.scanning_blocked = true;

      ctx.command(Command::FindRoleScanning(false));
      ctx.command(Command::FindRolePrepareClient(true));
      ctx.command(Command::ConnectHandset { addr, profiles });
      let timeout = Duration::from_millis(ctx.config.primary_handset_connect_timeout_ms);
      ctx.start_timer(self.id(), timeout);
      ctx.started(self.id());
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      ctx.command(Command::StopHandsetConnect);
      self.reset(ctx);
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      match input {
         Input::HandsetConnectCfm {
            status: RequestStatus::Success,
         } => {
            let connected = ctx.state.db.handset_profiles;
            self.profiles_connected(ctx, connected);
         },
         Input::HandsetConnectCfm { status } => {
            debug!("Handset connect ended: {status}");
            self.finish(ctx, ProcResult::Failed);
         },
         Input::HandsetProfileConnected(profiles) => self.profiles_connected(ctx, *profiles),
         Input::HandsetStopConnectCfm => self.respond_to_prepare(ctx),
         Input::FindRolePrepareForRoleSelection if !self.prepare_requested => {
            self.prepare_requested = true;
            ctx.command(Command::StopHandsetConnect);
         },
         Input::AclConnected {
            addr,
            transport: Transport::BrEdr,
         } if self.handset == Some(*addr) => self.unblock_scanning(ctx),
         Input::TimerExpired(ProcedureId::ConnectHandset) => {
            warn!("Handset connect timed out, still waiting for {}", self.pending);
            ctx.command(Command::StopHandsetConnect);
            self.finish(ctx, ProcResult::Timeout);
         },
         _ => {},
      }
   }
}

/// Disconnect the handset.
#[derive(Default)]
pub struct DisconnectHandset {
   active: bool,
}

impl Procedure for DisconnectHandset {
   fn id(&self) -> ProcedureId {
      ProcedureId::DisconnectHandset
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      ctx.started(self.id());
      if !ctx.state.handset_connected() {
         ctx.complete(self.id(), ProcResult::Success);
         return Ok(());
      }
      self.active = true;
      ctx.command(Command::DisconnectHandset);
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      if let Input::HandsetDisconnectCfm { status } = input {
         debug!("Handset disconnect: {status}");
         self.active = false;
         ctx.complete(self.id(), ProcResult::Success);
      }
   }
}
