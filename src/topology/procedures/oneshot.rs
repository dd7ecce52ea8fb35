//! Procedures that issue their commands and complete straight away.

use crate::{
   error::{Result, TopologyError},
   topology::{
      events::RuleEvents,
      io::Command,
      procedures::{
         AddressKind, ProcContext, ProcParams, ProcResult, Procedure, ProcedureId, SuppressMode,
      },
   },
};

pub struct Oneshot {
   id: ProcedureId,
   active: bool,
}

impl Oneshot {
   pub const fn new(id: ProcedureId) -> Self {
      Self { id, active: false }
   }
}

const fn bad_params() -> TopologyError {
   TopologyError::invariant("procedure started with unexpected parameters")
}

fn run(id: ProcedureId, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<ProcResult> {
   match id {
      ProcedureId::CancelFindRole => ctx.command(Command::CancelFindRole),
      ProcedureId::ConnectableHandset => {
         let enable = params.enable().ok_or_else(bad_params)?;
         ctx.command(Command::HandsetConnectable(enable));
      },
      ProcedureId::LeConnectableHandset => {
         let enable = params.enable().ok_or_else(bad_params)?;
         ctx.command(Command::HandsetLeConnectable(enable));
      },
      ProcedureId::AllowHandsetConnect => {
         let allow = params.enable().ok_or_else(bad_params)?;
         ctx.command(Command::AllowHandsetConnect(allow));
      },
      ProcedureId::PermitLeConnections => ctx.command(Command::AllowLeConnections(true)),
      ProcedureId::ProhibitLeConnections => ctx.command(Command::AllowLeConnections(false)),
      ProcedureId::DisconnectLeConnections => ctx.command(Command::DisconnectLeConnections),
      ProcedureId::SetAddress => {
         let ProcParams::Address(kind) = params else {
            return Err(bad_params());
         };
         let addr = match kind {
            AddressKind::Primary => ctx.state.db.primary_addr(),
            AddressKind::Secondary => ctx.state.db.secondary_addr(),
         }
         .ok_or(TopologyError::invariant("address override without peer pairing"))?;
         ctx.state.db.own_addr = addr;
         ctx.command(Command::OverrideAddress(addr));
      },
      ProcedureId::SetRole => {
         let ProcParams::Role(role) = params else {
            return Err(bad_params());
         };
         ctx.set_role(role);
      },
      ProcedureId::EventSuppress => {
         let ProcParams::Suppress(mode) = params else {
            return Err(bad_params());
         };
         expose(ctx, mode);
      },
      ProcedureId::ReleasePeer => {
         if let Some(addr) = ctx.state.db.peer_addr() {
            ctx.command(Command::ReleasePeer { addr });
         }
      },
      ProcedureId::DfuInCase => ctx.command(Command::DisconnectHandsetHfp),
      _ => return Err(TopologyError::invariant("not a oneshot procedure")),
   }
   Ok(ProcResult::Success)
}

/// Toggles phy event suppression. On expose the phy event that differs from
/// the state the caller assumed is re-injected.
fn expose(ctx: &mut ProcContext<'_>, mode: SuppressMode) {
   match mode {
      SuppressMode::Suppress => ctx.state.suppress_events = true,
      SuppressMode::ExposeInCase => {
         ctx.state.suppress_events = false;
         if !ctx.state.in_case() {
            ctx.reset_event(RuleEvents::IN_CASE);
            ctx.set_event(RuleEvents::OUT_CASE);
         }
      },
      SuppressMode::ExposeOutCase => {
         ctx.state.suppress_events = false;
         if ctx.state.in_case() {
            ctx.reset_event(RuleEvents::OUT_CASE);
            ctx.set_event(RuleEvents::IN_CASE);
         }
      },
   }
}

impl Procedure for Oneshot {
   fn id(&self) -> ProcedureId {
      self.id
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()> {
      self.active = true;
      ctx.started(self.id);
      let result = run(self.id, ctx, params);
      self.active = false;
      ctx.complete(self.id, result?);
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancelled(self.id, ProcResult::Success);
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::topology::{
      PhyState, Role,
      io::Message,
      procedures::testing::{Harness, SECONDARY},
   };

   fn start(h: &mut Harness, id: ProcedureId, params: ProcParams) -> Result<()> {
      Oneshot::new(id).start(&mut h.ctx(), params)
   }

   #[test]
   fn test_set_address_secondary() {
      let mut h = Harness::new();
      start(&mut h, ProcedureId::SetAddress, ProcParams::Address(AddressKind::Secondary)).unwrap();
      assert_eq!(h.take_commands(), vec![Command::OverrideAddress(SECONDARY)]);
      assert_eq!(h.state.db.own_addr, SECONDARY);
      assert_eq!(h.outcomes(), vec![Message::Complete(
         ProcedureId::SetAddress,
         ProcResult::Success
      )]);
   }

   #[test]
   fn test_set_address_without_pairing_is_invariant_violation() {
      let mut h = Harness::new();
      h.state.db.peer = None;
      let err = start(&mut h, ProcedureId::SetAddress, ProcParams::Address(AddressKind::Primary))
         .unwrap_err();
      assert!(err.is_invariant_violation());
   }

   #[test]
   fn test_set_role_posts_role_before_completion() {
      let mut h = Harness::new();
      start(&mut h, ProcedureId::SetRole, ProcParams::Role(Role::Secondary)).unwrap();
      assert_eq!(h.outcomes(), vec![
         Message::SetRole(Role::Secondary),
         Message::Complete(ProcedureId::SetRole, ProcResult::Success),
      ]);
   }

   #[test]
   fn test_expose_out_case_reinjects_in_case() {
      let mut h = Harness::new();
      start(&mut h, ProcedureId::EventSuppress, ProcParams::Suppress(SuppressMode::Suppress))
         .unwrap();
      assert!(h.state.suppress_events);
      h.take_messages();

      h.state.phy = PhyState::InCase;
      start(&mut h, ProcedureId::EventSuppress, ProcParams::Suppress(SuppressMode::ExposeOutCase))
         .unwrap();
      assert!(!h.state.suppress_events);
      assert_eq!(h.outcomes(), vec![
         Message::ResetEvent(RuleEvents::OUT_CASE),
         Message::SetEvent(RuleEvents::IN_CASE),
         Message::Complete(ProcedureId::EventSuppress, ProcResult::Success),
      ]);
   }

   #[test]
   fn test_expose_out_case_when_out_of_case_is_quiet() {
      let mut h = Harness::new();
      h.state.phy = PhyState::OutOfEar;
      start(&mut h, ProcedureId::EventSuppress, ProcParams::Suppress(SuppressMode::ExposeOutCase))
         .unwrap();
      assert_eq!(h.outcomes(), vec![Message::Complete(
         ProcedureId::EventSuppress,
         ProcResult::Success
      )]);
   }

   #[test]
   fn test_connectable_requires_flag() {
      let mut h = Harness::new();
      assert!(start(&mut h, ProcedureId::ConnectableHandset, ProcParams::None).is_err());
      start(&mut h, ProcedureId::ConnectableHandset, ProcParams::Enable(false)).unwrap();
      assert_eq!(h.take_commands(), vec![Command::HandsetConnectable(false)]);
   }
}
