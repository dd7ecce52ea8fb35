//! Procedures acting on the link to the other earbud.

use log::{debug, warn};

use crate::{
   error::{Result, TopologyError},
   topology::{
      BdAddr, Profiles, Transport,
      io::{Command, Input},
      peer_sig::{PeerSigKind, PeerSigMessage},
      procedures::{ProcContext, ProcParams, ProcResult, Procedure, ProcedureId},
   },
};

/// Pair with the other earbud.
#[derive(Default)]
pub struct PairPeer {
   active: bool,
}

impl Procedure for PairPeer {
   fn id(&self) -> ProcedureId {
      ProcedureId::PairPeer
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      self.active = true;
      ctx.command(Command::PairPeer);
      ctx.started(self.id());
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      if let Input::PeerPairCfm(pairing) = input {
         self.active = false;
         let result = if pairing.is_some() {
            ProcResult::Success
         } else {
            ProcResult::Failed
         };
         ctx.complete(self.id(), result);
      }
   }
}

/// Secondary creates the ACL to the primary.
#[derive(Default)]
pub struct SecConnectPeer {
   target: Option<BdAddr>,
}

impl SecConnectPeer {
   fn finish(&mut self, ctx: &mut ProcContext<'_>, result: ProcResult) {
      self.target = None;
      ctx.cancel_timer(self.id());
      ctx.complete(self.id(), result);
   }
}

impl Procedure for SecConnectPeer {
   fn id(&self) -> ProcedureId {
      ProcedureId::SecConnectPeer
   }

   fn is_active(&self) -> bool {
      self.target.is_some()
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      let addr = ctx
         .state
         .db
         .primary_addr()
         .ok_or(TopologyError::invariant("peer connect without peer pairing"))?;
      ctx.started(self.id());

      if ctx.state.peer_connected() {
         debug!("Peer already connected");
         ctx.complete(self.id(), ProcResult::Success);
         return Ok(());
      }

      self.target = Some(addr);
      ctx.command(Command::ConnectPeer { addr });
      let timeout = ctx.config.secondary_peer_connect_timeout();
      ctx.start_timer(self.id(), timeout);
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      if let Some(addr) = self.target.take() {
         ctx.cancel_timer(self.id());
         ctx.command(Command::ReleasePeer { addr });
      }
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      let Some(target) = self.target else {
         return;
      };
      match input {
         Input::AclConnected {
            addr,
            transport: Transport::BrEdr,
         } if *addr == target => self.finish(ctx, ProcResult::Success),
         Input::AclConnectFailed { addr } if *addr == target => {
            self.finish(ctx, ProcResult::Failed);
         },
         Input::TimerExpired(ProcedureId::SecConnectPeer) => {
            warn!("Peer connect to {target} timed out");
            ctx.command(Command::ReleasePeer { addr: target });
            self.target = None;
            ctx.complete(self.id(), ProcResult::Timeout);
         },
         _ => {},
      }
   }
}

/// Primary makes itself page-scannable for the peer, or stops doing so.
#[derive(Default)]
pub struct PriConnectablePeer {
   waiting: bool,
}

impl Procedure for PriConnectablePeer {
   fn id(&self) -> ProcedureId {
      ProcedureId::PriConnectablePeer
   }

   fn is_active(&self) -> bool {
      self.waiting
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()> {
      let enable = params
         .enable()
         .ok_or(TopologyError::invariant("connectable peer needs a flag"))?;
      ctx.started(self.id());
      ctx.command(Command::PeerPageScan(enable));

      if !enable || ctx.state.peer_connected() {
         ctx.complete(self.id(), ProcResult::Success);
         return Ok(());
      }

      self.waiting = true;
      let timeout = ctx.config.primary_peer_connect_timeout();
      ctx.start_timer(self.id(), timeout);
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.waiting = false;
      ctx.cancel_timer(self.id());
      ctx.command(Command::PeerPageScan(false));
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      match input {
         Input::AclConnected {
            addr,
            transport: Transport::BrEdr,
         } if ctx.state.db.is_peer(*addr) => {
            self.waiting = false;
            ctx.cancel_timer(self.id());
            ctx.complete(self.id(), ProcResult::Success);
         },
         Input::TimerExpired(ProcedureId::PriConnectablePeer) => {
            self.waiting = false;
            ctx.command(Command::PeerPageScan(false));
            ctx.complete(self.id(), ProcResult::Timeout);
         },
         _ => {},
      }
   }
}

/// Connect or disconnect profiles to the peer.
pub struct PeerProfiles {
   connect: bool,
   active: bool,
}

impl PeerProfiles {
   pub const fn connect() -> Self {
      Self {
         connect: true,
         active: false,
      }
   }

   pub const fn disconnect() -> Self {
      Self {
         connect: false,
         active: false,
      }
   }
}

impl Procedure for PeerProfiles {
   fn id(&self) -> ProcedureId {
      if self.connect {
         ProcedureId::ConnectPeerProfiles
      } else {
         ProcedureId::DisconnectPeerProfiles
      }
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, params: ProcParams) -> Result<()> {
      let ProcParams::Profiles(profiles) = params else {
         return Err(TopologyError::invariant("peer profiles needs a profile mask"));
      };
      ctx.started(self.id());
      if profiles == Profiles::NONE {
         ctx.complete(self.id(), ProcResult::Success);
         return Ok(());
      }
      self.active = true;
      ctx.command(if self.connect {
         Command::ConnectPeerProfiles(profiles)
      } else {
         Command::DisconnectPeerProfiles(profiles)
      });
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      let success = match (self.connect, input) {
         (true, Input::PeerProfilesConnectCfm { success }) => *success,
         (false, Input::PeerProfilesDisconnectCfm { success }) => *success,
         _ => return,
      };
      self.active = false;
      ctx.complete(self.id(), if success {
         ProcResult::Success
      } else {
         ProcResult::Failed
      });
   }
}

/// Tell the secondary to take over as primary.
#[derive(Default)]
pub struct CommandRoleSwitch {
   active: bool,
}

impl Procedure for CommandRoleSwitch {
   fn id(&self) -> ProcedureId {
      ProcedureId::CommandRoleSwitch
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      self.active = true;
      let frame = PeerSigMessage::static_handover_command().encode();
      debug!("Peer sig tx: {}", hex::encode(&frame));
      ctx.command(Command::PeerSigTx(frame));
      ctx.started(self.id());
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      if let Input::PeerSigTxCfm {
         kind: PeerSigKind::StaticHandoverCommand,
         success,
      } = input
      {
         self.active = false;
         ctx.complete(self.id(), if *success {
            ProcResult::Success
         } else {
            ProcResult::Failed
         });
      }
   }
}

/// Wait for the peer to drop its ACL to us.
#[derive(Default)]
pub struct WaitPeerLinkDrop {
   active: bool,
}

impl Procedure for WaitPeerLinkDrop {
   fn id(&self) -> ProcedureId {
      ProcedureId::WaitPeerLinkDrop
   }

   fn is_active(&self) -> bool {
      self.active
   }

   fn start(&mut self, ctx: &mut ProcContext<'_>, _params: ProcParams) -> Result<()> {
      ctx.started(self.id());
      if ctx.state.db.peer.is_none() {
         ctx.complete(self.id(), ProcResult::Failed);
      } else if !ctx.state.peer_connected() {
         ctx.complete(self.id(), ProcResult::Success);
      } else {
         self.active = true;
         let timeout = ctx.config.peer_link_drop_timeout();
         ctx.start_timer(self.id(), timeout);
      }
      Ok(())
   }

   fn cancel(&mut self, ctx: &mut ProcContext<'_>) {
      self.active = false;
      ctx.cancel_timer(self.id());
      ctx.cancelled(self.id(), ProcResult::Success);
   }

   fn handle(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      match input {
         Input::AclDisconnected {
            addr,
            transport: Transport::BrEdr,
            ..
         } if ctx.state.db.is_peer(*addr) => {
            self.active = false;
            ctx.cancel_timer(self.id());
            ctx.complete(self.id(), ProcResult::Success);
         },
         Input::TimerExpired(ProcedureId::WaitPeerLinkDrop) => {
            self.active = false;
            ctx.complete(self.id(), ProcResult::Timeout);
         },
         _ => {},
      }
   }
}
