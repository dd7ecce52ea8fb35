//! Inbound notifications, outbound commands and the internal message queue.
//!
//! External collaborators (connection manager, scan managers, handset
//! service, peer find-role, handover profile, peer signalling) talk to the
//! engine only through [`Input`] and [`Command`].

use std::{collections::VecDeque, time::Duration};

use serde::Serialize;

use crate::topology::{
   BdAddr, DisconnectReason, PhyState, Profiles, Role, Transport,
   events::RuleEvents,
   goals::GoalId,
   peer_sig::{Packet, PeerSigKind},
   procedures::{ProcParams, ProcResult, ProcedureId},
   rules::RuleSetId,
   state::PeerPairing,
};

/// Outcome of a request to an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RequestStatus {
   Success,
   Failed,
   Cancelled,
}

/// Result reported by the peer find-role service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FindRoleOutcome {
   NoPeer,
   Primary,
   Secondary,
   ActingPrimary,
   Cancelled,
}

/// Radio activity managed by the scan/advertising managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ScanKind {
   BredrScan,
   LeScan,
   LeAdvertising,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ScanStatus {
   Success,
   /// Manager is mid-transition and the request must be repeated.
   Busy,
   Failed,
}

/// Why the handover heuristic wants the roles swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum HandoverReason {
   InCase,
   OutOfEar,
   BatteryLevel,
   VoiceQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum HandoverUrgency {
   Low,
   High,
   Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HandoverRecommendation {
   pub reason: HandoverReason,
   pub urgency: HandoverUrgency,
   pub timestamp_ms: u32,
}

/// Status of a handover attempt reported by the handover profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HandoverStatus {
   Success,
   PeerConnectFailed,
   PeerConnectCancelled,
   PeerDisconnected,
   PeerLinkLoss,
   Failure,
   Timeout,
   Vetoed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PowerPrepare {
   Shutdown,
   Sleep,
}

/// Notifications consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
   /// Public request to start the topology.
   Start,

   PhyState(PhyState),
   PeerPhyState(PhyState),
   StateProxyReady,

   AclConnected {
      addr: BdAddr,
      transport: Transport,
   },
   AclConnectFailed {
      addr: BdAddr,
   },
   AclDisconnected {
      addr: BdAddr,
      transport: Transport,
      reason: DisconnectReason,
   },
   AclCloseAllCfm,

   HandsetConnected {
      addr: BdAddr,
   },
   HandsetDisconnected {
      addr: BdAddr,
      link_loss: bool,
   },
   HandsetProfileConnected(Profiles),
   HandsetProfileDisconnected(Profiles),
   HandsetConnectCfm {
      status: RequestStatus,
   },
   HandsetStopConnectCfm,
   HandsetDisconnectCfm {
      status: RequestStatus,
   },
   HandsetPaired {
      addr: BdAddr,
   },

   FindRoleResult(FindRoleOutcome),
   FindRolePrepareForRoleSelection,

   PeerPairCfm(Option<PeerPairing>),
   PeerProfilesConnectCfm {
      success: bool,
   },
   PeerProfilesDisconnectCfm {
      success: bool,
   },

   ScanCfm {
      kind: ScanKind,
      status: ScanStatus,
   },

   PeerSigRx(Packet),
   PeerSigTxCfm {
      kind: PeerSigKind,
      success: bool,
   },

   HandoverRecommendation(HandoverRecommendation),
   HandoverRecommendationCancel,
   HandoverStatus(HandoverStatus),

   PowerPrepare(PowerPrepare),
   PowerPrepareAbort,

   TimerExpired(ProcedureId),

   DfuStarted,
   DfuCompleted,

   ProhibitHandover(bool),
   ProhibitHandsetConnect(bool),
}

/// Requests produced by the engine for the platform to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
   PairPeer,
   /// `None` searches until cancelled.
   FindRole {
      timeout: Option<Duration>,
   },
   CancelFindRole,
   FindRoleScanning(bool),
   FindRolePrepareClient(bool),
   FindRolePrepareResponse,

   ConnectPeer {
      addr: BdAddr,
   },
   ReleasePeer {
      addr: BdAddr,
   },
   PeerPageScan(bool),
   TerminateAllAcls,
   ConnectPeerProfiles(Profiles),
   DisconnectPeerProfiles(Profiles),

   AllowHandsetConnect(bool),
   AllowLeConnections(bool),
   DisconnectLeConnections,
   ConnectHandset {
      addr: BdAddr,
      profiles: Profiles,
   },
   StopHandsetConnect,
   DisconnectHandset,
   DisconnectHandsetHfp,
   HandsetConnectable(bool),
   HandsetLeConnectable(bool),

   BredrScan(bool),
   LeScan(bool),
   LeAdvertising(bool),

   OverrideAddress(BdAddr),
   ConfigureProfiles(Role),

   Handover {
      addr: BdAddr,
   },
   CreateHdma,
   DestroyHdma,

   PeerSigTx(Packet),

   StartTimer {
      proc: ProcedureId,
      after: Duration,
   },
   CancelTimer(ProcedureId),

   PowerPrepareResponse,
}

/// A goal chosen by a rule, or a queued goal being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GoalDecision {
   pub goal: GoalId,
   pub params: ProcParams,
   pub origin: RuleSetId,
}

/// Internal work item drained to quiescence after every [`Input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Message {
   Started(ProcedureId),
   Complete(ProcedureId, ProcResult),
   Cancelled(ProcedureId, ProcResult),
   SetRole(Role),
   SetEvent(RuleEvents),
   ResetEvent(RuleEvents),
   GoalDecision(GoalDecision),
   ReplayGoal(GoalDecision),
}

/// Commands for the platform plus the FIFO of internal messages.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
   pub commands: Vec<Command>,
   pub queue: VecDeque<Message>,
}

impl Outbox {
   pub fn command(&mut self, command: Command) {
      self.commands.push(command);
   }

   pub fn post(&mut self, message: Message) {
      self.queue.push_back(message);
   }
}
