//! Async service around the topology engine.
//!
//! The engine itself is synchronous. This actor owns it, feeds it platform
//! notifications one at a time, runs procedure timers and hands every other
//! command to the [`Platform`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use crossbeam::atomic::AtomicCell;
use log::{debug, error, info};
use parking_lot::{Mutex, RwLock};
use tokio::{
   select,
   sync::{mpsc, oneshot},
   task::JoinHandle,
   time,
};

use crate::{
   config::Config,
   error::{Result, TopologyError},
   event::{EventBus, EventSender, TopologyEvent},
   topology::{
      Command, Input, Role, RuleEvents, Topology, procedures::ProcedureId, state::DeviceDb,
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

/// Carries out the commands the engine produces.
///
/// Results come back as [`Input`]s through [`TopologyService::notify`].
pub trait Platform: Send + 'static {
   fn execute(&mut self, command: Command);
}

#[derive(Debug)]
enum ServiceCommand {
   Start(oneshot::Sender<bool>),
   Notify(Input),
   SendRemoteRuleEvent(RuleEvents),
   TimerFired { proc: ProcedureId, generation: u64 },
}

/// State readable without a round trip to the actor.
struct Shared {
   role: AtomicCell<Role>,
   halted: AtomicCell<bool>,
   status: RwLock<serde_json::Value>,
}

/// Handle to the topology actor.
#[derive(Clone)]
pub struct TopologyService {
   inbox: mpsc::Sender<ServiceCommand>,
   shared: Arc<Shared>,
}

impl TopologyService {
   pub async fn new(
      config: Config,
      db: DeviceDb,
      platform: Box<dyn Platform>,
      event_tx: EventSender,
   ) -> Result<Self> {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let shared = Arc::new(Shared {
         role: AtomicCell::new(Role::None),
         halted: AtomicCell::new(false),
         status: RwLock::new(serde_json::Value::Null),
      });
      let topology = Topology::with_device_db(config, db);
      tokio::spawn(TopologyActor::new(topology, platform, event_tx, command_rx, shared.clone()).run());
      Ok(Self {
         inbox: command_tx,
         shared,
      })
   }

   /// As [`Self::new`], with the configuration read from the user's config
   /// directory (written with defaults on first run).
   pub async fn with_stored_config(
      db: DeviceDb,
      platform: Box<dyn Platform>,
      event_tx: EventSender,
   ) -> Result<Self> {
      let config = Config::load()?;
      info!("Loaded configuration: {config:?}");
      Self::new(config, db, platform, event_tx).await
   }

   /// Starts the topology and waits for the start confirmation.
   pub async fn start(&self) -> Result<bool> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(ServiceCommand::Start(tx))
         .await
         .map_err(|_| TopologyError::ServiceShutdown)?;
      rx.await.map_err(|_| TopologyError::ServiceShutdown)
   }

   pub async fn notify(&self, input: Input) -> Result<()> {
      self
         .inbox
         .send(ServiceCommand::Notify(input))
         .await
         .map_err(|_| TopologyError::ServiceShutdown)
   }

   /// Sets `events` in the peer's active rule set.
   pub async fn send_remote_rule_event(&self, events: RuleEvents) -> Result<()> {
      self
         .inbox
         .send(ServiceCommand::SendRemoteRuleEvent(events))
         .await
         .map_err(|_| TopologyError::ServiceShutdown)
   }

   pub fn role(&self) -> Role {
      self.shared.role.load()
   }

   pub fn is_halted(&self) -> bool {
      self.shared.halted.load()
   }

   /// Snapshot of the engine taken after the last processed input.
   pub fn status(&self) -> serde_json::Value {
      self.shared.status.read().clone()
   }
}

/// Collects engine notifications until the actor forwards them.
#[derive(Default)]
struct Relay {
   events: Mutex<Vec<TopologyEvent>>,
}

impl EventBus for Relay {
   fn emit(&self, event: TopologyEvent) {
      self.events.lock().push(event);
   }
}

struct TopologyActor {
   topology: Topology,
   platform: Box<dyn Platform>,
   event_tx: EventSender,
   relay: Arc<Relay>,
   shared: Arc<Shared>,
   command_rx: mpsc::Receiver<ServiceCommand>,
   loopback_rx: mpsc::Receiver<ServiceCommand>,
   loopback_tx: mpsc::Sender<ServiceCommand>,

   start_waiters: Vec<oneshot::Sender<bool>>,
   timers: HashMap<ProcedureId, (u64, JoinHandle<()>)>,
   timer_generation: u64,
}

impl TopologyActor {
   fn new(
      mut topology: Topology,
      platform: Box<dyn Platform>,
      event_tx: EventSender,
      command_rx: mpsc::Receiver<ServiceCommand>,
      shared: Arc<Shared>,
   ) -> Self {
      let relay = Arc::new(Relay::default());
      topology.register_observer(relay.clone());
      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      Self {
         topology,
         platform,
         event_tx,
         relay,
         shared,
         command_rx,
         loopback_rx,
         loopback_tx,
         start_waiters: Vec::new(),
         timers: HashMap::new(),
         timer_generation: 0,
      }
   }

   async fn run(mut self) {
      info!("Topology service starting up");
      self.publish();

      loop {
         select! {
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Topology service shutting down");
                     break;
                 };
                 if !self.handle_command(cmd) {
                     break;
                 }
             }
             Some(cmd) = self.loopback_rx.recv() => {
                 if !self.handle_command(cmd) {
                     break;
                 }
             }
         }
      }

      self.cleanup();
   }

   /// Returns false once the engine has halted.
   fn handle_command(&mut self, cmd: ServiceCommand) -> bool {
      let input = match cmd {
         ServiceCommand::Start(tx) => {
            self.start_waiters.push(tx);
            Input::Start
         },
         ServiceCommand::Notify(input) => input,
         ServiceCommand::SendRemoteRuleEvent(events) => {
            let command = self.topology.send_remote_rule_event(events);
            self.execute(command);
            return true;
         },
         ServiceCommand::TimerFired { proc, generation } => {
            match self.timers.get(&proc) {
               Some((current, _)) if *current == generation => {
                  self.timers.remove(&proc);
                  Input::TimerExpired(proc)
               },
               _ => {
                  debug!("Ignoring stale {proc} timer");
                  return true;
               },
            }
         },
      };

      let result = self.topology.handle(input);
      let running = match result {
         Ok(commands) => {
            for command in commands {
               self.execute(command);
            }
            true
         },
         Err(e) => {
            error!("Topology halted: {e}");
            self.shared.halted.store(true);
            false
         },
      };
      self.forward_events();
      self.publish();
      running
   }

   fn execute(&mut self, command: Command) {
      match command {
         Command::StartTimer { proc, after } => self.start_timer(proc, after),
         Command::CancelTimer(proc) => {
            if let Some((_, handle)) = self.timers.remove(&proc) {
               debug!("Timer {proc} cancelled");
               handle.abort();
            }
         },
         command => {
            debug!("Executing {command:?}");
            self.platform.execute(command);
         },
      }
   }

   fn start_timer(&mut self, proc: ProcedureId, after: Duration) {
      self.timer_generation += 1;
      let generation = self.timer_generation;
      let loopback = self.loopback_tx.clone();
      let handle = tokio::spawn(async move {
         time::sleep(after).await;
         let _ = loopback
            .send(ServiceCommand::TimerFired { proc, generation })
            .await;
      });
      debug!("Timer {proc} armed for {after:?}");
      if let Some((_, previous)) = self.timers.insert(proc, (generation, handle)) {
         previous.abort();
      }
   }

   fn forward_events(&mut self) {
      let events = std::mem::take(&mut *self.relay.events.lock());
      let mut start_result = None;
      for event in events {
         match event {
            TopologyEvent::RoleChanged { role } => self.shared.role.store(role),
            TopologyEvent::StartCfm { success } => start_result = Some(success),
            TopologyEvent::HandoverComplete => {},
         }
         self.event_tx.emit(event);
      }
      if let Some(success) = start_result {
         for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(success);
         }
      }
   }

   fn publish(&self) {
      *self.shared.status.write() = self.topology.status_json();
   }

   fn cleanup(&mut self) {
      for (_, (_, handle)) in self.timers.drain() {
         handle.abort();
      }
      // Pending start requests see the service as shut down.
      self.start_waiters.clear();
   }
}
