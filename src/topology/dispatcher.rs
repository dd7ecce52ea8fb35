//! Goal dispatcher: starts goals, resolves contention between them and maps
//! procedure confirmations back to goals.

use log::{debug, warn};
use strum::EnumCount;

use crate::{
   error::{Result, TopologyError},
   topology::{
      goals::{self, Contention, GoalAction, GoalId, GoalSet},
      io::{GoalDecision, Input, Message},
      procedures::{ProcContext, ProcResult, ProcedureId, Procedures},
      script::{ScriptEngine, ScriptOutcome},
   },
};

/// Upper bound on queued goals. Every goal id fits at least once.
pub(crate) const MAX_PENDING: usize = 32;

#[derive(Debug, Clone, Copy)]
struct PendingGoal {
   decision: GoalDecision,
   /// Goals that must clear before this one may run.
   lock: GoalSet,
}

/// How a goal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GoalOutcome {
   Finished { goal: GoalId, result: ProcResult },
   Cancelled { goal: GoalId },
}

impl GoalOutcome {
   pub const fn goal(self) -> GoalId {
      match self {
         Self::Finished { goal, .. } | Self::Cancelled { goal } => goal,
      }
   }
}

pub(crate) struct Dispatcher {
   procs: Procedures,
   script: ScriptEngine,
   script_goal: Option<GoalId>,
   /// Goal that started each directly run procedure.
   proc_goals: [Option<GoalId>; ProcedureId::COUNT],
   pending: heapless::Vec<PendingGoal, MAX_PENDING>,
   cancelling: GoalSet,
}

impl Dispatcher {
   pub fn new() -> Self {
      Self {
         procs: Procedures::new(),
         script: ScriptEngine::default(),
         script_goal: None,
         proc_goals: [None; ProcedureId::COUNT],
         pending: heapless::Vec::new(),
         cancelling: GoalSet::EMPTY,
      }
   }

   /// Goals waiting to run, oldest first.
   pub fn pending_goals(&self) -> impl Iterator<Item = GoalId> + '_ {
      self.pending.iter().map(|p| p.decision.goal)
   }

   /// Delivers an input to every active procedure.
   pub fn handle_input(&mut self, ctx: &mut ProcContext<'_>, input: &Input) {
      self.procs.handle(ctx, input);
   }

   /// Runs, queues or cancels its way towards `decision`.
   pub fn add_goal(
      &mut self,
      decision: GoalDecision,
      replay: bool,
      ctx: &mut ProcContext<'_>,
   ) -> Result<()> {
      let goal = decision.goal;
      let entry = goals::entry(goal);
      let active = ctx.state.active_goals;
      debug!(
         "Goal {goal} requested{}, active {active}",
         if replay { " (replay)" } else { "" }
      );

      if active.is_empty() && (self.pending.is_empty() || replay) {
         return self.start(decision, ctx);
      }

      let lock = match entry.contention {
         Contention::Cancel => {
            if !self.pending.is_empty() {
               debug!("Goal {goal} flushes {} pending goals", self.pending.len());
               self.pending.clear();
            }
            for other in active.iter() {
               self.cancel_goal(other, ctx);
            }
            ctx.state.active_goals
         },
         Contention::Wait | Contention::Concurrent(_) => {
            let mut wait = active;
            if let Contention::Concurrent(with) = entry.contention {
               wait = wait.difference(with);
            }
            if let Some(other) = entry.exclusive
               && active.contains(other)
            {
               self.pending.retain(|p| p.decision.goal != other);
               self.cancel_goal(other, ctx);
            }
            wait
         },
      };

      if lock.is_empty() {
         self.start(decision, ctx)
      } else {
         self.queue(decision, lock)
      }
   }

   fn queue(&mut self, decision: GoalDecision, lock: GoalSet) -> Result<()> {
      debug!("Goal {} queued behind {lock}", decision.goal);
      self
         .pending
         .push(PendingGoal { decision, lock })
         .map_err(|_| TopologyError::invariant("pending goal queue full"))
   }

   fn start(&mut self, decision: GoalDecision, ctx: &mut ProcContext<'_>) -> Result<()> {
      let goal = decision.goal;
      if ctx.state.active_goals.contains(goal) {
         return Err(TopologyError::invariant("goal started while already active"));
      }
      ctx.state.active_goals.insert(goal);
      debug!("Goal {goal} start");

      match goals::entry(goal).action {
         GoalAction::Procedure(proc) => {
            self.proc_goals[proc as usize] = Some(goal);
            self.procs.start(proc, ctx, decision.params)?;
         },
         GoalAction::Script(script) => {
            self.script_goal = Some(goal);
            self
               .script
               .start(script, decision.params, &mut self.procs, ctx)?;
         },
      }

      let active = ctx.state.active_goals;
      for pending in &mut self.pending {
         pending.lock = match goals::entry(pending.decision.goal).contention {
            Contention::Concurrent(with) => active.difference(with),
            Contention::Wait | Contention::Cancel => active,
         };
      }
      Ok(())
   }

   /// Requests a cancel; the goal clears once the cancel is confirmed.
   fn cancel_goal(&mut self, goal: GoalId, ctx: &mut ProcContext<'_>) {
      if self.cancelling.contains(goal) {
         return;
      }
      debug!("Goal {goal} cancel");
      self.cancelling.insert(goal);
      match goals::entry(goal).action {
         GoalAction::Procedure(proc) => self.procs.cancel(proc, ctx),
         GoalAction::Script(_) => self.script.cancel(&mut self.procs, ctx),
      }
   }

   fn finished(&self, goal: GoalId, result: ProcResult) -> GoalOutcome {
      // A goal that finished while a cancel was in flight counts as cancelled.
      if self.cancelling.contains(goal) {
         GoalOutcome::Cancelled { goal }
      } else {
         GoalOutcome::Finished { goal, result }
      }
   }

   fn script_outcome(&mut self, outcome: ScriptOutcome) -> Result<GoalOutcome> {
      let goal = self
         .script_goal
         .take()
         .ok_or(TopologyError::invariant("script ended without a goal"))?;
      Ok(match outcome {
         ScriptOutcome::Finished(result) => self.finished(goal, result),
         ScriptOutcome::Cancelled(_) => GoalOutcome::Cancelled { goal },
      })
   }

   /// A procedure completed. Returns the goal outcome if a goal ended.
   pub fn on_complete(
      &mut self,
      proc: ProcedureId,
      result: ProcResult,
      ctx: &mut ProcContext<'_>,
   ) -> Result<Option<GoalOutcome>> {
      if let Some(goal) = self.proc_goals[proc as usize].take() {
         return Ok(Some(self.finished(goal, result)));
      }
      match self.script.on_complete(proc, result, &mut self.procs, ctx)? {
         Some(outcome) => self.script_outcome(outcome).map(Some),
         None => Ok(None),
      }
   }

   /// A procedure confirmed a cancel.
   pub fn on_cancelled(&mut self, proc: ProcedureId, result: ProcResult) -> Result<Option<GoalOutcome>> {
      if let Some(goal) = self.proc_goals[proc as usize].take() {
         return Ok(Some(GoalOutcome::Cancelled { goal }));
      }
      match self.script.on_cancelled(proc, result) {
         Some(outcome) => self.script_outcome(outcome).map(Some),
         None => Ok(None),
      }
   }

   /// Removes an ended goal and replays every queued goal it unblocked.
   pub fn clear_goal(&mut self, goal: GoalId, ctx: &mut ProcContext<'_>) {
      if !ctx.state.active_goals.contains(goal) {
         warn!("Clearing goal {goal} that is not active");
      }
      ctx.state.active_goals.remove(goal);
      self.cancelling.remove(goal);
      debug!("Goal {goal} cleared, active {}", ctx.state.active_goals);

      for pending in &mut self.pending {
         pending.lock.remove(goal);
      }
      let mut index = 0;
      while index < self.pending.len() {
         if self.pending[index].lock.is_empty() {
            let ready = self.pending.remove(index);
            ctx.post(Message::ReplayGoal(ready.decision));
         } else {
            index += 1;
         }
      }
   }
}
