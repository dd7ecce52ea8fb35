//! Rule sets: event-driven decision tables that select goals.
//!
//! A rule fires when its event is set and its guard says so. Rules for one
//! event are considered in table order; a rule that is in progress holds back
//! the later rules for its event until its goal has been dispatched.

mod dfu;
mod primary;
mod secondary;

use log::debug;

use crate::{
   config::Config,
   topology::{
      events::RuleEvents,
      goals::GoalId,
      io::GoalDecision,
      procedures::ProcParams,
      state::TopologyState,
   },
};

pub use primary::ConnectReason;

/// Which decision table a rule event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RuleSetId {
   Primary,
   Secondary,
   Dfu,
}

/// Guard verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
   Run(ProcParams),
   /// Nothing to do for this event; the rule is complete.
   Ignore,
   /// Preconditions not met yet; evaluate again on the next pass.
   Defer,
}

impl RuleAction {
   pub const RUN: Self = Self::Run(ProcParams::None);

   const fn run_if(cond: bool) -> Self {
      if cond { Self::RUN } else { Self::Ignore }
   }
}

pub type Guard = fn(&TopologyState, &Config) -> RuleAction;

pub struct RuleEntry {
   pub event: RuleEvents,
   pub guard: Guard,
   pub goal: GoalId,
}

const fn rule(event: RuleEvents, guard: Guard, goal: GoalId) -> RuleEntry {
   RuleEntry { event, guard, goal }
}

fn always(_: &TopologyState, _: &Config) -> RuleAction {
   RuleAction::RUN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleStatus {
   NotDone,
   InProgress,
   Complete,
   Deferred,
}

/// One decision table plus its set events and per-rule status.
pub(crate) struct RuleSet {
   id: RuleSetId,
   rules: &'static [RuleEntry],
   status: Vec<RuleStatus>,
   events: RuleEvents,
}

impl RuleSet {
   pub fn new(id: RuleSetId) -> Self {
      let rules = match id {
         RuleSetId::Primary => primary::RULES,
         RuleSetId::Secondary => secondary::RULES,
         RuleSetId::Dfu => dfu::RULES,
      };
      Self::with_rules(id, rules)
   }

   fn with_rules(id: RuleSetId, rules: &'static [RuleEntry]) -> Self {
      Self {
         id,
         rules,
         status: vec![RuleStatus::NotDone; rules.len()],
         events: RuleEvents::NONE,
      }
   }

   pub const fn id(&self) -> RuleSetId {
      self.id
   }

   pub const fn events(&self) -> RuleEvents {
      self.events
   }

   /// Sets events and evaluates the table.
   pub fn set_event(
      &mut self,
      events: RuleEvents,
      state: &TopologyState,
      config: &Config,
   ) -> Vec<GoalDecision> {
      debug!("{} rules set {events}", self.id);
      self.events.insert(events);
      self.check(state, config)
   }

   /// Clears events and returns their rules to not-done.
   pub fn reset_event(&mut self, events: RuleEvents) {
      if self.events.intersects(events) {
         debug!("{} rules reset {events}", self.id);
      }
      self.events.remove(events);
      for (rule, status) in self.rules.iter().zip(&mut self.status) {
         if rule.event.intersects(events) {
            *status = RuleStatus::NotDone;
         }
      }
   }

   /// Marks in-progress rules for `goal` complete. Evaluation is left to the
   /// caller, which only re-checks the set currently routed to.
   pub fn set_rule_complete(&mut self, goal: GoalId) {
      self.set_rule_with_event_complete(goal, RuleEvents::ALL);
   }

   /// As [`Self::set_rule_complete`], limited to rules for `events`.
   pub fn set_rule_with_event_complete(&mut self, goal: GoalId, events: RuleEvents) {
      self.update_status(goal, RuleStatus::InProgress, events);
   }

   /// Clears all events and rule status.
   pub fn reset(&mut self) {
      self.events = RuleEvents::NONE;
      self.status.fill(RuleStatus::NotDone);
   }

   /// One evaluation pass over the table.
   pub fn check(&mut self, state: &TopologyState, config: &Config) -> Vec<GoalDecision> {
      let mut decisions = Vec::new();
      let mut events = self.events;

      for index in 0..self.rules.len() {
         let rule = &self.rules[index];
         if !events.contains(rule.event) {
            continue;
         }
         match self.status[index] {
            RuleStatus::Complete => continue,
            RuleStatus::InProgress => {
               events.remove(rule.event);
               continue;
            },
            RuleStatus::NotDone | RuleStatus::Deferred => {},
         }

         match (rule.guard)(state, config) {
            RuleAction::Run(params) => {
               debug!("{} rule {index} ({}) -> {}", self.id, rule.event, rule.goal);
               self.status[index] = RuleStatus::InProgress;
               decisions.push(GoalDecision {
                  goal: rule.goal,
                  params,
                  origin: self.id,
               });
               events.remove(rule.event);
            },
            RuleAction::Ignore => {
               let current = self.status[index];
               events.remove(self.update_status(rule.goal, current, rule.event));
            },
            RuleAction::Defer => {
               debug!("{} rule {index} ({}) deferred", self.id, rule.event);
               self.status[index] = RuleStatus::Deferred;
            },
         }
      }
      decisions
   }

   /// Moves matching rules from `from` to complete, then resets every event
   /// whose rules have all completed. Returns the events that were reset.
   fn update_status(&mut self, goal: GoalId, from: RuleStatus, events: RuleEvents) -> RuleEvents {
      let mut completed = RuleEvents::NONE;
      for (rule, status) in self.rules.iter().zip(&mut self.status) {
         if rule.goal == goal && *status == from && rule.event.intersects(events) {
            *status = RuleStatus::Complete;
            completed.insert(rule.event);
         }
      }
      for (rule, status) in self.rules.iter().zip(&self.status) {
         if rule.event.intersects(completed) && *status != RuleStatus::Complete {
            completed.remove(rule.event);
         }
      }
      if !completed.is_empty() {
         self.reset_event(completed);
      }
      completed
   }
}
