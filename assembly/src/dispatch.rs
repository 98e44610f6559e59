//! Slot dispatcher: explicit states and legal transition guards.
//!
//! One dispatch resolves a trigger (weekday/hour, override text or the manual
//! flag) into at most one routine invocation:
//!
//! ```text
//! Idle → Resolving → Dispatched → Done
//!             └──────────────────→ Done   (nothing to run)
//! ```
//!
//! A resolved slot with no registered routine still passes through
//! `Dispatched`; the no-op happens there. Every transition is recorded with
//! its reason. The dispatcher keeps no state between dispatches.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, PipelineResult};
use crate::post::RunOutcome;
use crate::routine::{Routine, RoutineRegistry, SlotId};
use crate::schedule::{parse_override, ScheduleTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    Resolving,
    Dispatched,
    /// Terminal.
    Done,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Resolving => write!(f, "Resolving"),
            Self::Dispatched => write!(f, "Dispatched"),
            Self::Done => write!(f, "Done"),
        }
    }
}

fn is_legal_transition(from: DispatchState, to: DispatchState) -> bool {
    use DispatchState::*;

    matches!(
        (from, to),
        (Idle, Resolving) | (Resolving, Dispatched) | (Resolving, Done) | (Dispatched, Done)
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: DispatchState,
    pub to: DispatchState,
    /// Milliseconds since the dispatch started.
    pub elapsed_ms: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: DispatchState,
    pub to: DispatchState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-dispatch state machine.
pub struct DispatchMachine {
    current: DispatchState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl DispatchMachine {
    pub fn new() -> Self {
        Self {
            current: DispatchState::Idle,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> DispatchState {
        self.current
    }

    pub fn advance(&mut self, to: DispatchState, reason: &str) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "Dispatch transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.to_string(),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }
}

impl Default for DispatchMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// What triggered this run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchRequest {
    /// Monday = 0.
    pub weekday: u8,
    pub hour: u8,
    pub override_text: Option<String>,
    pub manual: bool,
}

impl DispatchRequest {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self {
            weekday: ts.weekday().num_days_from_monday() as u8,
            hour: ts.hour() as u8,
            override_text: None,
            manual: false,
        }
    }

    /// Blank text is treated as no override.
    pub fn with_override(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.override_text = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Resolution {
    Override { text: String, slot: SlotId },
    ManualToday { slot: SlotId },
    Scheduled { slot: SlotId },
    /// Override text with neither a number nor a routine keyword.
    Unparseable { text: String },
    /// No override and nothing scheduled for this trigger.
    Unscheduled,
}

impl Resolution {
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::Override { slot, .. } | Self::ManualToday { slot } | Self::Scheduled { slot } => {
                Some(*slot)
            }
            Self::Unparseable { .. } | Self::Unscheduled => None,
        }
    }
}

/// Executes one routine; implemented by the pipeline.
#[async_trait]
pub trait RoutineRunner: Send {
    async fn run(&mut self, slot: SlotId, routine: Routine) -> PipelineResult<RunOutcome>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    NoRoutine,
    UnknownSlot { slot: SlotId },
    Completed {
        slot: SlotId,
        run: Box<RunOutcome>,
    },
    Failed {
        slot: SlotId,
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub request: DispatchRequest,
    pub resolution: Resolution,
    pub outcome: DispatchOutcome,
    pub final_state: DispatchState,
    pub transitions: Vec<TransitionRecord>,
}

impl DispatchReport {
    pub fn invoked(&self) -> bool {
        matches!(
            self.outcome,
            DispatchOutcome::Completed { .. } | DispatchOutcome::Failed { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Failed { .. })
    }
}

pub struct Dispatcher {
    schedule: ScheduleTable,
    registry: RoutineRegistry,
}

impl Dispatcher {
    pub fn new(schedule: ScheduleTable, registry: RoutineRegistry) -> Self {
        Self { schedule, registry }
    }

    pub fn schedule(&self) -> &ScheduleTable {
        &self.schedule
    }

    pub fn registry(&self) -> &RoutineRegistry {
        &self.registry
    }

    /// Override text wins, then the manual flag, then the schedule.
    pub fn resolve(&self, request: &DispatchRequest) -> Resolution {
        if let Some(text) = &request.override_text {
            return match parse_override(text, &self.registry) {
                Some(slot) => Resolution::Override {
                    text: text.clone(),
                    slot,
                },
                None => Resolution::Unparseable { text: text.clone() },
            };
        }
        if request.manual {
            return match self.schedule.first_of_day(request.weekday) {
                Some(slot) => Resolution::ManualToday { slot },
                None => Resolution::Unscheduled,
            };
        }
        match self.schedule.lookup(request.weekday, request.hour) {
            Some(slot) => Resolution::Scheduled { slot },
            None => Resolution::Unscheduled,
        }
    }

    /// Resolve and run at most one routine. Always ends in `Done`.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        runner: &mut dyn RoutineRunner,
    ) -> DispatchReport {
        let mut machine = DispatchMachine::new();
        step(&mut machine, DispatchState::Resolving, "trigger received");

        let resolution = self.resolve(&request);
        let outcome = match resolution.slot() {
            Some(slot) => self.run_slot(&mut machine, slot, runner).await,
            None => {
                let reason = match &resolution {
                    Resolution::Unparseable { text } => {
                        warn!(text = %text, "Override names no slot or routine");
                        "override unparseable"
                    }
                    _ => {
                        info!(
                            weekday = request.weekday,
                            hour = request.hour,
                            "No routine scheduled"
                        );
                        "nothing scheduled"
                    }
                };
                step(&mut machine, DispatchState::Done, reason);
                DispatchOutcome::NoRoutine
            }
        };

        DispatchReport {
            request,
            resolution,
            outcome,
            final_state: machine.current(),
            transitions: machine.into_transitions(),
        }
    }

    /// `Dispatched` → `Done` around at most one runner call.
    async fn run_slot(
        &self,
        machine: &mut DispatchMachine,
        slot: SlotId,
        runner: &mut dyn RoutineRunner,
    ) -> DispatchOutcome {
        let Some(routine) = self.registry.get(slot) else {
            warn!(slot, "Slot has no registered routine");
            step(machine, DispatchState::Dispatched, "unknown slot");
            step(machine, DispatchState::Done, "no routine for slot");
            return DispatchOutcome::UnknownSlot { slot };
        };

        info!(slot, routine = %routine, "Dispatching routine");
        step(machine, DispatchState::Dispatched, &routine.name());
        match runner.run(slot, routine).await {
            Ok(run) => {
                info!(slot, routine = %routine, dry_run = run.dry_run, "Routine completed");
                step(machine, DispatchState::Done, "routine completed");
                DispatchOutcome::Completed {
                    slot,
                    run: Box::new(run),
                }
            }
            Err(e) => {
                error!(
                    slot,
                    routine = %routine,
                    kind = %e.kind(),
                    error = %e,
                    "Routine failed"
                );
                step(machine, DispatchState::Done, "routine failed");
                DispatchOutcome::Failed {
                    slot,
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }
}

fn step(machine: &mut DispatchMachine, to: DispatchState, reason: &str) {
    if let Err(e) = machine.advance(to, reason) {
        error!(error = %e, reason, "Dispatch state machine rejected transition");
    }
}
