//! Workflow runtime state.
//!
//! A run moves through `Init → Renewing → Executing(i) → Polling(i) → PostNotify → Done`,
//! leaving early into `Failed` or `Blocked`. [`WorkflowRunState`] owns the run's
//! [`RunContext`] and records the phases visited and a summary of every step.

use serde::{Deserialize, Serialize};

use crate::executor::{StepResult, StepStatus};
use crate::resolve::RunContext;

/// Phase of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "step")]
pub enum RunPhase {
    Init,
    Renewing,
    Executing(usize),
    Polling(usize),
    PostNotify,
    Done,
    Failed,
    Blocked,
}

/// Mutable state of one executing workflow.
#[derive(Debug, Clone)]
pub struct WorkflowRunState {
    pub integration_id: u64,
    pub actor_id: Option<u64>,
    /// Run-scoped variables, responses and files.
    pub run_context: RunContext,
    phase: RunPhase,
    telemetry: WorkflowTelemetry,
}

impl WorkflowRunState {
    pub fn new(integration_id: u64, actor_id: Option<u64>, run_context: RunContext) -> Self {
        let mut telemetry = WorkflowTelemetry::default();
        telemetry.phases.push(RunPhase::Init);
        Self {
            integration_id,
            actor_id,
            run_context,
            phase: RunPhase::Init,
            telemetry,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `phase`. Re-entering the current phase records nothing.
    pub fn enter(&mut self, phase: RunPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.telemetry.phases.push(phase);
        }
    }

    pub fn record_step(&mut self, result: StepResult) {
        self.telemetry.step_events.push(result);
    }

    pub fn telemetry(&self) -> &WorkflowTelemetry {
        &self.telemetry
    }
}

/// Telemetry collected during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTelemetry {
    phases: Vec<RunPhase>,
    step_events: Vec<StepResult>,
}

impl WorkflowTelemetry {
    /// Phases in the order they were entered.
    pub fn phases(&self) -> &[RunPhase] {
        &self.phases
    }

    pub fn step_events(&self) -> &[StepResult] {
        &self.step_events
    }

    /// Number of steps that issued at least one request.
    pub fn executed_steps(&self) -> usize {
        self.step_events
            .iter()
            .filter(|event| event.status != StepStatus::Skipped)
            .count()
    }
}
