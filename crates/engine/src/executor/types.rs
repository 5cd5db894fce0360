//! Core executor data types.

use provisio_types::{HttpResponse, RequestFailure};
use serde::{Deserialize, Serialize};

/// Result of issuing one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The server answered and the status was acceptable for the step.
    Completed(HttpResponse),
    /// No usable response; carries the classified reason.
    Failed(RequestFailure),
}

impl StepOutcome {
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            StepOutcome::Completed(response) => Some(response),
            StepOutcome::Failed(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed(_))
    }

    /// Text used in notification descriptions: the body on success, the reason on failure.
    pub fn detail(&self) -> String {
        match self {
            StepOutcome::Completed(response) => response.text(),
            StepOutcome::Failed(failure) => failure.to_string(),
        }
    }
}

/// Result of a polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// True when the `continue_if` gate held for `outcome`.
    pub satisfied: bool,
    /// The last observed outcome.
    pub outcome: StepOutcome,
    /// Requests issued, including the initial one.
    pub attempts: u32,
}

/// Status of an executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    /// Step did not run because its precondition was false.
    Skipped,
    /// Step executed and its response was accepted.
    Succeeded,
    /// A `continue_if` gate rejected the response.
    Blocked,
    /// Step attempted but produced no usable response.
    Failed,
}

/// Summary of one step, kept for telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub url: String,
    pub status: StepStatus,
    /// HTTP status of the last response, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Requests issued for the step (>= 1 when executed).
    pub attempts: u32,
}
