//! Single-step execution.

use std::time::Instant;

use provisio_types::{RequestFailure, StepSpec};
use tracing::{debug, warn};

use super::{StepEnvironment, StepOutcome, StepTransport, prepare_request};

/// Render and issue a step once.
///
/// A 4xx/5xx status fails the step with the raw body unless `fail_when_4xx_response_code` is
/// false.
pub fn run_step_with(step: &StepSpec, environment: &StepEnvironment<'_>, transport: &dyn StepTransport) -> StepOutcome {
    let request = match prepare_request(step, environment) {
        Ok(request) => request,
        Err(failure) => {
            warn!(url = %step.url, reason = %failure, "step could not be prepared");
            return StepOutcome::Failed(failure);
        }
    };

    let started = Instant::now();
    let result = transport.send(&request);
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) if step.fail_when_4xx_response_code && response.is_client_or_server_error() => {
            warn!(
                url = %step.url,
                status = response.status,
                duration_ms,
                "step rejected by response status"
            );
            StepOutcome::Failed(RequestFailure::status_rejected(&response))
        }
        Ok(response) => {
            debug!(url = %step.url, status = response.status, duration_ms, "step completed");
            StepOutcome::Completed(response)
        }
        Err(failure) => {
            warn!(url = %step.url, reason = %failure, duration_ms, "step request failed");
            StepOutcome::Failed(failure)
        }
    }
}
