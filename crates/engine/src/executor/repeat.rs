//! Polling helpers.
//!
//! A polling step is re-issued on a fixed interval until its `continue_if` gate holds or the
//! attempt budget runs out. Sleeps block the calling thread.

use std::{thread, time::Duration};

use provisio_types::StepSpec;
use tracing::{info, warn};

use crate::resolve::gate_satisfied;

use super::{PollOutcome, StepEnvironment, StepOutcome, StepTransport, run_step_with};

/// Poll a step that already produced `initial`.
///
/// The gate is checked on `initial` first. Up to `amount - 1` further requests follow, each
/// after sleeping `interval` seconds. A failed request counts as an unsatisfied attempt.
pub fn poll_step_with(
    step: &StepSpec,
    initial: StepOutcome,
    environment: &StepEnvironment<'_>,
    transport: &dyn StepTransport,
) -> PollOutcome {
    poll_step_with_observer(step, initial, environment, transport, |_| {})
}

/// Poll a step and notify `observer` before each additional attempt.
///
/// A step without `polling` and `continue_if` is returned as-is, satisfied when it completed.
pub fn poll_step_with_observer<F>(
    step: &StepSpec,
    initial: StepOutcome,
    environment: &StepEnvironment<'_>,
    transport: &dyn StepTransport,
    mut observer: F,
) -> PollOutcome
where
    F: FnMut(u32),
{
    let (Some(polling), Some(gate)) = (&step.polling, &step.continue_if) else {
        return PollOutcome {
            satisfied: initial.is_completed(),
            outcome: initial,
            attempts: 1,
        };
    };
    let check = |outcome: &StepOutcome| {
        outcome
            .response()
            .is_some_and(|response| gate_satisfied(gate, response, environment.renderer, environment.context))
    };

    let interval = polling_interval(polling.interval);
    let mut attempts = 1u32;
    let mut outcome = initial;
    if check(&outcome) {
        return PollOutcome {
            satisfied: true,
            outcome,
            attempts,
        };
    }

    while polling.amount > attempts {
        thread::sleep(interval);
        attempts += 1;
        observer(attempts);
        outcome = run_step_with(step, environment, transport);
        if check(&outcome) {
            info!(url = %step.url, attempt = attempts, "polling condition met");
            return PollOutcome {
                satisfied: true,
                outcome,
                attempts,
            };
        }
    }

    warn!(url = %step.url, attempt = attempts, "polling attempts exhausted");
    PollOutcome {
        satisfied: false,
        outcome,
        attempts,
    }
}

fn polling_interval(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}
