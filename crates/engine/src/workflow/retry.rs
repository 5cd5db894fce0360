//! Delayed reruns of failed workflows.

use anyhow::{Context, Result};
use tracing::info;

use crate::executor::StepTransport;
use crate::host::{Host, RetryJob};
use crate::settings::EngineSettings;
use crate::workflow::runner::{ExecutionReport, IntegrationRunner};

/// Unique scheduler name for the rerun of an integration for one actor.
pub fn retry_job_name(integration_id: u64, actor_id: u64) -> String {
    format!("Retrying integration {integration_id} for new hire {actor_id}")
}

/// Load the integration and actor named by `job` and run the workflow again with its params.
pub fn retry_run(
    job: &RetryJob,
    settings: &EngineSettings,
    transport: &dyn StepTransport,
    host: Host<'_>,
) -> Result<ExecutionReport> {
    let integration = host
        .store
        .load_integration(job.integration_id)
        .with_context(|| format!("could not load integration {} for retry", job.integration_id))?;
    let mut actor = host
        .store
        .load_actor(job.actor_id)
        .with_context(|| format!("could not load actor {} for retry", job.actor_id))?;

    info!(
        integration_id = job.integration_id,
        actor_id = job.actor_id,
        "retrying integration run"
    );
    let mut runner = IntegrationRunner::new(integration, settings, transport, host);
    Ok(runner.execute(Some(&mut actor), job.params.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_identify_integration_and_actor() {
        assert_eq!(retry_job_name(3, 17), "Retrying integration 3 for new hire 17");
    }
}
