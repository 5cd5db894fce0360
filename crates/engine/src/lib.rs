//! # Provisio Engine
//!
//! The Provisio Engine loads integration manifests and executes them: it renders templates,
//! issues HTTP steps, polls until responses are ready, stores returned data on the actor,
//! refreshes OAuth credentials and hands failed runs to a retry scheduler.
//!
//! ## Usage
//!
//! ```rust
//! use provisio_engine::parse_manifest_file;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let manifest_path = temp_dir.path().join("manifest.json");
//! std::fs::write(&manifest_path, r#"{
//!     "execute": [{"url": "https://api.example.com/users", "data": {"email": "{{ email }}"}}]
//! }"#)?;
//!
//! let manifest = parse_manifest_file(&manifest_path)?;
//! assert_eq!(manifest.execute.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`templates`**: `{{ name }}` rendering with `minijinja`
//! - **`resolve`**: run context, precondition folding and `continue_if` gates
//! - **`field_paths`**: dotted and bracket lookups into JSON responses
//! - **`executor`**: rendering and issuing single steps, polling
//! - **`workflow`**: the execute/exists/revoke orchestration, OAuth renewal, retries
//! - **`host`**: collaborator traits supplied by the embedding application

use std::{fs, path::Path};

use anyhow::{Context, Result};
use provisio_types::{IntegrationConfig, Manifest};
use serde_json::Value;

pub mod executor;
pub mod field_paths;
pub mod host;
pub mod resolve;
pub mod settings;
pub mod templates;
pub mod workflow;

pub use executor::{PollOutcome, ReqwestTransport, StepOutcome, StepResult, StepStatus, StepTransport};
pub use field_paths::{NotationError, value_from_notation};
pub use host::{Host, IntegrationStore, ManualAccess, MessageSender, NotificationSink, RetryJob, RetryScheduler, ScheduleError};
pub use resolve::RunContext;
pub use settings::{ConfigError, EngineSettings};
pub use templates::{TemplateContext, TemplateError, TemplateRenderer, validate_manifest_templates};
pub use workflow::renewal::AuthorizationError;
pub use workflow::retry::{retry_job_name, retry_run};
pub use workflow::runner::{ExecutionOutcome, ExecutionReport, ExistenceCheck, IntegrationRunner, RevokeError};
pub use workflow::state::{RunPhase, WorkflowRunState, WorkflowTelemetry};

/// Validate a manifest document, including the syntax of every template string.
pub fn parse_manifest_value(document: Value) -> Result<Manifest, provisio_types::ManifestError> {
    let manifest = Manifest::from_value(document)?;
    validate_manifest_templates(&manifest, &TemplateRenderer::new())?;
    Ok(manifest)
}

/// Parse a stored integration record, checking its manifest and every template in it.
pub fn parse_integration(text: &str) -> Result<IntegrationConfig, provisio_types::ManifestError> {
    let integration = IntegrationConfig::from_json_str(text)?;
    validate_manifest_templates(&integration.manifest, &TemplateRenderer::new())?;
    Ok(integration)
}

/// Loads a manifest file with format detection.
///
/// Files ending in `.yaml` or `.yml` are read as YAML; everything else as JSON.
///
/// # Errors
///
/// Returns an error when the file cannot be read, is not valid JSON/YAML, or describes an
/// invalid manifest. Manifest problems are reported together with their paths.
pub fn parse_manifest_file(file_path: impl AsRef<Path>) -> Result<Manifest> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read manifest file: {}", file_path.display()))?;

    let is_yaml = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("yaml") || extension.eq_ignore_ascii_case("yml"));

    let document: Value = if is_yaml {
        serde_yaml::from_str(&content).with_context(|| format!("Manifest is not valid YAML: {}", file_path.display()))?
    } else {
        serde_json::from_str(&content).with_context(|| format!("Manifest is not valid JSON: {}", file_path.display()))?
    };

    parse_manifest_value(document).with_context(|| format!("Invalid manifest: {}", file_path.display()))
}
