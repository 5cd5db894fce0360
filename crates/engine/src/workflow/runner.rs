//! Synchronous integration runner.
//!
//! [`IntegrationRunner`] drives the manifest of one integration: the `execute` workflow, the
//! `exists` probe and the `revoke` sequence. Every operation builds a fresh
//! [`RunContext`], renews OAuth credentials when needed, then walks the manifest steps in
//! order on the calling thread.

use std::collections::HashMap;

use anyhow::anyhow;
use provisio_types::{
    Actor, HttpResponse, IntegrationConfig, Notification, NotificationKind, NotificationSpec, RequestFailure, StepSpec,
};
use provisio_util::{generate_secret, scrub_and_redact};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::executor::{
    StepEnvironment, StepOutcome, StepResult, StepStatus, StepTransport, poll_step_with_observer, run_step_with,
};
use crate::field_paths::value_from_notation;
use crate::host::{Host, RetryJob, ScheduleError};
use crate::resolve::{RunContext, evaluate_precondition, gate_satisfied};
use crate::settings::EngineSettings;
use crate::templates::{TemplateContext, TemplateRenderer};
use crate::workflow::retry::retry_job_name;
use crate::workflow::state::{RunPhase, WorkflowRunState};

/// Final verdict of an `execute` run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every step succeeded. Carries the last response unless a notification ended the run.
    Succeeded { response: Option<HttpResponse> },
    /// A step failed; a retry was scheduled when an actor was bound.
    Failed { reason: String },
    /// A `continue_if` gate rejected a response. Never retried.
    Blocked { reason: String },
    /// OAuth renewal failed before any step ran.
    RenewalFailed,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }
}

/// Outcome of a run plus the state it accumulated.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub state: WorkflowRunState,
}

impl ExecutionReport {
    pub fn responses(&self) -> &[Value] {
        &self.state.run_context.responses
    }
}

/// Answer of the account-existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceCheck {
    Present,
    Absent,
    /// Renewal or the probe request failed.
    Unknown,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RevokeError {
    #[error("Cannot revoke manual integration")]
    ManualIntegration,
    #[error("Couldn't renew key")]
    Renewal,
    #[error("{0}")]
    Step(String),
}

/// Runs the manifest of one integration against host collaborators.
pub struct IntegrationRunner<'a> {
    pub(crate) integration: IntegrationConfig,
    pub(crate) settings: &'a EngineSettings,
    pub(crate) transport: &'a dyn StepTransport,
    pub(crate) host: Host<'a>,
    pub(crate) renderer: TemplateRenderer,
}

impl<'a> IntegrationRunner<'a> {
    pub fn new(
        integration: IntegrationConfig,
        settings: &'a EngineSettings,
        transport: &'a dyn StepTransport,
        host: Host<'a>,
    ) -> Self {
        Self {
            integration,
            settings,
            transport,
            host,
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn integration(&self) -> &IntegrationConfig {
        &self.integration
    }

    pub fn into_integration(self) -> IntegrationConfig {
        self.integration
    }

    /// Run the `execute` workflow.
    ///
    /// Variables start as `params`, then the actor's extra fields are merged over them.
    /// `store_data` writes land on `actor` and are persisted once per step.
    pub fn execute(&mut self, mut actor: Option<&mut Actor>, params: Map<String, Value>) -> ExecutionReport {
        let integration_id = self.integration.id;
        let actor_id = actor.as_ref().map(|actor| actor.id);

        let mut run_context = RunContext::new(self.settings.redirect_url(integration_id));
        run_context.variables = params.clone();
        if let Some(actor) = actor.as_deref() {
            run_context.actor = actor.builtin_fields();
            for (key, value) in &actor.extra_fields {
                run_context.variables.insert(key.clone(), value.clone());
            }
        }
        let mut state = WorkflowRunState::new(integration_id, actor_id, run_context);
        info!(integration_id, actor_id = ?actor_id, "integration run started");

        state.enter(RunPhase::Renewing);
        if !self.renew(&state.run_context, actor_id) {
            warn!(integration_id, "integration run aborted: credentials could not be renewed");
            state.enter(RunPhase::Failed);
            return ExecutionReport {
                outcome: ExecutionOutcome::RenewalFailed,
                state,
            };
        }

        for secret_id in self.integration.manifest.generated_secret_ids() {
            let secret = generate_secret(self.settings.generated_secret_length);
            state
                .run_context
                .generated_secrets
                .insert(secret_id.to_string(), Value::String(secret));
        }

        let mut last_response = None;
        for (index, step) in self.integration.manifest.execute.iter().enumerate() {
            state.enter(RunPhase::Executing(index));
            let context = state.run_context.template_context(&self.integration.extra_args);

            if !evaluate_precondition(&step.precondition, &self.renderer, &context) {
                debug!(integration_id, step_index = index, "step skipped by precondition");
                state.record_step(step_result(index, step, StepStatus::Skipped, None, 0));
                continue;
            }

            let initial = {
                let environment = self.environment(&context, &state.run_context.files);
                run_step_with(step, &environment, self.transport)
            };
            let polled = step.polling.is_some();
            if polled {
                state.enter(RunPhase::Polling(index));
            }
            let poll = {
                let environment = self.environment(&context, &state.run_context.files);
                poll_step_with_observer(step, initial, &environment, self.transport, |attempt| {
                    debug!(integration_id, step_index = index, attempt, "polling step again");
                })
            };
            let http_status = outcome_status(&poll.outcome);

            if let (Some(gate), StepOutcome::Completed(response)) = (&step.continue_if, &poll.outcome) {
                let blocked = if polled {
                    !poll.satisfied
                } else {
                    !gate_satisfied(gate, response, &self.renderer, &context)
                };
                if blocked {
                    let reason = self.scrub(&response.text(), &state.run_context);
                    info!(integration_id, step_index = index, status = response.status, "integration run blocked");
                    self.notify(
                        NotificationKind::BlockedIntegration,
                        actor_id,
                        format!("Execute url ({}): {}", step.url, reason),
                    );
                    state.record_step(step_result(index, step, StepStatus::Blocked, http_status, poll.attempts));
                    state.enter(RunPhase::Blocked);
                    return ExecutionReport {
                        outcome: ExecutionOutcome::Blocked { reason },
                        state,
                    };
                }
            }

            let response = match poll.outcome {
                StepOutcome::Completed(response) => response,
                StepOutcome::Failed(failure) => {
                    let mut reason = self.scrub(&failure.to_string(), &state.run_context);
                    if polled {
                        reason = format!("Polling timed out: {reason}");
                    }
                    state.record_step(step_result(index, step, StepStatus::Failed, http_status, poll.attempts));
                    self.fail_run(actor_id, &params, &step.url, &reason);
                    state.enter(RunPhase::Failed);
                    return ExecutionReport {
                        outcome: ExecutionOutcome::Failed { reason },
                        state,
                    };
                }
            };

            if let Some(key) = &step.save_as_file {
                state.run_context.files.insert(key.clone(), response.body.clone());
            }
            state.run_context.push_response(&response);

            if let Err(reason) = self.store_data(step, &response, actor.as_deref_mut(), &mut state.run_context) {
                state.record_step(step_result(index, step, StepStatus::Failed, http_status, poll.attempts));
                self.fail_run(actor_id, &params, &step.url, &reason);
                state.enter(RunPhase::Failed);
                return ExecutionReport {
                    outcome: ExecutionOutcome::Failed { reason },
                    state,
                };
            }

            state.record_step(step_result(index, step, StepStatus::Succeeded, http_status, poll.attempts));
            last_response = Some(response);
        }

        state.enter(RunPhase::PostNotify);
        if self.send_post_notifications(actor.as_deref(), &state.run_context) {
            state.enter(RunPhase::Done);
            info!(integration_id, "integration run finished after notification");
            return ExecutionReport {
                outcome: ExecutionOutcome::Succeeded { response: None },
                state,
            };
        }

        if actor_id.is_some() {
            self.notify(NotificationKind::RanIntegration, actor_id, String::new());
        }
        state.enter(RunPhase::Done);
        info!(integration_id, "integration run succeeded");
        ExecutionReport {
            outcome: ExecutionOutcome::Succeeded {
                response: last_response,
            },
            state,
        }
    }

    /// Probe whether the actor already has an account.
    pub fn exists(&mut self, actor: &Actor) -> ExistenceCheck {
        let integration_id = self.integration.id;
        if self.integration.skip_user_provisioning() {
            return match self.host.store.manual_access(actor.id, integration_id) {
                Ok(Some(access)) if !access.revoked => ExistenceCheck::Present,
                Ok(_) => ExistenceCheck::Absent,
                Err(error) => {
                    warn!(integration_id, error = %error, "manual access lookup failed");
                    ExistenceCheck::Unknown
                }
            };
        }

        let run_context = self.actor_run_context(actor);
        if !self.renew(&run_context, Some(actor.id)) {
            return ExistenceCheck::Unknown;
        }
        let Some(probe) = &self.integration.manifest.exists else {
            warn!(integration_id, "manifest has no exists probe");
            return ExistenceCheck::Unknown;
        };

        let context = run_context.template_context(&self.integration.extra_args);
        let environment = self.environment(&context, &run_context.files);
        match run_step_with(&probe.step, &environment, self.transport) {
            StepOutcome::Completed(response) => {
                let expected = self.renderer.render(&probe.expected, &context);
                if response.text().contains(&expected) {
                    ExistenceCheck::Present
                } else {
                    ExistenceCheck::Absent
                }
            }
            StepOutcome::Failed(failure) => {
                debug!(integration_id, reason = %failure, "exists probe failed");
                ExistenceCheck::Unknown
            }
        }
    }

    /// Run the `revoke` steps for an actor. The first failure stops the sequence.
    pub fn revoke(&mut self, actor: &Actor) -> Result<(), RevokeError> {
        let integration_id = self.integration.id;
        if self.integration.skip_user_provisioning() {
            return Err(RevokeError::ManualIntegration);
        }

        let mut run_context = self.actor_run_context(actor);
        if !self.renew(&run_context, Some(actor.id)) {
            return Err(RevokeError::Renewal);
        }

        for (index, step) in self.integration.manifest.revoke.iter().enumerate() {
            let context = run_context.template_context(&self.integration.extra_args);
            let outcome = {
                let environment = self.environment(&context, &run_context.files);
                run_step_with(step, &environment, self.transport)
            };
            match outcome {
                StepOutcome::Completed(response) => run_context.push_response(&response),
                StepOutcome::Failed(failure) => {
                    warn!(integration_id, step_index = index, reason = %failure, "revoke step failed");
                    return Err(RevokeError::Step(self.scrub(&failure.to_string(), &run_context)));
                }
            }
        }
        info!(integration_id, actor_id = actor.id, "access revoked");
        Ok(())
    }

    /// True when the actor must answer questions before provisioning.
    pub fn needs_user_info(&self, actor: &Actor) -> bool {
        if self.integration.skip_user_provisioning() {
            return false;
        }
        let manifest = &self.integration.manifest;
        let missing_extra_info = manifest
            .extra_user_info
            .iter()
            .any(|field| !actor.extra_fields.contains_key(&field.id));
        !manifest.form.is_empty() || missing_extra_info
    }

    pub(crate) fn environment<'s>(
        &'s self,
        context: &'s TemplateContext,
        files: &'s HashMap<String, Vec<u8>>,
    ) -> StepEnvironment<'s> {
        StepEnvironment {
            renderer: &self.renderer,
            context,
            default_headers: &self.integration.manifest.headers,
            files,
        }
    }

    /// Replace configured secrets and credential-looking values in user-facing text.
    pub(crate) fn scrub(&self, text: &str, run_context: &RunContext) -> String {
        scrub_and_redact(text, &run_context.secret_values(&self.integration.extra_args))
    }

    pub(crate) fn notify(&self, kind: NotificationKind, actor_id: Option<u64>, description: String) {
        let notification = Notification::new(kind, self.integration.name.clone())
            .for_actor(actor_id)
            .with_description(description);
        if let Err(error) = self.host.notifications.record(notification) {
            warn!(integration_id = self.integration.id, kind = %kind, error = %error, "notification could not be recorded");
        }
    }

    fn actor_run_context(&self, actor: &Actor) -> RunContext {
        let mut run_context = RunContext::new(self.settings.redirect_url(self.integration.id));
        run_context.actor = actor.builtin_fields();
        run_context.variables = actor.extra_fields.clone();
        run_context
    }

    /// Notify and schedule a rerun when an actor is bound. Duplicate schedules are ignored.
    fn fail_run(&self, actor_id: Option<u64>, params: &Map<String, Value>, url: &str, reason: &str) {
        let integration_id = self.integration.id;
        warn!(integration_id, actor_id = ?actor_id, "integration run failed");
        let Some(actor_id) = actor_id else {
            return;
        };

        self.notify(
            NotificationKind::FailedIntegration,
            Some(actor_id),
            format!("Execute url ({url}): {reason}"),
        );

        let name = retry_job_name(integration_id, actor_id);
        let job = RetryJob {
            actor_id,
            integration_id,
            params: params.clone(),
        };
        match self.host.scheduler.schedule_once(&name, self.settings.retry_delay, job) {
            Ok(()) => info!(integration_id, actor_id, "retry scheduled"),
            Err(ScheduleError::Duplicate { .. }) => debug!(integration_id, actor_id, "retry already scheduled"),
            Err(error) => warn!(integration_id, actor_id, error = %error, "retry could not be scheduled"),
        }
    }

    /// Apply `store_data` in authoring order, persisting the actor once every entry was found.
    fn store_data(
        &self,
        step: &StepSpec,
        response: &HttpResponse,
        mut actor: Option<&mut Actor>,
        run_context: &mut RunContext,
    ) -> Result<(), String> {
        if step.store_data.is_empty() {
            return Ok(());
        }
        let document = response.parse_json().unwrap_or_else(|| Value::Object(Map::new()));
        for (field, notation) in &step.store_data {
            let value = match value_from_notation(notation, &document) {
                Ok(value) => value.clone(),
                Err(_) => {
                    let body = self.scrub(&response.text(), run_context);
                    return Err(format!("Could not store data to new hire: {notation} not found in {body}"));
                }
            };
            if let Some(actor) = actor.as_deref_mut() {
                actor.extra_fields.insert(field.clone(), value.clone());
            }
            run_context.variables.insert(field.clone(), value);
        }

        if let Some(actor) = actor.as_deref()
            && let Err(error) = self.host.store.save_actor_fields(actor.id, &actor.extra_fields)
        {
            warn!(integration_id = self.integration.id, actor_id = actor.id, error = %error, "actor fields could not be saved");
        }
        Ok(())
    }

    /// Send `post_execute_notification` entries. Returns true when an entry ended the run.
    fn send_post_notifications(&self, actor: Option<&Actor>, run_context: &RunContext) -> bool {
        let actor_id = actor.map(|actor| actor.id);
        let context = run_context.template_context(&self.integration.extra_args);
        for directive in &self.integration.manifest.post_execute_notification {
            match directive {
                NotificationSpec::Email { to, subject, message } => {
                    let to = self.renderer.render(to, &context);
                    let subject = self.renderer.render(subject, &context);
                    let message = self.renderer.render(message, &context);
                    match self.host.messages.send_email(&to, &subject, &message) {
                        Ok(()) => self.notify(
                            NotificationKind::SentEmailNotification,
                            actor_id,
                            self.scrub(&format!("{subject} ({to})"), run_context),
                        ),
                        Err(error) => self.notify(
                            NotificationKind::FailedEmailNotification,
                            actor_id,
                            self.scrub(&error.to_string(), run_context),
                        ),
                    }
                    return true;
                }
                NotificationSpec::Text { to, message, .. } => {
                    let message = self.renderer.render(message, &context);
                    let phone = actor
                        .and_then(|actor| actor.phone.clone())
                        .or_else(|| to.as_ref().map(|to| self.renderer.render(to, &context)))
                        .filter(|phone| !phone.trim().is_empty());
                    let sent = match phone {
                        Some(phone) => self.host.messages.send_text(&phone, &message),
                        None => Err(anyhow!("no phone number to send the text message to")),
                    };
                    if let Err(error) = sent {
                        warn!(integration_id = self.integration.id, error = %error, "text notification failed");
                        self.notify(
                            NotificationKind::FailedTextNotification,
                            actor_id,
                            self.scrub(&error.to_string(), run_context),
                        );
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn step_result(index: usize, step: &StepSpec, status: StepStatus, http_status: Option<u16>, attempts: u32) -> StepResult {
    StepResult {
        index,
        url: step.url.clone(),
        status,
        http_status,
        attempts,
    }
}

fn outcome_status(outcome: &StepOutcome) -> Option<u16> {
    match outcome {
        StepOutcome::Completed(response) => Some(response.status),
        StepOutcome::Failed(RequestFailure::StatusRejected { status, .. }) => Some(*status),
        StepOutcome::Failed(_) => None,
    }
}
