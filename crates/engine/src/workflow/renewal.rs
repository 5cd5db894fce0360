//! OAuth credential renewal and first-time authorization.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use provisio_types::{HttpResponse, NotificationKind};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::executor::{StepOutcome, run_step_with};
use crate::resolve::RunContext;
use crate::workflow::runner::IntegrationRunner;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("integration has no oauth section")]
    NotConfigured,
    #[error("integration is already authorized")]
    AlreadyAuthorized,
    #[error("Code was not provided")]
    MissingCode,
    #[error("Couldn't save token: {0}")]
    Request(String),
    #[error("Couldn't save token: the token response is not a JSON object")]
    InvalidPayload,
    #[error("could not save credentials: {0}")]
    Persist(String),
}

impl IntegrationRunner<'_> {
    /// Refresh the OAuth access token when it has expired.
    ///
    /// Succeeds without a request when the manifest has no `oauth` section, the stored payload
    /// carries no `expires_in`, or the token is still valid. A failed refresh records a
    /// `failed-integration` notification.
    pub fn renew(&mut self, run_context: &RunContext, actor_id: Option<u64>) -> bool {
        let integration_id = self.integration.id;
        let Some(oauth) = &self.integration.manifest.oauth else {
            return true;
        };
        let expires = self
            .integration
            .oauth_payload()
            .is_some_and(|payload| payload.contains_key("expires_in"));
        if !expires || self.integration.expiring >= Utc::now() {
            return true;
        }

        debug!(integration_id, "access token expired; refreshing");
        let context = run_context.template_context(&self.integration.extra_args);
        let outcome = {
            let environment = self.environment(&context, &run_context.files);
            run_step_with(&oauth.refresh, &environment, self.transport)
        };

        let payload = match outcome {
            StepOutcome::Completed(response) => json_object(&response),
            StepOutcome::Failed(failure) => Err(failure.to_string()),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(detail) => {
                warn!(integration_id, "token refresh failed");
                let detail = self.scrub(&detail, run_context);
                self.notify(NotificationKind::FailedIntegration, actor_id, format!("Refresh url: {detail}"));
                return false;
            }
        };

        let now = Utc::now();
        if let Some(expiring) = expiry_from(&payload, now) {
            self.integration.expiring = expiring;
        }
        let stored = self
            .integration
            .extra_args
            .entry("oauth")
            .or_insert_with(|| Value::Object(Map::new()));
        if !stored.is_object() {
            *stored = Value::Object(Map::new());
        }
        if let Value::Object(stored) = stored {
            for (key, value) in payload {
                stored.insert(key, value);
            }
        }

        if let Err(error) = self
            .host
            .store
            .save_credentials(integration_id, &self.integration.credential_state())
        {
            warn!(integration_id, error = %error, "refreshed credentials could not be saved");
            return false;
        }
        info!(integration_id, "access token refreshed");
        true
    }

    /// Rendered `oauth.authenticate_url`, when the manifest has one.
    pub fn authorize_url(&self) -> Option<String> {
        let oauth = self.integration.manifest.oauth.as_ref()?;
        let run_context = RunContext::new(self.settings.redirect_url(self.integration.id));
        let context = run_context.template_context(&self.integration.extra_args);
        Some(self.renderer.render(&oauth.authenticate_url, &context))
    }

    /// Exchange an authorization code for the first access token and persist it.
    pub fn complete_authorization(&mut self, code: Option<&str>) -> Result<(), AuthorizationError> {
        let integration_id = self.integration.id;
        let oauth = self
            .integration
            .manifest
            .oauth
            .as_ref()
            .ok_or(AuthorizationError::NotConfigured)?;
        if self.integration.enabled_oauth {
            return Err(AuthorizationError::AlreadyAuthorized);
        }

        let mut step = oauth.access_token.clone();
        if !oauth.without_code {
            let code = code
                .filter(|code| !code.is_empty())
                .ok_or(AuthorizationError::MissingCode)?;
            let separator = if step.url.contains('?') { '&' } else { '?' };
            step.url = format!("{}{}code={}", step.url, separator, code);
        }

        let run_context = RunContext::new(self.settings.redirect_url(integration_id));
        let context = run_context.template_context(&self.integration.extra_args);
        let outcome = {
            let environment = self.environment(&context, &run_context.files);
            run_step_with(&step, &environment, self.transport)
        };
        let payload = match outcome {
            StepOutcome::Completed(response) => {
                json_object(&response).map_err(|_| AuthorizationError::InvalidPayload)?
            }
            StepOutcome::Failed(failure) => {
                return Err(AuthorizationError::Request(
                    self.scrub(&failure.to_string(), &run_context),
                ));
            }
        };

        let now = Utc::now();
        if let Some(expiring) = expiry_from(&payload, now) {
            self.integration.expiring = expiring;
        }
        self.integration
            .extra_args
            .insert("oauth".to_string(), Value::Object(payload));
        self.integration.enabled_oauth = true;

        self.host
            .store
            .save_credentials(integration_id, &self.integration.credential_state())
            .map_err(|error| AuthorizationError::Persist(error.to_string()))?;
        info!(integration_id, "oauth authorization completed");
        Ok(())
    }
}

fn json_object(response: &HttpResponse) -> Result<Map<String, Value>, String> {
    match response.parse_json() {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(provisio_types::RequestFailure::InvalidJson.to_string()),
    }
}

/// Expiry computed from an `expires_in` number of seconds.
fn expiry_from(payload: &Map<String, Value>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let seconds = match payload.get("expires_in")? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() {
        return None;
    }
    let delta = ChronoDuration::try_milliseconds((seconds * 1000.0) as i64)?;
    now.checked_add_signed(delta)
}
