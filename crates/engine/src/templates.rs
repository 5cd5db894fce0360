//! Template rendering for manifest strings.
//!
//! Manifests use `{{ name }}` placeholders resolved against a layered [`TemplateContext`].
//! Rendering is lenient: unknown names (including chained lookups such as
//! `{{ responses.3.id }}` when fewer responses exist) render as the empty string, `null`
//! renders as the empty string, and lists or objects render as JSON text.
//!
//! Syntax is checked once, when a manifest is loaded, by [`validate_manifest_templates`].

use std::borrow::Cow;
use std::fmt::Write as _;

use minijinja::value::ValueKind;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use provisio_types::{Manifest, ManifestError, ManifestIssue, NotificationSpec, StepSpec};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("template render error: {0}")]
    Render(String),
}

/// Layered variable context. Later layers override earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    values: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every entry of `layer` over the current values.
    pub fn layer(mut self, layer: &Map<String, Value>) -> Self {
        for (key, value) in layer {
            self.values.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Renders manifest templates with a shared `minijinja` environment.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_keep_trailing_newline(true);
        env.set_formatter(|out, state, value| {
            if value.is_none() {
                return Ok(());
            }
            if matches!(value.kind(), ValueKind::Map | ValueKind::Seq) {
                let text = serde_json::to_string(value)
                    .map_err(|error| minijinja::Error::new(ErrorKind::BadSerialization, error.to_string()))?;
                return out
                    .write_str(&text)
                    .map_err(|_| minijinja::Error::new(ErrorKind::WriteFailure, "could not write rendered value"));
            }
            minijinja::escape_formatter(out, state, value)
        });
        Self { env }
    }

    /// True when the text contains template syntax.
    pub fn is_template(source: &str) -> bool {
        source.contains("{{") || source.contains("{%") || source.contains("{#")
    }

    /// Render `source`, reporting syntax or evaluation failures.
    pub fn try_render(&self, source: &str, context: &TemplateContext) -> Result<String, TemplateError> {
        if !Self::is_template(source) {
            return Ok(source.to_string());
        }
        let normalized = normalize_index_lookups(source);
        let template = self
            .env
            .template_from_str(&normalized)
            .map_err(|error| TemplateError::Syntax(error.to_string()))?;
        template
            .render(context.as_map())
            .map_err(|error| TemplateError::Render(error.to_string()))
    }

    /// Render `source`; evaluation failures render as the empty string.
    ///
    /// Only evaluation can fail here (for example an unknown filter), because syntax was checked
    /// when the manifest was loaded.
    pub fn render(&self, source: &str, context: &TemplateContext) -> String {
        self.try_render(source, context).unwrap_or_else(|error| {
            warn!(error = %error, "template could not be rendered; using empty string");
            String::new()
        })
    }

    /// Compile `source` without rendering it.
    pub fn check_syntax(&self, source: &str) -> Result<(), TemplateError> {
        if !Self::is_template(source) {
            return Ok(());
        }
        let normalized = normalize_index_lookups(source);
        self.env
            .template_from_str(&normalized)
            .map(|_| ())
            .map_err(|error| TemplateError::Syntax(error.to_string()))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

static EXPRESSION_BLOCK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)\{\{.*?\}\}").ok());
static NUMERIC_ATTRIBUTE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*|\]|\))\.(\d+)\b").ok());

/// Rewrite `name.0` lookups inside `{{ }}` blocks as `name[0]`.
fn normalize_index_lookups(source: &str) -> Cow<'_, str> {
    let (Some(block), Some(numeric)) = (EXPRESSION_BLOCK.as_ref(), NUMERIC_ATTRIBUTE.as_ref()) else {
        return Cow::Borrowed(source);
    };
    block.replace_all(source, |captures: &Captures| {
        let mut expression = captures[0].to_string();
        loop {
            let rewritten = numeric.replace_all(&expression, "${1}[${2}]").into_owned();
            if rewritten == expression {
                return expression;
            }
            expression = rewritten;
        }
    })
}

/// Check the syntax of every template string in a manifest, reporting all failures together.
pub fn validate_manifest_templates(manifest: &Manifest, renderer: &TemplateRenderer) -> Result<(), ManifestError> {
    let mut issues = Vec::new();
    let mut check = |path: String, source: &str| {
        if let Err(error) = renderer.check_syntax(source) {
            issues.push(ManifestIssue::new(path, error.to_string()));
        }
    };

    if let Some(exists) = &manifest.exists {
        visit_step(&exists.step, "exists", &mut check);
        check("exists.expected".to_string(), &exists.expected);
    }
    for (index, step) in manifest.execute.iter().enumerate() {
        visit_step(step, &format!("execute[{index}]"), &mut check);
    }
    for (index, step) in manifest.revoke.iter().enumerate() {
        visit_step(step, &format!("revoke[{index}]"), &mut check);
    }
    for (index, notification) in manifest.post_execute_notification.iter().enumerate() {
        let path = format!("post_execute_notification[{index}]");
        match notification {
            NotificationSpec::Email { to, subject, message } => {
                check(format!("{path}.to"), to);
                check(format!("{path}.subject"), subject);
                check(format!("{path}.message"), message);
            }
            NotificationSpec::Text { message, .. } => check(format!("{path}.message"), message),
        }
    }
    for (key, value) in &manifest.headers {
        check(format!("headers.{key}"), key);
        check(format!("headers.{key}"), value);
    }
    if let Some(oauth) = &manifest.oauth {
        check("oauth.authenticate_url".to_string(), &oauth.authenticate_url);
        visit_step(&oauth.access_token, "oauth.access_token", &mut check);
        visit_step(&oauth.refresh, "oauth.refresh", &mut check);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ManifestError::invalid(issues))
    }
}

fn visit_step<F>(step: &StepSpec, path: &str, check: &mut F)
where
    F: FnMut(String, &str),
{
    check(format!("{path}.url"), &step.url);
    if let Some(data) = &step.data {
        visit_json_strings(data, &format!("{path}.data"), check);
    }
    for (key, value) in &step.headers {
        check(format!("{path}.headers.{key}"), key);
        check(format!("{path}.headers.{key}"), value);
    }
    for (index, condition) in step.precondition.iter().enumerate() {
        visit_json_strings(&condition.left, &format!("{path}.precondition[{index}].A"), check);
        visit_json_strings(&condition.right, &format!("{path}.precondition[{index}].B"), check);
    }
    if let Some(gate) = &step.continue_if {
        visit_json_strings(&gate.value, &format!("{path}.continue_if.value"), check);
    }
}

fn visit_json_strings<F>(value: &Value, path: &str, check: &mut F)
where
    F: FnMut(String, &str),
{
    match value {
        Value::String(text) => check(path.to_string(), text),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                visit_json_strings(item, &format!("{path}[{index}]"), check);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                visit_json_strings(item, &format!("{path}.{key}"), check);
            }
        }
        _ => {}
    }
}
