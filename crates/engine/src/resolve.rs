//! Run-scoped state and condition evaluation.
//!
//! [`RunContext`] holds everything a single run accumulates: caller variables, parsed
//! responses, buffered files and generated secrets. It is created fresh for every run and
//! dropped when the run ends.
//!
//! Conditions come in two shapes:
//!
//! - preconditions, a list of `{A, B, A_to_B, logic_with_after}` entries folded left to right
//! - `continue_if` gates, which compare a rendered value with a value read from the step's
//!   JSON response

use std::cmp::Ordering;
use std::collections::HashMap;

use provisio_types::{ComparisonOperator, Condition, HttpResponse, LogicOperator, ResponseCondition};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::field_paths::value_from_notation;
use crate::templates::{TemplateContext, TemplateRenderer};

/// Mutable state of one run. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunContext {
    /// The bound actor's own attributes (`first_name`, `email`, ...). Empty without an actor.
    pub actor: Map<String, Value>,
    /// Caller parameters, the actor's extra fields and `store_data` writes.
    pub variables: Map<String, Value>,
    /// One parsed body per executed step (`{}` when the body is not JSON).
    pub responses: Vec<Value>,
    /// Raw bodies buffered by `save_as_file`.
    pub files: HashMap<String, Vec<u8>>,
    /// Secrets minted for `initial_data_form` entries during this run.
    pub generated_secrets: Map<String, Value>,
    pub redirect_url: String,
}

impl RunContext {
    pub fn new(redirect_url: impl Into<String>) -> Self {
        Self {
            redirect_url: redirect_url.into(),
            ..Default::default()
        }
    }

    /// Build the template context for this run.
    ///
    /// Layers, lowest first: actor attributes, `extra_args`, generated secrets, variables,
    /// `responses`, `redirect_url`.
    pub fn template_context(&self, extra_args: &Map<String, Value>) -> TemplateContext {
        TemplateContext::new()
            .layer(&self.actor)
            .layer(extra_args)
            .layer(&self.generated_secrets)
            .layer(&self.variables)
            .with("responses", Value::Array(self.responses.clone()))
            .with("redirect_url", Value::String(self.redirect_url.clone()))
    }

    /// Every value that must be scrubbed from user-facing text.
    pub fn secret_values(&self, extra_args: &Map<String, Value>) -> Map<String, Value> {
        let mut secrets = extra_args.clone();
        for (key, value) in &self.generated_secrets {
            secrets.insert(key.clone(), value.clone());
        }
        secrets
    }

    /// Record a step's response body, falling back to `{}` when it is not JSON.
    pub fn push_response(&mut self, response: &HttpResponse) {
        let parsed = response.parse_json().unwrap_or_else(|| Value::Object(Map::new()));
        self.responses.push(parsed);
    }
}

/// Render an operand and decode every rendered string that holds valid JSON.
///
/// `"{{ count }}"` with `count = 3` becomes the number `3`; text that is not JSON stays a
/// string.
pub fn resolve_operand(operand: &Value, renderer: &TemplateRenderer, context: &TemplateContext) -> Value {
    match operand {
        Value::String(text) => decode_rendered(renderer.render(text, context)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_operand(item, renderer, context))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), resolve_operand(item, renderer, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn decode_rendered(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Compare two decoded operands.
///
/// Values of different JSON types are never equal and never ordered. Numbers compare
/// numerically, strings lexically, booleans with `false < true`.
pub fn compare(left: &Value, comparison: ComparisonOperator, right: &Value) -> bool {
    match comparison {
        ComparisonOperator::Equal => values_equal(left, right),
        ComparisonOperator::NotEqual => !values_equal(left, right),
        ordering => {
            let Some(found) = order_values(left, right) else {
                warn!(
                    comparison = ordering.as_str(),
                    left = %type_name(left),
                    right = %type_name(right),
                    "operands cannot be ordered; condition is false"
                );
                return false;
            };
            match ordering {
                ComparisonOperator::GreaterThan => found == Ordering::Greater,
                ComparisonOperator::LessThan => found == Ordering::Less,
                ComparisonOperator::GreaterThanOrEqual => found != Ordering::Less,
                ComparisonOperator::LessThanOrEqual => found != Ordering::Greater,
                ComparisonOperator::Equal | ComparisonOperator::NotEqual => false,
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn order_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Combine the running fold value with the next result. `None` is the identity.
pub fn combine(running: Option<bool>, next: bool, logic: LogicOperator) -> bool {
    match running {
        None => next,
        Some(previous) => logic.apply(previous, next),
    }
}

/// Fold a precondition list. Each entry's `logic_with_after` joins it to the next entry.
///
/// Both operands of every entry are evaluated; there is no short-circuit and no grouping.
/// An empty list means the step runs.
pub fn evaluate_precondition(conditions: &[Condition], renderer: &TemplateRenderer, context: &TemplateContext) -> bool {
    let mut running: Option<bool> = None;
    let mut pending = LogicOperator::And;
    for condition in conditions {
        let left = resolve_operand(&condition.left, renderer, context);
        let right = resolve_operand(&condition.right, renderer, context);
        let status = compare(&left, condition.comparison, &right);
        debug!(
            comparison = condition.comparison.as_str(),
            status,
            "precondition entry evaluated"
        );
        running = Some(combine(running, status, pending));
        pending = condition.logic_with_after;
    }
    running.unwrap_or(true)
}

/// Check a `continue_if` gate against a response.
///
/// The response side is read with value-from-notation; a missing path (or a body that is not
/// JSON) reads as the empty string. The rendered value is compared as text when the response
/// holds a string, otherwise it is decoded first.
pub fn gate_satisfied(
    gate: &ResponseCondition,
    response: &HttpResponse,
    renderer: &TemplateRenderer,
    context: &TemplateContext,
) -> bool {
    let document = response.parse_json();
    let actual = document
        .as_ref()
        .and_then(|document| value_from_notation(&gate.response_notation, document).ok())
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()));

    let expected = match (&gate.value, &actual) {
        (Value::String(text), Value::String(_)) => Value::String(renderer.render(text, context)),
        (other, _) => resolve_operand(other, renderer, context),
    };
    values_equal(&expected, &actual)
}
