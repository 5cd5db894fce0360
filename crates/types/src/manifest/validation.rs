//! Structural validation for raw manifest documents.
//!
//! The checks run against the untyped JSON so that every problem can be collected in one pass:
//! - Operators (`A_to_B`, `logic_with_after`) and HTTP methods must be known.
//! - Polling budgets need a positive attempt count, a finite non-negative interval, and a
//!   `continue_if` gate to poll for.
//! - Notification directives must be `email` or `text` with their required fields.
//! - Maps such as `headers`, `files`, and `store_data` must map strings to strings.
//!
//! Template syntax is not checked here; the engine owns the template dialect.

use serde_json::{Map, Value};

use super::{ComparisonOperator, LogicOperator, ManifestIssue};
use crate::http::HttpMethod;

/// Validate a manifest document, returning every issue found in document order.
pub fn validate_document(document: &Value) -> Vec<ManifestIssue> {
    let mut issues = Vec::new();
    let Some(root) = document.as_object() else {
        issues.push(ManifestIssue::new("$", "manifest must be an object"));
        return issues;
    };

    if let Some(form) = root.get("form") {
        check_named_entries(form, "form", &["id", "name", "type"], &mut issues);
    }
    if let Some(exists) = root.get("exists") {
        check_step(exists, "exists", &mut issues);
        if let Some(object) = exists.as_object() {
            require_string(object, "expected", "exists", &mut issues);
        }
    }
    for section in ["execute", "revoke"] {
        if let Some(steps) = root.get(section) {
            check_step_list(steps, section, &mut issues);
        }
    }
    if let Some(notifications) = root.get("post_execute_notification") {
        check_notifications(notifications, &mut issues);
    }
    if let Some(fields) = root.get("initial_data_form") {
        check_named_entries(fields, "initial_data_form", &["id", "name"], &mut issues);
    }
    if let Some(fields) = root.get("extra_user_info") {
        check_named_entries(fields, "extra_user_info", &["id", "name"], &mut issues);
    }
    if let Some(headers) = root.get("headers") {
        check_string_map(headers, "headers", &mut issues);
    }
    if let Some(oauth) = root.get("oauth") {
        check_oauth(oauth, &mut issues);
    }
    for key in ["schedule", "data_from"] {
        if let Some(value) = root.get(key)
            && !value.is_string()
            && !value.is_null()
        {
            issues.push(ManifestIssue::new(key, "must be a string"));
        }
    }
    if let Some(structure) = root.get("data_structure") {
        check_string_map(structure, "data_structure", &mut issues);
    }

    issues
}

fn check_step_list(steps: &Value, path: &str, issues: &mut Vec<ManifestIssue>) {
    let Some(items) = steps.as_array() else {
        issues.push(ManifestIssue::new(path, "must be a list of steps"));
        return;
    };
    for (index, step) in items.iter().enumerate() {
        check_step(step, &format!("{path}[{index}]"), issues);
    }
}

fn check_step(step: &Value, path: &str, issues: &mut Vec<ManifestIssue>) {
    let Some(object) = step.as_object() else {
        issues.push(ManifestIssue::new(path, "step must be an object"));
        return;
    };

    require_string(object, "url", path, issues);

    if let Some(method) = object.get("method") {
        match method.as_str() {
            Some(raw) => {
                if let Err(message) = raw.parse::<HttpMethod>() {
                    issues.push(ManifestIssue::new(format!("{path}.method"), message));
                }
            }
            None => issues.push(ManifestIssue::new(format!("{path}.method"), "must be a string")),
        }
    }

    for key in ["headers", "files", "store_data"] {
        if let Some(map) = object.get(key) {
            check_string_map(map, &format!("{path}.{key}"), issues);
        }
    }

    for key in ["cast_data_to_json", "fail_when_4xx_response_code"] {
        if let Some(flag) = object.get(key)
            && !flag.is_boolean()
        {
            issues.push(ManifestIssue::new(format!("{path}.{key}"), "must be true or false"));
        }
    }

    if let Some(precondition) = object.get("precondition") {
        check_precondition(precondition, &format!("{path}.precondition"), issues);
    }

    if let Some(gate) = object.get("continue_if") {
        check_continue_if(gate, &format!("{path}.continue_if"), issues);
    }

    if let Some(polling) = object.get("polling") {
        check_polling(polling, &format!("{path}.polling"), issues);
        if object.get("continue_if").is_none_or(Value::is_null) {
            issues.push(ManifestIssue::new(
                format!("{path}.polling"),
                "polling requires a continue_if condition",
            ));
        }
    }

    if let Some(save_as) = object.get("save_as_file")
        && !save_as.is_string()
        && !save_as.is_null()
    {
        issues.push(ManifestIssue::new(format!("{path}.save_as_file"), "must be a string"));
    }
}

fn check_precondition(precondition: &Value, path: &str, issues: &mut Vec<ManifestIssue>) {
    let Some(conditions) = precondition.as_array() else {
        issues.push(ManifestIssue::new(path, "must be a list of conditions"));
        return;
    };
    for (index, condition) in conditions.iter().enumerate() {
        let condition_path = format!("{path}[{index}]");
        let Some(object) = condition.as_object() else {
            issues.push(ManifestIssue::new(condition_path, "condition must be an object"));
            continue;
        };
        for operand in ["A", "B"] {
            if !object.contains_key(operand) {
                issues.push(ManifestIssue::new(
                    format!("{condition_path}.{operand}"),
                    "operand is required",
                ));
            }
        }
        match object.get("A_to_B").map(|value| value.as_str()) {
            Some(Some(raw)) => {
                if let Err(message) = raw.parse::<ComparisonOperator>() {
                    issues.push(ManifestIssue::new(format!("{condition_path}.A_to_B"), message));
                }
            }
            Some(None) => issues.push(ManifestIssue::new(format!("{condition_path}.A_to_B"), "must be a string")),
            None => issues.push(ManifestIssue::new(
                format!("{condition_path}.A_to_B"),
                "comparison is required",
            )),
        }
        if let Some(logic) = object.get("logic_with_after") {
            match logic.as_str() {
                Some(raw) => {
                    if let Err(message) = raw.parse::<LogicOperator>() {
                        issues.push(ManifestIssue::new(format!("{condition_path}.logic_with_after"), message));
                    }
                }
                None => issues.push(ManifestIssue::new(
                    format!("{condition_path}.logic_with_after"),
                    "must be a string",
                )),
            }
        }
    }
}

fn check_continue_if(gate: &Value, path: &str, issues: &mut Vec<ManifestIssue>) {
    let Some(object) = gate.as_object() else {
        issues.push(ManifestIssue::new(path, "must be an object"));
        return;
    };
    require_string(object, "response_notation", path, issues);
    if !object.contains_key("value") {
        issues.push(ManifestIssue::new(format!("{path}.value"), "value is required"));
    }
}

fn check_polling(polling: &Value, path: &str, issues: &mut Vec<ManifestIssue>) {
    let Some(object) = polling.as_object() else {
        issues.push(ManifestIssue::new(path, "must be an object"));
        return;
    };

    match object.get("interval").and_then(Value::as_f64) {
        Some(interval) if interval.is_finite() && interval >= 0.0 => {}
        Some(_) => issues.push(ManifestIssue::new(
            format!("{path}.interval"),
            "must be a non-negative number of seconds",
        )),
        None => issues.push(ManifestIssue::new(
            format!("{path}.interval"),
            "interval is required and must be a number",
        )),
    }

    match object.get("amount").and_then(Value::as_u64) {
        Some(amount) if amount >= 1 && amount <= u64::from(u32::MAX) => {}
        _ => issues.push(ManifestIssue::new(
            format!("{path}.amount"),
            "must be a whole number of attempts of at least 1",
        )),
    }
}

fn check_notifications(notifications: &Value, issues: &mut Vec<ManifestIssue>) {
    let path = "post_execute_notification";
    let Some(items) = notifications.as_array() else {
        issues.push(ManifestIssue::new(path, "must be a list of notifications"));
        return;
    };
    for (index, item) in items.iter().enumerate() {
        let item_path = format!("{path}[{index}]");
        let Some(object) = item.as_object() else {
            issues.push(ManifestIssue::new(item_path, "notification must be an object"));
            continue;
        };
        match object.get("type").and_then(Value::as_str) {
            Some("email") => {
                for key in ["to", "subject", "message"] {
                    require_string(object, key, &item_path, issues);
                }
            }
            Some("text") => require_string(object, "message", &item_path, issues),
            _ => issues.push(ManifestIssue::new(
                format!("{item_path}.type"),
                "notification type must be 'email' or 'text'",
            )),
        }
    }
}

fn check_oauth(oauth: &Value, issues: &mut Vec<ManifestIssue>) {
    let Some(object) = oauth.as_object() else {
        issues.push(ManifestIssue::new("oauth", "must be an object"));
        return;
    };
    require_string(object, "authenticate_url", "oauth", issues);
    for key in ["access_token", "refresh"] {
        match object.get(key) {
            Some(step) => check_step(step, &format!("oauth.{key}"), issues),
            None => issues.push(ManifestIssue::new(format!("oauth.{key}"), "step is required")),
        }
    }
    if let Some(flag) = object.get("without_code")
        && !flag.is_boolean()
    {
        issues.push(ManifestIssue::new("oauth.without_code", "must be true or false"));
    }
}

fn check_named_entries(entries: &Value, path: &str, required: &[&str], issues: &mut Vec<ManifestIssue>) {
    let Some(items) = entries.as_array() else {
        issues.push(ManifestIssue::new(path, "must be a list"));
        return;
    };
    for (index, item) in items.iter().enumerate() {
        let item_path = format!("{path}[{index}]");
        match item.as_object() {
            Some(object) => {
                for key in required {
                    require_string(object, key, &item_path, issues);
                }
            }
            None => issues.push(ManifestIssue::new(item_path, "entry must be an object")),
        }
    }
}

fn check_string_map(value: &Value, path: &str, issues: &mut Vec<ManifestIssue>) {
    let Some(object) = value.as_object() else {
        issues.push(ManifestIssue::new(path, "must be an object of strings"));
        return;
    };
    for (key, entry) in object {
        if !entry.is_string() {
            issues.push(ManifestIssue::new(format!("{path}.{key}"), "must be a string"));
        }
    }
}

fn require_string(object: &Map<String, Value>, key: &str, path: &str, issues: &mut Vec<ManifestIssue>) {
    match object.get(key) {
        Some(Value::String(_)) => {}
        Some(_) => issues.push(ManifestIssue::new(format!("{path}.{key}"), "must be a string")),
        None => issues.push(ManifestIssue::new(format!("{path}.{key}"), format!("{key} is required"))),
    }
}
