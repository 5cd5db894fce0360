//! # Secret scrubbing and redaction
//!
//! Notification descriptions and log lines may echo request bodies or server responses that
//! contain credentials. Two passes keep them out:
//!
//! - [`scrub_secrets`] replaces every known configuration value (administrator-supplied
//!   `extra_args` entries and generated secrets) with `***Secret value for <name>***`.
//! - [`redact_sensitive`] masks values that merely look like credentials (authorization
//!   headers, bearer tokens, `password=` assignments, JWTs, well-known vendor key formats).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Replacement used by [`redact_sensitive`].
pub const REDACTED: &str = "[REDACTED]";

/// Replace every configured secret value found in `text` with a named placeholder.
///
/// Nested objects (such as the stored OAuth payload) are walked and their scalar leaves are
/// named with a dotted path, for example `oauth.access_token`. Empty values are ignored.
///
/// # Example
/// ```rust
/// use provisio_util::scrub_secrets;
/// use serde_json::json;
///
/// let secrets = json!({"TOKEN": "abc123"});
/// let scrubbed = scrub_secrets("token abc123 rejected", secrets.as_object().unwrap());
/// assert_eq!(scrubbed, "token ***Secret value for TOKEN*** rejected");
/// ```
pub fn scrub_secrets(text: &str, secrets: &Map<String, Value>) -> String {
    let mut named_values = Vec::new();
    collect_secret_values("", secrets, &mut named_values);
    // Longer values first so a secret that contains another is replaced whole.
    named_values.sort_by(|(_, left), (_, right)| right.len().cmp(&left.len()));

    let mut scrubbed = text.to_string();
    for (name, value) in named_values {
        if scrubbed.contains(value.as_str()) {
            scrubbed = scrubbed.replace(value.as_str(), &format!("***Secret value for {}***", name));
        }
    }
    scrubbed
}

/// Scrub known secrets first, then redact anything else that looks like a credential.
pub fn scrub_and_redact(text: &str, secrets: &Map<String, Value>) -> String {
    redact_sensitive(&scrub_secrets(text, secrets))
}

fn collect_secret_values(prefix: &str, secrets: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in secrets {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => collect_secret_values(&name, nested, out),
            Value::String(text) if !text.is_empty() => out.push((name, text.clone())),
            Value::Number(number) => out.push((name, number.to_string())),
            _ => {}
        }
    }
}

/// Redacts values that look like secrets in a string, keeping the key names.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();

    for pattern in redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                match captures.get(2) {
                    Some(_) => format!("{}{}", prefix, REDACTED),
                    None => REDACTED.to_string(),
                }
            })
            .to_string();
    }

    redacted
}

/// Apply [`redact_sensitive`] to every string inside a JSON document.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(redact_sensitive(text)),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| (key.clone(), redact_json(entry)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);
    &REDACT_PATTERNS
}

/// Ordered from most specific to most general.
fn build_redact_patterns() -> Vec<Regex> {
    const PATTERNS: &[&str] = &[
        // bare vendor formats
        r"(?i)(sk_(?:live|test)_[A-Za-z0-9]{16,})",
        r"(?i)((?:gh[oprsu]|github_pat)_[A-Za-z0-9_]{22,40})",
        r"(?i)(xox[aboprs]-(?:\d+-)+[\da-z]+)",
        r"(?i)(https://hooks\.slack\.com/services/T[A-Za-z0-9_]+/B[A-Za-z0-9_]+/[A-Za-z0-9_]+)",
        r"(?i)(SG\.[A-Za-z0-9_-]{22}\.[A-Za-z0-9_-]{43})",
        r"(?i)(ya29\.[0-9A-Za-z\-_]{20,})",
        r"(?i)(postgres(?:ql)?://[^\s]+)",
        r"(?s)(-----BEGIN [^-]+-----[\s\S]+?-----END [^-]+-----)",
        // authorization headers
        r"(?i)(authorization:\s+)([^\s]+(?:\s+[^\s]+)*)",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)",
        r"(?i)((?:^|\b)Basic\s+)([A-Za-z0-9+/]+=*)",
        // structured assignments
        r#"(?i)("(?:[a-z_]*?)(?:access_token|refresh_token|client_secret|api_key|password|secret)"\s*:\s*")([^"]+)"#,
        r"(?i)((?:api[\s_-]?key|auth[\s_-]?token|access[\s_-]?token|secret|password)\s*[:=]\s*)([^\s,;&]+)",
        r"(eyJ[A-Za-z0-9\-._~+/]+=*)",
    ];

    PATTERNS.iter().filter_map(|pattern| Regex::new(pattern).ok()).collect()
}
