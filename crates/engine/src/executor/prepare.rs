//! Step preparation: render a [`StepSpec`] into a transport-ready [`HttpRequest`].

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use provisio_types::{FilePart, HttpRequest, RequestBody, RequestFailure, StepSpec};
use serde_json::Value;
use tracing::debug;

use crate::templates::{TemplateContext, TemplateRenderer};

/// Inputs shared by every step of a run.
#[derive(Clone, Copy)]
pub struct StepEnvironment<'a> {
    pub renderer: &'a TemplateRenderer,
    pub context: &'a TemplateContext,
    /// Manifest-level headers used when a step declares none.
    pub default_headers: &'a IndexMap<String, String>,
    pub files: &'a HashMap<String, Vec<u8>>,
}

/// Render URL, headers and body of a step.
///
/// Fails without touching the network when a file key is missing, a header is not ASCII, or
/// files are combined with a raw body.
pub fn prepare_request(step: &StepSpec, environment: &StepEnvironment<'_>) -> Result<HttpRequest, RequestFailure> {
    let renderer = environment.renderer;
    let context = environment.context;

    let mut attachments = Vec::with_capacity(step.files.len());
    for (field, key) in &step.files {
        let bytes = environment
            .files
            .get(key)
            .ok_or_else(|| RequestFailure::missing_file(key))?;
        attachments.push(FilePart {
            field: field.clone(),
            file_name: key.clone(),
            bytes: bytes.clone(),
        });
    }

    let url = renderer.render(&step.url, context);
    let headers = render_headers(step, environment)?;
    let body = render_body(step, renderer, context);

    let body = if attachments.is_empty() {
        body
    } else {
        match body {
            RequestBody::Empty => RequestBody::Multipart {
                fields: Vec::new(),
                files: attachments,
            },
            RequestBody::Form(fields) => RequestBody::Multipart {
                fields,
                files: attachments,
            },
            RequestBody::Raw(_) | RequestBody::Multipart { .. } => return Err(RequestFailure::Unexpected),
        }
    };

    Ok(HttpRequest {
        method: step.method,
        url,
        headers,
        body,
    })
}

fn render_headers(step: &StepSpec, environment: &StepEnvironment<'_>) -> Result<Vec<(String, String)>, RequestFailure> {
    let source = if step.headers.is_empty() {
        environment.default_headers
    } else {
        &step.headers
    };
    let renderer = environment.renderer;
    let context = environment.context;

    source
        .iter()
        .map(|(key, value)| {
            let name = renderer.render(key, context);
            let rendered = match basic_credentials(key, value) {
                Some(credentials) => {
                    let credentials = renderer.render(credentials, context);
                    if !credentials.is_ascii() {
                        return Err(RequestFailure::InvalidHeader);
                    }
                    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
                }
                None => renderer.render(value, context),
            };
            Ok((name, rendered))
        })
        .collect()
}

/// Credential part of a `Basic` authorization header, before rendering.
fn basic_credentials<'v>(key: &str, value: &'v str) -> Option<&'v str> {
    if key != "Authorization" || !value.starts_with("Basic") {
        return None;
    }
    Some(value.split_once(' ').map(|(_, rest)| rest).unwrap_or(""))
}

fn render_body(step: &StepSpec, renderer: &TemplateRenderer, context: &TemplateContext) -> RequestBody {
    let Some(data) = &step.data else {
        return RequestBody::Empty;
    };
    let text = renderer.render(&data.to_string(), context);
    if !step.cast_data_to_json {
        return RequestBody::Raw(text);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => RequestBody::Form(form_pairs(&map)),
        Ok(_) => RequestBody::Raw(text),
        Err(error) => {
            debug!(error = %error, "cast_data_to_json failed; sending rendered text");
            RequestBody::Raw(text)
        }
    }
}

/// Flatten a JSON object into form pairs. Arrays repeat the key.
fn form_pairs(map: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), form_scalar(item)));
                }
            }
            other => pairs.push((key.clone(), form_scalar(other))),
        }
    }
    pairs
}

fn form_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        nested => nested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_types::HttpMethod;
    use serde_json::json;

    struct Fixture {
        renderer: TemplateRenderer,
        context: TemplateContext,
        defaults: IndexMap<String, String>,
        files: HashMap<String, Vec<u8>>,
    }

    impl Fixture {
        fn new(values: Value) -> Self {
            let mut defaults = IndexMap::new();
            defaults.insert("Authorization".to_string(), "Bearer {{ TOKEN }}".to_string());
            Self {
                renderer: TemplateRenderer::new(),
                context: TemplateContext::new().layer(values.as_object().expect("object")),
                defaults,
                files: HashMap::new(),
            }
        }

        fn environment(&self) -> StepEnvironment<'_> {
            StepEnvironment {
                renderer: &self.renderer,
                context: &self.context,
                default_headers: &self.defaults,
                files: &self.files,
            }
        }
    }

    fn step(value: Value) -> StepSpec {
        serde_json::from_value(value).expect("step")
    }

    #[test]
    fn renders_url_body_and_default_headers() {
        let fixture = Fixture::new(json!({"email": "a@b.com", "TOKEN": "t0k", "org": 7}));
        let spec = step(json!({
            "url": "https://api.example/orgs/{{ org }}/users",
            "data": {"email": "{{ email }}"}
        }));
        let request = prepare_request(&spec, &fixture.environment()).expect("request");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "https://api.example/orgs/7/users");
        assert_eq!(request.body, RequestBody::Raw(r#"{"email":"a@b.com"}"#.into()));
        assert_eq!(request.headers, vec![("Authorization".into(), "Bearer t0k".into())]);
    }

    #[test]
    fn step_headers_replace_defaults_and_basic_credentials_are_encoded() {
        let fixture = Fixture::new(json!({"USER": "admin", "PASS": "secret"}));
        let spec = step(json!({
            "url": "https://api.example",
            "headers": {"Authorization": "Basic {{ USER }}:{{ PASS }}"}
        }));
        let request = prepare_request(&spec, &fixture.environment()).expect("request");
        assert_eq!(
            request.headers,
            vec![("Authorization".into(), "Basic YWRtaW46c2VjcmV0".into())]
        );
    }

    #[test]
    fn non_ascii_basic_credentials_are_an_invalid_header() {
        let fixture = Fixture::new(json!({"USER": "jöse"}));
        let spec = step(json!({
            "url": "https://api.example",
            "headers": {"Authorization": "Basic {{ USER }}:pw"}
        }));
        assert_eq!(
            prepare_request(&spec, &fixture.environment()),
            Err(RequestFailure::InvalidHeader)
        );
    }

    #[test]
    fn cast_object_becomes_form_pairs_and_bad_json_stays_raw() {
        let fixture = Fixture::new(json!({"name": "Ada"}));
        let spec = step(json!({
            "url": "https://api.example",
            "cast_data_to_json": true,
            "data": {"name": "{{ name }}", "groups": ["a", "b"], "meta": {"x": 1}}
        }));
        let request = prepare_request(&spec, &fixture.environment()).expect("request");
        assert_eq!(
            request.body,
            RequestBody::Form(vec![
                ("name".into(), "Ada".into()),
                ("groups".into(), "a".into()),
                ("groups".into(), "b".into()),
                ("meta".into(), r#"{"x":1}"#.into()),
            ])
        );

        let quoted = Fixture::new(json!({"name": "A \"quoted\" name"}));
        let spec = step(json!({
            "url": "https://api.example",
            "cast_data_to_json": true,
            "data": {"name": "{{ name }}"}
        }));
        let request = prepare_request(&spec, &quoted.environment()).expect("request");
        assert_eq!(
            request.body,
            RequestBody::Raw(r#"{"name":"A "quoted" name"}"#.into())
        );
    }

    #[test]
    fn missing_file_key_fails_before_rendering() {
        let fixture = Fixture::new(json!({}));
        let spec = step(json!({"url": "https://api.example", "files": {"upload": "report"}}));
        let failure = prepare_request(&spec, &fixture.environment()).expect_err("missing file");
        assert_eq!(failure.to_string(), "report could not be found in the locally saved files");
    }

    #[test]
    fn files_become_multipart_parts() {
        let mut fixture = Fixture::new(json!({}));
        fixture.files.insert("report".into(), b"pdf-bytes".to_vec());
        let spec = step(json!({
            "url": "https://api.example",
            "cast_data_to_json": true,
            "data": {"title": "Q1"},
            "files": {"upload": "report"}
        }));
        let request = prepare_request(&spec, &fixture.environment()).expect("request");
        assert_eq!(
            request.body,
            RequestBody::Multipart {
                fields: vec![("title".into(), "Q1".into())],
                files: vec![FilePart {
                    field: "upload".into(),
                    file_name: "report".into(),
                    bytes: b"pdf-bytes".to_vec(),
                }],
            }
        );

        let raw = step(json!({
            "url": "https://api.example",
            "data": {"title": "Q1"},
            "files": {"upload": "report"}
        }));
        assert_eq!(
            prepare_request(&raw, &fixture.environment()),
            Err(RequestFailure::Unexpected)
        );
    }
}
