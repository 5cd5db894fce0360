//! Transport-neutral HTTP values exchanged between the step executor and the HTTP client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// HTTP methods a manifest step may use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(format!(
                "unsupported HTTP method '{}' (expected GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS)",
                raw
            )),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(value: HttpMethod) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully rendered request ready to hand to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Rendered headers in authoring order.
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Rendered text sent as-is.
    Raw(String),
    /// `application/x-www-form-urlencoded` pairs; repeated keys carry array items.
    Form(Vec<(String, String)>),
    /// Form fields plus file parts.
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<FilePart>,
    },
}

/// Attachment sourced from the run's file buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    /// Body field the file is sent under.
    pub field: String,
    /// File name reported to the server (the save key).
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Response captured from a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Convenience constructor for JSON bodies.
    pub fn json(status: u16, value: &JsonValue) -> Self {
        Self::new(status, value.to_string())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON, when it is JSON.
    pub fn parse_json(&self) -> Option<JsonValue> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_or_server_error(&self) -> bool {
        self.status >= 400
    }
}

/// Reasons a step produced no usable response.
///
/// Display strings are the user-facing descriptions recorded in notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestFailure {
    #[error("JSON is invalid")]
    InvalidJson,
    #[error("An HTTP error occurred")]
    Http,
    #[error("An SSL error occurred")]
    Tls,
    #[error("The request timed out")]
    Timeout,
    #[error("The url is invalid")]
    InvalidUrl,
    #[error("There are too many redirects")]
    TooManyRedirects,
    #[error("The header is invalid")]
    InvalidHeader,
    #[error("There was an unexpected error with the request")]
    Unexpected,
    /// A `files` entry referenced a key that no earlier step saved.
    #[error("{key} could not be found in the locally saved files")]
    MissingFile { key: String },
    /// The server answered with a 4xx/5xx status; carries the raw body.
    #[error("{body}")]
    StatusRejected { status: u16, body: String },
}

impl RequestFailure {
    pub fn missing_file(key: impl Into<String>) -> Self {
        RequestFailure::MissingFile { key: key.into() }
    }

    pub fn status_rejected(response: &HttpResponse) -> Self {
        RequestFailure::StatusRejected {
            status: response.status,
            body: response.text(),
        }
    }
}
