//! Outbound HTTP client for manifest steps.
//!
//! This crate wraps a configured `reqwest::Client` and converts the transport-neutral
//! [`HttpRequest`] built by the engine into a real request. It focuses on:
//!
//! - Constructing an HTTP client with the configured timeout and a consistent User-Agent
//! - Encoding raw, form, and multipart bodies
//! - Mapping every transport fault onto the fixed [`RequestFailure`] taxonomy
//! - Validating the host's public base URL
//!
//! Status codes are never turned into errors here; the step executor decides whether a 4xx
//! response fails the step.
//!
//! # Example
//!
//! ```ignore
//! use provisio_api::ProvisioClient;
//! use provisio_types::{HttpMethod, HttpRequest, RequestBody};
//!
//! async fn probe() -> Result<(), provisio_types::RequestFailure> {
//!     let client = ProvisioClient::new(std::time::Duration::from_secs(120)).expect("client");
//!     let response = client
//!         .send(HttpRequest {
//!             method: HttpMethod::Get,
//!             url: "https://example.com/api/users".into(),
//!             headers: Vec::new(),
//!             body: RequestBody::Empty,
//!         })
//!         .await?;
//!     println!("status: {}", response.status);
//!     Ok(())
//! }
//! ```

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use provisio_types::{HttpMethod, HttpRequest, HttpResponse, RequestBody, RequestFailure};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Url, redirect};
use tracing::{debug, warn};

/// Redirects followed before a request fails with `TooManyRedirects`.
const MAX_REDIRECTS: usize = 10;

/// Hostnames allowed to use plain HTTP as the public base URL.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Thin wrapper around a configured `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ProvisioClient {
    http: Client,
    user_agent: String,
}

impl ProvisioClient {
    /// Build a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            user_agent: format!("provisio/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS),
        })
    }

    /// Issue one request and capture the response body.
    ///
    /// Any status code is returned as a response; only transport faults are errors.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestFailure> {
        let url = parse_request_url(&request.url)?;
        let headers = build_header_map(&request.headers)?;
        let host = url.host_str().unwrap_or_default().to_string();
        let method = to_reqwest_method(request.method);
        let start = Instant::now();

        let mut builder = self
            .http
            .request(method.clone(), url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .headers(headers);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Raw(text) => builder.body(text),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart { fields, files } => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                for file in files {
                    form = form.part(file.field, Part::bytes(file.bytes).file_name(file.file_name));
                }
                builder.multipart(form)
            }
        };

        debug!(method = %method, host = %host, "http request started");

        let response = builder.send().await.map_err(|error| {
            let failure = classify_transport_error(&error);
            warn!(
                method = %method,
                host = %host,
                duration_ms = start.elapsed().as_millis(),
                failure = %failure,
                "http request failed"
            );
            failure
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|error| classify_transport_error(&error))?;

        debug!(
            method = %method,
            host = %host,
            status,
            body_len = body.len(),
            duration_ms = start.elapsed().as_millis(),
            "http request completed"
        );

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn parse_request_url(raw: &str) -> Result<Url, RequestFailure> {
    let url = Url::parse(raw.trim()).map_err(|_| RequestFailure::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(RequestFailure::InvalidUrl),
    }
}

fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap, RequestFailure> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| RequestFailure::InvalidHeader)?;
        let value = HeaderValue::from_str(value).map_err(|_| RequestFailure::InvalidHeader)?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Map a `reqwest` error onto the user-facing failure taxonomy.
pub fn classify_transport_error(error: &reqwest::Error) -> RequestFailure {
    if error.is_timeout() {
        return RequestFailure::Timeout;
    }
    if error.is_redirect() {
        return RequestFailure::TooManyRedirects;
    }
    if error.is_builder() {
        return RequestFailure::InvalidUrl;
    }
    if error.is_decode() {
        return RequestFailure::InvalidJson;
    }
    if error.is_status() {
        return RequestFailure::Http;
    }
    if mentions_tls(error) {
        return RequestFailure::Tls;
    }
    RequestFailure::Unexpected
}

fn mentions_tls(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(current) = source {
        let message = current.to_string().to_ascii_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        source = current.source();
    }
    false
}

/// Validate that a base URL is acceptable as the host's public address.
///
/// Rules:
/// - the URL must parse and include a host
/// - `localhost` or `127.0.0.1`: `http` or `https`
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<Url> {
    let parsed = Url::parse(base).map_err(|error| anyhow!("Invalid base URL '{}': {}", base, error))?;

    let host_name = parsed
        .host_str()
        .ok_or_else(|| anyhow!("base URL '{}' must include a host", base))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        if matches!(parsed.scheme(), "http" | "https") {
            return Ok(parsed);
        }
        return Err(anyhow!("base URL must use http or https; got '{}://'", parsed.scheme()));
    }

    if parsed.scheme() != "https" {
        return Err(anyhow!(
            "base URL must use https for non-localhost hosts; got '{}://'",
            parsed.scheme()
        ));
    }

    Ok(parsed)
}
