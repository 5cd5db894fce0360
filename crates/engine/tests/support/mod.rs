#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use provisio_engine::host::memory::{MemoryRetryScheduler, MemoryStore, RecordingMessages, RecordingNotifications};
use provisio_engine::{EngineSettings, Host, StepTransport, parse_integration};
use provisio_types::{Actor, HttpRequest, HttpResponse, IntegrationConfig, RequestBody, RequestFailure};
use serde_json::{Map, Value, json};

/// Transport that replays canned replies and records every request it was given.
pub struct ScriptedTransport {
    replies: RefCell<VecDeque<Result<HttpResponse, RequestFailure>>>,
    requests: RefCell<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpResponse, RequestFailure>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl StepTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestFailure> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(RequestFailure::Unexpected))
    }
}

/// Transport that answers every request with `status` and the request's own body.
pub struct EchoTransport {
    pub status: u16,
    pub requests: RefCell<Vec<HttpRequest>>,
}

impl StepTransport for EchoTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestFailure> {
        self.requests.borrow_mut().push(request.clone());
        let body = match &request.body {
            RequestBody::Raw(text) => text.clone(),
            _ => String::new(),
        };
        Ok(HttpResponse::new(self.status, body))
    }
}

pub fn ok(value: Value) -> Result<HttpResponse, RequestFailure> {
    Ok(HttpResponse::json(200, &value))
}

pub fn status(code: u16, body: &str) -> Result<HttpResponse, RequestFailure> {
    Ok(HttpResponse::new(code, body))
}

/// In-memory collaborators for one test.
#[derive(Default)]
pub struct Collaborators {
    pub store: MemoryStore,
    pub scheduler: MemoryRetryScheduler,
    pub notifications: RecordingNotifications,
    pub messages: RecordingMessages,
}

impl Collaborators {
    pub fn with_messages(messages: RecordingMessages) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn host(&self) -> Host<'_> {
        Host {
            store: &self.store,
            scheduler: &self.scheduler,
            notifications: &self.notifications,
            messages: &self.messages,
        }
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings::default()
}

pub fn integration(id: u64, document: Value) -> IntegrationConfig {
    let mut document = document;
    if let Some(object) = document.as_object_mut() {
        object.insert("id".into(), json!(id));
        object.entry("name").or_insert_with(|| json!("Directory"));
    }
    parse_integration(&document.to_string()).expect("integration")
}

pub fn actor(id: u64, extra_fields: Value) -> Actor {
    Actor {
        id,
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: "ada@example.com".into(),
        extra_fields: extra_fields.as_object().cloned().unwrap_or_default(),
        ..Actor::default()
    }
}

pub fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
