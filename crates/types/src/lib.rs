//! Shared type definitions for the Provisio integration engine.
//!
//! - `manifest`: the typed integration manifest (steps, conditions, polling, notifications)
//! - `integration`: integration configuration, credential state, and the actor being provisioned
//! - `notification`: typed notification records emitted by the engine
//! - `http`: transport-neutral request/response values and the request failure taxonomy

pub mod http;
pub mod integration;
pub mod manifest;
pub mod notification;

pub use http::{FilePart, HttpMethod, HttpRequest, HttpResponse, RequestBody, RequestFailure};
pub use integration::{Actor, CredentialState, IntegrationConfig, ManifestType};
pub use manifest::{
    ComparisonOperator, Condition, ExistsSpec, ExtraUserInfoField, FormField, InitialDataField, LogicOperator, Manifest,
    ManifestError, ManifestIssue, NotificationSpec, OauthSpec, PollingSpec, ResponseCondition, StepSpec,
};
pub use notification::{Notification, NotificationKind};
