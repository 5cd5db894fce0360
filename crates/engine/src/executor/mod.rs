//! Step execution: render a manifest step, issue it, and poll it when configured.
//!
//! - `prepare` renders URL, headers, body and file attachments into an `HttpRequest`
//! - `runner::StepTransport` abstracts how a request reaches the network
//! - `step_once` issues a step once and applies the 4xx policy
//! - `repeat` re-issues a step until its `continue_if` gate holds

pub mod prepare;
pub mod repeat;
pub mod runner;
pub mod step_once;
pub mod types;

pub use prepare::{StepEnvironment, prepare_request};
pub use repeat::{poll_step_with, poll_step_with_observer};
pub use runner::{ReqwestTransport, StepTransport};
pub use step_once::run_step_with;
pub use types::{PollOutcome, StepOutcome, StepResult, StepStatus};
