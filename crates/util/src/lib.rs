pub mod async_runtime;
pub mod paths;
pub mod redaction;
pub mod secrets;

pub use async_runtime::block_on_future;
pub use paths::{config_file_path, expand_tilde};
pub use redaction::{redact_json, redact_sensitive, scrub_and_redact, scrub_secrets};
pub use secrets::generate_secret;
