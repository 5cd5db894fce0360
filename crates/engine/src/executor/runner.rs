use std::time::Duration;

use anyhow::Result;
use provisio_api::ProvisioClient;
use provisio_types::{HttpRequest, HttpResponse, RequestFailure};
use provisio_util::block_on_future;
use tracing::warn;

/// Issue one rendered request.
///
/// Implementations return every HTTP status as a response; deciding whether a status fails
/// the step is the executor's job.
pub trait StepTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestFailure>;
}

/// Transport backed by the reqwest client, bridged onto the calling thread.
pub struct ReqwestTransport {
    client: ProvisioClient,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: ProvisioClient::new(timeout)?,
        })
    }
}

impl StepTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RequestFailure> {
        let client = self.client.clone();
        let request = request.clone();
        let request_future = async move { client.send(request).await };
        block_on_future(request_future).unwrap_or_else(|error| {
            warn!(error = %error, "could not start a runtime for the request");
            Err(RequestFailure::Unexpected)
        })
    }
}
