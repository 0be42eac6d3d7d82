pub mod error;
pub mod jsonrpc;

pub use error::{ClientError, ClientResult};
pub use jsonrpc::{JsonRpcClient, NO_PARAMS};

use std::time::Duration;

/// Shared HTTP client for every remote service.
///
/// The timeout is transport hygiene only; a timed out request is an ordinary transient error.
pub fn build_http_client(insecure_skip_verify: bool, timeout: Duration) -> ClientResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure_skip_verify)
        .user_agent(concat!("spade-client/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ClientError::http("build http client", source))
}

/// Sends `req` and returns the body of a 200 response.
pub async fn read_body(op: &str, req: reqwest::RequestBuilder) -> ClientResult<Vec<u8>> {
    let resp = req.send().await.map_err(|e| ClientError::http(op, e))?;
    let status = resp.status();
    let body = resp.bytes().await.map_err(|e| ClientError::http(op, e))?;
    if status != reqwest::StatusCode::OK {
        tracing::debug!(op, status = status.as_u16(), "remote returned unexpected status");
        return Err(ClientError::Status {
            op: op.to_string(),
            status: status.as_u16(),
            body: crate::logging::shorten_body(&body),
        });
    }
    Ok(body.to_vec())
}
