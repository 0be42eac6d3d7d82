use crate::rpc::{ClientError, ClientResult, read_body};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::atomic::{AtomicU64, Ordering};

/// Positional params for a call without arguments; serializes as `[]`.
pub const NO_PARAMS: [(); 0] = [];

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 over HTTP POST, as spoken by Lotus, Boost and aria2.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    bearer: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            bearer: bearer.filter(|t| !t.is_empty()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> ClientResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut req = self.http.post(&self.url).json(&RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        });
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }

        let body = read_body(method, req).await?;
        decode_response(method, &body)
    }
}

fn decode_response<R: DeserializeOwned>(method: &str, body: &[u8]) -> ClientResult<R> {
    let resp: RpcResponse =
        serde_json::from_slice(body).map_err(|e| ClientError::decode(method, e, body))?;
    if let Some(err) = resp.error {
        return Err(ClientError::Rpc {
            op: method.to_string(),
            code: err.code,
            message: err.message,
        });
    }
    serde_json::from_value(resp.result).map_err(|e| ClientError::decode(method, e, body))
}
