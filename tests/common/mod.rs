#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use serde_json::{Value, json};
use spade_client::rpc::ClientResult;
use spade_client::spade::RequestSigner;
use std::time::Duration;

/// Serves `router` on an ephemeral loopback port; returns `http://127.0.0.1:PORT`.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("fake server should not fail");
    });
    format!("http://{addr}")
}

pub fn http_client() -> reqwest::Client {
    spade_client::rpc::build_http_client(false, Duration::from_secs(5)).expect("http client")
}

pub fn rpc_result(req: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": req["id"].clone(), "result": result})
}

pub fn rpc_error(req: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": req["id"].clone(), "error": {"code": code, "message": message}})
}

/// Hands out a fixed `Authorization` value.
pub struct StaticSigner(pub String);

#[async_trait]
impl RequestSigner for StaticSigner {
    async fn authorization(&self) -> ClientResult<String> {
        Ok(self.0.clone())
    }
}
