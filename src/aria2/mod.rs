//! aria2 download manager over its JSON-RPC interface.

pub mod types;

use crate::config::Aria2Config;
use crate::deals::{TransferHandle, TransferManager, TransferState, TransferStatus};
use crate::rpc::{ClientError, ClientResult, JsonRpcClient};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use types::{DownloadStatus, STATUS_KEYS, VersionInfo};

/// Upper bound for `tellWaiting` / `tellStopped` listings.
const LIST_LIMIT: u32 = 1000;

pub struct Aria2Client {
    rpc: JsonRpcClient,
    secret: Option<String>,
    download_dir: PathBuf,
    /// Makes look-up-then-add atomic so two deals for one URI share a download.
    start_lock: tokio::sync::Mutex<()>,
}

impl Aria2Client {
    pub fn new(http: reqwest::Client, cfg: &Aria2Config, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            rpc: JsonRpcClient::new(http, cfg.url.clone(), None),
            secret: Some(cfg.secret.clone()).filter(|s| !s.is_empty()),
            download_dir: download_dir.into(),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, mut params: Vec<Value>) -> ClientResult<R> {
        if let Some(secret) = &self.secret {
            params.insert(0, Value::String(format!("token:{secret}")));
        }
        self.rpc.call(method, params).await
    }

    pub async fn version(&self) -> ClientResult<VersionInfo> {
        self.call("aria2.getVersion", vec![]).await
    }

    /// Checks the connection and lists what aria2 already holds.
    pub async fn connect(&self) -> ClientResult<()> {
        let version = self.version().await?;
        let downloads = self.list_all().await?;
        tracing::info!(
            url = %self.rpc.url(),
            version = %version.version,
            downloads = downloads.len(),
            dir = %self.download_dir.display(),
            "connected to aria2"
        );
        Ok(())
    }

    /// Active, waiting and stopped downloads.
    pub async fn list_all(&self) -> ClientResult<Vec<DownloadStatus>> {
        let keys = json!(STATUS_KEYS);
        let mut all: Vec<DownloadStatus> = self.call("aria2.tellActive", vec![keys.clone()]).await?;
        let waiting: Vec<DownloadStatus> = self
            .call("aria2.tellWaiting", vec![json!(0), json!(LIST_LIMIT), keys.clone()])
            .await?;
        let stopped: Vec<DownloadStatus> = self
            .call("aria2.tellStopped", vec![json!(0), json!(LIST_LIMIT), keys])
            .await?;
        tracing::debug!(
            active = all.len(),
            waiting = waiting.len(),
            stopped = stopped.len(),
            "aria2 downloads"
        );
        all.extend(waiting);
        all.extend(stopped);
        Ok(all)
    }

    pub async fn status(&self, gid: &str) -> ClientResult<DownloadStatus> {
        self.call("aria2.tellStatus", vec![json!(gid), json!(STATUS_KEYS)])
            .await
    }

    pub async fn add_uri(&self, uri: &str, out_name: &str) -> ClientResult<String> {
        let options = json!({
            "dir": self.download_dir.to_string_lossy(),
            "out": out_name,
            "continue": "true",
            "always-resume": "true",
            "file-allocation": "falloc",
        });
        self.call("aria2.addUri", vec![json!([uri]), options]).await
    }
}

#[async_trait]
impl TransferManager for Aria2Client {
    async fn start_or_attach(
        &self,
        source_uris: &[String],
        out_name: &str,
    ) -> ClientResult<TransferHandle> {
        let Some(first) = source_uris.first() else {
            return Err(ClientError::invalid_input("aria2.addUri", "no source uri"));
        };
        let _guard = self.start_lock.lock().await;

        let existing = self.list_all().await?;
        for uri in source_uris {
            let found = existing
                .iter()
                .find(|d| d.has_uri(uri) && TransferState::parse(&d.status) != TransferState::Removed);
            if let Some(d) = found {
                tracing::debug!(gid = %d.gid, status = %d.status, uri = %uri, "found existing download");
                return Ok(TransferHandle {
                    id: d.gid.clone(),
                    attached: true,
                });
            }
        }

        tracing::info!(uri = %first, out = %out_name, "starting download");
        let gid = self.add_uri(first, out_name).await?;
        Ok(TransferHandle {
            id: gid,
            attached: false,
        })
    }

    async fn poll(&self, transfer_id: &str) -> ClientResult<TransferStatus> {
        Ok(self.status(transfer_id).await?.into())
    }

    async fn remove(&self, transfer_id: &str) -> ClientResult<()> {
        let status = self.status(transfer_id).await?;
        let state = TransferState::parse(&status.status);
        if matches!(
            state,
            TransferState::Active | TransferState::Waiting | TransferState::Paused
        ) {
            let _gid: String = self.call("aria2.remove", vec![json!(transfer_id)]).await?;
        }
        match self
            .call::<String>("aria2.removeDownloadResult", vec![json!(transfer_id)])
            .await
        {
            Ok(_) => Ok(()),
            // A just-removed download may not have stopped yet; aria2 drops it on its own later.
            Err(ClientError::Rpc { message, .. }) if state != TransferState::Complete && state != TransferState::Error => {
                tracing::debug!(gid = %transfer_id, error = %message, "download result not removed yet");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
