//! Lotus daemon and miner JSON-RPC: identity lookups and the `FIL-SPID-V0` request signature Spade
//! expects on every call.

use crate::config::LotusConfig;
use crate::rpc::{ClientError, ClientResult, JsonRpcClient, NO_PARAMS};
use crate::spade::RequestSigner;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use std::sync::Arc;

pub const SPID_SCHEME: &str = "FIL-SPID-V0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(default, rename = "APIVersion")]
    pub api_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MinerInfo {
    worker: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TipSet {
    height: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Signature {
    #[serde(rename = "Type")]
    kind: u8,
    /// Base64 per the Lotus JSON encoding of byte slices.
    data: String,
}

/// The storage provider this client acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerIdentity {
    pub miner: String,
    pub worker: String,
}

#[derive(Debug)]
pub struct LotusClient {
    daemon: JsonRpcClient,
    miner: JsonRpcClient,
}

impl LotusClient {
    pub fn new(http: reqwest::Client, cfg: &LotusConfig) -> Self {
        Self {
            daemon: JsonRpcClient::new(
                http.clone(),
                cfg.daemon_url.clone(),
                Some(cfg.daemon_token.clone()),
            ),
            miner: JsonRpcClient::new(http, cfg.miner_url.clone(), Some(cfg.miner_token.clone())),
        }
    }

    /// Checks both endpoints and resolves the miner and its worker key.
    pub async fn connect(&self) -> ClientResult<MinerIdentity> {
        let daemon: VersionInfo = self.daemon.call("Filecoin.Version", NO_PARAMS).await?;
        tracing::info!(url = %self.daemon.url(), version = %daemon.version, "connected to lotus daemon");
        let miner_version: VersionInfo = self.miner.call("Filecoin.Version", NO_PARAMS).await?;
        tracing::info!(url = %self.miner.url(), version = %miner_version.version, "connected to lotus miner");

        let miner: String = self.miner.call("Filecoin.ActorAddress", NO_PARAMS).await?;
        let info: MinerInfo = self
            .daemon
            .call("Filecoin.StateMinerInfo", (miner.as_str(), ()))
            .await?;
        tracing::info!(miner = %miner, worker = %info.worker, "resolved storage provider identity");
        Ok(MinerIdentity {
            miner,
            worker: info.worker,
        })
    }

    pub async fn chain_height(&self) -> ClientResult<i64> {
        let head: TipSet = self.daemon.call("Filecoin.ChainHead", NO_PARAMS).await?;
        Ok(head.height)
    }

    /// Signs `payload` with `address`; returns the binary signature (type byte then data).
    pub async fn wallet_sign(&self, address: &str, payload: &[u8]) -> ClientResult<Vec<u8>> {
        let sig: Signature = self
            .daemon
            .call("Filecoin.WalletSign", (address, B64.encode(payload)))
            .await?;
        let data = B64
            .decode(sig.data.as_bytes())
            .map_err(|e| ClientError::rejected("Filecoin.WalletSign", format!("signature is not base64: {e}")))?;
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(sig.kind);
        out.extend_from_slice(&data);
        Ok(out)
    }

    pub fn signer(self: &Arc<Self>, identity: MinerIdentity) -> SpidSigner {
        SpidSigner {
            lotus: Arc::clone(self),
            identity,
        }
    }
}

/// Bytes the worker key signs for a given epoch.
pub fn spid_payload(epoch: i64, miner: &str) -> String {
    format!("{SPID_SCHEME} {epoch};{miner}")
}

pub fn spid_header(epoch: i64, miner: &str, signature: &[u8]) -> String {
    format!("{SPID_SCHEME} {epoch};{miner};{}", B64.encode(signature))
}

/// Produces Spade `Authorization` headers from the current chain head.
#[derive(Debug, Clone)]
pub struct SpidSigner {
    lotus: Arc<LotusClient>,
    identity: MinerIdentity,
}

impl SpidSigner {
    pub fn identity(&self) -> &MinerIdentity {
        &self.identity
    }
}

#[async_trait]
impl RequestSigner for SpidSigner {
    async fn authorization(&self) -> ClientResult<String> {
        let epoch = self.lotus.chain_height().await?;
        let payload = spid_payload(epoch, &self.identity.miner);
        let sig = self
            .lotus
            .wallet_sign(&self.identity.worker, payload.as_bytes())
            .await?;
        Ok(spid_header(epoch, &self.identity.miner, &sig))
    }
}
