//! Boost market node: offline deal import over JSON-RPC, deal listing and cancellation over GraphQL.

pub mod graphql;

use crate::config::BoostConfig;
use crate::deals::{DealRegistry, ImportOutcome, OpenDeal};
use crate::rpc::{ClientError, ClientResult, JsonRpcClient, NO_PARAMS};
use async_trait::async_trait;
use graphql::GraphQlClient;
use serde::{Deserialize, Serialize};
use std::path::Path;

const CANCEL_MUTATION: &str = "mutation AppDealCancelMutation($id: ID!) { dealCancel(id: $id) }";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RejectionInfo {
    accepted: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDeal {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    checkpoint: String,
    #[serde(default)]
    is_offline: bool,
    #[serde(default)]
    err: String,
    #[serde(default)]
    piece_cid: String,
    #[serde(default)]
    message: String,
}

impl From<WireDeal> for OpenDeal {
    fn from(w: WireDeal) -> Self {
        Self {
            id: w.id,
            piece_cid: w.piece_cid,
            checkpoint: w.checkpoint,
            is_offline: w.is_offline,
            created_at: w.created_at,
            err: w.err,
            message: w.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DealList {
    #[serde(default)]
    deals: Vec<WireDeal>,
    #[serde(rename = "totalCount", default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct DealsData {
    deals: DealList,
}

#[derive(Debug, Deserialize)]
struct CancelData {
    #[serde(rename = "dealCancel")]
    deal_cancel: String,
}

#[derive(Debug, Serialize)]
struct CancelVars<'a> {
    id: &'a str,
}

pub struct BoostClient {
    rpc: JsonRpcClient,
    graphql: GraphQlClient,
    open_deals_limit: u32,
}

impl BoostClient {
    pub fn new(http: reqwest::Client, cfg: &BoostConfig, open_deals_limit: u32) -> Self {
        Self {
            rpc: JsonRpcClient::new(http.clone(), cfg.rpc_url.clone(), Some(cfg.auth_token.clone())),
            graphql: GraphQlClient::new(http, &cfg.graphql_url),
            open_deals_limit,
        }
    }

    /// Checks the RPC and the GraphQL endpoint.
    pub async fn connect(&self) -> ClientResult<()> {
        let _ask: serde_json::Value = self.rpc.call("Filecoin.MarketGetAsk", NO_PARAMS).await?;
        let probe: DealsData = self
            .graphql
            .basic_query("deals", "deals(limit: 1) {totalCount}")
            .await?;
        tracing::info!(
            rpc = %self.rpc.url(),
            graphql = %self.graphql.endpoint(),
            total_deals = probe.deals.total_count,
            "connected to boost"
        );
        Ok(())
    }
}

#[async_trait]
impl DealRegistry for BoostClient {
    async fn list_open_deals(&self) -> ClientResult<Vec<OpenDeal>> {
        let fields = format!(
            "deals(limit: {}, filter: {{IsOffline: true, Checkpoint: Accepted}}) \
             {{deals {{ID CreatedAt Checkpoint IsOffline Err PieceCid Message}} totalCount}}",
            self.open_deals_limit
        );
        let data: DealsData = self.graphql.basic_query("deals", &fields).await?;
        tracing::debug!(
            returned = data.deals.deals.len(),
            total = data.deals.total_count,
            "boost open deals"
        );
        Ok(data.deals.deals.into_iter().map(OpenDeal::from).collect())
    }

    async fn import_deal(&self, proposal_id: &str, local_path: &Path) -> ClientResult<ImportOutcome> {
        const OP: &str = "Filecoin.BoostOfflineDealWithData";
        let deal_uuid = uuid::Uuid::parse_str(proposal_id)
            .map_err(|e| ClientError::invalid_input(OP, format!("proposal id {proposal_id} is not a uuid: {e}")))?;
        let path = local_path.to_str().ok_or_else(|| {
            ClientError::invalid_input(OP, format!("path {} is not valid UTF-8", local_path.display()))
        })?;

        let info: RejectionInfo = self.rpc.call(OP, (deal_uuid, path, true)).await?;
        Ok(ImportOutcome {
            accepted: info.accepted,
            reason: info.reason,
        })
    }

    async fn cancel_deal(&self, deal_id: &str) -> ClientResult<()> {
        const OP: &str = "dealCancel";
        let data: CancelData = self
            .graphql
            .execute(
                OP,
                Some("AppDealCancelMutation"),
                CANCEL_MUTATION,
                Some(CancelVars { id: deal_id }),
            )
            .await?;
        if data.deal_cancel != deal_id {
            return Err(ClientError::rejected(
                OP,
                format!("asked to cancel {deal_id}, boost answered {}", data.deal_cancel),
            ));
        }
        Ok(())
    }
}
