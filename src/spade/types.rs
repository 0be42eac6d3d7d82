use crate::deals::{FailureRecord, ManifestSegment, PendingSnapshot, PieceManifest, Proposal};
use crate::rpc::{ClientError, ClientResult};
use serde::Deserialize;

/// Every Spade response is wrapped like this; `response_code` mirrors the HTTP status.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub response_code: i64,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_slug: Option<String>,
    #[serde(default)]
    pub error_lines: Vec<String>,
    #[serde(default)]
    pub info_lines: Vec<String>,
    pub response: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_error(&self) -> bool {
        self.response_code >= 400
    }

    fn rejection(&self) -> String {
        let slug = self.error_slug.as_deref().unwrap_or("error");
        if self.error_lines.is_empty() {
            format!("{slug} (code {})", self.response_code)
        } else {
            format!("{slug}: {}", self.error_lines.join("; "))
        }
    }

    pub fn into_result(self, op: &str) -> ClientResult<T> {
        if self.is_error() {
            return Err(ClientError::rejected(op, self.rejection()));
        }
        for line in &self.info_lines {
            tracing::debug!(op, info = %line, "spade info");
        }
        self.response
            .ok_or_else(|| ClientError::rejected(op, "response envelope carried no payload"))
    }
}

#[derive(Debug, Deserialize)]
pub struct WireProposal {
    pub deal_proposal_id: String,
    #[serde(default)]
    pub deal_proposal_cid: Option<String>,
    #[serde(default)]
    pub hours_remaining: i64,
    #[serde(default)]
    pub piece_size: u64,
    pub piece_cid: String,
    #[serde(default)]
    pub tenant_id: Option<i16>,
    #[serde(default)]
    pub tenant_client_id: Option<String>,
    #[serde(default)]
    pub deal_start_epoch: Option<i64>,
    #[serde(default)]
    pub deal_start_time: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<String>,
}

impl From<WireProposal> for Proposal {
    fn from(w: WireProposal) -> Self {
        Self {
            proposal_id: w.deal_proposal_id,
            piece_cid: w.piece_cid,
            piece_size: w.piece_size,
            hours_remaining: w.hours_remaining,
            sources: w.data_sources,
            tenant_id: w.tenant_id,
            tenant_client: w.tenant_client_id,
            start_epoch: w.deal_start_epoch,
            start_time: w.deal_start_time,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireFailure {
    pub piece_cid: String,
    #[serde(default)]
    pub deal_proposal_id: Option<String>,
    #[serde(default)]
    pub error: String,
    #[serde(default, alias = "timestamp")]
    pub error_timestamp: Option<String>,
}

impl From<WireFailure> for FailureRecord {
    fn from(w: WireFailure) -> Self {
        Self {
            piece_cid: w.piece_cid,
            proposal_id: w.deal_proposal_id.filter(|id| !id.is_empty()),
            error: w.error,
            timestamp: w.error_timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PendingProposals {
    #[serde(default)]
    pub recent_failures: Vec<WireFailure>,
    #[serde(default)]
    pub pending_proposals: Vec<WireProposal>,
}

impl From<PendingProposals> for PendingSnapshot {
    fn from(w: PendingProposals) -> Self {
        Self {
            proposals: w.pending_proposals.into_iter().map(Proposal::from).collect(),
            failures: w.recent_failures.into_iter().map(FailureRecord::from).collect(),
        }
    }
}

/// A piece the provider may reserve.
#[derive(Debug, Clone, Deserialize)]
pub struct EligiblePiece {
    pub piece_cid: String,
    #[serde(default)]
    pub padded_piece_size: u64,
    #[serde(default)]
    pub tenants: Vec<i16>,
    #[serde(default)]
    pub sample_request_cmd: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireSegment {
    pub piece_cid: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireManifest {
    #[serde(default)]
    pub piece_cid: Option<String>,
    #[serde(default)]
    pub piece_list: Vec<WireSegment>,
}

impl From<WireManifest> for PieceManifest {
    fn from(w: WireManifest) -> Self {
        Self {
            piece_cid: w.piece_cid,
            segments: w
                .piece_list
                .into_iter()
                .map(|s| ManifestSegment {
                    piece_cid: s.piece_cid,
                    sources: s.sources,
                })
                .collect(),
        }
    }
}
