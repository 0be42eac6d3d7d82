//! The calls the deal engine makes into its collaborators.
//!
//! Production implementations live in `spade`, `boost` and `aria2`; tests use in-memory fakes.

use crate::deals::types::{
    ImportOutcome, OpenDeal, PendingSnapshot, PieceManifest, TransferHandle, TransferStatus,
};
use crate::rpc::ClientResult;
use async_trait::async_trait;
use std::path::Path;

/// The deal-matching service (Spade).
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn fetch_pending(&self) -> ClientResult<PendingSnapshot>;

    /// Reserves a fresh piece; returns its piece CID.
    async fn request_new_proposal(&self) -> ClientResult<String>;

    /// Never reserve `piece_cid` again during this run.
    fn mark_piece_already_requested(&self, piece_cid: &str);

    async fn fetch_manifest(&self, proposal_id: &str) -> ClientResult<PieceManifest>;
}

/// The storage-deal registry (Boost).
#[async_trait]
pub trait DealRegistry: Send + Sync {
    /// Offline deals parked in the `Accepted` checkpoint, waiting for data.
    async fn list_open_deals(&self) -> ClientResult<Vec<OpenDeal>>;

    async fn import_deal(&self, proposal_id: &str, local_path: &Path)
    -> ClientResult<ImportOutcome>;

    async fn cancel_deal(&self, deal_id: &str) -> ClientResult<()>;
}

/// The download manager (aria2).
#[async_trait]
pub trait TransferManager: Send + Sync {
    /// Reuses a transfer already fetching one of `source_uris`, or starts one for the first URI.
    async fn start_or_attach(
        &self,
        source_uris: &[String],
        out_name: &str,
    ) -> ClientResult<TransferHandle>;

    async fn poll(&self, transfer_id: &str) -> ClientResult<TransferStatus>;

    async fn remove(&self, transfer_id: &str) -> ClientResult<()>;
}
