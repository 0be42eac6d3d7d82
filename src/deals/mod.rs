//! The deal engine: reconciles Spade's pending proposals against Boost and drives each matched
//! proposal through download and import.

pub mod classify;
pub mod errors;
pub mod lifecycle;
pub mod ports;
pub mod reconcile;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;

pub use classify::{FailureClass, classify};
pub use errors::DealError;
pub use lifecycle::{DealOutcome, DealState};
pub use ports::{DealRegistry, ProposalSource, TransferManager};
pub use reconcile::TickReport;
pub use registry::{ActiveDealGuard, Registries, RegistryCounts, RejectReason};
pub use types::{
    FailureRecord, ImportOutcome, ManifestSegment, OpenDeal, PendingSnapshot, PieceManifest,
    Proposal, TransferHandle, TransferState, TransferStatus,
};

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on active deals plus reservations waiting for their proposal.
    pub max_active: usize,
    pub tick_interval: Duration,
    /// Retries after the first acquisition attempt.
    pub acquire_max_retries: u32,
    /// Retry `n` sleeps `n * acquire_backoff`.
    pub acquire_backoff: Duration,
    pub monitor_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active: 2,
            tick_interval: Duration::from_secs(30),
            acquire_max_retries: 10,
            acquire_backoff: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(10),
        }
    }
}

pub struct DealEngine {
    cfg: EngineConfig,
    source: Arc<dyn ProposalSource>,
    registry: Arc<dyn DealRegistry>,
    transfers: Arc<dyn TransferManager>,
    state: Arc<Registries>,
}

impl DealEngine {
    pub fn new(
        cfg: EngineConfig,
        source: Arc<dyn ProposalSource>,
        registry: Arc<dyn DealRegistry>,
        transfers: Arc<dyn TransferManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            source,
            registry,
            transfers,
            state: Registries::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.state
    }

    pub fn stats(&self) -> RegistryCounts {
        self.state.counts()
    }
}
