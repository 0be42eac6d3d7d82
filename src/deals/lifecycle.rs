use crate::deals::{
    DealEngine,
    errors::DealError,
    registry::{ActiveDealGuard, RejectReason},
    types::{Proposal, TransferHandle, TransferState},
};
use crate::rpc::ClientError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealState {
    Admitted,
    Acquiring,
    Monitoring,
    Importing,
    Completed,
    Failed,
}

impl std::fmt::Display for DealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Admitted => "admitted",
            Self::Acquiring => "acquiring",
            Self::Monitoring => "monitoring",
            Self::Importing => "importing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum DealOutcome {
    Completed,
    Failed(DealError),
    /// The entry guard turned the proposal away; nothing was touched.
    Rejected(RejectReason),
}

impl DealOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn final_state(&self) -> Option<DealState> {
        match self {
            Self::Completed => Some(DealState::Completed),
            Self::Failed(_) => Some(DealState::Failed),
            Self::Rejected(_) => None,
        }
    }
}

enum AcquireError {
    Retry(ClientError),
    /// Retrying cannot fix a response we do not understand or a request we cannot make.
    Permanent(ClientError),
    Fatal(DealError),
}

impl AcquireError {
    fn from_client(err: ClientError) -> Self {
        match err {
            ClientError::Decode { .. } | ClientError::InvalidInput { .. } => Self::Permanent(err),
            other => Self::Retry(other),
        }
    }
}

fn enter(proposal: &Proposal, state: DealState) {
    tracing::debug!(proposal = %proposal.proposal_id, %state, "deal state");
}

/// File name for a new transfer: the last path segment of the source, else the piece CID.
pub fn output_name(proposal: &Proposal, source: &str) -> String {
    reqwest::Url::parse(source)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{}.car", proposal.piece_cid))
}

impl DealEngine {
    pub fn spawn_deal(
        self: &Arc<Self>,
        proposal: Proposal,
        cancel: CancellationToken,
    ) -> JoinHandle<DealOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.handle_deal(proposal, cancel).await })
    }

    /// Spawns a deal whose entry was already taken by the caller.
    pub fn spawn_admitted(
        self: &Arc<Self>,
        proposal: Proposal,
        guard: ActiveDealGuard,
        cancel: CancellationToken,
    ) -> JoinHandle<DealOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_admitted(proposal, guard, cancel).await })
    }

    /// Runs one proposal from admission to import.
    pub async fn handle_deal(&self, proposal: Proposal, cancel: CancellationToken) -> DealOutcome {
        let guard = match self.state.try_admit(&proposal, self.cfg.max_active) {
            Ok(guard) => guard,
            Err(reason) => {
                tracing::debug!(
                    proposal = %proposal.proposal_id,
                    reason = %reason,
                    "not handling deal"
                );
                return DealOutcome::Rejected(reason);
            }
        };
        self.run_admitted(proposal, guard, cancel).await
    }

    async fn run_admitted(
        &self,
        proposal: Proposal,
        guard: ActiveDealGuard,
        cancel: CancellationToken,
    ) -> DealOutcome {
        enter(&proposal, DealState::Admitted);
        tracing::info!(
            proposal = %proposal.proposal_id,
            piece = %proposal.piece_cid,
            size = proposal.piece_size,
            hours_remaining = proposal.hours_remaining,
            "handling deal"
        );

        match self.drive(&proposal, &cancel).await {
            Ok(()) => {
                guard.complete();
                enter(&proposal, DealState::Completed);
                tracing::info!(
                    proposal = %proposal.proposal_id,
                    piece = %proposal.piece_cid,
                    "successfully downloaded and imported deal"
                );
                DealOutcome::Completed
            }
            Err(err) => {
                drop(guard);
                enter(&proposal, DealState::Failed);
                match &err {
                    DealError::Cancelled => tracing::info!(
                        proposal = %proposal.proposal_id,
                        "stopped handling deal: shutting down"
                    ),
                    DealError::AcquireExhausted { .. } | DealError::NoSources => tracing::error!(
                        proposal = %proposal.proposal_id,
                        piece = %proposal.piece_cid,
                        error = %err,
                        "could not handle deal; giving up"
                    ),
                    _ => tracing::warn!(
                        proposal = %proposal.proposal_id,
                        piece = %proposal.piece_cid,
                        error = %err,
                        "deal failed"
                    ),
                }
                DealOutcome::Failed(err)
            }
        }
    }

    async fn drive(&self, proposal: &Proposal, cancel: &CancellationToken) -> Result<(), DealError> {
        enter(proposal, DealState::Acquiring);
        let handle = self.acquire(proposal, cancel).await?;

        enter(proposal, DealState::Monitoring);
        let path = self.monitor(proposal, &handle, cancel).await?;

        enter(proposal, DealState::Importing);
        self.import(proposal, &path).await?;

        if let Err(err) = self.transfers.remove(&handle.id).await {
            tracing::warn!(
                proposal = %proposal.proposal_id,
                transfer = %handle.id,
                error = %err,
                "could not remove finished download"
            );
        }
        Ok(())
    }

    async fn acquire(
        &self,
        proposal: &Proposal,
        cancel: &CancellationToken,
    ) -> Result<TransferHandle, DealError> {
        let mut retry: u32 = 0;
        loop {
            let last = match self.try_acquire(proposal).await {
                Ok(handle) => return Ok(handle),
                Err(AcquireError::Fatal(err)) => return Err(err),
                Err(AcquireError::Permanent(last)) => {
                    return Err(DealError::AcquireExhausted {
                        attempts: retry + 1,
                        last,
                    });
                }
                Err(AcquireError::Retry(err)) => err,
            };
            if retry >= self.cfg.acquire_max_retries {
                return Err(DealError::AcquireExhausted {
                    attempts: retry + 1,
                    last,
                });
            }
            retry += 1;
            let backoff = self.cfg.acquire_backoff * retry;
            tracing::warn!(
                proposal = %proposal.proposal_id,
                retry,
                backoff_secs = backoff.as_secs(),
                error = %last,
                "could not start download; retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(DealError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn try_acquire(&self, proposal: &Proposal) -> Result<TransferHandle, AcquireError> {
        let sources = self.resolve_sources(proposal).await?;
        let Some(first) = sources.first() else {
            tracing::error!(proposal = %proposal.proposal_id, offer = ?proposal, "no sources found for deal");
            return Err(AcquireError::Fatal(DealError::NoSources));
        };
        let out_name = output_name(proposal, first);

        let handle = self
            .transfers
            .start_or_attach(&sources, &out_name)
            .await
            .map_err(AcquireError::from_client)?;

        if handle.attached {
            tracing::info!(
                proposal = %proposal.proposal_id,
                transfer = %handle.id,
                "attached to existing download"
            );
            if sources.len() > 1 {
                tracing::warn!(
                    proposal = %proposal.proposal_id,
                    candidates = sources.len(),
                    "multiple candidate sources; using the first with a running download"
                );
            }
        } else {
            tracing::info!(
                proposal = %proposal.proposal_id,
                transfer = %handle.id,
                source = %first,
                out = %out_name,
                "started download"
            );
            if sources.len() > 1 {
                tracing::warn!(
                    proposal = %proposal.proposal_id,
                    sources = sources.len(),
                    "multiple sources found; only using the first"
                );
            }
        }
        Ok(handle)
    }

    async fn resolve_sources(&self, proposal: &Proposal) -> Result<Vec<String>, AcquireError> {
        if !proposal.sources.is_empty() {
            return Ok(proposal.sources.clone());
        }

        tracing::info!(proposal = %proposal.proposal_id, "fetching manifest");
        let manifest = self
            .source
            .fetch_manifest(&proposal.proposal_id)
            .await
            .map_err(AcquireError::from_client)?;
        if manifest.segments.is_empty() {
            return Ok(Vec::new());
        }
        match manifest.whole_piece_sources() {
            Some(sources) => Ok(sources.to_vec()),
            None => Err(AcquireError::Fatal(DealError::UnsupportedManifest {
                segments: manifest.segments.len(),
            })),
        }
    }

    async fn monitor(
        &self,
        proposal: &Proposal,
        handle: &TransferHandle,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DealError> {
        tracing::info!(proposal = %proposal.proposal_id, transfer = %handle.id, "monitoring download");
        loop {
            match self.transfers.poll(&handle.id).await {
                Ok(status) => match status.state {
                    TransferState::Complete => {
                        tracing::info!(
                            proposal = %proposal.proposal_id,
                            transfer = %handle.id,
                            "download finished"
                        );
                        return status.output_path.ok_or_else(|| DealError::MissingOutputPath {
                            transfer_id: handle.id.clone(),
                        });
                    }
                    TransferState::Error | TransferState::Removed => {
                        tracing::info!(
                            proposal = %proposal.proposal_id,
                            transfer = %handle.id,
                            state = status.state.as_str(),
                            "download errored; stopping and removing"
                        );
                        if let Err(err) = self.transfers.remove(&handle.id).await {
                            tracing::warn!(transfer = %handle.id, error = %err, "could not remove download");
                        }
                        return Err(DealError::TransferFailed {
                            transfer_id: handle.id.clone(),
                            message: status.error_message,
                        });
                    }
                    _ => {
                        tracing::info!(
                            proposal = %proposal.proposal_id,
                            transfer = %handle.id,
                            state = status.state.as_str(),
                            speed = status.download_speed,
                            completed = status.completed_length,
                            total = status.total_length,
                            "download {:.2}%",
                            status.progress_pct()
                        );
                    }
                },
                Err(err) if err.is_not_found() => {
                    tracing::warn!(
                        proposal = %proposal.proposal_id,
                        transfer = %handle.id,
                        error = %err,
                        "download manager no longer knows the download"
                    );
                    return Err(DealError::TransferFailed {
                        transfer_id: handle.id.clone(),
                        message: Some(err.to_string()),
                    });
                }
                Err(err) => {
                    tracing::warn!(transfer = %handle.id, error = %err, "error getting download status");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(transfer = %handle.id, "stopping download monitoring: cancelled");
                    return Err(DealError::Cancelled);
                }
                _ = tokio::time::sleep(self.cfg.monitor_interval) => {}
            }
        }
    }

    async fn import(&self, proposal: &Proposal, path: &std::path::Path) -> Result<(), DealError> {
        tracing::info!(
            proposal = %proposal.proposal_id,
            path = %path.display(),
            "importing deal into boost"
        );
        let outcome = self
            .registry
            .import_deal(&proposal.proposal_id, path)
            .await
            .map_err(DealError::Import)?;
        if !outcome.accepted {
            return Err(DealError::ImportRejected {
                reason: outcome.reason,
            });
        }
        Ok(())
    }
}
