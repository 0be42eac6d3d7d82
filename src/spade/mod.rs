//! Spade HTTP API: pending proposals, eligible pieces, reservations and piece manifests.

pub mod types;

use crate::deals::{PendingSnapshot, PieceManifest, ProposalSource};
use crate::rpc::{ClientError, ClientResult};
use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use types::{EligiblePiece, Envelope, PendingProposals, WireManifest};

/// Source of the `Authorization` header Spade checks on every request.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn authorization(&self) -> ClientResult<String>;
}

pub struct SpadeClient {
    http: reqwest::Client,
    base: String,
    signer: Arc<dyn RequestSigner>,
    /// Pieces already reserved (or refused by Spade) that must not be reserved again.
    requested: Mutex<HashSet<String>>,
    ignored: HashSet<String>,
}

impl SpadeClient {
    pub fn new(
        http: reqwest::Client,
        url: &str,
        signer: Arc<dyn RequestSigner>,
        ignored: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            http,
            base: url.trim_end_matches('/').to_string(),
            signer,
            requested: Mutex::new(HashSet::new()),
            ignored: ignored.into_iter().collect(),
        }
    }

    fn requested(&self) -> MutexGuard<'_, HashSet<String>> {
        self.requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_requested(&self, piece_cid: &str) -> bool {
        self.requested().contains(piece_cid)
    }

    pub fn requested_count(&self) -> usize {
        self.requested().len()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        op: &str,
        req: reqwest::RequestBuilder,
    ) -> ClientResult<T> {
        self.send_envelope(op, req).await?.into_result(op)
    }

    async fn send_envelope<T: DeserializeOwned>(
        &self,
        op: &str,
        req: reqwest::RequestBuilder,
    ) -> ClientResult<Envelope<T>> {
        let auth = self.signer.authorization().await?;
        let resp = req
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| ClientError::http(op, e))?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| ClientError::http(op, e))?;

        // Spade answers errors with an envelope and a matching status; prefer the envelope.
        match serde_json::from_slice::<Envelope<T>>(&body) {
            Ok(env) => Ok(env),
            Err(_) if !status.is_success() => Err(ClientError::Status {
                op: op.to_string(),
                status: status.as_u16(),
                body: crate::logging::shorten_body(&body),
            }),
            Err(e) => Err(ClientError::decode(op, e, &body)),
        }
    }

    pub async fn pending_proposals(&self) -> ClientResult<PendingProposals> {
        let url = format!("{}/sp/pending_proposals", self.base);
        self.send("pending_proposals", self.http.get(url)).await
    }

    pub async fn eligible_pieces(&self) -> ClientResult<Vec<EligiblePiece>> {
        let url = format!("{}/sp/eligible_pieces", self.base);
        self.send("eligible_pieces", self.http.get(url)).await
    }

    pub async fn reserve_piece(&self, piece_cid: &str) -> ClientResult<()> {
        let url = format!("{}/sp/invoke", self.base);
        let req = self
            .http
            .post(url)
            .query(&[("call", "reserve_piece"), ("piece_cid", piece_cid)]);
        // The payload of a successful invoke is empty or null.
        let env: Envelope<IgnoredAny> = self.send_envelope("reserve_piece", req).await?;
        if env.is_error() {
            env.into_result("reserve_piece")?;
        }
        Ok(())
    }

    pub async fn piece_manifest(&self, proposal_id: &str) -> ClientResult<WireManifest> {
        let url = format!("{}/sp/piece_manifest", self.base);
        let req = self.http.get(url).query(&[("proposal", proposal_id)]);
        self.send("piece_manifest", req).await
    }

    fn pick_candidate(&self, pieces: &[EligiblePiece]) -> Option<String> {
        let requested = self.requested();
        pieces
            .iter()
            .map(|p| p.piece_cid.as_str())
            .find(|cid| !requested.contains(*cid) && !self.ignored.contains(*cid))
            .map(str::to_string)
    }
}

#[async_trait]
impl ProposalSource for SpadeClient {
    async fn fetch_pending(&self) -> ClientResult<PendingSnapshot> {
        Ok(self.pending_proposals().await?.into())
    }

    async fn request_new_proposal(&self) -> ClientResult<String> {
        let pieces = self.eligible_pieces().await?;
        let Some(piece) = self.pick_candidate(&pieces) else {
            return Err(ClientError::rejected(
                "reserve_piece",
                format!("none of {} eligible pieces is left to reserve", pieces.len()),
            ));
        };

        match self.reserve_piece(&piece).await {
            Ok(()) => {
                self.mark_piece_already_requested(&piece);
                Ok(piece)
            }
            Err(err) => {
                // Spade said no to this piece; move on to the next one next time.
                if matches!(err, ClientError::Rejected { .. }) {
                    tracing::debug!(piece = %piece, error = %err, "reservation refused; skipping piece");
                    self.mark_piece_already_requested(&piece);
                }
                Err(err)
            }
        }
    }

    fn mark_piece_already_requested(&self, piece_cid: &str) {
        self.requested().insert(piece_cid.to_string());
    }

    async fn fetch_manifest(&self, proposal_id: &str) -> ClientResult<PieceManifest> {
        Ok(self.piece_manifest(proposal_id).await?.into())
    }
}
