use crate::deals::{
    DealEngine,
    classify::{FailureClass, classify},
    lifecycle::DealOutcome,
    types::{FailureRecord, PendingSnapshot, Proposal},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

const FETCH_WARN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Result of one tick phase. `SkipRest` jumps straight to the sleep.
enum Phase<T> {
    Continue(T),
    SkipRest,
}

/// What a tick did. Task handles are detached by the loop; tests await them.
#[derive(Debug, Default)]
pub struct TickReport {
    pub proposals: usize,
    pub failures: usize,
    pub duplicates_cancelled: usize,
    pub newly_failed: usize,
    pub matched: usize,
    /// Matched proposals the entry guard turned away; no task was spawned for them.
    pub rejected: usize,
    pub requested: usize,
    /// True when a fetch failed and the remaining phases did not run.
    pub skipped: bool,
    pub deal_tasks: Vec<JoinHandle<DealOutcome>>,
    pub cancel_tasks: Vec<JoinHandle<()>>,
}

impl DealEngine {
    /// Runs ticks every `tick_interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.cfg.tick_interval.as_secs(),
            max_active = self.cfg.max_active,
            "scanning pending proposals"
        );
        let mut ticker = interval(self.cfg.tick_interval);
        // After a stall, one tick is enough: every tick re-derives everything from remote state.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("stopping pending proposal worker: cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                tracing::info!("stopping pending proposal worker: cancelled");
                return;
            }
            let report = self.run_tick(&cancel).await;
            tracing::debug!(
                proposals = report.proposals,
                failures = report.failures,
                matched = report.matched,
                rejected = report.rejected,
                requested = report.requested,
                skipped = report.skipped,
                "tick done"
            );
        }
    }

    /// One reconciliation pass: fetch, classify failures, match, admit.
    pub async fn run_tick(self: &Arc<Self>, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        let snapshot = match self.fetch_phase().await {
            Phase::Continue(snapshot) => snapshot,
            Phase::SkipRest => {
                report.skipped = true;
                return report;
            }
        };
        report.proposals = snapshot.proposals.len();
        report.failures = snapshot.failures.len();

        self.classify_phase(&snapshot.failures, &mut report);

        match self.match_phase(&snapshot.proposals, cancel).await {
            Phase::Continue((tasks, rejected)) => {
                report.matched = tasks.len();
                report.rejected = rejected;
                report.deal_tasks = tasks;
            }
            Phase::SkipRest => {
                report.skipped = true;
                return report;
            }
        }

        report.requested = self.admit_phase().await;

        let counts = self.state.counts();
        tracing::info!(
            active = counts.active,
            waiting = counts.waiting,
            imported = counts.imported,
            duplicates = counts.duplicates,
            failed_pieces = counts.failures,
            "deal registry"
        );
        report
    }

    async fn fetch_phase(&self) -> Phase<PendingSnapshot> {
        tracing::info!("fetching pending proposals");
        match self.source.fetch_pending().await {
            Ok(snapshot) => {
                tracing::info!(
                    pending = snapshot.proposals.len(),
                    recent_failures = snapshot.failures.len(),
                    "fetched pending proposals"
                );
                Phase::Continue(snapshot)
            }
            Err(err) => {
                if crate::logging::warn_throttled("spade.fetch_pending", FETCH_WARN_INTERVAL) {
                    tracing::warn!(error = %err, "could not fetch pending proposals");
                }
                Phase::SkipRest
            }
        }
    }

    fn classify_phase(&self, failures: &[FailureRecord], report: &mut TickReport) {
        for failure in failures {
            let piece = failure.piece_cid.as_str();
            match classify(&failure.error) {
                FailureClass::Duplicate { deal_id } => {
                    if !self.state.duplicates.insert_if_absent(piece, &deal_id) {
                        continue;
                    }
                    tracing::warn!(
                        piece,
                        proposal = failure.proposal_id.as_deref().unwrap_or(""),
                        duplicate_of = %deal_id,
                        "captured a duplicate deal; cancelling it in boost"
                    );
                    report.cancel_tasks.push(self.spawn_cancel(deal_id));
                    report.duplicates_cancelled += 1;
                    // Spade keeps reporting the failure after the cancel, so never re-request.
                    self.source.mark_piece_already_requested(piece);
                    self.state.waiting.remove(piece);
                }
                FailureClass::NotYetSealable => {
                    // A re-request would carry the same start epoch.
                    self.source.mark_piece_already_requested(piece);
                    if self.record_failure(failure) {
                        report.newly_failed += 1;
                    }
                }
                FailureClass::TransientRemote => {
                    if self.state.failures.contains(piece) {
                        continue;
                    }
                    self.state.waiting.remove(piece);
                    if crate::logging::warn_throttled(&format!("spade.remote.{piece}"), FETCH_WARN_INTERVAL) {
                        tracing::warn!(
                            piece,
                            error = %failure.error,
                            "piece failed with a spade-side error; not recording it"
                        );
                    }
                }
                FailureClass::Other => {
                    if self.record_failure(failure) {
                        report.newly_failed += 1;
                    }
                }
            }
        }
    }

    /// Memoizes a terminal failure. Returns true the first time a piece is seen.
    fn record_failure(&self, failure: &FailureRecord) -> bool {
        let piece = failure.piece_cid.as_str();
        if !self.state.failures.record_if_new(piece, &failure.error) {
            return false;
        }
        self.state.waiting.remove(piece);
        tracing::warn!(piece, error = %failure.error, "piece failed");
        true
    }

    fn spawn_cancel(&self, deal_id: String) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            match registry.cancel_deal(&deal_id).await {
                Ok(()) => tracing::info!(deal = %deal_id, "cancelled duplicate deal in boost"),
                Err(err) => {
                    tracing::warn!(deal = %deal_id, error = %err, "could not cancel duplicate deal")
                }
            }
        })
    }

    async fn match_phase(
        self: &Arc<Self>,
        proposals: &[Proposal],
        cancel: &CancellationToken,
    ) -> Phase<(Vec<JoinHandle<DealOutcome>>, usize)> {
        if proposals.is_empty() {
            return Phase::Continue((Vec::new(), 0));
        }

        tracing::info!("fetching open deals from boost");
        let deals = match self.registry.list_open_deals().await {
            Ok(deals) => deals,
            Err(err) => {
                tracing::warn!(error = %err, "could not fetch deals from boost");
                return Phase::SkipRest;
            }
        };
        tracing::info!(deals = deals.len(), "found open deals in boost");

        let mut by_id: HashMap<&str, &Proposal> = HashMap::with_capacity(proposals.len());
        for p in proposals {
            by_id.entry(p.proposal_id.as_str()).or_insert(p);
        }

        let mut tasks = Vec::new();
        let mut rejected = 0;
        for deal in &deals {
            // Removing on match keeps one dispatch per proposal even if boost repeats a deal.
            let Some(proposal) = by_id.remove(deal.id.as_str()) else {
                continue;
            };
            tracing::debug!(
                deal = %deal.id,
                piece = %proposal.piece_cid,
                "matched pending proposal to boost deal"
            );
            // Admit before the piece leaves Waiting so the proposal is always counted as in flight.
            let admitted = self.state.try_admit(proposal, self.cfg.max_active);
            self.state.waiting.remove(&proposal.piece_cid);
            match admitted {
                Ok(guard) => {
                    tasks.push(self.spawn_admitted(proposal.clone(), guard, cancel.child_token()))
                }
                Err(reason) => {
                    rejected += 1;
                    tracing::debug!(
                        proposal = %proposal.proposal_id,
                        reason = %reason,
                        "not handling matched deal"
                    );
                }
            }
        }
        Phase::Continue((tasks, rejected))
    }

    async fn admit_phase(&self) -> usize {
        let active = self.state.active.len();
        let waiting = self.state.waiting.len();
        let inflight = active + waiting;
        let max = self.cfg.max_active;

        if inflight >= max {
            tracing::info!(
                inflight,
                active,
                waiting,
                max,
                "at deal limit; not requesting new deals"
            );
            return 0;
        }

        let wanted = max - inflight;
        tracing::info!(
            inflight,
            active,
            waiting,
            max,
            wanted,
            "below deal limit; requesting new deals"
        );
        let mut requested = 0;
        for _ in 0..wanted {
            match self.source.request_new_proposal().await {
                Ok(piece) => {
                    tracing::info!(piece = %piece, "requested new deal");
                    self.state.waiting.insert(&piece);
                    requested += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not request new deal from spade");
                    break;
                }
            }
        }
        requested
    }
}
