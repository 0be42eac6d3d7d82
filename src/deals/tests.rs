use super::*;
use crate::rpc::{ClientError, ClientResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

const DUP_DEAL: &str = "5f0c2a1e-9b3d-4c7a-8e21-0a1b2c3d4e5f";

fn proposal(id: &str, piece: &str) -> Proposal {
    Proposal {
        proposal_id: id.to_string(),
        piece_cid: piece.to_string(),
        piece_size: 34_359_738_368,
        hours_remaining: 72,
        sources: vec![format!("https://data.example/{piece}.car")],
        tenant_id: Some(1),
        tenant_client: Some("f01234".to_string()),
        start_epoch: None,
        start_time: None,
    }
}

fn failure(piece: &str, error: &str) -> FailureRecord {
    FailureRecord {
        piece_cid: piece.to_string(),
        proposal_id: None,
        error: error.to_string(),
        timestamp: None,
    }
}

fn open_deal(id: &str, piece: &str) -> OpenDeal {
    OpenDeal {
        id: id.to_string(),
        piece_cid: piece.to_string(),
        checkpoint: "Accepted".to_string(),
        is_offline: true,
        created_at: None,
        err: String::new(),
        message: String::new(),
    }
}

#[derive(Default)]
struct FakeSource {
    /// `None` makes `fetch_pending` fail.
    pending: Mutex<Option<PendingSnapshot>>,
    /// Pieces handed out by `request_new_proposal`; an empty queue means no eligible pieces.
    pieces: Mutex<VecDeque<String>>,
    manifest: Mutex<Option<PieceManifest>>,
    marked: Mutex<Vec<String>>,
    request_calls: AtomicUsize,
    manifest_calls: AtomicUsize,
}

#[async_trait]
impl ProposalSource for FakeSource {
    async fn fetch_pending(&self) -> ClientResult<PendingSnapshot> {
        self.pending
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::rejected("pending", "spade is down"))
    }

    async fn request_new_proposal(&self) -> ClientResult<String> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        self.pieces
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::rejected("reserve_piece", "no eligible pieces"))
    }

    fn mark_piece_already_requested(&self, piece_cid: &str) {
        self.marked.lock().unwrap().push(piece_cid.to_string());
    }

    async fn fetch_manifest(&self, _proposal_id: &str) -> ClientResult<PieceManifest> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        self.manifest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::rejected("manifest", "not found"))
    }
}

struct FakeRegistry {
    /// `None` makes `list_open_deals` fail.
    deals: Mutex<Option<Vec<OpenDeal>>>,
    accept_imports: Mutex<bool>,
    imports: Mutex<Vec<(String, PathBuf)>>,
    cancels: Mutex<Vec<String>>,
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self {
            deals: Mutex::new(Some(Vec::new())),
            accept_imports: Mutex::new(true),
            imports: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DealRegistry for FakeRegistry {
    async fn list_open_deals(&self) -> ClientResult<Vec<OpenDeal>> {
        self.deals
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::rejected("deals", "graphql down"))
    }

    async fn import_deal(&self, proposal_id: &str, local_path: &Path) -> ClientResult<ImportOutcome> {
        self.imports
            .lock()
            .unwrap()
            .push((proposal_id.to_string(), local_path.to_path_buf()));
        let accepted = *self.accept_imports.lock().unwrap();
        Ok(ImportOutcome {
            accepted,
            reason: if accepted {
                String::new()
            } else {
                "deal not in accepted state".to_string()
            },
        })
    }

    async fn cancel_deal(&self, deal_id: &str) -> ClientResult<()> {
        self.cancels.lock().unwrap().push(deal_id.to_string());
        Ok(())
    }
}

struct FakeTransfers {
    failures_left: AtomicU32,
    start_calls: AtomicUsize,
    attach: Mutex<bool>,
    /// States returned by successive polls; the last one repeats.
    states: Mutex<VecDeque<TransferState>>,
    out_names: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    /// Polls fail the way aria2 does after forgetting a GID.
    lost: Mutex<bool>,
}

impl Default for FakeTransfers {
    fn default() -> Self {
        Self {
            failures_left: AtomicU32::new(0),
            start_calls: AtomicUsize::new(0),
            attach: Mutex::new(false),
            states: Mutex::new(VecDeque::from([TransferState::Complete])),
            out_names: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            lost: Mutex::new(false),
        }
    }
}

impl FakeTransfers {
    fn set_states(&self, states: impl IntoIterator<Item = TransferState>) {
        *self.states.lock().unwrap() = states.into_iter().collect();
    }
}

#[async_trait]
impl TransferManager for FakeTransfers {
    async fn start_or_attach(
        &self,
        _source_uris: &[String],
        out_name: &str,
    ) -> ClientResult<TransferHandle> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ClientError::Status {
                op: "aria2.addUri".to_string(),
                status: 503,
                body: String::new(),
            });
        }
        self.out_names.lock().unwrap().push(out_name.to_string());
        Ok(TransferHandle {
            id: format!("gid-{out_name}"),
            attached: *self.attach.lock().unwrap(),
        })
    }

    async fn poll(&self, transfer_id: &str) -> ClientResult<TransferStatus> {
        if *self.lost.lock().unwrap() {
            return Err(ClientError::Rpc {
                op: "aria2.tellStatus".to_string(),
                code: 1,
                message: format!("GID {transfer_id} is not found"),
            });
        }
        let state = {
            let mut states = self.states.lock().unwrap();
            if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states.front().cloned().unwrap_or(TransferState::Active)
            }
        };
        let out = transfer_id.trim_start_matches("gid-");
        Ok(TransferStatus {
            id: transfer_id.to_string(),
            error_message: (state == TransferState::Error).then(|| "connection reset".to_string()),
            state,
            completed_length: 50,
            total_length: 100,
            download_speed: 10,
            output_path: Some(PathBuf::from(format!("/downloads/{out}"))),
        })
    }

    async fn remove(&self, transfer_id: &str) -> ClientResult<()> {
        self.removed.lock().unwrap().push(transfer_id.to_string());
        Ok(())
    }
}

struct Harness {
    engine: Arc<DealEngine>,
    source: Arc<FakeSource>,
    registry: Arc<FakeRegistry>,
    transfers: Arc<FakeTransfers>,
}

fn harness(max_active: usize) -> Harness {
    let source = Arc::new(FakeSource::default());
    let registry = Arc::new(FakeRegistry::default());
    let transfers = Arc::new(FakeTransfers::default());
    let engine = DealEngine::new(
        EngineConfig {
            max_active,
            ..EngineConfig::default()
        },
        source.clone(),
        registry.clone(),
        transfers.clone(),
    );
    Harness {
        engine,
        source,
        registry,
        transfers,
    }
}

impl Harness {
    fn set_pending(&self, proposals: Vec<Proposal>, failures: Vec<FailureRecord>) {
        *self.source.pending.lock().unwrap() = Some(PendingSnapshot {
            proposals,
            failures,
        });
    }

    fn offer_pieces(&self, pieces: &[&str]) {
        self.source
            .pieces
            .lock()
            .unwrap()
            .extend(pieces.iter().map(|p| p.to_string()));
    }

    async fn tick(&self, cancel: &CancellationToken) -> Vec<DealOutcome> {
        let report = self.engine.run_tick(cancel).await;
        for t in report.cancel_tasks {
            t.await.expect("cancel task");
        }
        let mut outcomes = Vec::new();
        for t in report.deal_tasks {
            outcomes.push(t.await.expect("deal task"));
        }
        outcomes
    }
}

#[tokio::test]
async fn empty_queue_requests_up_to_the_limit() {
    let h = harness(2);
    h.set_pending(vec![], vec![]);
    h.offer_pieces(&["piece-a", "piece-b", "piece-c"]);

    let report = h.engine.run_tick(&CancellationToken::new()).await;

    assert_eq!(report.requested, 2);
    assert_eq!(h.source.request_calls.load(Ordering::SeqCst), 2);
    let waiting = &h.engine.registries().waiting;
    assert_eq!(waiting.len(), 2);
    assert!(waiting.contains("piece-a"));
    assert!(waiting.contains("piece-b"));
}

#[tokio::test]
async fn admission_stops_at_first_request_failure() {
    let h = harness(5);
    h.set_pending(vec![], vec![]);
    h.offer_pieces(&["piece-a"]);

    let report = h.engine.run_tick(&CancellationToken::new()).await;

    assert_eq!(report.requested, 1);
    // One success, then one failure, then nothing more this tick.
    assert_eq!(h.source.request_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.engine.registries().waiting.len(), 1);
}

#[tokio::test]
async fn no_requests_when_waiting_fills_the_cap() {
    let h = harness(2);
    h.set_pending(vec![], vec![]);
    h.offer_pieces(&["piece-a", "piece-b", "piece-c", "piece-d"]);
    let cancel = CancellationToken::new();

    h.engine.run_tick(&cancel).await;
    let report = h.engine.run_tick(&cancel).await;

    assert_eq!(report.requested, 0);
    assert_eq!(h.source.request_calls.load(Ordering::SeqCst), 2);
    assert!(h.engine.registries().inflight() <= 2);
}

#[tokio::test]
async fn fetch_failure_skips_the_rest_of_the_tick() {
    let h = harness(2);
    h.offer_pieces(&["piece-a"]);

    let report = h.engine.run_tick(&CancellationToken::new()).await;

    assert!(report.skipped);
    assert_eq!(h.source.request_calls.load(Ordering::SeqCst), 0);
    assert!(h.engine.registries().waiting.is_empty());
}

#[tokio::test]
async fn open_deal_failure_skips_matching_and_admission() {
    let h = harness(2);
    h.set_pending(vec![proposal("p1", "piece-1")], vec![]);
    *h.registry.deals.lock().unwrap() = None;
    h.offer_pieces(&["piece-a"]);

    let report = h.engine.run_tick(&CancellationToken::new()).await;

    assert!(report.skipped);
    assert_eq!(report.matched, 0);
    assert_eq!(h.source.request_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_failure_cancels_exactly_once_across_ticks() {
    let h = harness(0);
    h.engine.registries().waiting.insert("piece-dup");
    h.set_pending(
        vec![],
        vec![failure(
            "piece-dup",
            &format!("deal proposal is identical to deal {DUP_DEAL}"),
        )],
    );
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        h.tick(&cancel).await;
    }

    assert_eq!(*h.registry.cancels.lock().unwrap(), vec![DUP_DEAL.to_string()]);
    let regs = h.engine.registries();
    assert_eq!(regs.duplicates.len(), 1);
    assert_eq!(regs.duplicates.get("piece-dup").as_deref(), Some(DUP_DEAL));
    assert!(!regs.waiting.contains("piece-dup"));
    assert_eq!(*h.source.marked.lock().unwrap(), vec!["piece-dup".to_string()]);
    // Duplicates are not failures.
    assert!(regs.failures.is_empty());
}

#[tokio::test]
async fn repeated_failure_is_memoized_once() {
    let h = harness(0);
    h.engine.registries().waiting.insert("piece-x");
    h.set_pending(vec![], vec![failure("piece-x", "provider rejected the deal")]);
    let cancel = CancellationToken::new();

    let first = h.engine.run_tick(&cancel).await;
    let second = h.engine.run_tick(&cancel).await;

    assert_eq!(first.newly_failed, 1);
    assert_eq!(second.newly_failed, 0);
    let regs = h.engine.registries();
    assert_eq!(regs.failures.len(), 1);
    assert_eq!(
        regs.failures.get("piece-x").as_deref(),
        Some("provider rejected the deal")
    );
    assert!(!regs.waiting.contains("piece-x"));
}

#[tokio::test]
async fn transient_remote_failure_is_not_memoized() {
    let h = harness(0);
    h.engine.registries().waiting.insert("piece-php");
    h.set_pending(
        vec![],
        vec![failure("piece-php", "PHP Fatal error: Uncaught exception")],
    );

    let report = h.engine.run_tick(&CancellationToken::new()).await;

    assert_eq!(report.newly_failed, 0);
    let regs = h.engine.registries();
    assert!(regs.failures.is_empty());
    assert!(!regs.waiting.contains("piece-php"));
}

#[tokio::test]
async fn not_yet_sealable_marks_piece_requested() {
    let h = harness(0);
    h.set_pending(
        vec![],
        vec![failure("piece-late", "cannot seal a sector before 4000000")],
    );

    h.engine.run_tick(&CancellationToken::new()).await;

    assert_eq!(*h.source.marked.lock().unwrap(), vec!["piece-late".to_string()]);
    assert!(h.engine.registries().failures.contains("piece-late"));
    assert!(h.registry.cancels.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn matched_proposal_is_downloaded_and_imported() {
    let h = harness(2);
    h.engine.registries().waiting.insert("piece-1");
    h.set_pending(
        vec![proposal("p1", "piece-1"), proposal("p2", "piece-2")],
        vec![],
    );
    *h.registry.deals.lock().unwrap() = Some(vec![open_deal("p1", "piece-1"), open_deal("zz", "piece-z")]);
    h.transfers.set_states([TransferState::Active, TransferState::Complete]);

    let outcomes = h.tick(&CancellationToken::new()).await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_completed());
    let regs = h.engine.registries();
    assert!(!regs.waiting.contains("piece-1"));
    assert!(regs.active.is_empty());
    assert!(regs.imported.contains("p1"));
    assert_eq!(
        *h.registry.imports.lock().unwrap(),
        vec![("p1".to_string(), PathBuf::from("/downloads/piece-1.car"))]
    );
    assert_eq!(*h.transfers.removed.lock().unwrap(), vec!["gid-piece-1.car".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn imported_proposal_is_not_handled_again() {
    let h = harness(2);
    h.set_pending(vec![proposal("p1", "piece-1")], vec![]);
    *h.registry.deals.lock().unwrap() = Some(vec![open_deal("p1", "piece-1")]);
    let cancel = CancellationToken::new();

    let first = h.tick(&cancel).await;
    let second = h.engine.run_tick(&cancel).await;

    assert!(first[0].is_completed());
    assert_eq!(second.rejected, 1);
    assert!(second.deal_tasks.is_empty());
    assert_eq!(h.registry.imports.lock().unwrap().len(), 1);
    assert_eq!(h.transfers.start_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn matched_deals_count_against_the_cap_in_the_same_tick() {
    let h = harness(2);
    let regs = h.engine.registries().clone();
    regs.waiting.insert("piece-1");
    regs.waiting.insert("piece-2");
    h.set_pending(
        vec![proposal("p1", "piece-1"), proposal("p2", "piece-2")],
        vec![],
    );
    *h.registry.deals.lock().unwrap() =
        Some(vec![open_deal("p1", "piece-1"), open_deal("p2", "piece-2")]);
    h.transfers.set_states([TransferState::Active]);
    h.offer_pieces(&["piece-3", "piece-4"]);
    let cancel = CancellationToken::new();

    let report = h.engine.run_tick(&cancel).await;

    assert_eq!(report.matched, 2);
    assert_eq!(report.requested, 0);
    assert_eq!(h.source.request_calls.load(Ordering::SeqCst), 0);
    assert_eq!(regs.active.len(), 2);
    assert!(regs.waiting.is_empty());
    // Let the deal tasks start their downloads.
    while h.transfers.start_calls.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    assert!(regs.inflight() <= 2);

    cancel.cancel();
    for task in report.deal_tasks {
        let outcome = task.await.expect("deal task");
        assert!(matches!(outcome, DealOutcome::Failed(DealError::Cancelled)));
    }
    assert!(regs.active.is_empty());
}

#[tokio::test]
async fn over_capacity_match_is_not_spawned() {
    let h = harness(1);
    let regs = h.engine.registries().clone();
    let _a = regs.try_admit(&proposal("a", "piece-a"), 1).expect("a");
    let _b = regs.try_admit(&proposal("b", "piece-b"), 1).expect("b");
    regs.waiting.insert("piece-3");
    h.set_pending(vec![proposal("p3", "piece-3")], vec![]);
    *h.registry.deals.lock().unwrap() = Some(vec![open_deal("p3", "piece-3")]);
    h.offer_pieces(&["piece-4"]);

    let report = h.engine.run_tick(&CancellationToken::new()).await;

    assert_eq!(report.matched, 0);
    assert_eq!(report.rejected, 1);
    assert!(report.deal_tasks.is_empty());
    assert_eq!(report.requested, 0);
    assert_eq!(regs.active.len(), 2);
    assert!(!regs.active.contains("p3"));
    assert_eq!(regs.inflight(), 2);
    assert_eq!(h.transfers.start_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn in_flight_proposal_is_admitted_once() {
    let h = harness(2);
    let p = proposal("p1", "piece-1");
    h.transfers.set_states([TransferState::Active]);
    let cancel = CancellationToken::new();

    let first = h.engine.spawn_deal(p.clone(), cancel.child_token());
    // Let the first task pass its entry guard.
    while !h.engine.registries().active.contains("p1") {
        tokio::task::yield_now().await;
    }
    let second = h.engine.handle_deal(p, cancel.child_token()).await;
    assert!(matches!(second, DealOutcome::Rejected(RejectReason::AlreadyActive)));
    assert_eq!(h.engine.registries().active.len(), 1);

    cancel.cancel();
    let outcome = first.await.expect("deal task");
    assert!(matches!(outcome, DealOutcome::Failed(DealError::Cancelled)));
    assert!(h.engine.registries().active.is_empty());
    assert!(!h.engine.registries().imported.contains("p1"));
}

#[tokio::test(start_paused = true)]
async fn acquisition_gives_up_after_retry_budget() {
    let h = harness(2);
    h.transfers.failures_left.store(u32::MAX, Ordering::SeqCst);
    let started = tokio::time::Instant::now();

    let outcome = h
        .engine
        .handle_deal(proposal("p1", "piece-1"), CancellationToken::new())
        .await;

    match outcome {
        DealOutcome::Failed(DealError::AcquireExhausted { attempts, .. }) => assert_eq!(attempts, 11),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.transfers.start_calls.load(Ordering::SeqCst), 11);
    // Linear backoff: 10s * (1 + 2 + ... + 10).
    assert!(started.elapsed() >= Duration::from_secs(550));
    let regs = h.engine.registries();
    assert!(regs.active.is_empty());
    assert!(regs.imported.is_empty());
}

#[tokio::test(start_paused = true)]
async fn acquisition_recovers_after_transient_failures() {
    let h = harness(2);
    h.transfers.failures_left.store(3, Ordering::SeqCst);

    let outcome = h
        .engine
        .handle_deal(proposal("p1", "piece-1"), CancellationToken::new())
        .await;

    assert!(outcome.is_completed());
    assert_eq!(h.transfers.start_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_releases_the_entry() {
    let h = harness(2);
    h.transfers.failures_left.store(u32::MAX, Ordering::SeqCst);
    let cancel = CancellationToken::new();

    let task = h.engine.spawn_deal(proposal("p1", "piece-1"), cancel.clone());
    while h.transfers.start_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let outcome = task.await.expect("deal task");
    assert!(matches!(outcome, DealOutcome::Failed(DealError::Cancelled)));
    assert!(h.engine.registries().active.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transfer_error_removes_download_and_fails() {
    let h = harness(2);
    h.transfers.set_states([TransferState::Active, TransferState::Error]);

    let outcome = h
        .engine
        .handle_deal(proposal("p1", "piece-1"), CancellationToken::new())
        .await;

    match outcome {
        DealOutcome::Failed(DealError::TransferFailed { message, .. }) => {
            assert_eq!(message.as_deref(), Some("connection reset"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(*h.transfers.removed.lock().unwrap(), vec!["gid-piece-1.car".to_string()]);
    assert!(h.registry.imports.lock().unwrap().is_empty());
    assert!(h.engine.registries().active.is_empty());
}

#[tokio::test(start_paused = true)]
async fn forgotten_download_fails_the_deal() {
    let h = harness(2);
    *h.transfers.lost.lock().unwrap() = true;

    let outcome = h
        .engine
        .handle_deal(proposal("p1", "piece-1"), CancellationToken::new())
        .await;

    match outcome {
        DealOutcome::Failed(DealError::TransferFailed { transfer_id, message }) => {
            assert_eq!(transfer_id, "gid-piece-1.car");
            assert!(message.unwrap_or_default().contains("is not found"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.registry.imports.lock().unwrap().is_empty());
    assert!(h.engine.registries().active.is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_import_fails_without_marking_imported() {
    let h = harness(2);
    *h.registry.accept_imports.lock().unwrap() = false;

    let outcome = h
        .engine
        .handle_deal(proposal("p1", "piece-1"), CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        DealOutcome::Failed(DealError::ImportRejected { .. })
    ));
    let regs = h.engine.registries();
    assert!(regs.active.is_empty());
    assert!(regs.imported.is_empty());
    // The finished download stays so a re-offer can attach to it.
    assert!(h.transfers.removed.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn proposal_without_sources_uses_manifest() {
    let h = harness(2);
    *h.source.manifest.lock().unwrap() = Some(PieceManifest {
        piece_cid: Some("piece-1".to_string()),
        segments: vec![ManifestSegment {
            piece_cid: "piece-1".to_string(),
            sources: vec!["https://mirror.example/seg/piece-1.car".to_string()],
        }],
    });
    let mut p = proposal("p1", "piece-1");
    p.sources.clear();

    let outcome = h.engine.handle_deal(p, CancellationToken::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(h.source.manifest_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*h.transfers.out_names.lock().unwrap(), vec!["piece-1.car".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn no_sources_fails_immediately() {
    let h = harness(2);
    *h.source.manifest.lock().unwrap() = Some(PieceManifest::default());
    let mut p = proposal("p1", "piece-1");
    p.sources.clear();

    let outcome = h.engine.handle_deal(p, CancellationToken::new()).await;

    assert!(matches!(outcome, DealOutcome::Failed(DealError::NoSources)));
    assert_eq!(h.transfers.start_calls.load(Ordering::SeqCst), 0);
    assert!(h.engine.registries().active.is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_stops_when_cancelled() {
    let h = harness(1);
    h.set_pending(vec![], vec![]);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(h.engine.clone().run(cancel.clone()));
    while h.source.request_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();
    task.await.expect("run task");
}
