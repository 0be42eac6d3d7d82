//! In-memory bookkeeping shared by the reconcile loop and the per-deal tasks.
//!
//! Every registry has its own lock, held only for the map operation itself. Locks are never held
//! across an `.await`. The only nested acquisition is active -> imported.

use crate::deals::types::Proposal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("deal registry lock poisoned; continuing with recovered state");
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyActive,
    AlreadyImported,
    OverCapacity { active: usize, max_active: usize },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyActive => write!(f, "already being handled"),
            Self::AlreadyImported => write!(f, "already imported"),
            Self::OverCapacity { active, max_active } => {
                write!(f, "{active} deals active, limit is {max_active}")
            }
        }
    }
}

/// Set of piece CIDs (used for the waiting-for-proposal set).
#[derive(Debug, Default)]
pub struct PieceSet {
    inner: Mutex<HashSet<String>>,
}

impl PieceSet {
    pub fn insert(&self, piece_cid: &str) -> bool {
        lock(&self.inner).insert(piece_cid.to_string())
    }

    pub fn remove(&self, piece_cid: &str) -> bool {
        lock(&self.inner).remove(piece_cid)
    }

    pub fn contains(&self, piece_cid: &str) -> bool {
        lock(&self.inner).contains(piece_cid)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proposal IDs imported during this process lifetime.
#[derive(Debug, Default)]
pub struct ImportedSet {
    inner: Mutex<HashSet<String>>,
}

impl ImportedSet {
    pub fn contains(&self, proposal_id: &str) -> bool {
        lock(&self.inner).contains(proposal_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, proposal_id: &str) -> bool {
        lock(&self.inner).insert(proposal_id.to_string())
    }
}

/// Piece CID -> the Boost deal it duplicated. Append-only.
#[derive(Debug, Default)]
pub struct DuplicateMap {
    inner: Mutex<HashMap<String, String>>,
}

impl DuplicateMap {
    /// Records the mapping unless the piece is already known. Returns true if it was recorded.
    pub fn insert_if_absent(&self, piece_cid: &str, deal_id: &str) -> bool {
        let mut map = lock(&self.inner);
        if map.contains_key(piece_cid) {
            return false;
        }
        map.insert(piece_cid.to_string(), deal_id.to_string());
        true
    }

    pub fn get(&self, piece_cid: &str) -> Option<String> {
        lock(&self.inner).get(piece_cid).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Piece CID -> last failure message we reported for it.
#[derive(Debug, Default)]
pub struct FailureMemo {
    inner: Mutex<HashMap<String, String>>,
}

impl FailureMemo {
    /// Returns true if this is the first failure recorded for the piece.
    pub fn record_if_new(&self, piece_cid: &str, message: &str) -> bool {
        let mut map = lock(&self.inner);
        if map.contains_key(piece_cid) {
            return false;
        }
        map.insert(piece_cid.to_string(), message.to_string());
        true
    }

    pub fn contains(&self, piece_cid: &str) -> bool {
        lock(&self.inner).contains_key(piece_cid)
    }

    pub fn get(&self, piece_cid: &str) -> Option<String> {
        lock(&self.inner).get(piece_cid).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proposal ID -> proposal for every deal a task is currently handling.
#[derive(Debug, Default)]
pub struct ActiveDeals {
    inner: Mutex<HashMap<String, Proposal>>,
}

impl ActiveDeals {
    pub fn contains(&self, proposal_id: &str) -> bool {
        lock(&self.inner).contains_key(proposal_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.inner).keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub active: usize,
    pub waiting: usize,
    pub duplicates: usize,
    pub imported: usize,
    pub failures: usize,
}

#[derive(Debug, Default)]
pub struct Registries {
    pub active: ActiveDeals,
    pub waiting: PieceSet,
    pub duplicates: DuplicateMap,
    pub imported: ImportedSet,
    pub failures: FailureMemo,
}

impl Registries {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Active deals plus reservations still waiting for their proposal.
    pub fn inflight(&self) -> usize {
        self.active.len() + self.waiting.len()
    }

    pub fn counts(&self) -> RegistryCounts {
        RegistryCounts {
            active: self.active.len(),
            waiting: self.waiting.len(),
            duplicates: self.duplicates.len(),
            imported: self.imported.len(),
            failures: self.failures.len(),
        }
    }

    /// Entry guard for a deal task.
    ///
    /// Checked and inserted under the active lock, so two tasks racing for the same proposal
    /// cannot both be admitted.
    pub fn try_admit(
        self: &Arc<Self>,
        proposal: &Proposal,
        max_active: usize,
    ) -> Result<ActiveDealGuard, RejectReason> {
        let mut active = lock(&self.active.inner);
        if active.contains_key(&proposal.proposal_id) {
            return Err(RejectReason::AlreadyActive);
        }
        if self.imported.contains(&proposal.proposal_id) {
            return Err(RejectReason::AlreadyImported);
        }
        if active.len() > max_active {
            return Err(RejectReason::OverCapacity {
                active: active.len(),
                max_active,
            });
        }
        active.insert(proposal.proposal_id.clone(), proposal.clone());
        Ok(ActiveDealGuard {
            registries: Arc::clone(self),
            proposal_id: proposal.proposal_id.clone(),
            released: false,
        })
    }
}

/// Ownership of one active deal entry.
///
/// The entry is removed exactly once: by `complete` on success, or on drop for every other exit.
#[derive(Debug)]
pub struct ActiveDealGuard {
    registries: Arc<Registries>,
    proposal_id: String,
    released: bool,
}

impl ActiveDealGuard {
    pub fn proposal_id(&self) -> &str {
        &self.proposal_id
    }

    /// Moves the proposal from active to imported in one critical section.
    pub fn complete(mut self) {
        let mut active = lock(&self.registries.active.inner);
        self.registries.imported.insert(&self.proposal_id);
        if active.remove(&self.proposal_id).is_none() {
            tracing::error!(proposal = %self.proposal_id, "active deal entry vanished before completion");
        }
        self.released = true;
    }
}

impl Drop for ActiveDealGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if lock(&self.registries.active.inner)
            .remove(&self.proposal_id)
            .is_none()
        {
            tracing::error!(proposal = %self.proposal_id, "active deal entry vanished before release");
        }
    }
}
