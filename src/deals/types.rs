use std::path::PathBuf;

/// A deal offered by Spade that we may download and import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub proposal_id: String,
    pub piece_cid: String,
    pub piece_size: u64,
    pub hours_remaining: i64,
    /// Candidate download locations. May be empty, in which case the piece manifest is consulted.
    pub sources: Vec<String>,
    pub tenant_id: Option<i16>,
    pub tenant_client: Option<String>,
    pub start_epoch: Option<i64>,
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub piece_cid: String,
    pub proposal_id: Option<String>,
    pub error: String,
    pub timestamp: Option<String>,
}

/// One poll of the proposal source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub proposals: Vec<Proposal>,
    pub failures: Vec<FailureRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSegment {
    pub piece_cid: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceManifest {
    pub piece_cid: Option<String>,
    pub segments: Vec<ManifestSegment>,
}

impl PieceManifest {
    /// Sources of a manifest that describes the whole piece as one segment.
    ///
    /// Multi-segment aggregates need assembly, which is the download manager's job and not ours.
    pub fn whole_piece_sources(&self) -> Option<&[String]> {
        match self.segments.as_slice() {
            [only] => Some(only.sources.as_slice()),
            _ => None,
        }
    }
}

/// A deal as tracked by the storage-deal registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDeal {
    pub id: String,
    pub piece_cid: String,
    pub checkpoint: String,
    pub is_offline: bool,
    pub created_at: Option<String>,
    pub err: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub accepted: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    pub id: String,
    /// True when an existing transfer for one of the sources was reused.
    pub attached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Active,
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
    Unknown(String),
}

impl TransferState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "waiting" => Self::Waiting,
            "paused" => Self::Paused,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "removed" => Self::Removed,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Removed => "removed",
            Self::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub id: String,
    pub state: TransferState,
    pub completed_length: u64,
    pub total_length: u64,
    pub download_speed: u64,
    pub output_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

impl TransferStatus {
    pub fn progress_pct(&self) -> f64 {
        if self.total_length == 0 {
            return 0.0;
        }
        (self.completed_length as f64 / self.total_length as f64) * 100.0
    }
}
