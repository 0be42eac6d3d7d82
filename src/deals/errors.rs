use crate::rpc::ClientError;

/// Why a deal task gave up on its proposal.
#[derive(Debug)]
pub enum DealError {
    /// The proposal and its manifest offered nothing to download.
    NoSources,

    /// The manifest describes an aggregate of several segments.
    UnsupportedManifest { segments: usize },

    /// Every acquisition attempt failed.
    AcquireExhausted { attempts: u32, last: ClientError },

    /// The download manager reported the transfer as failed.
    TransferFailed {
        transfer_id: String,
        message: Option<String>,
    },

    /// The transfer completed but did not say where the file is.
    MissingOutputPath { transfer_id: String },

    /// Boost answered the import with `Accepted = false`.
    ImportRejected { reason: String },

    /// The import call itself failed.
    Import(ClientError),

    Cancelled,
}

impl DealError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for DealError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSources => write!(f, "no download sources offered"),
            Self::UnsupportedManifest { segments } => {
                write!(f, "manifest has {segments} segments; only whole-piece manifests are supported")
            }
            Self::AcquireExhausted { attempts, last } => {
                write!(f, "could not start download after {attempts} attempts: {last}")
            }
            Self::TransferFailed {
                transfer_id,
                message,
            } => match message {
                Some(msg) => write!(f, "download {transfer_id} failed: {msg}"),
                None => write!(f, "download {transfer_id} failed"),
            },
            Self::MissingOutputPath { transfer_id } => {
                write!(f, "download {transfer_id} completed without an output path")
            }
            Self::ImportRejected { reason } => write!(f, "boost did not accept import: {reason}"),
            Self::Import(source) => write!(f, "import failed: {source}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for DealError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AcquireExhausted { last, .. } => Some(last),
            Self::Import(source) => Some(source),
            _ => None,
        }
    }
}
