use crate::deals::{TransferState, TransferStatus};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// Keys requested from `tellStatus` and the `tell*` listings.
pub const STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "errorCode",
    "errorMessage",
    "dir",
    "files",
];

/// aria2 sends every number as a decimal string.
fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) if s.is_empty() => Ok(0),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UriEntry {
    pub uri: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub uris: Vec<UriEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub gid: String,
    pub status: String,
    #[serde(default, deserialize_with = "de_u64")]
    pub total_length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub completed_length: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub download_speed: u64,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl DownloadStatus {
    pub fn has_uri(&self, uri: &str) -> bool {
        self.files
            .iter()
            .flat_map(|f| f.uris.iter())
            .any(|u| u.uri == uri)
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.files
            .first()
            .map(|f| f.path.as_str())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

impl From<DownloadStatus> for TransferStatus {
    fn from(s: DownloadStatus) -> Self {
        let output_path = s.output_path();
        let error_message = s
            .error_message
            .filter(|m| !m.is_empty())
            .or_else(|| s.error_code.filter(|c| c != "0").map(|c| format!("aria2 error code {c}")));
        Self {
            id: s.gid,
            state: TransferState::parse(&s.status),
            completed_length: s.completed_length,
            total_length: s.total_length,
            download_speed: s.download_speed,
            output_path,
            error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}
