use anyhow::Context as _;
use fs2::FileExt as _;
use std::{fs::OpenOptions, path::Path};

pub const LOCK_FILE_NAME: &str = ".spade-client.lock";

/// Held for the life of the process so two clients never request deals against one download dir.
#[derive(Debug)]
pub struct SingleInstanceLock {
    _file: std::fs::File,
    path: std::path::PathBuf,
}

impl SingleInstanceLock {
    /// Locks `<dir>/.spade-client.lock`.
    pub fn acquire_in(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::acquire(dir.as_ref().join(LOCK_FILE_NAME))
    }

    pub fn acquire(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        // Advisory lock; the OS drops it when the process dies.
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { _file: file, path }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(anyhow::anyhow!(
                "another spade-client appears to be running against this download path (lock held at {})",
                path.display()
            )),
            Err(e) => Err(anyhow::anyhow!(e))
                .with_context(|| format!("failed to lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
