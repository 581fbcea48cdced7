use crate::error::DiagError;
use log::warn;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Free-space statistics, LittleFS-style: (total_bytes, used_bytes).
pub type SpaceStats = (u64, u64);

/// Persistence collaborator: a flat namespace of small named blobs.
///
/// Implementations must make `write` atomic from the reader's perspective;
/// a reader never observes a partially written blob as the current content.
pub trait Storage: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DiagError>;
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), DiagError>;
    fn remove(&self, name: &str);
    fn free_space(&self) -> Option<SpaceStats>;
}

/// Blob storage over a single directory with a configured byte quota.
///
/// The quota stands in for flash capacity so free-space statistics keep
/// their meaning on a host filesystem. Writes go to `<name>.tmp` and are
/// renamed over the target; power loss mid-write leaves the old blob intact.
pub struct DirStorage {
    root: PathBuf,
    quota_bytes: u64,
}

impl DirStorage {
    pub fn new(root: PathBuf, quota_bytes: u64) -> Result<Self, DiagError> {
        fs::create_dir_all(&root)?;
        Ok(Self { root, quota_bytes })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for DirStorage {
    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DiagError> {
        match fs::read(self.path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), DiagError> {
        let target = self.path(name);
        let tmp = self.path(&format!("{}.tmp", name));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn remove(&self, name: &str) {
        let path = self.path(name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    fn free_space(&self) -> Option<SpaceStats> {
        let entries = fs::read_dir(&self.root).ok()?;
        let used: u64 = entries
            .flatten()
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum();
        Some((self.quota_bytes, used.min(self.quota_bytes)))
    }
}
