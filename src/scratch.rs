//! Scratch files scoped to the stage that produced them

use std::path::{Path, PathBuf};

/// Owns a temporary path and removes it when dropped, unless persisted
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    keep: bool,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release ownership; the file survives the guard
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.keep || self.path.as_os_str().is_empty() {
            return;
        }
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::debug!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_removes_file() {
        let path = std::env::temp_dir().join("storycast_scratch_drop.tmp");
        std::fs::write(&path, b"x").unwrap();
        {
            let _guard = ScratchFile::new(&path);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_keeps_file() {
        let path = std::env::temp_dir().join("storycast_scratch_keep.tmp");
        std::fs::write(&path, b"x").unwrap();
        let kept = ScratchFile::new(&path).persist();
        assert_eq!(kept, path);
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_fine() {
        let path = std::env::temp_dir().join("storycast_scratch_never_created.tmp");
        drop(ScratchFile::new(&path));
        assert!(!path.exists());
    }
}
