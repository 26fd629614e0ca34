//! Holding area for files that fail inspection

use super::IngestError;
use crate::config::QuarantinePolicy;
use crate::fs::move_without_overwrite;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineOutcome {
    Moved(PathBuf),
    Deleted,
}

impl QuarantineOutcome {
    pub fn destination(&self) -> Option<&Path> {
        match self {
            QuarantineOutcome::Moved(path) => Some(path),
            QuarantineOutcome::Deleted => None,
        }
    }
}

/// Move `path` into `quarantine_dir`, or delete it when the policy says so
///
/// Moved files keep their name unless it collides, in which case a timestamp
/// suffix is added. On failure the file stays where it was.
pub fn quarantine_file(
    path: &Path,
    quarantine_dir: &Path,
    policy: QuarantinePolicy,
) -> Result<QuarantineOutcome, IngestError> {
    match policy {
        QuarantinePolicy::Delete => {
            std::fs::remove_file(path).map_err(|e| {
                IngestError::filesystem(format!("cannot delete {}: {e}", path.display()))
            })?;
            warn!(path = %path.display(), "Deleted corrupt file");
            Ok(QuarantineOutcome::Deleted)
        },
        QuarantinePolicy::Move => {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    IngestError::filesystem(format!("{} has no file name", path.display()))
                })?;

            std::fs::create_dir_all(quarantine_dir).map_err(|e| {
                IngestError::filesystem(format!(
                    "cannot create quarantine directory {}: {e}",
                    quarantine_dir.display()
                ))
            })?;

            let destination = move_without_overwrite(path, quarantine_dir, &file_name).map_err(|e| {
                IngestError::filesystem(format!(
                    "cannot move {} into {}: {e}",
                    path.display(),
                    quarantine_dir.display()
                ))
            })?;

            info!(from = %path.display(), to = %destination.display(), "Quarantined file");
            Ok(QuarantineOutcome::Moved(destination))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_move_keeps_name_and_avoids_collision() {
        let source = tempfile::tempdir().unwrap();
        let quarantine = tempfile::tempdir().unwrap();
        let dir = quarantine.path().join("bad");

        let first = source.path().join("IMG_9.jpg");
        std::fs::write(&first, b"not a jpeg").unwrap();
        let outcome = quarantine_file(&first, &dir, QuarantinePolicy::Move).unwrap();
        assert_eq!(outcome, QuarantineOutcome::Moved(dir.join("IMG_9.jpg")));
        assert!(!first.exists());

        std::fs::write(&first, b"also not a jpeg").unwrap();
        let outcome = quarantine_file(&first, &dir, QuarantinePolicy::Move).unwrap();
        let moved = outcome.destination().unwrap();
        assert_ne!(moved, dir.join("IMG_9.jpg"));
        assert_eq!(std::fs::read(moved).unwrap(), b"also not a jpeg");
    }

    #[test]
    fn test_delete_policy() {
        let source = tempfile::tempdir().unwrap();
        let path = source.path().join("junk.jpg");
        std::fs::write(&path, b"junk").unwrap();

        let outcome = quarantine_file(&path, Path::new("/unused"), QuarantinePolicy::Delete).unwrap();
        assert_eq!(outcome, QuarantineOutcome::Deleted);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = quarantine_file(&dir.path().join("gone.jpg"), dir.path(), QuarantinePolicy::Move)
            .unwrap_err();
        assert_eq!(err.kind(), "filesystem");
    }
}
