//! Terminal fallback: copy into a local backup directory

use super::{
    copy_with_buffer, ProtocolKind, ProtocolTransfer, SessionHandle, TransferError,
    TransferSession, TransferStrategy,
};
use crate::fs::move_without_overwrite;
use photoferry_common::checksum::verify_same_content;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Copies files into `root`
///
/// Writes go to a hidden temporary name first and are renamed into place,
/// so a crash never leaves a half-written file under the final name. Existing
/// files are never overwritten.
pub struct LocalBackupSink {
    root: PathBuf,
}

impl LocalBackupSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn local_root(session: &TransferSession) -> Result<&Path, TransferError> {
    match &session.handle {
        SessionHandle::Local { root } => Ok(root),
        other => Err(TransferError::LocalIo(format!(
            "session handle {other:?} does not belong to the local backup sink"
        ))),
    }
}

impl ProtocolTransfer for LocalBackupSink {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::LocalBackup
    }

    fn connect(&self, _strategy: &TransferStrategy) -> Result<TransferSession, TransferError> {
        std::fs::create_dir_all(&self.root).map_err(|e| TransferError::from_local_io(&e))?;
        Ok(TransferSession::new(
            ProtocolKind::LocalBackup,
            SessionHandle::Local {
                root: self.root.clone(),
            },
        ))
    }

    /// Backups are flat; the remote layout does not apply here
    fn ensure_directory(
        &self,
        session: &mut TransferSession,
        remote_dir: &str,
    ) -> Result<(), TransferError> {
        let root = local_root(session)?;
        if !root.is_dir() {
            return Err(TransferError::Directory(format!(
                "backup directory {} is missing",
                root.display()
            )));
        }
        debug!(remote_dir, "Local backup ignores the remote directory");
        session.set_directory(remote_dir);
        Ok(())
    }

    fn upload(
        &self,
        session: &mut TransferSession,
        local_path: &Path,
        remote_name: &str,
        strategy: &TransferStrategy,
    ) -> Result<u64, TransferError> {
        let root = local_root(session)?;
        let temp = root.join(format!(".{remote_name}.{}.part", Uuid::new_v4().simple()));

        let copy = || -> std::io::Result<u64> {
            let source = File::open(local_path)?;
            let mut reader = BufReader::with_capacity(strategy.buffer_size.max(1), source);
            let mut target = File::create(&temp)?;
            let copied = copy_with_buffer(&mut reader, &mut target, strategy.buffer_size)?;
            target.sync_all()?;
            Ok(copied)
        };

        let copied = match copy() {
            Ok(copied) => copied,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(TransferError::from_local_io(&e));
            },
        };

        let destination = match move_without_overwrite(&temp, root, remote_name) {
            Ok(destination) => destination,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(TransferError::from_local_io(&e));
            },
        };

        if let Err(e) = verify_same_content(local_path, &destination) {
            let _ = std::fs::remove_file(&destination);
            return Err(TransferError::LocalIo(format!(
                "backup copy of {} failed verification: {e}",
                local_path.display()
            )));
        }

        info!(destination = %destination.display(), bytes = copied, "Stored local backup copy");
        Ok(copied)
    }

    fn disconnect(&self, _session: TransferSession) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_copy_round() {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let root = backup_dir.path().join("nested/backup");
        let source = source_dir.path().join("IMG_0001.jpg");
        std::fs::write(&source, b"\xFF\xD8\xFFbody\xFF\xD9").unwrap();

        let sink = LocalBackupSink::new(&root);
        let strategy = TransferStrategy::default_ladder().remove(2);
        let mut session = sink.connect(&strategy).unwrap();
        sink.ensure_directory(&mut session, "/photos").unwrap();

        let sent = sink.upload(&mut session, &source, "IMG_0001.jpg", &strategy).unwrap();
        assert_eq!(sent, 9);
        assert_eq!(std::fs::read(root.join("IMG_0001.jpg")).unwrap(), std::fs::read(&source).unwrap());

        // Second upload of the same name does not clobber the first
        sink.upload(&mut session, &source, "IMG_0001.jpg", &strategy).unwrap();
        sink.disconnect(session);

        let names: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".part")));
    }

    #[test]
    fn test_existing_backup_file_is_preserved() {
        let source_dir = tempfile::tempdir().unwrap();
        let backup_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("IMG_0002.jpg");
        std::fs::write(&source, b"\xFF\xD8\xFFnew\xFF\xD9").unwrap();
        let existing = backup_dir.path().join("IMG_0002.jpg");
        std::fs::write(&existing, b"older copy").unwrap();

        let sink = LocalBackupSink::new(backup_dir.path());
        let strategy = TransferStrategy::default_ladder().remove(0);
        let mut session = sink.connect(&strategy).unwrap();
        sink.upload(&mut session, &source, "IMG_0002.jpg", &strategy).unwrap();

        assert_eq!(std::fs::read(&existing).unwrap(), b"older copy");
        let copies = std::fs::read_dir(backup_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| std::fs::read(p).unwrap() == std::fs::read(&source).unwrap())
            .count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn test_missing_source_is_local_io() {
        let backup_dir = tempfile::tempdir().unwrap();
        let sink = LocalBackupSink::new(backup_dir.path());
        let strategy = TransferStrategy::default_ladder().remove(0);
        let mut session = sink.connect(&strategy).unwrap();

        let err = sink
            .upload(&mut session, Path::new("/nonexistent/photo.jpg"), "photo.jpg", &strategy)
            .unwrap_err();
        assert_eq!(err.kind(), "local_io");
    }
}
