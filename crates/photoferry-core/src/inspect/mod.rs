//! Content-based integrity checks and extension repair
//!
//! A file is only worth uploading when it is a complete JPEG: it must start
//! with the SOI marker (`FF D8 FF`) and end with the EOI marker (`FF D9`).
//! Cameras frequently hand over files without an extension or with an
//! upper-case one; [`IntegrityInspector::repair_extension`] fixes those with a
//! single rename.

mod source_file;

pub use source_file::{ContentSignature, MediaKind, SourceFile, EOI_MARKER, SOI_MARKER};

use crate::config::{ExtensionCase, IntegrityConfig};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result of inspecting a file's content signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityVerdict {
    Valid,
    Empty,
    HeaderInvalid,
    FooterInvalid,
    /// Too short to classify, or unreadable
    Unknown,
}

impl IntegrityVerdict {
    /// Classify a content signature
    pub fn classify(signature: &ContentSignature) -> Self {
        if signature.len == 0 {
            return IntegrityVerdict::Empty;
        }
        match (signature.header, signature.footer) {
            (Some(header), Some(footer)) => {
                if header != SOI_MARKER {
                    IntegrityVerdict::HeaderInvalid
                } else if footer != EOI_MARKER {
                    IntegrityVerdict::FooterInvalid
                } else {
                    IntegrityVerdict::Valid
                }
            },
            _ => IntegrityVerdict::Unknown,
        }
    }

    /// Verdicts that route a file to quarantine
    pub fn is_corrupt(self) -> bool {
        matches!(
            self,
            IntegrityVerdict::Empty | IntegrityVerdict::HeaderInvalid | IntegrityVerdict::FooterInvalid
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityVerdict::Valid => "valid",
            IntegrityVerdict::Empty => "empty",
            IntegrityVerdict::HeaderInvalid => "header_invalid",
            IntegrityVerdict::FooterInvalid => "footer_invalid",
            IntegrityVerdict::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for IntegrityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local rename failures during extension repair
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("cannot rename to {}: target already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("permission denied renaming {}: {source}", .path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to rename {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Classifies candidate files and repairs their extensions
#[derive(Debug, Clone)]
pub struct IntegrityInspector {
    default_extension: String,
    extension_case: ExtensionCase,
}

impl Default for IntegrityInspector {
    fn default() -> Self {
        Self::new(&IntegrityConfig::default())
    }
}

impl IntegrityInspector {
    pub fn new(config: &IntegrityConfig) -> Self {
        Self {
            default_extension: config.default_extension.trim().trim_start_matches('.').to_string(),
            extension_case: config.extension_case,
        }
    }

    /// Extension appended to, or case-normalised on, repaired files
    pub fn canonical_extension(&self) -> String {
        match self.extension_case {
            ExtensionCase::Lower => self.default_extension.to_lowercase(),
            ExtensionCase::Upper => self.default_extension.to_uppercase(),
            ExtensionCase::Preserve => self.default_extension.clone(),
        }
    }

    /// Classify the file at `path`
    ///
    /// Never fails: an unreadable file is reported as [`IntegrityVerdict::Unknown`].
    pub fn inspect(&self, path: &Path) -> IntegrityVerdict {
        match ContentSignature::read(path) {
            Ok(signature) => IntegrityVerdict::classify(&signature),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read file signature");
                IntegrityVerdict::Unknown
            },
        }
    }

    /// Classify a sampled source file, storing its signature and media kind
    pub fn inspect_source(&self, file: &mut SourceFile) -> IntegrityVerdict {
        match ContentSignature::read(&file.path) {
            Ok(signature) => {
                file.media_kind = signature.media_kind();
                file.signature = Some(signature);
                IntegrityVerdict::classify(&signature)
            },
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "cannot read file signature");
                file.signature = None;
                file.media_kind = MediaKind::Unknown;
                IntegrityVerdict::Unknown
            },
        }
    }

    /// Name `path` should be renamed to, or `None` when it is fine as is
    ///
    /// - no extension and a `Valid` verdict (or `force_default`): append it
    /// - same extension in a different case: the canonical case
    /// - anything else: `None`
    pub fn plan_repair(&self, path: &Path, verdict: IntegrityVerdict, force_default: bool) -> Option<PathBuf> {
        let canonical = self.canonical_extension();

        match path.extension() {
            None => {
                if verdict != IntegrityVerdict::Valid && !force_default {
                    debug!(path = %path.display(), %verdict, "no extension, leaving name alone");
                    return None;
                }
                let mut name = path.as_os_str().to_os_string();
                name.push(".");
                name.push(&canonical);
                Some(PathBuf::from(name))
            },
            Some(ext) => {
                let ext = ext.to_str()?;
                if ext == canonical
                    || self.extension_case == ExtensionCase::Preserve
                    || !ext.eq_ignore_ascii_case(&canonical)
                {
                    return None;
                }
                Some(path.with_extension(&canonical))
            },
        }
    }

    /// Give `path` the canonical extension if its name needs it
    ///
    /// Returns the path the file now lives at. Performs at most one rename
    /// (see [`plan_repair`](Self::plan_repair)) and never deletes.
    pub fn repair_extension(
        &self,
        path: &Path,
        verdict: IntegrityVerdict,
        force_default: bool,
    ) -> Result<PathBuf, InspectError> {
        let Some(target) = self.plan_repair(path, verdict, force_default) else {
            return Ok(path.to_path_buf());
        };

        let rename_error = |source: io::Error| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                InspectError::PermissionDenied {
                    path: path.to_path_buf(),
                    source,
                }
            } else {
                InspectError::Rename {
                    from: path.to_path_buf(),
                    to: target.clone(),
                    source,
                }
            }
        };

        // On case-insensitive filesystems a case-only target "exists" as the
        // file itself, so only a real new name is claimed with a hard link,
        // which fails rather than replacing another file
        let case_only = path.extension().is_some();
        let mut linked = false;
        if !case_only {
            match std::fs::hard_link(path, &target) {
                Ok(()) => linked = true,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(InspectError::AlreadyExists(target.clone()));
                },
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "hard link refused, renaming instead");
                    if target.exists() {
                        return Err(InspectError::AlreadyExists(target.clone()));
                    }
                },
            }
        }

        if linked {
            if let Err(source) = std::fs::remove_file(path) {
                let _ = std::fs::remove_file(&target);
                return Err(rename_error(source));
            }
        } else {
            std::fs::rename(path, &target).map_err(rename_error)?;
        }

        info!(from = %path.display(), to = %target.display(), "repaired file extension");
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut bytes = SOI_MARKER.to_vec();
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(&EOI_MARKER);
        bytes
    }

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_inspect_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = IntegrityInspector::default();

        let cases: [(&str, Vec<u8>, IntegrityVerdict); 5] = [
            ("valid.jpg", jpeg(b"\xE0\x00\x10JFIF"), IntegrityVerdict::Valid),
            ("empty.jpg", Vec::new(), IntegrityVerdict::Empty),
            ("short.jpg", vec![0xFF, 0xD8, 0xFF, 0xD9], IntegrityVerdict::Unknown),
            ("png.jpg", b"\x89PNG\r\n\x1a\n".to_vec(), IntegrityVerdict::HeaderInvalid),
            ("cut.jpg", b"\xFF\xD8\xFF\xE0\x00\x10".to_vec(), IntegrityVerdict::FooterInvalid),
        ];

        for (name, content, expected) in cases {
            let path = write(dir.path(), name, &content);
            assert_eq!(inspector.inspect(&path), expected, "{name}");
        }
    }

    #[test]
    fn test_inspect_missing_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = IntegrityInspector::default();
        assert_eq!(inspector.inspect(&dir.path().join("gone")), IntegrityVerdict::Unknown);
    }

    #[test]
    fn test_inspect_source_records_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "DSC_0001", &jpeg(b"abc"));
        let mut file = SourceFile::sample(&path).unwrap();

        let verdict = IntegrityInspector::default().inspect_source(&mut file);
        assert_eq!(verdict, IntegrityVerdict::Valid);
        assert_eq!(file.media_kind, MediaKind::Jpeg);
        assert_eq!(file.signature.map(|s| s.len), Some(8));
    }

    #[test]
    fn test_repair_appends_extension_for_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = IntegrityInspector::default();
        let path = write(dir.path(), "DSC_0001", &jpeg(b"x"));

        let repaired = inspector.repair_extension(&path, IntegrityVerdict::Valid, false).unwrap();
        assert_eq!(repaired, dir.path().join("DSC_0001.jpg"));
        assert!(repaired.exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_plan_repair_does_not_touch_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = IntegrityInspector::default();
        let path = write(dir.path(), "DSC_0009", &jpeg(b"x"));

        assert_eq!(
            inspector.plan_repair(&path, IntegrityVerdict::Valid, false),
            Some(dir.path().join("DSC_0009.jpg"))
        );
        assert_eq!(inspector.plan_repair(&path, IntegrityVerdict::FooterInvalid, false), None);
        assert!(path.exists());
    }

    #[test]
    fn test_repair_leaves_unknown_file_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = IntegrityInspector::default();
        let path = write(dir.path(), "blob", b"abc");

        let same = inspector.repair_extension(&path, IntegrityVerdict::Unknown, false).unwrap();
        assert_eq!(same, path);
        assert!(path.exists());

        let forced = inspector.repair_extension(&path, IntegrityVerdict::Unknown, true).unwrap();
        assert_eq!(forced, dir.path().join("blob.jpg"));
    }

    #[test]
    fn test_repair_normalises_case() {
        let dir = tempfile::tempdir().unwrap();
        let upper = IntegrityInspector::new(&IntegrityConfig {
            extension_case: ExtensionCase::Upper,
            ..IntegrityConfig::default()
        });
        let path = write(dir.path(), "IMG_0002.jpg", &jpeg(b"x"));

        let repaired = upper.repair_extension(&path, IntegrityVerdict::Valid, false).unwrap();
        assert_eq!(repaired, dir.path().join("IMG_0002.JPG"));
        assert_eq!(upper.repair_extension(&repaired, IntegrityVerdict::Valid, false).unwrap(), repaired);
    }

    #[test]
    fn test_repair_preserve_keeps_existing_case() {
        let dir = tempfile::tempdir().unwrap();
        let preserve = IntegrityInspector::new(&IntegrityConfig {
            extension_case: ExtensionCase::Preserve,
            ..IntegrityConfig::default()
        });
        let path = write(dir.path(), "IMG_0003.JPG", &jpeg(b"x"));
        assert_eq!(preserve.repair_extension(&path, IntegrityVerdict::Valid, false).unwrap(), path);
    }

    #[test]
    fn test_repair_ignores_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clip.mov", &jpeg(b"x"));
        let result = IntegrityInspector::default()
            .repair_extension(&path, IntegrityVerdict::Valid, true)
            .unwrap();
        assert_eq!(result, path);
    }

    #[test]
    fn test_repair_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "DSC_0004", &jpeg(b"new"));
        write(dir.path(), "DSC_0004.jpg", &jpeg(b"old"));

        let err = IntegrityInspector::default()
            .repair_extension(&path, IntegrityVerdict::Valid, false)
            .unwrap_err();
        assert!(matches!(err, InspectError::AlreadyExists(_)));
        assert!(path.exists());
        assert_eq!(std::fs::read(dir.path().join("DSC_0004.jpg")).unwrap(), jpeg(b"old"));
    }

    #[test]
    fn test_canonical_extension_casing() {
        let mut config = IntegrityConfig {
            default_extension: "Jpg".into(),
            ..IntegrityConfig::default()
        };
        assert_eq!(IntegrityInspector::new(&config).canonical_extension(), "jpg");
        config.extension_case = ExtensionCase::Upper;
        assert_eq!(IntegrityInspector::new(&config).canonical_extension(), "JPG");
        config.extension_case = ExtensionCase::Preserve;
        assert_eq!(IntegrityInspector::new(&config).canonical_extension(), "Jpg");
    }

    proptest! {
        #[test]
        fn prop_marked_content_is_valid(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let sig = ContentSignature::from_bytes(&jpeg(&body));
            prop_assert_eq!(IntegrityVerdict::classify(&sig), IntegrityVerdict::Valid);
        }

        #[test]
        fn prop_wrong_header_is_never_valid(
            first in any::<u8>(),
            body in proptest::collection::vec(any::<u8>(), 2..256),
        ) {
            prop_assume!(first != 0xFF);
            let mut bytes = vec![first];
            bytes.extend_from_slice(&body);
            bytes.extend_from_slice(&EOI_MARKER);
            let sig = ContentSignature::from_bytes(&bytes);
            prop_assert_eq!(IntegrityVerdict::classify(&sig), IntegrityVerdict::HeaderInvalid);
        }

        #[test]
        fn prop_repair_is_idempotent(stem in "[A-Za-z][A-Za-z0-9_]{0,11}", upper in any::<bool>()) {
            let dir = tempfile::tempdir().unwrap();
            let inspector = IntegrityInspector::new(&IntegrityConfig {
                extension_case: if upper { ExtensionCase::Upper } else { ExtensionCase::Lower },
                ..IntegrityConfig::default()
            });
            let path = write(dir.path(), &stem, &jpeg(b"payload"));

            let once = inspector.repair_extension(&path, IntegrityVerdict::Valid, false).unwrap();
            let canonical = inspector.canonical_extension();
            prop_assert_eq!(once.extension().and_then(|e| e.to_str()), Some(canonical.as_str()));

            let twice = inspector.repair_extension(&once, IntegrityVerdict::Valid, false).unwrap();
            prop_assert_eq!(&twice, &once);
            prop_assert!(twice.exists());
        }
    }
}
