//! Per-event view of a candidate file

use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// JPEG start-of-image marker
pub const SOI_MARKER: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// JPEG end-of-image marker
pub const EOI_MARKER: [u8; 2] = [0xFF, 0xD9];

/// Files shorter than this cannot carry both markers
pub const MIN_SIGNATURE_LEN: u64 = 5;

/// Media kind inferred from the content signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Jpeg,
    #[default]
    Unknown,
}

/// Leading and trailing bytes of a file, enough to classify it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentSignature {
    pub len: u64,
    pub header: Option<[u8; 3]>,
    pub footer: Option<[u8; 2]>,
}

impl ContentSignature {
    /// Read the first 3 and last 2 bytes of a file
    ///
    /// Files shorter than [`MIN_SIGNATURE_LEN`] only report their length.
    pub fn read(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < MIN_SIGNATURE_LEN {
            return Ok(Self {
                len,
                header: None,
                footer: None,
            });
        }

        let mut header = [0u8; 3];
        file.read_exact(&mut header)?;

        let mut footer = [0u8; 2];
        file.seek(SeekFrom::End(-2))?;
        file.read_exact(&mut footer)?;

        Ok(Self {
            len,
            header: Some(header),
            footer: Some(footer),
        })
    }

    /// Signature of an in-memory buffer
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len() as u64;
        if len < MIN_SIGNATURE_LEN {
            return Self {
                len,
                header: None,
                footer: None,
            };
        }
        let n = bytes.len();
        Self {
            len,
            header: Some([bytes[0], bytes[1], bytes[2]]),
            footer: Some([bytes[n - 2], bytes[n - 1]]),
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        if self.header == Some(SOI_MARKER) {
            MediaKind::Jpeg
        } else {
            MediaKind::Unknown
        }
    }
}

/// A candidate file as seen by one filesystem notification
///
/// Re-created for every event; holds the two stability samples and, once
/// inspected, the content signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub first_size: u64,
    pub second_size: Option<u64>,
    pub signature: Option<ContentSignature>,
    pub media_kind: MediaKind,
}

impl SourceFile {
    /// Take the first size sample
    pub fn sample(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(Self {
            path,
            first_size: metadata.len(),
            second_size: None,
            signature: None,
            media_kind: MediaKind::Unknown,
        })
    }

    /// True when `later` is a sample of the same file with the same, non-zero size
    pub fn is_stable_against(&self, later: &SourceFile) -> bool {
        self.path == later.path && self.first_size == later.first_size && self.first_size > 0
    }

    /// Record `later` as the second sample
    pub fn confirm(mut self, later: &SourceFile) -> Self {
        self.second_size = Some(later.first_size);
        self
    }

    pub fn size(&self) -> u64 {
        self.second_size.unwrap_or(self.first_size)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_of_short_buffer() {
        let sig = ContentSignature::from_bytes(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(sig.len, 4);
        assert!(sig.header.is_none());
        assert_eq!(sig.media_kind(), MediaKind::Unknown);
    }

    #[test]
    fn test_signature_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9]).unwrap();

        let sig = ContentSignature::read(&path).unwrap();
        assert_eq!(sig.len, 8);
        assert_eq!(sig.header, Some(SOI_MARKER));
        assert_eq!(sig.footer, Some(EOI_MARKER));
        assert_eq!(sig.media_kind(), MediaKind::Jpeg);
    }

    #[test]
    fn test_stability_requires_equal_non_zero_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.jpg");

        std::fs::write(&path, b"").unwrap();
        let a = SourceFile::sample(&path).unwrap();
        let b = SourceFile::sample(&path).unwrap();
        assert!(!a.is_stable_against(&b));

        std::fs::write(&path, b"12345").unwrap();
        let c = SourceFile::sample(&path).unwrap();
        std::fs::write(&path, b"1234567890").unwrap();
        let d = SourceFile::sample(&path).unwrap();
        assert!(!c.is_stable_against(&d));

        let e = SourceFile::sample(&path).unwrap();
        assert!(d.is_stable_against(&e));
        assert_eq!(d.confirm(&e).second_size, Some(10));
    }

    #[test]
    fn test_sample_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SourceFile::sample(dir.path()).is_err());
    }
}
