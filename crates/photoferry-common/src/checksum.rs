//! Checksum utilities for file verification

use crate::error::{FerryError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 of a file as lowercase hex
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}

/// Compute the SHA-256 of any readable source
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify that two files have identical content
pub fn verify_same_content(original: impl AsRef<Path>, copy: impl AsRef<Path>) -> Result<()> {
    let expected = sha256_file(original)?;
    let actual = sha256_file(copy)?;
    if expected == actual {
        Ok(())
    } else {
        Err(FerryError::ChecksumMismatch { expected, actual })
    }
}
