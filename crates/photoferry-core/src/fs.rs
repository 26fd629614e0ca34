//! Local filesystem helpers shared by quarantine and the local backup sink

use chrono::Utc;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Names tried by [`move_without_overwrite`] before giving up
const MAX_CLAIM_ATTEMPTS: usize = 16;

/// Destination for `file_name` inside `dir` that does not clobber an existing file
///
/// Collisions get a UTC timestamp suffix before the extension, then a counter
/// if that is taken as well.
pub(crate) fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = name.extension().map(|e| e.to_string_lossy().into_owned());
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");

    let build = |suffix: String| match &extension {
        Some(ext) => dir.join(format!("{stem}-{suffix}.{ext}")),
        None => dir.join(format!("{stem}-{suffix}")),
    };

    let stamped = build(stamp.to_string());
    if !stamped.exists() {
        return stamped;
    }

    let mut counter = 1u32;
    loop {
        let numbered = build(format!("{stamp}-{counter}"));
        if !numbered.exists() {
            return numbered;
        }
        counter += 1;
    }
}

/// Rename `from` to `to`, copying and removing when the rename itself is refused
/// (different devices, mount boundaries)
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
            Err(e)
        },
        Err(e) => {
            debug!(from = %from.display(), to = %to.display(), error = %e, "rename failed, copying instead");
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        },
    }
}

/// Move `from` to `destination` only if nothing exists there yet
///
/// Returns `Ok(false)` when the name is taken, leaving both files untouched.
/// The name is claimed with a hard link, which fails rather than replacing a
/// file. Filesystems without hard links (FAT, cross-device) reserve it with
/// `create_new` and then move over the reservation.
fn claim(from: &Path, destination: &Path) -> io::Result<bool> {
    match std::fs::hard_link(from, destination) {
        Ok(()) => {
            std::fs::remove_file(from)?;
            return Ok(true);
        },
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
        Err(e) => debug!(destination = %destination.display(), error = %e, "hard link refused, reserving the name"),
    }

    match OpenOptions::new().write(true).create_new(true).open(destination) {
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    }
    if let Err(e) = move_file(from, destination) {
        let _ = std::fs::remove_file(destination);
        return Err(e);
    }
    Ok(true)
}

/// Move `from` into `dir` as `file_name`, or a [`unique_destination`] variant
/// of it, never replacing an existing file
pub(crate) fn move_without_overwrite(from: &Path, dir: &Path, file_name: &str) -> io::Result<PathBuf> {
    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let destination = unique_destination(dir, file_name);
        if claim(from, &destination)? {
            return Ok(destination);
        }
        debug!(destination = %destination.display(), "name taken concurrently, picking another");
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {file_name} in {}", dir.display()),
    ))
}
