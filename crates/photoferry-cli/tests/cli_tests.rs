//! End-to-end tests for the photoferry binary
//!
//! Only local behaviour is exercised: inspection, extension repair and a scan
//! that delivers into the local backup directory.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const EOI: [u8; 2] = [0xFF, 0xD9];

fn jpeg() -> Vec<u8> {
    let mut bytes = SOI.to_vec();
    bytes.extend_from_slice(&[0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F']);
    bytes.extend_from_slice(&EOI);
    bytes
}

/// Binary run from `cwd`, with a config file that does not exist
fn photoferry(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("photoferry").unwrap();
    cmd.current_dir(cwd).arg("--config").arg(cwd.join("absent.toml"));
    cmd
}

// ============================================================================
// Argument Handling
// ============================================================================

#[test]
fn test_no_arguments_prints_help() {
    Command::cargo_bin("photoferry")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_inspect_without_paths_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    photoferry(dir.path())
        .arg("inspect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<PATHS>"));
}

// ============================================================================
// Inspect
// ============================================================================

#[test]
fn test_inspect_reports_verdicts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("good.jpg"), jpeg()).unwrap();
    std::fs::write(dir.path().join("cut.jpg"), &jpeg()[..8]).unwrap();
    std::fs::write(dir.path().join("empty.jpg"), b"").unwrap();

    photoferry(dir.path())
        .arg("inspect")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("footer_invalid"))
        .stdout(predicate::str::contains("empty"))
        .stdout(predicate::str::contains("1 of 3 file(s) valid"));
}

#[test]
fn test_inspect_json_is_clean_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("DSC_0001");
    std::fs::write(&path, jpeg()).unwrap();

    let output = photoferry(dir.path())
        .arg("--verbose")
        .arg("inspect")
        .arg("--json")
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed[0]["verdict"], "valid");
    assert_eq!(parsed[0]["size"], jpeg().len() as u64);
}

// ============================================================================
// Repair
// ============================================================================

#[test]
fn test_repair_dry_run_renames_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("DSC_0002"), jpeg()).unwrap();

    photoferry(dir.path())
        .arg("repair")
        .arg("--dry-run")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("would rename"))
        .stdout(predicate::str::contains("DSC_0002.jpg"));

    assert!(dir.path().join("DSC_0002").exists());
    assert!(!dir.path().join("DSC_0002.jpg").exists());
}

#[test]
fn test_repair_fixes_valid_files_and_skips_others_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("DSC_0003"), jpeg()).unwrap();
    std::fs::write(dir.path().join("IMG_0004.JPG"), jpeg()).unwrap();
    std::fs::write(dir.path().join("notes"), b"plain text").unwrap();

    photoferry(dir.path())
        .arg("repair")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2 file(s) renamed"));

    assert!(dir.path().join("DSC_0003.jpg").exists());
    assert!(dir.path().join("IMG_0004.jpg").exists());
    assert!(dir.path().join("notes").exists());

    photoferry(dir.path())
        .args(["repair", "--force"])
        .arg(dir.path())
        .assert()
        .success();
    assert!(dir.path().join("notes.jpg").exists());
}

// ============================================================================
// Scan
// ============================================================================

#[test]
fn test_scan_delivers_to_local_backup_and_quarantines() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("incoming");
    let backup = work.path().join("backup");
    let quarantine = work.path().join("quarantine");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("IMG_0005.jpg"), jpeg()).unwrap();
    std::fs::write(source.join("broken.jpg"), b"GIF89a").unwrap();

    let config = work.path().join("photoferry.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[source]
stability_delay_ms = 50

[server]
protocol_fallback_order = ["local_backup"]

[local_backup]
enabled = true
directory = '{}'

[integrity]
quarantine_dir = '{}'
"#,
            backup.display(),
            quarantine.display()
        ),
    )
    .unwrap();

    Command::cargo_bin("photoferry")
        .unwrap()
        .current_dir(work.path())
        .arg("--config")
        .arg(&config)
        .arg("--source")
        .arg(&source)
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 transferred"))
        .stdout(predicate::str::contains("1 quarantined"));

    assert_eq!(std::fs::read(backup.join("IMG_0005.jpg")).unwrap(), jpeg());
    assert!(quarantine.join("broken.jpg").exists());
    // Source kept: after_transfer.delete_source is off by default
    assert!(source.join("IMG_0005.jpg").exists());
}
