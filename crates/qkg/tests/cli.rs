use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ANOMALIES: &str = "AnomalyID,Title,Severity,Product,Build,Component,Symptom\n\
                         A1,Focus fail,High,PhoneX,1.0,vcm,对焦失败\n";

fn qkg(dir: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("qkg").into();
    cmd.current_dir(dir);
    cmd.env_remove("QKG_GRAPH_URI");
    cmd.env_remove("QKG_VOCAB_DIR");
    cmd.env("RUST_LOG", "off");
    cmd
}

/// Tempdir with `input/anomalies.csv` and a vocabulary mapping vcm to VCM马达.
/// Returns (tempdir_guard, input_dir).
fn fixture() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let vocab = tmp.path().join("vocab");
    fs::create_dir(&vocab).unwrap();
    fs::write(vocab.join("components.csv"), "name,alias\nVCM马达,vcm\n").unwrap();

    let input = tmp.path().join("input");
    fs::create_dir(&input).unwrap();
    fs::write(input.join("anomalies.csv"), ANOMALIES).unwrap();
    (tmp, input)
}

fn import(tmp: &TempDir, input: &Path) -> assert_cmd::assert::Assert {
    qkg(tmp.path())
        .arg("--input")
        .arg(input)
        .args(["--graph-uri", "sqlite:graph.db", "--vocab-dir", "vocab"])
        .assert()
}

#[test]
fn binary_runs() {
    let mut cmd: Command = cargo_bin_cmd!("qkg").into();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("qkg"));
}

#[test]
fn import_directory_prints_summary() {
    let (tmp, input) = fixture();

    import(&tmp, &input)
        .success()
        .stdout(predicate::str::contains("anomalies.csv [anomalies] ok"))
        .stdout(predicate::str::contains("Files: 1 (1 committed, 0 failed)"))
        .stdout(predicate::str::contains("Rows: 1 parsed, 0 skipped, 1 success, 0 failed"))
        .stdout(predicate::str::contains("Component: 1"))
        .stdout(predicate::str::contains("Anomaly: 1"));

    assert!(tmp.path().join("graph.db").exists());
}

#[test]
fn reimport_adds_no_nodes() {
    let (tmp, input) = fixture();

    import(&tmp, &input).success();
    import(&tmp, &input)
        .success()
        .stdout(predicate::str::contains("Anomaly: 1"))
        .stdout(predicate::str::contains("Build: 1"))
        .stdout(predicate::str::contains("Product: 1"))
        .stdout(predicate::str::contains("Symptom: 1"));
}

#[test]
fn broken_file_does_not_fail_run() {
    let (tmp, input) = fixture();
    fs::write(input.join("broken.xlsx"), "not a workbook").unwrap();

    import(&tmp, &input)
        .success()
        .stdout(predicate::str::contains("parse failed"))
        .stdout(predicate::str::contains("Files: 2 (1 committed, 1 failed)"));
}

#[test]
fn explicit_type_overrides_file_name() {
    let (tmp, input) = fixture();
    let file = input.join("anomalies.csv");
    fs::write(&file, "CaseID,Title,Module\nTC-1,AF check,vcm\n").unwrap();

    qkg(tmp.path())
        .arg("--input")
        .arg(&file)
        .args(["--type", "testcases", "--graph-uri", "sqlite:graph.db", "--vocab-dir", "vocab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[testcases] ok"))
        .stdout(predicate::str::contains("TestCase: 1"));
}

#[test]
fn unknown_type_is_rejected() {
    let (tmp, input) = fixture();

    qkg(tmp.path())
        .arg("--input")
        .arg(&input)
        .args(["--type", "bugs"])
        .assert()
        .failure();
}

#[test]
fn unsupported_graph_uri_fails() {
    let (tmp, input) = fixture();

    qkg(tmp.path())
        .arg("--input")
        .arg(&input)
        .args(["--graph-uri", "redis://localhost:6379"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot open graph store"));
}

#[test]
fn missing_input_fails() {
    let tmp = TempDir::new().unwrap();

    qkg(tmp.path())
        .args(["--input", "nowhere", "--graph-uri", "sqlite::memory:"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn malformed_mapping_fails() {
    let (tmp, input) = fixture();
    fs::write(tmp.path().join("mapping.json"), "{not json").unwrap();

    qkg(tmp.path())
        .arg("--input")
        .arg(&input)
        .args(["--graph-uri", "sqlite::memory:", "--mapping", "mapping.json"])
        .assert()
        .failure();
}
