use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn hashchain(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hashchain").expect("binary built");
    cmd.arg("--db").arg(db).args(["--target-bits", "8"]);
    cmd
}

#[test]
fn add_prints_block_hash() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("chain.db");

    hashchain(&db)
        .args(["add", "--data", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
}

#[test]
fn print_lists_blocks_newest_first() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("chain.db");

    for data in ["a", "b"] {
        hashchain(&db).args(["add", "--data", data]).assert().success();
    }

    let output = hashchain(&db).arg("print").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let data: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("Data: "))
        .collect();
    assert_eq!(data, vec!["b", "a", "Genesis Block"]);
    assert_eq!(stdout.matches("PoW: true").count(), 3);
    assert!(stdout.contains("Prev. hash: \n"));
}

#[test]
fn print_json_emits_one_object_per_block() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("chain.db");

    hashchain(&db).args(["add", "--data", "json"]).assert().success();

    let output = hashchain(&db).args(["print", "--json"]).output().unwrap();
    assert!(output.status.success());
    let rows: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["data"], "json");
    assert_eq!(rows[0]["prev_hash"], rows[1]["hash"]);
    assert_eq!(rows[1]["data"], "Genesis Block");
    assert_eq!(rows[1]["prev_hash"], "");
    assert!(rows.iter().all(|row| row["pow"] == true));
}

#[test]
fn verify_reports_block_count() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("chain.db");

    hashchain(&db).args(["add", "--data", "one"]).assert().success();
    hashchain(&db)
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("chain OK: 2 blocks"));
}

#[test]
fn invalid_target_bits_is_an_error() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("chain.db");

    Command::cargo_bin("hashchain")
        .unwrap()
        .arg("--db")
        .arg(&db)
        .args(["--target-bits", "0", "print"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("target bits must be between 1 and 255"));
}
