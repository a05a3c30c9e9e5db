// CLI integration tests for write, dump, and stress flows.
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_recfile");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_json)
        .collect()
}

#[test]
fn write_then_dump_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("data.rec");

    let write = cmd()
        .args(["write", path.to_str().unwrap(), "--record-len", "3", "abc", "defgh", "z"])
        .output()
        .expect("write");
    assert!(write.status.success(), "stderr: {}", String::from_utf8_lossy(&write.stderr));
    let lines = parse_json_lines(&write.stdout);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["seq"], 0);
    assert_eq!(lines[1]["seq"], 1);
    assert_eq!(lines[1]["len"], 3);
    assert_eq!(lines[1]["truncated"], true);
    assert_eq!(lines[2]["len"], 1);

    let dump = cmd()
        .args(["dump", path.to_str().unwrap(), "--record-len", "3"])
        .output()
        .expect("dump");
    assert!(dump.status.success(), "stderr: {}", String::from_utf8_lossy(&dump.stderr));
    let records = parse_json_lines(&dump.stdout);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["hex"], "616263");
    assert_eq!(records[1]["hex"], "646566");
    assert_eq!(records[2]["seq"], 2);
    assert_eq!(records[2]["hex"], "7a0000");
}

#[test]
fn append_keeps_existing_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("data.rec");
    let path_arg = path.to_str().unwrap();

    let first = cmd()
        .args(["write", path_arg, "--record-len", "2", "--hex", "0102"])
        .output()
        .expect("write");
    assert!(first.status.success());

    let second = cmd()
        .args(["write", path_arg, "--record-len", "2", "--append", "--hex", "0304"])
        .output()
        .expect("append");
    assert!(second.status.success());
    assert_eq!(parse_json_lines(&second.stdout)[0]["seq"], 1);

    assert_eq!(std::fs::read(&path).expect("read"), vec![1, 2, 3, 4]);
}

#[test]
fn stress_reports_dense_sequences() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("stress.rec");

    let output = cmd()
        .args([
            "stress",
            "--path",
            path.to_str().unwrap(),
            "--writers",
            "3",
            "--readers",
            "2",
            "--count",
            "2000",
        ])
        .output()
        .expect("stress");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report = parse_json(std::str::from_utf8(&output.stdout).expect("utf8").trim());
    assert_eq!(report["writes"], 6000);
    assert_eq!(report["reads"], 4000);
    assert_eq!(report["write_seq"], 6000);
    assert_eq!(report["read_seq"], 4000);
    assert_eq!(report["published_seq"], 6000);
    assert_eq!(report["record_len"], 3);
    assert!(!path.exists(), "stress file should be removed without --keep");
}

#[test]
fn zero_record_len_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("data.rec");

    let output = cmd()
        .args(["write", path.to_str().unwrap(), "--record-len", "0", "abc"])
        .output()
        .expect("write");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(std::str::from_utf8(&output.stderr).expect("utf8").trim());
    assert_eq!(err["error"]["kind"], "Usage");
    assert_eq!(err["error"]["message"], "record length must be positive");
}

#[test]
fn dump_of_missing_file_fails_without_creating_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("missing.rec");

    let output = cmd()
        .args(["dump", path.to_str().unwrap(), "--record-len", "4"])
        .output()
        .expect("dump");
    assert_eq!(output.status.code(), Some(2));
    assert!(!path.exists());
}

#[test]
fn too_many_readers_is_rejected() {
    let output = cmd()
        .args(["stress", "--writers", "1", "--readers", "2", "--count", "1"])
        .output()
        .expect("stress");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(std::str::from_utf8(&output.stderr).expect("utf8").trim());
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(err["error"].get("hint").is_some());
}
