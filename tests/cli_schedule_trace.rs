use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "evsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn fired_labels(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.starts_with("fire "))
        .filter_map(|line| {
            line.split_whitespace()
                .find_map(|kv| kv.strip_prefix("label="))
                .map(str::to_string)
        })
        .collect()
}

const ORDERING_SCENARIO: &str = r#"
{
    "events": [
        { "label": "five", "delay_ms": 5000 },
        { "label": "three_a", "delay_ms": 3000 },
        { "label": "three_b", "delay_ms": 3000 },
        { "label": "now" }
    ],
    "destroy": ["cleanup"]
}
"#;

#[test]
fn schedule_trace_prints_dispatch_order() {
    let dir = unique_temp_dir("trace-order");
    let scenario = write_file(&dir, "scenario.json", ORDERING_SCENARIO);

    let output = Command::new(env!("CARGO_BIN_EXE_schedule_trace"))
        .args(["--scenario", scenario.to_str().unwrap()])
        .output()
        .expect("run schedule_trace");
    assert!(
        output.status.success(),
        "schedule_trace failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(fired_labels(&stdout), ["now", "three_a", "three_b", "five"]);
    assert!(stdout.contains("destroy at=+5.000000000s ctx=none label=cleanup"));
    assert!(stdout.contains("done @ +5.000000000s, dispatched=4, pending=0"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn schedule_trace_json_report_with_stop_override() {
    let dir = unique_temp_dir("trace-json");
    let scenario = write_file(&dir, "scenario.json", ORDERING_SCENARIO);

    let output = Command::new(env!("CARGO_BIN_EXE_schedule_trace"))
        .args([
            "--scenario",
            scenario.to_str().unwrap(),
            "--stop-ms",
            "4000",
            "--json",
        ])
        .output()
        .expect("run schedule_trace");
    assert!(
        output.status.success(),
        "schedule_trace failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v: Value = serde_json::from_slice(&output.stdout).expect("parse report json");
    assert_eq!(v["final_time_ns"].as_i64(), Some(4_000_000_000));
    assert_eq!(v["dispatched"].as_u64(), Some(3));
    assert_eq!(v["pending_after_run"].as_u64(), Some(1));
    let trace = v["trace"].as_array().expect("trace must be an array");
    let kinds: Vec<_> = trace.iter().filter_map(|e| e["kind"].as_str()).collect();
    assert_eq!(kinds, ["fired", "fired", "fired", "destroyed"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn schedule_trace_realtime_paces_against_wall_clock() {
    let dir = unique_temp_dir("trace-realtime");
    let scenario = write_file(
        &dir,
        "scenario.json",
        r#"
{
    "events": [
        { "label": "late", "delay_ms": 1000 },
        { "label": "early", "delay_ms": 500 }
    ]
}
        "#,
    );

    // 10 倍速：逻辑 1 秒对应约 100 毫秒墙钟
    let output = Command::new(env!("CARGO_BIN_EXE_schedule_trace"))
        .args([
            "--scenario",
            scenario.to_str().unwrap(),
            "--realtime",
            "--rate",
            "10",
            "--json",
        ])
        .output()
        .expect("run schedule_trace");
    assert!(
        output.status.success(),
        "schedule_trace failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v: Value = serde_json::from_slice(&output.stdout).expect("parse report json");
    let trace = v["trace"].as_array().expect("trace must be an array");
    let labels: Vec<_> = trace.iter().filter_map(|e| e["label"].as_str()).collect();
    assert_eq!(labels, ["early", "late"]);
    let late_wall_us = trace[1]["wall_us"].as_u64().expect("wall_us");
    assert!(late_wall_us >= 100_000, "late fired after {late_wall_us}us");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn schedule_trace_exits_nonzero_on_failing_event() {
    let dir = unique_temp_dir("trace-fail");
    let scenario = write_file(
        &dir,
        "scenario.json",
        r#"{ "events": [ { "label": "bad", "delay_ms": 1, "fail": true } ] }"#,
    );

    let output = Command::new(env!("CARGO_BIN_EXE_schedule_trace"))
        .args(["--scenario", scenario.to_str().unwrap()])
        .output()
        .expect("run schedule_trace");
    assert!(
        !output.status.success(),
        "expected non-zero exit, got success"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("event `bad` failed"),
        "stderr did not contain expected message: {stderr}"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn schedule_trace_rejects_invalid_rate() {
    let dir = unique_temp_dir("trace-rate");
    let scenario = write_file(&dir, "scenario.json", ORDERING_SCENARIO);

    let output = Command::new(env!("CARGO_BIN_EXE_schedule_trace"))
        .args([
            "--scenario",
            scenario.to_str().unwrap(),
            "--realtime",
            "--rate",
            "0",
        ])
        .output()
        .expect("run schedule_trace");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("rate"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}
