//! CLI contract tests: exit codes, setup errors, and end-to-end runs.

use std::path::Path;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;

fn autobatch() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_autobatch"));
    cmd.env_remove("RUST_LOG");
    for var in [
        "AUTOBATCH_MODE",
        "AUTOBATCH_LOG_FILE",
        "AUTOBATCH_THRESHOLD",
        "AUTOBATCH_OUTPUT",
        "AUTOBATCH_BENCH_CMD_TEMPLATE",
        "AUTOBATCH_CONFIG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn fast_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("autobatch.toml");
    std::fs::write(
        &path,
        concat!(
            "[general]\nlog_level = \"warn\"\n\n",
            "[search]\nsettle_delay_ms = 0\n\n",
            "[monitor]\nactive_delay_ms = 10\nidle_base_ms = 10\nidle_step_ms = 10\nidle_max_ms = 50\n\n",
            "[tail]\ninitial_delay_ms = 10\nmax_delay_ms = 50\n",
        ),
    )
    .unwrap();
    path
}

#[test]
fn help_lists_modes() {
    autobatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--bench-cmd-template"))
        .stdout(predicate::str::contains("--mode"));
}

#[test]
fn binary_mode_without_template_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    autobatch()
        .args(["--mode", "binary", "--threshold", "ttft:100"])
        .arg("--log-file")
        .arg(dir.path().join("results.jsonl"))
        .arg("--output")
        .arg(dir.path().join("best.jsonl"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("command template"))
        .stderr(predicate::str::contains("To fix:"));
    assert!(!dir.path().join("best.jsonl").exists());
}

#[test]
fn template_without_placeholder_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    autobatch()
        .args(["--mode", "binary", "--threshold", "ttft:100"])
        .args(["--bench-cmd-template", "bench.sh --c 8"])
        .arg("--log-file")
        .arg(dir.path().join("results.jsonl"))
        .arg("--output")
        .arg(dir.path().join("best.jsonl"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("{batch}"));
}

#[test]
fn inverted_bounds_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    autobatch()
        .args(["--mode", "binary", "--threshold", "ttft:100"])
        .args(["--bench-cmd-template", "true {batch}"])
        .args(["--min-batch", "64", "--max-batch", "8"])
        .arg("--log-file")
        .arg(dir.path().join("results.jsonl"))
        .arg("--output")
        .arg(dir.path().join("best.jsonl"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid batch bounds"));
}

#[test]
fn unknown_config_key_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[search]\nmax_btach = 3\n").unwrap();
    autobatch()
        .args(["--threshold", "ttft:100"])
        .arg("--config")
        .arg(&config)
        .arg("--log-file")
        .arg(dir.path().join("results.jsonl"))
        .arg("--output")
        .arg(dir.path().join("best.jsonl"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("parse config"));
}

#[test]
fn threshold_flag_is_required() {
    let dir = tempfile::tempdir().unwrap();
    autobatch()
        .arg("--log-file")
        .arg(dir.path().join("results.jsonl"))
        .arg("--output")
        .arg(dir.path().join("best.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--threshold"));
    assert!(!dir.path().join("best.jsonl").exists());
}

#[cfg(unix)]
#[test]
fn explicit_empty_threshold_warns_and_runs() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("results.jsonl");
    let template = format!(
        "printf '{{\"input_len\":1,\"output_len\":1,\"concurrency\":%s}}\\n' {{batch}} >> '{}'",
        log.display()
    );
    autobatch()
        .args(["--mode", "binary", "--threshold", ""])
        .args(["--min-batch", "1", "--max-batch", "4"])
        .args(["--log-level", "warn", "--summary-format", "json"])
        .arg("--bench-cmd-template")
        .arg(&template)
        .arg("--config")
        .arg(fast_config(dir.path()))
        .arg("--log-file")
        .arg(&log)
        .arg("--output")
        .arg(dir.path().join("best.jsonl"))
        .assert()
        .success()
        .stderr(predicate::str::contains("no latency ceilings configured"))
        .stdout(predicate::str::contains("\"concurrency\": 4"));
}

#[cfg(unix)]
#[test]
fn binary_search_against_stub_harness() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("results.jsonl");
    let output = dir.path().join("best.jsonl");
    let stub = dir.path().join("bench.sh");
    std::fs::write(
        &stub,
        "#!/bin/sh\n\
         printf '{\"input_len\":512,\"output_len\":128,\"concurrency\":%s,\"mean_ttft_ms\":%s.0}\\n' \"$1\" \"$(( $1 * 3 ))\" >> \"$2\"\n",
    )
    .unwrap();

    let template = format!("sh '{}' {{batch}} '{}'", stub.display(), log.display());
    let assert = autobatch()
        .args(["--mode", "binary", "--threshold", "ttft:100"])
        .args(["--min-batch", "1", "--max-batch", "64"])
        .args(["--summary-format", "json"])
        .arg("--bench-cmd-template")
        .arg(&template)
        .arg("--config")
        .arg(fast_config(dir.path()))
        .arg("--log-file")
        .arg(&log)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["mode"], "binary");
    // 3 * 33 = 99 is the last batch under 100ms.
    assert_eq!(report["best"]["concurrency"], 33);
    assert_eq!(report["interrupted"], false);
    assert!(report["probes"].as_array().unwrap().len() <= 7);

    let persisted = std::fs::read_to_string(&output).unwrap();
    assert_eq!(persisted.lines().count(), 1);
    assert!(persisted.contains("\"concurrency\":33"));
}

#[cfg(unix)]
#[test]
fn monitor_stops_cleanly_on_sigterm() {
    use std::process::Stdio;

    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("results.jsonl");
    let output = dir.path().join("best.jsonl");
    let signal_file = dir.path().join("signal").join("best_signal.json");
    let mut lines = String::new();
    for (batch, ttft) in [(1, 20), (2, 40), (4, 80), (8, 160)] {
        lines.push_str(&format!(
            "{{\"input_len\":128,\"output_len\":128,\"concurrency\":{batch},\"mean_ttft_ms\":{ttft}}}\n"
        ));
    }
    std::fs::write(&log, lines).unwrap();

    let child = std::process::Command::new(env!("CARGO_BIN_EXE_autobatch"))
        .args(["--threshold", "ttft:100", "--summary-format", "json"])
        .arg("--config")
        .arg(fast_config(dir.path()))
        .arg("--log-file")
        .arg(&log)
        .arg("--output")
        .arg(&output)
        .arg("--signal-file")
        .arg(&signal_file)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while !signal_file.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(signal_file.exists(), "monitor never confirmed a best");
    std::thread::sleep(Duration::from_millis(200));

    let status = std::process::Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let out = child.wait_with_output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["mode"], "monitor");
    assert_eq!(report["counters"]["records_read"], 4);
    assert_eq!(report["counters"]["confirmations"], 1);
    assert_eq!(report["bests"][0]["concurrency"], 4);

    let signal: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&signal_file).unwrap()).unwrap();
    assert_eq!(signal["best_batch"], 4);
    assert_eq!(signal["input_len"], 128);
}
