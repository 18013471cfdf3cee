use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "pathshuffle-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

#[test]
fn cli_offline_json_report_writes_output() {
    let exe = env!("CARGO_BIN_EXE_pathshuffle-tester");
    let output_path = temp_path("offline");
    let status = Command::new(exe)
        .args([
            "--mode",
            "offline",
            "--seeds",
            "abc,1337",
            "--encounters",
            "12",
            "--report",
            "json",
            "--output",
        ])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(output_path).expect("read output");
    let report: serde_json::Value = serde_json::from_str(&content).expect("json report");
    let results = report.as_array().expect("array");
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r["passed"] == true));
    assert!(content.contains("scenario_name"));
}

#[test]
fn cli_rehearsal_console_report_succeeds() {
    let exe = env!("CARGO_BIN_EXE_pathshuffle-tester");
    let output = Command::new(exe)
        .args(["--mode", "rehearsal", "--seeds", "rehearse", "--encounters", "9"])
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Pathshuffle Tester"));
    assert!(stdout.contains("Randomizer Check Summary"));
}

#[test]
fn cli_missing_campaign_file_fails() {
    let exe = env!("CARGO_BIN_EXE_pathshuffle-tester");
    let output_path = temp_path("missing");
    let output = Command::new(exe)
        .args(["--campaign"])
        .arg(&output_path)
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"));
}

#[test]
fn cli_connect_requires_server() {
    let exe = env!("CARGO_BIN_EXE_pathshuffle-tester");
    let output = Command::new(exe)
        .args(["--mode", "connect", "--slot", "Hero"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--server is required"));
}
