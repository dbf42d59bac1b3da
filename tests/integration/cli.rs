use std::process::{Command, Output};

fn symequiv(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_symequiv"))
        .args(args)
        .output()
        .expect("Failed to execute symequiv")
}

#[test]
fn test_list_shows_experiments() {
    let output = symequiv(&["list"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["ffs", "hash", "loops", "sha1", "feal", "aes"] {
        assert!(stdout.contains(name), "list should mention {}", name);
    }
}

#[test]
fn test_run_requires_experiment() {
    let output = symequiv(&["run"]);
    assert!(!output.status.success(), "Should fail without an experiment name");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("EXPERIMENT"),
        "Should report the missing argument"
    );
}

#[test]
fn test_run_unknown_experiment() {
    let output = symequiv(&["run", "nope"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown experiment"));
}

#[test]
fn test_run_single_job_summary() {
    let output = symequiv(&["run", "loops", "--job", "add2", "-j", "1"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("Experiment: loops"));
    assert!(stdout.contains("add2: VERIFIED"));
    assert!(stdout.contains("Verified: 1"));
}

#[test]
fn test_run_json_output() {
    let output = symequiv(&["run", "ffs", "--job", "ffs_bug", "--json"]);
    // a falsified job is reported through the exit code
    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    let reports = value["reports"].as_array().expect("reports array");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["job"], "ffs_bug");
    assert_eq!(reports[0]["status"], "Falsified");
    assert!(reports[0]["counterexample"].is_object());
}
