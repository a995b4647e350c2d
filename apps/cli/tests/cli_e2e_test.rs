//! End-to-end tests for the `edaforge` binary.
//!
//! Every test runs in its own temporary workspace with the simulated tool
//! runner, so no EDA executables are needed.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn edaforge(workspace: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("edaforge").unwrap();
    cmd.arg("--workspace").arg(workspace.path()).arg("--simulate").arg("--log-level").arg("warn");
    cmd
}

#[test]
fn test_strategies_lists_all() {
    let mut cmd = Command::cargo_bin("edaforge").unwrap();
    cmd.arg("strategies")
        .assert()
        .success()
        .stdout(predicate::str::contains("bayesian"))
        .stdout(predicate::str::contains("transfer_learning"))
        .stdout(predicate::str::contains("ensemble"));
}

#[test]
fn test_strategies_json_output() {
    let mut cmd = Command::cargo_bin("edaforge").unwrap();
    let assert = cmd.arg("strategies").arg("--json").assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("strategies JSON should be valid");
    let names: Vec<&str> = json.as_array().unwrap().iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["bayesian", "transfer_learning", "ensemble"]);
}

#[test]
fn test_run_simulated_job() {
    let workspace = TempDir::new().unwrap();
    edaforge(&workspace)
        .args(["run", "verilator", "--project", "proj_1", "-p", "optimization_level=2", "-p", "language_extensions=sv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"))
        .stdout(predicate::str::contains("execution_time"));
}

#[test]
fn test_run_rejects_out_of_range_parameter() {
    let workspace = TempDir::new().unwrap();
    edaforge(&workspace)
        .args(["run", "verilator", "-p", "optimization_level=7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("optimization_level"));
}

#[test]
fn test_run_json_output() {
    let workspace = TempDir::new().unwrap();
    let assert = edaforge(&workspace).args(["run", "yosys", "-p", "target=ice40", "--json"]).assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let job: serde_json::Value = serde_json::from_str(&stdout).expect("job JSON should be valid");
    assert_eq!(job["status"], "succeeded");
    assert_eq!(job["tool_name"], "yosys");
}

#[test]
fn test_template_save_duplicate_and_recommend() {
    let workspace = TempDir::new().unwrap();
    let save = ["template", "save", "yosys", "asic_optimization", "-p", "target=asic", "--tag", "asic"];

    edaforge(&workspace).args(save).assert().success().stdout(predicate::str::contains("Saved template"));
    edaforge(&workspace).args(save).assert().failure().stderr(predicate::str::contains("asic_optimization"));
    edaforge(&workspace).args(save).arg("--overwrite").assert().success();

    edaforge(&workspace)
        .args(["recommend", "yosys", "--tag", "asic"])
        .assert()
        .success()
        .stdout(predicate::str::contains("asic_optimization"));
}

#[test]
fn test_optimize_json_output() {
    let workspace = TempDir::new().unwrap();
    let assert = edaforge(&workspace)
        .args([
            "optimize",
            "verilator",
            "--project",
            "proj_opt",
            "-t",
            "execution_time=40",
            "--max-iterations",
            "3",
            "--json",
        ])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let session: serde_json::Value = serde_json::from_str(&stdout).expect("session JSON should be valid");
    let status = session["status"].as_str().unwrap();
    assert!(status == "converged" || status == "exhausted", "unexpected status {status}");
    assert!(session["trial_history"].as_array().unwrap().len() <= 3);
}

#[test]
fn test_optimize_requires_targets() {
    let workspace = TempDir::new().unwrap();
    edaforge(&workspace).args(["optimize", "verilator", "--project", "p"]).assert().failure();
}

#[test]
fn test_health_json_output() {
    let workspace = TempDir::new().unwrap();
    let assert = edaforge(&workspace).args(["health", "--json"]).assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let report: serde_json::Value = serde_json::from_str(&stdout).expect("health JSON should be valid");
    assert_eq!(report["health"]["ready"], true);
    assert_eq!(report["cache"]["cache_size"], 0);
}

#[test]
fn test_run_with_input_file_records_digest() {
    let workspace = TempDir::new().unwrap();
    let rtl = workspace.path().join("top.v");
    std::fs::write(&rtl, "module top; endmodule\n").unwrap();

    let assert = edaforge(&workspace)
        .args(["run", "yosys", "-p", "target=ice40", "--json", "-i"])
        .arg(format!("rtl={}", rtl.display()))
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let job: serde_json::Value = serde_json::from_str(&stdout).expect("job JSON should be valid");
    let artifact = &job["inputs"]["artifacts"]["rtl"];
    assert_eq!(artifact["path"], rtl.display().to_string());
    assert_eq!(artifact["digest"].as_str().unwrap().len(), 64);
}

#[test]
fn test_run_with_missing_input_fails() {
    let workspace = TempDir::new().unwrap();
    edaforge(&workspace)
        .args(["run", "yosys", "-i", "rtl=/nonexistent/edaforge/top.v"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rtl"));
}

#[test]
fn test_result_cache_is_per_invocation() {
    let workspace = TempDir::new().unwrap();
    for _ in 0..2 {
        let assert = edaforge(&workspace).args(["run", "verilator", "-p", "optimization_level=1", "--json"]).assert().success();
        let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
        let job: serde_json::Value = serde_json::from_str(&stdout).expect("job JSON should be valid");
        assert_eq!(job["cache_hit"], false);
    }
}
