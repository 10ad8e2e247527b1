//! Integration test: drive the `cranberry` binary against plan files.
//!
//! Only commands that never reach a registry or an external tool are run
//! here (`validate`, `execute --dry-run`, `version`).
//!
//! ## Running
//!
//! ```bash
//! cargo test -p cranberry-cli --test cli
//! ```

use std::path::Path;
use std::process::{Command, Output};

const PLAN: &str = r#"
name: mirror
registries:
  ghcr:
    host: ghcr.io
    username: ${CRANBERRY_TEST_USER:-bot}
    password: ${CRANBERRY_TEST_TOKEN:-token}
images:
  upstream:
    name: timberio/vector
    version: 0.50.0-distroless-static
    digest: sha256:7777777777777777777777777777777777777777777777777777777777777777
  mirror:
    name: ghcr.io/org/vector
    version: 0.50.0-distroless-static
syncs:
  - name: vector
    source: upstream
    destination: mirror
    registry: ghcr
scans:
  - name: vector-scan
    image: mirror
    registry: ghcr
"#;

fn run(args: &[&str], config: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cranberry"))
        .args(args)
        .arg("--config")
        .arg(config)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run `cranberry {}`: {}", args.join(" "), e))
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_validate_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.yaml", "log:\n  level: warn\n");
    let plan = write(dir.path(), "plan.yaml", PLAN);

    let output = run(&["validate", "--plan", &plan], Path::new(&config));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Plan 'mirror' is valid: 1 registries, 0 build nodes"));
    assert!(stdout.contains("1 syncs, 0 builds, 1 scans"));
}

#[test]
fn test_dry_run_prints_actions_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.yaml", "log:\n  level: warn\n");
    let plan = write(dir.path(), "plan.yaml", PLAN);

    let output = run(&["execute", "--plan", &plan, "--dry-run"], Path::new(&config));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let sync = stdout.find("copy timberio/vector").unwrap();
    let scan = stdout.find("vector-scan").unwrap();
    assert!(sync < scan);
}

#[test]
fn test_invalid_plan_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.yaml", "");
    let plan = write(
        dir.path(),
        "plan.yaml",
        "name: broken\nsyncs:\n  - name: vector\n    source: nowhere\n    destination: nowhere\n    registry: nowhere\n",
    );

    let output = run(&["validate", "--plan", &plan], Path::new(&config));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sync 'vector': unknown image 'nowhere'"));
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.yaml", "");
    let output = run(&["version"], Path::new(&config));
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("cranberry version "));
}
