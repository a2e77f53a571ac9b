//! End-to-end tests driving the `quay` binary against an isolated home.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// Test context with a temporary quay home and a seeded local registry.
struct TestContext {
    _temp_dir: TempDir,
    home: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let home = temp_dir.path().join(".quay");
        std::fs::create_dir_all(&home).expect("failed to create quay home");
        Self {
            _temp_dir: temp_dir,
            home,
        }
    }

    fn quay_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_quay"));
        cmd.env("QUAY_HOME", &self.home);
        cmd
    }

    /// Seed the default registry with a manifest for `id` at `version`.
    fn seed_manifest(&self, id: &str, version: &str, extra: &str) {
        let dir = self.home.join("registry").join(id);
        std::fs::create_dir_all(&dir).expect("failed to create registry entry");
        let text = format!("info:\n  id: {id}\n  version: '{version}'\n{extra}");
        std::fs::write(dir.join(format!("{version}.yaml")), text)
            .expect("failed to write manifest");
    }
}

#[test]
fn help_names_every_command() {
    let ctx = TestContext::new();
    let output = ctx
        .quay_cmd()
        .arg("--help")
        .output()
        .expect("failed to run quay");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["install", "uninstall", "activate", "deactivate", "list"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn version_flag_works() {
    let ctx = TestContext::new();
    let output = ctx
        .quay_cmd()
        .arg("--version")
        .output()
        .expect("failed to run quay");
    assert!(output.status.success());
}

#[test]
fn list_on_a_fresh_home_reports_nothing() {
    let ctx = TestContext::new();
    let output = ctx.quay_cmd().arg("list").output().expect("failed to run quay");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("no artifacts installed"));
}

#[test]
fn install_list_uninstall_roundtrip() {
    let ctx = TestContext::new();
    // the first run bootstraps the home (and the default registry folder)
    assert!(ctx.quay_cmd().arg("list").output().unwrap().status.success());

    ctx.seed_manifest("demo/tool", "1.2.0", "");
    ctx.seed_manifest(
        "demo/meta",
        "0.1.0",
        "requires:\n  default:demo/tool: '^1'\n",
    );

    let output = ctx
        .quay_cmd()
        .args(["install", "default:demo/meta"])
        .output()
        .expect("failed to run quay");
    assert!(
        output.status.success(),
        "install failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    // the dependency resolved and installed alongside the request
    assert!(stdout.contains("demo/meta"));
    assert!(stdout.contains("demo/tool"));

    let output = ctx.quay_cmd().arg("list").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("demo/meta"));
    assert!(stdout.contains("demo/tool"));

    let output = ctx
        .quay_cmd()
        .args(["uninstall", "demo/meta", "demo/tool"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let output = ctx.quay_cmd().arg("list").output().unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("no artifacts installed"));
}

#[test]
fn install_of_an_unknown_artifact_fails() {
    let ctx = TestContext::new();
    assert!(ctx.quay_cmd().arg("list").output().unwrap().status.success());

    let output = ctx
        .quay_cmd()
        .args(["install", "default:ghost/tool"])
        .output()
        .expect("failed to run quay");
    assert!(!output.status.success());
}

#[test]
fn unqualified_dependency_aborts_install() {
    let ctx = TestContext::new();
    assert!(ctx.quay_cmd().arg("list").output().unwrap().status.success());

    ctx.seed_manifest("demo/bad", "1.0.0", "requires:\n  no-qualifier: '*'\n");
    let output = ctx
        .quay_cmd()
        .args(["install", "default:demo/bad"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("does not specify the registry"),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
