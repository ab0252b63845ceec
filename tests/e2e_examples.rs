mod common;

#[cfg(feature = "e2e")]
use common::{CommandOutput, TestContext};

// These tests reach the real GitHub API and download real release assets;
// they only run with `cargo test --features e2e`.

#[test]
#[cfg(feature = "e2e")]
fn e2e_install_and_activate_latest() {
    let ctx = TestContext::new();
    ctx.write_toolset("tools:\n  - repo: derailed/k9s\n");

    let output: CommandOutput = ctx
        .cmd()
        .arg("install")
        .output()
        .expect("Failed to run ghrm")
        .into();

    output.assert_success().assert_stdout_contains("installed");

    let tool_root = ctx.data_dir.join("tools").join("k9s");
    let current = tool_root.join("current");
    assert!(current.exists(), "activation link missing");
    let resolved = std::fs::canonicalize(&current).unwrap();
    assert!(resolved.is_dir());

    // One success record in the history.
    let output: CommandOutput = ctx
        .cmd()
        .arg("history")
        .output()
        .expect("Failed to run ghrm")
        .into();
    output
        .assert_success()
        .assert_stdout_contains("SUCCESS")
        .assert_stdout_contains("derailed/k9s");
}

#[test]
#[cfg(feature = "e2e")]
fn e2e_second_install_reuses_cache_and_version_dir() {
    let ctx = TestContext::new();
    ctx.write_toolset("tools:\n  - repo: derailed/k9s\n");

    ctx.cmd().arg("install").output().expect("first install");

    let tool_root = ctx.data_dir.join("tools").join("k9s");
    let dirs_before = std::fs::read_dir(&tool_root).unwrap().count();

    let output: CommandOutput = ctx
        .cmd()
        .arg("install")
        .output()
        .expect("second install")
        .into();
    output
        .assert_success()
        .assert_stdout_contains("already up to date");

    let dirs_after = std::fs::read_dir(&tool_root).unwrap().count();
    assert_eq!(dirs_before, dirs_after, "no duplicate version directory");
}

#[test]
#[cfg(feature = "e2e")]
fn e2e_pinned_install_then_rollback_after_update() {
    let ctx = TestContext::new();
    // Install a pinned older release first, then move the pin forward and
    // update; rollback must land on the first install.
    ctx.write_toolset("tools:\n  - repo: derailed/k9s\n    version: v0.31.9\n");
    let output: CommandOutput = ctx
        .cmd()
        .arg("install")
        .output()
        .expect("pinned install")
        .into();
    output.assert_success();

    ctx.write_toolset("tools:\n  - repo: derailed/k9s\n    version: v0.32.5\n");
    let output: CommandOutput = ctx
        .cmd()
        .arg("install")
        .output()
        .expect("updated install")
        .into();
    output.assert_success().assert_stdout_contains("updated");

    let output: CommandOutput = ctx
        .cmd()
        .args(["rollback", "derailed/k9s"])
        .output()
        .expect("rollback")
        .into();
    output
        .assert_success()
        .assert_stdout_contains("rolled back")
        .assert_stdout_contains("v0.31.9");
}
