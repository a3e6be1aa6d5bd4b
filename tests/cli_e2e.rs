//! The `shellguard` binary end to end: exit codes and output formats.

mod common;

use assert_cmd::Command;
use common::write_file;
use serde_json::Value;
use tempfile::TempDir;

/// Binary with an empty config file so host configuration never leaks in.
fn shellguard(dir: &TempDir) -> Command {
    let config = write_file(dir.path(), "shellguard.toml", "");
    let mut cmd = Command::cargo_bin("shellguard").unwrap();
    cmd.arg("--config").arg(config).arg("--color").arg("never");
    cmd
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ============================================================================
// check
// ============================================================================

#[test]
fn safe_command_exits_zero() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["check", "ls -la"])
        .assert()
        .code(0);
    assert!(stdout(assert.get_output()).contains("ALLOWED"));
}

#[test]
fn critical_command_exits_one() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["check", "rm -rf /"])
        .assert()
        .code(1);
    let out = stdout(assert.get_output());
    assert!(out.contains("BLOCKED"));
    assert!(out.contains("rm-rf-root"));
    assert!(out.contains('^'));
}

#[test]
fn confirmation_only_fails_when_asked() {
    let dir = TempDir::new().unwrap();
    shellguard(&dir)
        .args(["check", "chmod 777 /etc/passwd"])
        .assert()
        .code(0);
    shellguard(&dir)
        .args(["check", "--fail-on-confirm", "chmod 777 /etc/passwd"])
        .assert()
        .code(2);
}

#[test]
fn strictness_flag_overrides_the_config() {
    let dir = TempDir::new().unwrap();
    shellguard(&dir)
        .args(["check", "--strictness", "strict", "chmod 777 /etc/passwd"])
        .assert()
        .code(1);
}

#[test]
fn json_output_is_machine_readable() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["check", "--format", "json", ":(){ :|:& };:"])
        .assert()
        .code(1);
    let value: Value = serde_json::from_str(&stdout(assert.get_output())).unwrap();
    assert_eq!(value["risk_level"], "critical");
    assert_eq!(value["blocked"], true);
    let ids: Vec<&str> = value["matched"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["pattern_id"].as_str())
        .collect();
    assert!(ids.contains(&"fork-bomb"));
}

#[test]
fn compact_output_is_one_line() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["check", "--format", "compact", "rm -rf /"])
        .assert()
        .code(1);
    let out = stdout(assert.get_output());
    assert_eq!(out.lines().count(), 1);
    assert!(out.starts_with("BLOCKED critical"));
}

#[test]
fn command_can_come_from_stdin() {
    let dir = TempDir::new().unwrap();
    shellguard(&dir)
        .args(["check", "--stdin", "--format", "compact"])
        .write_stdin("rm -rf /\n")
        .assert()
        .code(1);
}

#[test]
fn powershell_dialect_is_selectable() {
    let dir = TempDir::new().unwrap();
    shellguard(&dir)
        .args(["check", "--shell", "powershell", "Format-Volume -DriveLetter D"])
        .assert()
        .code(1);
}

#[test]
fn extra_rule_files_apply() {
    let dir = TempDir::new().unwrap();
    let rules = write_file(
        dir.path(),
        "infra.toml",
        r#"
[[rule]]
id = "terraform-destroy"
category = "system_modification"
severity = "critical"
domain = "infrastructure"
pattern = 'terraform\s+destroy'
"#,
    );
    let assert = shellguard(&dir)
        .arg("check")
        .arg("--rules")
        .arg(&rules)
        .args(["--format", "compact", "terraform destroy"])
        .assert()
        .code(1);
    assert!(stdout(assert.get_output()).contains("terraform-destroy"));
}

// ============================================================================
// usage errors
// ============================================================================

#[test]
fn unknown_shell_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    shellguard(&dir)
        .args(["check", "--shell", "tcsh", "ls"])
        .assert()
        .code(3);
}

#[test]
fn missing_config_file_is_a_usage_error() {
    Command::cargo_bin("shellguard")
        .unwrap()
        .args(["--config", "/nonexistent/shellguard.toml", "check", "ls"])
        .assert()
        .code(3);
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let config = write_file(dir.path(), "bad.toml", "strictness = \"paranoid\"\n");
    Command::cargo_bin("shellguard")
        .unwrap()
        .arg("--config")
        .arg(config)
        .args(["check", "ls"])
        .assert()
        .code(3);
}

// ============================================================================
// parse / rules / config
// ============================================================================

#[test]
fn parse_prints_the_syntax_tree() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["parse", "cat file | grep x"])
        .assert()
        .code(0);
    let value: Value = serde_json::from_str(&stdout(assert.get_output())).unwrap();
    assert_eq!(value["dialect"], "bash");
}

#[test]
fn incomplete_parse_exits_one() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["parse", "echo \"unterminated"])
        .assert()
        .code(1);
    let value: Value = serde_json::from_str(&stdout(assert.get_output())).unwrap();
    assert_eq!(value["status"], "incomplete");
}

#[test]
fn rules_list_json_includes_builtins() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["rules", "list", "--format", "json"])
        .assert()
        .code(0);
    let value: Value = serde_json::from_str(&stdout(assert.get_output())).unwrap();
    let ids: Vec<&str> = value
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["id"].as_str())
        .collect();
    assert!(ids.contains(&"fork-bomb"));
    assert!(ids.contains(&"fetched-code-execution"));
}

#[test]
fn rules_list_filters_by_domain() {
    let dir = TempDir::new().unwrap();
    let assert = shellguard(&dir)
        .args(["rules", "list", "--domain", "permissions", "--format", "json"])
        .assert()
        .code(0);
    let value: Value = serde_json::from_str(&stdout(assert.get_output())).unwrap();
    let rows = value.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|r| r["domain"] == "permissions"));
}

#[test]
fn rules_check_reports_bad_files() {
    let dir = TempDir::new().unwrap();
    let good = write_file(
        dir.path(),
        "good.toml",
        "[[rule]]\nid = \"helm-uninstall\"\ncategory = \"system_modification\"\nseverity = \"moderate\"\npattern = 'helm\\s+uninstall'\n",
    );
    let bad = write_file(
        dir.path(),
        "bad.toml",
        "[[rule]]\nid = \"fork-bomb\"\ncategory = \"resource_exhaustion\"\nseverity = \"low\"\npattern = 'x'\n",
    );
    shellguard(&dir)
        .args(["rules", "check"])
        .arg(&good)
        .assert()
        .code(0);
    let assert = shellguard(&dir)
        .args(["rules", "check"])
        .arg(&bad)
        .assert()
        .code(3);
    assert!(stdout(assert.get_output()).contains("fork-bomb"));
}

#[test]
fn config_prints_the_effective_policy() {
    let dir = TempDir::new().unwrap();
    let config = write_file(dir.path(), "strict.toml", "strictness = \"strict\"\n");
    let assert = Command::cargo_bin("shellguard")
        .unwrap()
        .arg("--config")
        .arg(config)
        .args(["config", "--format", "json"])
        .assert()
        .code(0);
    let value: Value = serde_json::from_str(&stdout(assert.get_output())).unwrap();
    assert_eq!(value["strictness"], "strict");
    assert_eq!(value["enable_structural_analysis"], true);
}
