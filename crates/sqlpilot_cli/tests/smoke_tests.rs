//! CLI smoke tests — verify basic binary behavior.

use std::process::Command;

fn cli_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sqlpilot"))
}

#[test]
fn test_help_flag() {
    let output = cli_bin().arg("--help").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Usage"),
        "Expected usage info in --help output"
    );
    // The gateway's own knobs must be wired into the arg parser.
    assert!(stdout.contains("--config"), "Expected --config in --help output");
    assert!(stdout.contains("--host"), "Expected --host in --help output");
    assert!(stdout.contains("--port"), "Expected --port in --help output");
}

#[test]
fn test_version_flag() {
    let output = cli_bin().arg("--version").output().expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("sqlpilot"),
        "Expected binary name in --version output"
    );
}

#[test]
fn test_invalid_config_does_not_panic() {
    // A nonexistent config file falls back to defaults; --help exits before
    // any network work happens.
    let output = cli_bin()
        .arg("--config")
        .arg("/tmp/nonexistent_sqlpilot_config_12345.toml")
        .arg("--help")
        .output()
        .expect("failed to run");
    assert!(output.status.success());
}
