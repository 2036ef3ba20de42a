//! Smoke tests for the `mesh-node` binary.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Output, Stdio};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    config_file.write_all(content.as_bytes()).unwrap();
    config_file
}

fn run(config: &tempfile::NamedTempFile, args: &[&str]) -> (Output, String) {
    let bin = env!("CARGO_BIN_EXE_mesh-node");

    // tracing_subscriber writes to stdout by default
    let stdout_file = tempfile::NamedTempFile::new().unwrap();
    let stdout_writer = stdout_file.reopen().unwrap();

    let child = Command::new(bin)
        .args(["--config", config.path().to_str().unwrap()])
        .args(args)
        .env("RUST_LOG_FORMAT", "json")
        .env("RUST_LOG", "info")
        .stdout(Stdio::from(stdout_writer))
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn mesh-node");

    let output = child.wait_with_output().expect("failed to wait on child");
    let stdout_content = std::fs::read_to_string(stdout_file.path()).unwrap();
    (output, stdout_content)
}

fn json_lines(stdout: &str) -> Vec<String> {
    BufReader::new(stdout.as_bytes())
        .lines()
        .map_while(Result::ok)
        .filter(|l| l.starts_with('{'))
        .collect()
}

#[test]
fn check_config_accepts_defaults() {
    let config = write_config("[logging]\nlevel = \"info\"\n");
    let (output, stdout) = run(&config, &["check-config"]);
    assert!(
        output.status.success(),
        "expected exit code 0, got {:?}",
        output.status.code()
    );
    let lines = json_lines(&stdout);
    assert!(
        lines.iter().any(|l| l.contains("configuration ok")),
        "expected a JSON log line, got: {stdout}"
    );
}

#[test]
fn check_config_rejects_invalid_ttl() {
    let config = write_config("[network]\ndefault_ttl = 1\n");
    let (output, stdout) = run(&config, &["check-config"]);
    assert!(!output.status.success());
    assert!(
        stdout.contains("default_ttl"),
        "expected the offending field in the log, got: {stdout}"
    );
}

#[test]
fn missing_config_file_fails() {
    let bin = env!("CARGO_BIN_EXE_mesh-node");
    let output = Command::new(bin)
        .args(["--config", "/nonexistent/mesh-node.toml", "check-config"])
        .output()
        .expect("failed to run mesh-node");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load config"), "stderr: {stderr}");
}

#[test]
fn demo_provisions_and_delivers_messages() {
    let config = write_config(
        "[network]\n\
         unicast_address = 1\n\
         \n\
         [provisioning]\n\
         static_oob_key = \"00112233445566778899aabbccddeeff\"\n\
         timeout_secs = 20\n",
    );
    let (output, stdout) = run(&config, &["demo", "--payload", "48"]);
    assert!(
        output.status.success(),
        "expected exit code 0, got {:?}: {stdout}",
        output.status.code()
    );
    let lines = json_lines(&stdout);
    assert!(lines.iter().any(|l| l.contains("provisioning finished")));
    assert_eq!(
        lines.iter().filter(|l| l.contains("message delivered")).count(),
        2,
        "stdout: {stdout}"
    );
    assert!(lines.iter().any(|l| l.contains("demo complete")));
}
