//! Binary round trip: JSON request on stdin, JSON result on stdout.

use std::io::Write;
use std::process::{Command, Stdio};

fn run_cli(request: &str) -> serde_json::Value {
    let workspaces = tempfile::tempdir().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_codebox"))
        .env("CODEBOX__SANDBOX__PREFER_ISOLATION", "false")
        .env("CODEBOX__SANDBOX__WORKSPACE_ROOT", workspaces.path())
        .env("RUST_LOG", "warn")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(request.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_rejected_request_prints_security_violation() {
    let result = run_cli(r#"{"language": "sh", "code": "rm -rf /"}"#);
    assert_eq!(result["status"], "SECURITY_VIOLATION");
    assert_eq!(result["language"], "shell");
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("Forbidden command: rm"));
}

#[test]
fn test_malformed_request_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_codebox"))
        .env("CODEBOX__SANDBOX__PREFER_ISOLATION", "false")
        .env("RUST_LOG", "off")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
