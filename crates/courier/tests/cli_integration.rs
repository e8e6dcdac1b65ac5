use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::process::{Command, Output, Stdio};

fn courier() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_courier"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run_hook(mut cmd: Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_courier_version() {
    let output = courier().arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0.1.0"));
}

#[test]
fn test_courier_help() {
    let output = courier().arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("hook"));
    assert!(stdout.contains("init"));
}

#[test]
fn test_init_writes_config_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("courier.toml");

    let first = courier().arg("init").arg(&path).output().unwrap();
    assert!(first.status.success());
    assert!(std::fs::read_to_string(&path).unwrap().contains("[telegram]"));

    let second = courier().arg("init").arg(&path).output().unwrap();
    assert!(!second.status.success());
}

#[test]
fn test_hook_without_relay_still_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = courier();
    cmd.arg("hook").env("COURIER_RUNTIME_DIR", dir.path());

    let output = run_hook(
        cmd,
        r#"{"hook_event_name": "Stop", "session_id": "s1", "cwd": "/work/api"}"#,
    );
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        r#"{"continue": true}"#
    );
}

#[test]
fn test_hook_with_garbage_input_still_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = courier();
    cmd.arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("hook")
        .env("COURIER_RUNTIME_DIR", dir.path());

    let output = run_hook(cmd, "definitely not json");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        r#"{"continue": true}"#
    );
}

#[test]
fn test_hook_delivers_to_socket_named_after_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("courier-api.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    let relay = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        stream.write_all(br#"{"continue":true}"#).unwrap();
        received
    });

    let mut cmd = courier();
    cmd.arg("hook").env("COURIER_RUNTIME_DIR", dir.path());
    let output = run_hook(
        cmd,
        r#"{"hook_event_name": "UserPromptSubmit", "session_id": "s1", "cwd": "/work/api", "prompt": "hi"}"#,
    );
    assert!(output.status.success());

    let received: serde_json::Value = serde_json::from_slice(&relay.join().unwrap()).unwrap();
    assert_eq!(received["prompt"], "hi");
    assert!(received["timestamp"].is_string());
}

#[test]
fn test_hook_from_subdirectory_reaches_project_relay() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("courier-api.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    let relay = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        stream.write_all(br#"{"continue":true}"#).unwrap();
        received
    });

    let mut cmd = courier();
    cmd.arg("hook").env("COURIER_RUNTIME_DIR", dir.path());
    let output = run_hook(
        cmd,
        r#"{"hook_event_name": "Stop", "session_id": "s1", "cwd": "/work/api/src/handlers"}"#,
    );
    assert!(output.status.success());

    let received: serde_json::Value = serde_json::from_slice(&relay.join().unwrap()).unwrap();
    assert_eq!(received["cwd"], "/work/api/src/handlers");
}
