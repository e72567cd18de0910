// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end specs driving the real `voxd` binary over its Unix socket
//! (spec §8 scenarios), black-box: every client here is a plain socket
//! conversation, the same shape any real caller would use.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::Child;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use serde_json::{json, Value};

const WAIT_MAX: Duration = Duration::from_secs(5);

struct Daemon {
    child: Child,
    socket: PathBuf,
    pid_file: PathBuf,
    #[allow(dead_code)]
    dir: tempfile::TempDir,
}

impl Daemon {
    fn start(extra_args: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("voxd.sock");
        let pid_file = dir.path().join("voxd.pid");

        let mut cmd = Command::cargo_bin("voxd").expect("voxd binary built");
        cmd.arg("--foreground")
            .arg("--socket")
            .arg(&socket)
            .arg("--pid-file")
            .arg(&pid_file)
            .arg("--working-dir")
            .arg(dir.path())
            .args(extra_args);

        let child = cmd.spawn().expect("spawn voxd");
        let daemon = Daemon { child, socket, pid_file, dir };
        daemon.wait_for_socket();
        daemon
    }

    fn wait_for_socket(&self) {
        let deadline = Instant::now() + WAIT_MAX;
        while Instant::now() < deadline {
            if self.socket.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("voxd never created its socket at {}", self.socket.display());
    }

    fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket).expect("connect to voxd socket")
    }

    /// Stop via the control surface (SIGTERM + wait, per spec §4.10), the
    /// same path an operator's `voxd --stop` invocation takes.
    fn stop_gracefully(mut self) {
        Command::cargo_bin("voxd")
            .expect("voxd binary built")
            .arg("--stop")
            .arg("--pid-file")
            .arg(&self.pid_file)
            .assert()
            .success();
        let _ = self.child.wait();
        assert!(!self.pid_file.exists(), "pid file should be removed after stop");
        assert!(!self.socket.exists(), "socket should be removed after stop");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        // Best-effort: tests that already stopped the daemon gracefully
        // leave nothing alive for this to find.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn send_json_request(stream: &mut UnixStream, request: &Value) -> Value {
    let mut line = serde_json::to_vec(request).expect("serialize request");
    line.push(b'\n');
    stream.write_all(&line).expect("write request");

    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut response_line = String::new();
    reader.read_line(&mut response_line).expect("read response line");
    serde_json::from_str(&response_line).expect("parse response JSON")
}

#[test]
fn ping_round_trip_over_json_socket() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let response = send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 1}));
    assert_eq!(response["result"]["pong"], json!(true));
    assert_eq!(response["id"], json!(1));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn unknown_method_yields_method_not_found_error() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let response =
        send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "nope", "id": "a"}));
    assert_eq!(response["error"]["code"], json!(-32601));
    assert_eq!(response["id"], json!("a"));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn notification_produces_no_response_but_connection_stays_usable() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    // No `id` member: a notification. No reply should arrive for this one.
    let mut line = serde_json::to_vec(&json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
    line.push(b'\n');
    stream.write_all(&line).unwrap();

    // The next request on the same connection must still get answered,
    // proving the notification did not wedge the read loop waiting on a
    // response that was never going to come.
    let response = send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 2}));
    assert_eq!(response["result"]["pong"], json!(true));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn echo_returns_params_verbatim() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let response = send_json_request(
        &mut stream,
        &json!({"jsonrpc": "2.0", "method": "echo", "params": {"a": 1, "b": "two"}, "id": 9}),
    );
    assert_eq!(response["result"], json!({"a": 1, "b": "two"}));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn status_reports_running_pid_and_zeroed_queue_depth_when_idle() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let response = send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "status", "id": 1}));
    assert_eq!(response["result"]["status"], json!("running"));
    assert_eq!(response["result"]["queue_depth"], json!(0));
    assert_eq!(response["result"]["queue_timed_out"], json!(0));
    assert_eq!(response["result"]["requests_processed"], json!(0));
    assert!(response["result"]["worker_count"].as_u64().unwrap() >= 1);

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn list_methods_includes_every_builtin() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let response =
        send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "list_methods", "id": 1}));
    let methods: Vec<String> = response["result"]["methods"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["method"].as_str().unwrap().to_string())
        .collect();
    for expected in ["ping", "version", "status", "echo", "list_methods"] {
        assert!(methods.contains(&expected.to_string()), "missing {expected}");
    }

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn malformed_json_yields_parse_error_with_null_id() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    // Balanced braces (so the framer considers the message complete) but
    // not valid JSON (trailing comma before the closing brace), so
    // protocol detection still sees the leading `{"` and classifies this
    // as JSON rather than falling through to the binary path.
    stream.write_all(br#"{"a":,}"#).unwrap();
    stream.write_all(b"\n").unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], json!(-32700));
    assert_eq!(response["id"], Value::Null);

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn oversize_json_buffer_is_rejected_without_closing_the_connection() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    // An object that never closes, past the 64 KiB buffered threshold;
    // the connection layer must synthesize a parse error and reset its
    // buffer rather than growing it without bound.
    let mut oversized = br#"{"jsonrpc":"2.0","method":"echo","id":1,"params":{"blob":""#.to_vec();
    oversized.extend(std::iter::repeat(b'a').take(70 * 1024));
    stream.write_all(&oversized).unwrap();

    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], json!(-32700));

    // The connection itself must still be alive afterward.
    drop(reader);
    let follow_up = send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 2}));
    assert_eq!(follow_up["result"]["pong"], json!(true));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn binary_protocol_round_trips_a_ping_request() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let payload = serde_json::to_vec(&json!({"jsonrpc": "2.0", "method": "ping", "id": 1})).unwrap();
    let mut wire = Vec::with_capacity(16 + payload.len());
    wire.extend_from_slice(&7u32.to_be_bytes()); // id
    wire.extend_from_slice(&0u32.to_be_bytes()); // msg_type
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(&0u32.to_be_bytes()); // timestamp_high
    wire.extend_from_slice(&payload);
    stream.write_all(&wire).unwrap();

    let mut header = [0u8; 16];
    stream.read_exact(&mut header).unwrap();
    let length = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    let response: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(response["result"]["pong"], json!(true));
    // The reply header must echo the request's own id (spec §4.1).
    assert_eq!(u32::from_be_bytes(header[0..4].try_into().unwrap()), 7);

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn status_control_flag_reports_running_then_stopped() {
    let daemon = Daemon::start(&[]);

    let output = Command::cargo_bin("voxd")
        .unwrap()
        .arg("--status")
        .arg("--pid-file")
        .arg(&daemon.pid_file)
        .output()
        .expect("run voxd --status");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("running"));

    daemon.stop_gracefully();
}

#[test]
fn reload_flag_succeeds_against_a_running_instance() {
    let daemon = Daemon::start(&[]);

    Command::cargo_bin("voxd")
        .unwrap()
        .arg("--reload")
        .arg("--pid-file")
        .arg(&daemon.pid_file)
        .assert()
        .success();

    daemon.stop_gracefully();
}

#[test]
fn reload_flag_against_no_running_instance_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file: PathBuf = dir.path().join("nobody-home.pid");

    Command::cargo_bin("voxd")
        .unwrap()
        .arg("--reload")
        .arg("--pid-file")
        .arg(&pid_file)
        .assert()
        .failure();
}

#[test]
fn priority_queue_flag_is_accepted_and_daemon_still_answers() {
    let daemon = Daemon::start(&["--priority-queue", "--workers", "2", "--queue-size", "16"]);
    let mut stream = daemon.connect();

    let response = send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "ping", "id": 1}));
    assert_eq!(response["result"]["pong"], json!(true));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn version_method_reports_protocol_two_dot_zero() {
    let daemon = Daemon::start(&[]);
    let mut stream = daemon.connect();

    let response = send_json_request(&mut stream, &json!({"jsonrpc": "2.0", "method": "version", "id": 1}));
    assert_eq!(response["result"]["protocol"], json!("2.0"));

    drop(stream);
    daemon.stop_gracefully();
}

#[test]
fn second_invocation_while_running_refuses_to_start() {
    let daemon = Daemon::start(&[]);

    let second = Command::cargo_bin("voxd")
        .unwrap()
        .arg("--foreground")
        .arg("--socket")
        .arg(daemon.dir.path().join("other.sock"))
        .arg("--pid-file")
        .arg(&daemon.pid_file)
        .output()
        .expect("spawn second voxd");
    assert!(!second.status.success(), "second instance must refuse to start while the pid file is live");

    daemon.stop_gracefully();
}
