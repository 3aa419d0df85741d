//! Workspace-level specs.
//!
//! These run real binaries as subprocesses rather than calling library code
//! directly. They're deliberately narrow: booting the full `loaderd` orchestrator
//! requires a real accelerator (the VRAM guardrail in `loader-engine` fails closed
//! when it can't read one, per §4.3), so that isn't exercised here. What's left
//! is everything that doesn't depend on a GPU being present: `loaderctl`'s error
//! path when nothing is listening, and a worker binary's wire contract end to end.

use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use loader_core::Speaker;
use loader_wire::{l, Ack};
use serial_test::serial;

#[test]
fn loaderctl_reports_unreachable_daemon() {
    // Port 1 is a privileged port nothing in this suite ever binds; connecting
    // to it refuses immediately instead of risking a timeout.
    let output = Command::new(cargo_bin("loaderctl"))
        .args(["--port", "1", "status"])
        .output()
        .expect("run loaderctl");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("could not reach loaderd"), "stderr was: {stderr}");
}

/// Minimal valid config.ini for a standalone `loader-logger` process: only the
/// `[logger]` section's port is actually bound by this binary, but `Config::load`
/// validates every section up front, so the rest have to be well-formed too.
fn logger_only_config(log_dir: &Path, port: u16) -> String {
    format!(
        "
[system]
min_vram_mb = 8000
log_dir = {}

[loader]
port = 5002
parallel_phase_timeout_ms = 5000

[logger]
port = {}
app_log_file = app.log
dialog_log_prefix = dialog_
rotation_size_mb = 10
rotation_count = 3
console_echo = none
console_show_time = true
console_colors = false

[kwd]
port = 5003
model_path = /models/kwd.onnx
confidence_threshold = 0.75
cooldown_ms = 2000
yes_phrases = yes;sure
warmup_greeting = hi

[stt]
port = 5004
model_name = base.en
language = en
vad_silence_ms = 800
aec_enabled = true

[llm]
port = 5005
model = llama3
modelfile_path = /models/Modelfile

[tts]
port = 5006
voice = default
device = cpu
sample_rate = 22050
buffer_size_ms = 200
",
        log_dir.display(),
        port
    )
}

struct KilledOnDrop(Child);

impl Drop for KilledOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_for_port(port: u16, max: Duration) -> bool {
    let deadline = Instant::now() + max;
    while Instant::now() < deadline {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[tokio::test]
#[serial]
async fn logger_worker_writes_an_app_log_line_over_the_wire() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("config.ini");
    let port = 19_551;
    std::fs::write(&config_path, logger_only_config(dir.path(), port)).expect("write config");

    let child = Command::new(cargo_bin("loader-logger"))
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn loader-logger");
    let _guard = KilledOnDrop(child);

    assert!(wait_for_port(port, Duration::from_secs(5)), "loader-logger never opened its port");

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    let req = l::Request::WriteApp(l::WriteAppRequest {
        service: "stt".into(),
        event: "service_start".into(),
        message: "ready".into(),
        level: "INFO".into(),
        timestamp_ms: 1_000,
    });
    loader_wire::write_frame(&mut stream, &req).await.expect("write");
    let ack: Ack = loader_wire::read_frame(&mut stream).await.expect("ack");
    assert!(ack.success);

    let contents = std::fs::read_to_string(dir.path().join("app.log")).expect("read app.log");
    assert!(contents.contains("\"event\":\"service_start\""));
}

#[tokio::test]
#[serial]
async fn logger_worker_roundtrips_a_dialog_transcript_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("config.ini");
    let port = 19_552;
    std::fs::write(&config_path, logger_only_config(dir.path(), port)).expect("write config");

    let child = Command::new(cargo_bin("loader-logger"))
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn loader-logger");
    let _guard = KilledOnDrop(child);

    assert!(wait_for_port(port, Duration::from_secs(5)), "loader-logger never opened its port");

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    loader_wire::write_frame(&mut stream, &l::Request::NewDialog(l::NewDialogRequest { timestamp_ms: 1_785_857_445_123 }))
        .await
        .expect("write");
    let response: l::NewDialogResponse = loader_wire::read_frame(&mut stream).await.expect("response");
    assert_eq!(response.dialog_id, "20260804_153045_123");

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    let req = l::Request::WriteDialog(l::WriteDialogRequest {
        dialog_id: response.dialog_id.clone(),
        speaker: Speaker::User,
        text: "what time is it".into(),
        timestamp_ms: 1_785_857_445_123,
    });
    loader_wire::write_frame(&mut stream, &req).await.expect("write");
    let ack: Ack = loader_wire::read_frame(&mut stream).await.expect("ack");
    assert!(ack.success);

    let contents = std::fs::read_to_string(&response.file_path).expect("read dialog log");
    assert!(contents.contains("USER: what time is it"));
}

#[test]
fn loaderctl_start_reports_failure_from_an_unknown_service() {
    // Also exercised against an unreachable daemon: the point here is the exit
    // code path for a transport failure, not the RPC semantics of `start`.
    let output = Command::new(cargo_bin("loaderctl"))
        .args(["--port", "1", "start", "kwd"])
        .output()
        .expect("run loaderctl");

    assert_eq!(output.status.code(), Some(2));
}

/// `loaderctl check --output json` should at least produce syntactically
/// valid output when it has nothing to talk to -- i.e. it should fail before
/// ever reaching the output formatter, not print malformed JSON.
#[test]
fn loaderctl_check_against_unreachable_daemon_prints_no_output() {
    let output = Command::new(cargo_bin("loaderctl"))
        .args(["--port", "1", "--output", "json", "check"])
        .output()
        .expect("run loaderctl");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
