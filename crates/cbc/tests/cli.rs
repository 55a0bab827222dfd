#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Command, Output};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/cbccli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn cbc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cbc"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .env_remove("CBC_CONFIG")
        .env_remove("CBC_LOG_LEVEL")
        .output()
        .expect("cbc should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn encode_prints_known_frame() {
    let output = cbc(&[
        "--format", "pretty", "encode", "--channel", "5", "--priority", "3", "--sequence", "2",
        "--data", "hi",
    ]);
    assert!(output.status.success());
    // 05 | len 0x02 | (5 << 3) | 3 | "hi" | ff ff | checksum
    assert!(stdout(&output).trim().starts_with("05022b6869ffff"));
}

#[test]
fn encode_then_decode_roundtrip() {
    let encoded = cbc(&["--format", "pretty", "encode", "-c", "cbc-raw2", "--data", "hello"]);
    assert!(encoded.status.success());
    let hex = stdout(&encoded).trim().to_string();

    let decoded = cbc(&["--format", "json", "decode", "--hex", &hex]);
    assert!(decoded.status.success());
    let text = stdout(&decoded);
    assert!(text.contains("\"channel\":9"));
    assert!(text.contains("\"kind\":\"raw\""));
    assert!(text.contains("\"text\":\"hello\""));
    assert!(text.contains("\"frames_received\":1"));
}

#[test]
fn decode_skips_garbage_and_reports_it() {
    let encoded = cbc(&["--format", "pretty", "encode", "-c", "2", "--data", "12345"]);
    let frame = stdout(&encoded).trim().to_string();
    let hex = format!("aaaa05{frame}");

    let output = cbc(&["--format", "json", "decode", "--hex", &hex]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("\"bytes_skipped\":2"));
    assert!(text.contains("\"checksum_errors\":1"));

    let strict = cbc(&["--format", "json", "decode", "--strict", "--hex", &hex]);
    assert_eq!(strict.status.code(), Some(60));
}

#[test]
fn decode_strict_accepts_trailing_idle_fill() {
    let encoded = cbc(&["--format", "pretty", "encode", "-c", "1", "--data", "up"]);
    let frame = stdout(&encoded).trim().to_string();

    let clean = cbc(&[
        "--format",
        "json",
        "decode",
        "--strict",
        "--hex",
        &format!("{frame}ffffff"),
    ]);
    assert!(clean.status.success());
    assert!(stdout(&clean).contains("\"incomplete_bytes\":0"));

    let cut = cbc(&[
        "--format",
        "json",
        "decode",
        "--strict",
        "--hex",
        &format!("{frame}0508"),
    ]);
    assert_eq!(cut.status.code(), Some(60));
}

#[test]
fn decode_rejects_bad_hex() {
    let output = cbc(&["decode", "--hex", "zz"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn channels_lists_table() {
    let output = cbc(&["--format", "json", "channels"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("\"name\":\"cbc-raw11\""));
    assert!(text.contains("\"name\":\"cbc-debug-in\""));
}

#[test]
fn config_overrides_priority() {
    let dir = unique_temp_dir("config");
    let path = dir.join("session.json");
    std::fs::write(&path, r#"{"channel_priorities": {"4": 7}}"#).unwrap();

    let output = cbc(&[
        "--format",
        "json",
        "--config",
        path.to_str().unwrap(),
        "encode",
        "-c",
        "diagnosis",
        "--data",
        "d",
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("\"priority\":7"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_file_then_listen() {
    let dir = unique_temp_dir("send");
    let device = dir.join("capture.bin");
    let device_arg = device.to_str().unwrap();

    for payload in ["one", "two", "three"] {
        let output = cbc(&[
            "--format", "json", "send", device_arg, "--no-tty", "-c", "lifecycle", "--data",
            payload,
        ]);
        assert!(output.status.success(), "send failed: {output:?}");
        assert!(stdout(&output).contains("\"frames\":1"));
    }

    let output = cbc(&["--format", "json", "listen", device_arg, "--no-tty", "--count", "2"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("\"text\":\"one\""));
    assert!(!text.contains("\"text\":\"three\""));

    let output = cbc(&["--format", "json", "decode", "--file", device_arg]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("\"frames_received\":3"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_split_spreads_over_frames() {
    let dir = unique_temp_dir("split");
    let device = dir.join("capture.bin");
    let data = "x".repeat(200);

    let output = cbc(&[
        "--format",
        "json",
        "send",
        device.to_str().unwrap(),
        "--no-tty",
        "-c",
        "dlt",
        "--split",
        "--data",
        &data,
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("\"frames\":3"));
    assert!(text.contains("\"bytes\":200"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_debug_channel_is_usage_error() {
    let dir = unique_temp_dir("debug");
    let device = dir.join("capture.bin");
    let output = cbc(&[
        "send",
        device.to_str().unwrap(),
        "--no-tty",
        "-c",
        "debug-out",
        "--data",
        "x",
    ]);
    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_regular_file_without_no_tty_fails() {
    let dir = unique_temp_dir("notty");
    let device = dir.join("plain");
    std::fs::write(&device, b"").unwrap();
    let output = cbc(&["send", device.to_str().unwrap(), "-c", "1", "--data", "x"]);
    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unknown_channel_is_usage_error() {
    let output = cbc(&["encode", "-c", "nope", "--data", "x"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_name() {
    let output = cbc(&["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("cbc "));
}
