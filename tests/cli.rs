use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn zip_sender(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("zip-sender").expect("Binary exists");
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("ZIPSENDER_BOT_TOKEN");
    cmd
}

/// With nothing in input/ or output/ the run exits cleanly and never asks for credentials.
#[test]
fn run_with_nothing_to_do_exits_zero_and_writes_defaults() {
    let dir = tempdir().unwrap();

    zip_sender(dir.path())
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do"))
        .stderr(predicate::str::contains("trace_initialised"));

    assert!(dir.path().join("input").is_dir());
    assert!(dir.path().join("output").is_dir());
    assert!(dir.path().join("config.json").is_file());
    let log = fs::read_to_string(dir.path().join("zipfilesender.log")).unwrap();
    assert!(log.contains("trace_initialised"));
}

/// `pack` archives input folders and never touches the network.
#[test]
fn pack_command_builds_parts_offline() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("input/Comics");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("page.bin"), vec![b'x'; 64]).unwrap();

    zip_sender(dir.path())
        .arg("pack")
        .assert()
        .success()
        .stdout(predicate::str::contains("Comics: 1 part(s), 0 failed, source removed"));

    assert!(dir.path().join("output/Comics/Comics_parte_01.zip").is_file());
    assert!(!src.exists());
}

/// Parts waiting to be sent with no token and a closed stdin fail authentication with exit 1.
#[test]
fn send_without_credentials_exits_one() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("output/Comics");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("Comics_parte_01.zip"), b"zip").unwrap();
    fs::write(dir.path().join("user.session"), b"{}").unwrap();

    zip_sender(dir.path())
        .arg("send")
        .write_stdin("")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Could not connect to Telegram"));

    assert!(!dir.path().join("user.session").exists());
}

#[test]
fn custom_paths_are_honoured() {
    let dir = tempdir().unwrap();

    zip_sender(dir.path())
        .args(["--config", "conf/settings.json", "--input", "in", "--output", "out"])
        .assert()
        .success();

    assert!(dir.path().join("conf/settings.json").is_file());
    assert!(dir.path().join("in").is_dir());
    assert!(dir.path().join("out").is_dir());
}
