//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

fn relay() -> Command {
    match Command::cargo_bin("guardian-relay") {
        Ok(cmd) => cmd,
        Err(err) => panic!("binary should be built: {err}"),
    }
}

#[test]
fn main_defines_subcommands() {
    let source = main_source();
    assert!(source.contains("Start"));
    assert!(source.contains("Check"));
    assert!(source.contains("Normalize"));
}

#[test]
fn normalize_prints_chat_id() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = relay()
        .current_dir(tmp.path())
        .env_remove("RELAY_CONFIG_PATH")
        .env_remove("RELAY_COUNTRY_CODE")
        .args(["normalize", "+51 987-654-321"])
        .output()
        .expect("command should run");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "51987654321@c.us");
}

#[test]
fn normalize_uses_config_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("relay.toml");
    std::fs::write(&path, "[delivery]\ncountry_code = \"57\"\n").expect("should write config");

    let output = relay()
        .env_remove("RELAY_COUNTRY_CODE")
        .arg("--config")
        .arg(&path)
        .args(["normalize", "3001234567"])
        .output()
        .expect("command should run");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "573001234567@c.us");
}

#[test]
fn check_rejects_invalid_config() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("relay.toml");
    std::fs::write(&path, "[delivery]\ntemplate = \"Hola {principal}\"\n")
        .expect("should write config");

    relay()
        .arg("--config")
        .arg(&path)
        .arg("check")
        .assert()
        .failure();
}
