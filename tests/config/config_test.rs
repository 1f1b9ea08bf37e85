//! Coverage for config parsing, env overrides and validation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use guardian_relay::config::{load_config, Config};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_match_reference_service() {
    let config = Config::default();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.allowed_origins, vec!["*".to_owned()]);
    assert_eq!(config.delivery.country_code, "51");
    assert_eq!(config.delivery.domain_suffix, "c.us");
    assert_eq!(config.delivery.media_path, Some(PathBuf::from("mindi_wsp.png")));
    assert!(config.delivery.recheck_readiness);
    assert!(config.whatsapp.container.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn parse_partial_config() {
    let toml_str = r#"
[server]
port = 8080
allowed_origins = ["https://school.example", "https://admin.school.example"]

[delivery]
country_code = "57"
login_url = "https://school.example/login"
send_timeout_secs = 10

[whatsapp.container]
image = "example/whatsapp-bridge:latest"
"#;
    let config = match Config::from_toml_str(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("partial config should parse: {err}"),
    };
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.allowed_origins.len(), 2);
    assert_eq!(config.delivery.country_code, "57");
    assert_eq!(
        config.delivery.settings().send_timeout,
        Some(Duration::from_secs(10))
    );
    let container = config.whatsapp.container.as_ref();
    assert_eq!(container.map(|c| c.port), Some(3001));
    assert_eq!(
        config.delivery.normalizer().normalize("3001234567").as_str(),
        "573001234567@c.us"
    );
}

#[test]
fn env_overrides_win_over_file_values() {
    let mut config = match Config::from_toml_str("[server]\nport = 8080\n") {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    };
    config.apply_overrides(env_from(&[
        ("PORT", "4000"),
        ("RELAY_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
        ("RELAY_BRIDGE_URL", "http://bridge:3001"),
        ("RELAY_MEDIA_PATH", ""),
        ("RELAY_SEND_TIMEOUT_SECS", "0"),
    ]));
    assert_eq!(config.server.port, 4000);
    assert_eq!(
        config.server.allowed_origins,
        vec!["https://a.example".to_owned(), "https://b.example".to_owned()]
    );
    assert_eq!(config.whatsapp.bridge_url, "http://bridge:3001");
    assert_eq!(config.delivery.media_path, None);
    assert_eq!(config.delivery.settings().send_timeout, None);
}

#[test]
fn invalid_numeric_override_is_ignored() {
    let mut config = Config::default();
    config.apply_overrides(env_from(&[("PORT", "not-a-port")]));
    assert_eq!(config.server.port, 3000);
}

#[test]
fn validate_rejects_bad_country_code() {
    let mut config = Config::default();
    config.delivery.country_code = "+51".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_unknown_template_placeholder() {
    let mut config = Config::default();
    config.delivery.template = "Hola {principal}".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_empty_origin_list() {
    let mut config = Config::default();
    config.server.allowed_origins.clear();
    assert!(config.validate().is_err());
}

#[test]
fn load_config_reads_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("relay.toml");
    std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").expect("should write config");

    let config = load_config(&path);
    assert!(config.is_ok_and(|c| c.logging.level == "debug"));
}

#[test]
fn explicit_missing_path_is_an_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("missing.toml");
    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(Config::from_toml_str("[server]\nport = \"eighty\"\n").is_err());
}
