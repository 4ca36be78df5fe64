use std::path::PathBuf;

use auth_pipeline::config::{self, LoadConfigError, PipelineConfig};
use pretty_assertions::assert_eq;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn minimal_config() {
    let expected = PipelineConfig::default();

    let actual = config::load_config_from_file(fixture_path("00-minimal.toml"), false, None)
        .expect("should be able to load config file");

    assert_eq!(expected, actual);
}

#[test]
fn global_properties_config() {
    let expected = PipelineConfig {
        base_url: Some("https://api.example.com".to_string()),
        unauthorized_status: Some(401),
        renewal_cookie_name: Some("refreshToken".to_string()),
        ..Default::default()
    };

    let actual =
        config::load_config_from_file(fixture_path("01-global-properties.toml"), false, None)
            .expect("should be able to load config file");

    assert_eq!(expected, actual);
}

#[test]
fn default_profile_overlays_global_properties() {
    let expected = PipelineConfig {
        base_url: Some("https://api.example.com".to_string()),
        renewal_cookie_name: Some("refreshToken".to_string()),
        send_tokens_in_body: Some(true),
        ..Default::default()
    };

    let actual = config::load_config_from_file(fixture_path("02-profiles.toml"), false, None)
        .expect("should be able to load config file");

    assert_eq!(expected, actual);
}

#[test]
fn named_profile_overrides_global_properties() {
    let expected = PipelineConfig {
        base_url: Some("https://staging.example.com".to_string()),
        login_path: Some("/v2/session".to_string()),
        refresh_path: Some("/v2/session/renew".to_string()),
        unauthorized_status: Some(419),
        renewal_cookie_name: Some("refreshToken".to_string()),
        send_tokens_in_body: Some(false),
    };

    let actual =
        config::load_config_from_file(fixture_path("02-profiles.toml"), false, Some("staging"))
            .expect("should be able to load config file");

    assert_eq!(expected, actual);
    assert_eq!(
        actual.refresh_uri().unwrap(),
        "https://staging.example.com/v2/session/renew"
    );
}

#[test]
fn unknown_profile_falls_back_to_global_properties() {
    let actual =
        config::load_config_from_file(fixture_path("02-profiles.toml"), false, Some("nope"))
            .expect("should be able to load config file");

    assert_eq!(actual.base_url().unwrap(), "https://api.example.com");
    assert_eq!(actual.send_tokens_in_body, None);
}

#[test]
fn load_config_from_file_invalid_version() {
    let result =
        config::load_config_from_file(fixture_path("03-invalid-version.toml"), false, None);
    assert!(matches!(
        result,
        Err(LoadConfigError::UnsupportedConfigVersion(2))
    ));
}

#[test]
fn load_config_from_file_missing_version() {
    let result =
        config::load_config_from_file(fixture_path("04-missing-version.toml"), false, None);
    assert!(matches!(
        result,
        Err(LoadConfigError::UnsupportedConfigVersion(0))
    ));
}

#[test]
fn missing_file_is_an_error() {
    let result = config::load_config_from_file(fixture_path("does-not-exist.toml"), false, None);
    assert!(matches!(result, Err(LoadConfigError::FailedToBuildConfig(_))));
}
