// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use spu_video::config::ProtocolErrorPolicy;
use spu_video::errors::ConfigError;
use spu_video::Config;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = Config::default();

    // Check sensible defaults
    assert!(config.converter_keep_alive, "Converter should stay resident");
    assert!(config.writer_keep_alive, "Writer should stay resident");
    assert!(!config.scaler_keep_alive, "Scaler should run once per frame");
    assert!(config.double_buffering);
    assert_eq!(config.protocol_error_policy, ProtocolErrorPolicy::DropFrame);
    assert_eq!(config.mailbox_timeout(), None);
}

#[test]
fn test_config_partial_file_keeps_defaults() {
    // Test that unspecified fields fall back to their defaults
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "coprocessor_cores": 2, "protocol_error_policy": "Abort", "mailbox_timeout_ms": 250 }}"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.coprocessor_cores, 2);
    assert_eq!(config.protocol_error_policy, ProtocolErrorPolicy::Abort);
    assert_eq!(config.mailbox_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(config.local_store_size, Config::default().local_store_size);
    assert!(config.writer_keep_alive);
}

#[test]
fn test_config_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let config = Config::load_or_default(Some(&path)).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_invalid_file_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(
        Config::load_or_default(Some(file.path())),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_config_poll_interval_is_never_zero() {
    let config = Config {
        poll_interval_us: 0,
        ..Config::default()
    };
    assert_eq!(config.poll_interval(), Duration::from_micros(1));
}

#[test]
fn test_config_round_trips_through_json() {
    let config = Config {
        scaler_keep_alive: true,
        double_buffering: false,
        ..Config::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let parsed: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}
