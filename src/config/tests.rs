use std::env;
use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::load_config;
use super::settings::{PartialServerSettings, PartialSettings, Settings};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 1883);
    assert_eq!(settings.server.registration_port, 1884);
    assert_eq!(settings.server.max_frame_bytes, 1024 * 1024);
    assert_eq!(settings.registry.refresh_interval_secs, 60);
    assert_eq!(settings.dlx.timeout_secs, 10);
    assert!(settings.balancer.enabled);
}

#[test]
fn registration_port_follows_client_port_when_unset() {
    let partial = PartialSettings {
        server: Some(PartialServerSettings {
            port: Some(2000),
            ..Default::default()
        }),
        ..Default::default()
    };
    let settings = partial.merge_onto(Settings::default());
    assert_eq!(settings.server.port, 2000);
    assert_eq!(settings.server.registration_port, 2001);
}

#[test]
#[serial]
fn load_config_reads_environment_overrides() {
    temp_env::with_vars(
        [
            ("ZILMQTT__DLX__TIMEOUT_SECS", Some("3")),
            ("ZILMQTT__BALANCER__ENABLED", Some("false")),
            ("ZILMQTT__LEDGER__PATH", Some("/tmp/zil-ledger")),
            ("ZILMQTT__SERVER__MAX_FRAME_BYTES", Some("4096")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.dlx.timeout_secs, 3);
            assert!(!cfg.balancer.enabled);
            assert_eq!(cfg.ledger.path, "/tmp/zil-ledger");
            assert_eq!(cfg.server.max_frame_bytes, 4096);
            assert_eq!(cfg.server.port, 1883);
        },
    );
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "127.0.0.1"
        port = 9000

        [registry]
        refresh_interval_secs = 5

        [log]
        level = "debug"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.registration_port, 9001);
    assert_eq!(cfg.registry.refresh_interval_secs, 5);
    assert_eq!(cfg.log.level, "debug");
    assert_eq!(cfg.dlx.timeout_secs, 10);
}
