use std::{env, fs};

use concierge_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("concierge.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
request_timeout_ms = 1000
body_limit_bytes = 1024

[logging]
level = "debug"

[redis]
enabled = true
url = "redis://cache:6379"
pool_size = 4

[cache]
default_ttl_secs = 60
reaper_interval_secs = 30

[audit]
batch_size = 25
flush_interval_ms = 2000

[storage.postgres]
url = "postgres://audit:secret@db:5432/concierge"
pool_size = 5
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert!(cfg.redis.enabled);
    assert_eq!(cfg.redis.pool_size, 4);
    assert_eq!(cfg.cache.default_ttl_secs, 60);
    assert_eq!(cfg.audit.batch_size, 25);
    assert!(cfg.audit.batching_enabled);
    let pg = cfg.storage.postgres.as_ref().expect("postgres section");
    assert_eq!(pg.pool_size, 5);
    assert_eq!(pg.connect_timeout_ms, 5000);

    // 2) Env override should win over file
    unsafe {
        env::set_var("CONCIERGE__AUDIT__BATCH_SIZE", "7");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.audit.batch_size, 7);
    unsafe {
        env::remove_var("CONCIERGE__AUDIT__BATCH_SIZE");
    }

    // 3) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[audit]
flush_interval_ms = 0
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("flush_interval_ms"));
}

#[test]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults should be valid");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.audit.flush_interval_ms, 10_000);
    assert!(cfg.storage.postgres.is_none());
}
