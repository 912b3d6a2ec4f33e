use std::time::Duration;
use workq::config::{Config, DEFAULT_RESCAN_PERIOD, QueueConfig};

#[test]
fn config_from_env_reads_overrides_and_rejects_garbage() {
    unsafe {
        std::env::set_var("WORKQ_ROOT", "/jobs/pending");
        std::env::set_var("WORKQ_CONCURRENCY", "8");
        std::env::set_var("WORKQ_RESCAN_SECS", "5");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.queue.root, "/jobs/pending");
    assert_eq!(config.concurrency, 8);
    assert_eq!(config.queue.rescan_period, Duration::from_secs(5));
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("WORKQ_CONCURRENCY", "many");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("WORKQ_ROOT");
        std::env::remove_var("WORKQ_CONCURRENCY");
        std::env::remove_var("WORKQ_RESCAN_SECS");
    }
}

#[test]
fn config_from_toml_fills_defaults() {
    let config = Config::from_toml_str(
        r#"
        root = "/cluster/bulk-import"
        concurrency = 2
        wait_recheck_secs = 3
        "#,
    )
    .unwrap();

    assert_eq!(config.queue.root, "/cluster/bulk-import");
    assert_eq!(config.concurrency, 2);
    assert_eq!(config.queue.wait_recheck, Duration::from_secs(3));
    assert_eq!(config.queue.rescan_period, DEFAULT_RESCAN_PERIOD);
    assert_eq!(config.log_level, "info");
}

#[test]
fn config_rejects_bad_values() {
    assert!(Config::from_toml_str("concurrency = 0").is_err());
    assert!(Config::from_toml_str("rescan_period_secs = 0").is_err());
    assert!(Config::from_toml_str("root = \"relative/path\"").is_err());
    assert!(Config::from_toml_str("unknown_key = 1").is_err());
}

#[test]
fn queue_config_defaults_are_valid() {
    let config = QueueConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.rescan_period, Duration::from_secs(60));
    assert_eq!(config.wait_recheck, Duration::from_secs(10));
}
