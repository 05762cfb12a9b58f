//! Configuration file loading tests

use std::io::Write;
use std::time::Duration;
use transfer_engine::config::Config;

#[test]
fn test_load_full_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[solana]
primary_rpc = "http://127.0.0.1:8899"
fallback_rpc = "https://api.devnet.solana.com"
commitment = "finalized"

[ton]
primary_rpc = "http://127.0.0.1:8081/jsonRPC"

[backoff]
min_delay_ms = 100
max_delay_ms = 400
max_failure_count = 3

[pending]
gc_grace_secs = 20
wait_window_secs = 90
history_limit = 10

[logging]
json = true
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.solana.primary_rpc, "http://127.0.0.1:8899");
    assert!(config.solana.commitment_config().unwrap().is_finalized());
    assert_eq!(config.ton.primary_rpc, "http://127.0.0.1:8081/jsonRPC");
    assert_eq!(config.backoff.max_failure_count, 3);
    assert_eq!(config.pending.gc_grace(), Duration::from_secs(20));

    let reconcile = config.pending.reconcile_config();
    assert_eq!(reconcile.history_limit, 10);
    assert_eq!(reconcile.wait_window, Duration::from_secs(90));
    assert!(config.logging.json);
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[backoff]\nmin_delay_ms = 5000\nmax_delay_ms = 100").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("min_delay_ms"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_file(dir.path().join("absent.toml")).is_err());
}
