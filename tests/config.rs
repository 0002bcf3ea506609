use anyhow::Result;
use bulkload::config::{PipelineConfig, config_from_env};
use bulkload::error::IngestError;
use bulkload::model::MAX_CHUNK_ROWS;
use std::collections::HashMap;
use std::path::Path;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn defaults_match_the_deployed_system() {
    let cfg = PipelineConfig::default();
    assert_eq!(cfg.chunk_size, 1000);
    assert_eq!(cfg.row_buffer, 1000);
    assert_eq!(cfg.queue_name, "csv_chunk_queue");
    assert_eq!(cfg.cache_prefix, "users:");
    assert_eq!(cfg.failure_log_path, Path::new("logs/failed_inserts.log"));
    assert_eq!(cfg.max_delivery_attempts, None);
    assert_eq!(cfg.compression, "gzip");
    assert!(cfg.validate().is_ok());
}

#[test]
fn overrides_from_variables() -> Result<()> {
    let cfg = PipelineConfig::from_env_map(&vars(&[
        ("chunk_size", "250"),
        ("queue_name", "imports"),
        ("cache_prefix", "v2:users:"),
        ("failure_log", "/var/log/failed.ndjson"),
        ("prefetch", "4"),
        ("max_delivery_attempts", "5"),
        ("publish_retries", "2"),
    ]))?;
    assert_eq!(cfg.chunk_size, 250);
    assert_eq!(cfg.row_buffer, 250, "row buffer follows chunk size");
    assert_eq!(cfg.queue_name, "imports");
    assert_eq!(cfg.cache_prefix, "v2:users:");
    assert_eq!(cfg.failure_log_path, Path::new("/var/log/failed.ndjson"));
    assert_eq!(cfg.prefetch, 4);
    assert_eq!(cfg.max_delivery_attempts, Some(5));
    assert_eq!(cfg.publish_retry.max_attempts, 2);
    Ok(())
}

#[test]
fn explicit_row_buffer_wins() -> Result<()> {
    let cfg = PipelineConfig::from_env_map(&vars(&[("chunk_size", "100"), ("row_buffer", "7")]))?;
    assert_eq!((cfg.chunk_size, cfg.row_buffer), (100, 7));
    Ok(())
}

#[test]
fn zero_attempt_cap_disables_dead_lettering() -> Result<()> {
    let cfg = PipelineConfig::from_env_map(&vars(&[("max_delivery_attempts", "0")]))?;
    assert_eq!(cfg.max_delivery_attempts, None);
    Ok(())
}

#[test]
fn invalid_values_are_config_errors() {
    for pairs in [
        vec![("chunk_size", "lots")],
        vec![("chunk_size", "0")],
        vec![("prefetch", "-1")],
        vec![("compression", "lz4")],
        vec![("queue_name", "  ")],
        vec![("chunk_size", "10000")],
        vec![("publish_retry_backoff_multiplier", "0.5")],
    ] {
        let err = PipelineConfig::from_env_map(&vars(&pairs)).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)), "{pairs:?}: {err:?}");
    }
}

#[test]
fn largest_insertable_chunk_is_accepted() -> Result<()> {
    assert_eq!(MAX_CHUNK_ROWS, 9362);
    let max = MAX_CHUNK_ROWS.to_string();
    let cfg = PipelineConfig::from_env_map(&vars(&[("chunk_size", max.as_str())]))?;
    assert_eq!(cfg.chunk_size, MAX_CHUNK_ROWS);

    let over = PipelineConfig {
        chunk_size: MAX_CHUNK_ROWS + 1,
        ..PipelineConfig::default()
    };
    assert!(matches!(over.validate(), Err(IngestError::Config(_))));
    Ok(())
}

#[test]
fn retry_backoff_is_configurable_from_variables() -> Result<()> {
    let cfg = PipelineConfig::from_env_map(&vars(&[
        ("publish_retry_initial_delay_ms", "20"),
        ("publish_retry_max_delay_ms", "400"),
        ("publish_retry_backoff_multiplier", "3"),
    ]))?;
    assert_eq!(cfg.publish_retry.initial_delay_ms, 20);
    assert_eq!(cfg.publish_retry.max_delay_ms, 400);
    assert!((cfg.publish_retry.backoff_multiplier - 3.0).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn toml_document_sets_fields_and_keeps_defaults() -> Result<()> {
    let cfg = PipelineConfig::from_toml_str(
        r#"
chunk_size = 500
queue_name = "imports"
max_delivery_attempts = 4

[publish_retry]
max_attempts = 3
initial_delay_ms = 250
backoff_multiplier = 1.5
"#,
    )?;
    assert_eq!(cfg.chunk_size, 500);
    assert_eq!(cfg.row_buffer, 500, "row buffer follows chunk size");
    assert_eq!(cfg.queue_name, "imports");
    assert_eq!(cfg.max_delivery_attempts, Some(4));
    assert_eq!(cfg.publish_retry.max_attempts, 3);
    assert_eq!(cfg.publish_retry.initial_delay_ms, 250);
    assert_eq!(cfg.publish_retry.max_delay_ms, 5000);
    assert_eq!(cfg.cache_prefix, "users:");
    Ok(())
}

#[test]
fn variables_override_the_file() -> Result<()> {
    let cfg = PipelineConfig::layered(
        Some("chunk_size = 500\nrow_buffer = 50\nprefetch = 2\n"),
        &vars(&[("chunk_size", "200"), ("prefetch", "8")]),
    )?;
    assert_eq!(cfg.chunk_size, 200);
    assert_eq!(cfg.row_buffer, 50, "row buffer set in the file is kept");
    assert_eq!(cfg.prefetch, 8);
    Ok(())
}

#[test]
fn malformed_or_unknown_toml_is_a_config_error() {
    for text in [
        "chunk_size = \"lots\"",
        "chunk_sise = 10",
        "[publish_retry]\nmax_tries = 2",
        "chunk_size = 20000",
        "not toml at all",
    ] {
        let err = PipelineConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)), "{text:?}: {err:?}");
    }
}

#[test]
fn config_file_is_read_from_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bulkload.toml");
    std::fs::write(&path, "queue_name = \"from-file\"\n")?;
    let cfg = PipelineConfig::from_file_and_env(&path)?;
    assert_eq!(cfg.queue_name, "from-file");

    let missing = PipelineConfig::from_file_and_env(dir.path().join("absent.toml"));
    assert!(matches!(missing, Err(IngestError::Io { .. })));
    Ok(())
}

#[test]
fn env_collection_strips_prefix_and_lowercases() {
    // SAFETY: no other test in this binary reads this variable
    unsafe { std::env::set_var("BULKLOAD_TEST_ONLY_CHUNK_SIZE", "5") };
    let found = config_from_env("BULKLOAD_TEST_ONLY_");
    assert_eq!(found.get("chunk_size").map(String::as_str), Some("5"));
    unsafe { std::env::remove_var("BULKLOAD_TEST_ONLY_CHUNK_SIZE") };
}
