mod common;

use std::fs;

use common::json_harness;
use tracing_log_pipeline::config;
use tracing_log_pipeline::env::{JSON_LOGS_ENV, LOG_LEVEL_ENV, LOG_PATH_ENV};
use tracing_log_pipeline::{Level, Logger};

#[test]
fn test_setup_from_env_adds_rotating_file() {
    let _h = json_harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.jsonl");

    temp_env::with_vars(
        [
            (LOG_LEVEL_ENV, Some("debug")),
            (JSON_LOGS_ENV, Some("1")),
            (LOG_PATH_ENV, Some(path.to_str().unwrap())),
        ],
        || {
            config::setup_from_env("env-service", &["noisy"]).unwrap();
            assert_eq!(config::effective_level("app"), Level::Debug);
            assert_eq!(config::effective_level("noisy.pool"), Level::Warn);
            assert!(config::json_logs());

            Logger::named("app").debug("kept", ());
            Logger::named("noisy").info("suppressed", ());
            Logger::named("noisy").warning("kept too", ());
        },
    );

    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["message"], "kept");
    assert_eq!(lines[0]["service"], "env-service");
    assert_eq!(lines[1]["logger"], "noisy");
}

#[test]
fn test_setup_from_env_console_mode() {
    let _h = json_harness();
    temp_env::with_vars(
        [
            (LOG_LEVEL_ENV, Some("bogus")),
            (JSON_LOGS_ENV, Some("0")),
            (LOG_PATH_ENV, None),
        ],
        || {
            config::setup_from_env("svc", &[]).unwrap();
            assert!(!config::json_logs());
            assert_eq!(config::effective_level("app"), Level::Info);
            assert_eq!(config::handler_ids().len(), 1);
        },
    );
}

#[test]
fn test_snapshot_restore_round_trip() {
    let h = json_harness();
    let before = config::handler_ids();
    let snapshot = config::snapshot();

    config::set_level(Level::Error);
    config::set_logger_level("app", Level::Debug);
    let extra = config::add_handler(tracing_log_pipeline::handler::Handler::json(
        std::sync::Arc::new(tracing_log_pipeline::noop_sink::NullSink),
        Level::Debug,
    ));
    assert!(config::handler_ids().contains(&extra));

    config::restore(snapshot);
    assert_eq!(config::handler_ids(), before);
    assert_eq!(config::effective_level("app"), Level::Debug);
    assert_eq!(config::effective_level("other"), Level::Debug);
    Logger::named("other").debug("visible", ());
    assert_eq!(h.sink.lines().len(), 1);
}
