mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::json_harness;
use tracing_log_pipeline::config;
use tracing_log_pipeline::error::SinkError;
use tracing_log_pipeline::handler::Handler;
use tracing_log_pipeline::queued::QueueConfig;
use tracing_log_pipeline::sink::MemorySink;
use tracing_log_pipeline::{fields, ConfigError, Level, LogSink, Logger, Sink};

#[test]
fn test_queued_delivery_preserves_order() {
    let h = json_harness();
    let listener = config::configure_queued_logging(None, QueueConfig::default()).unwrap();

    let log = Logger::named("app");
    for i in 0..200 {
        log.info("event {i}", fields! { "i" => i });
    }
    listener.stop();

    let lines = h.sink.json_lines();
    assert_eq!(lines.len(), 200);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line["message"], format!("event {}", i));
    }
    assert_eq!(listener.stats().delivered(), 200);
}

#[test]
fn test_second_queue_is_rejected() {
    let _h = json_harness();
    let _listener = config::configure_queued_logging(None, QueueConfig::default()).unwrap();
    let err = config::configure_queued_logging(None, QueueConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::AlreadyQueued));
}

#[test]
fn test_unknown_handler_is_rejected() {
    let _h = json_harness();
    let err = config::configure_queued_logging(Some(u64::MAX), QueueConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownHandler(id) if id == u64::MAX));
}

#[test]
fn test_no_handlers_is_rejected() {
    let _h = json_harness();
    for id in config::handler_ids() {
        config::remove_handler(id);
    }
    let err = config::configure_queued_logging(None, QueueConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::NoSuitableHandler));
}

#[test]
fn test_reset_stops_worker_after_draining() {
    let h = json_harness();
    let listener = config::configure_queued_logging(None, QueueConfig::default()).unwrap();
    Logger::named("app").info("pending", ());

    config::reset();
    assert!(!listener.is_running());
    assert_eq!(h.sink.lines().len(), 1);
}

struct SlowSink {
    inner: MemorySink,
}

impl LogSink for SlowSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        thread::sleep(Duration::from_millis(20));
        self.inner.write(line)
    }
}

#[test]
fn test_slow_handler_does_not_block_callers() {
    let _h = json_harness();
    let slow = Arc::new(SlowSink {
        inner: MemorySink::new(),
    });
    let id = config::add_handler(Handler::json(slow.clone(), Level::Debug));
    let listener = config::configure_queued_logging(Some(id), QueueConfig::default()).unwrap();

    let log = Logger::named("app");
    let start = Instant::now();
    for _ in 0..20 {
        log.info("fast", ());
    }
    assert!(start.elapsed() < Duration::from_millis(200));

    listener.stop();
    assert_eq!(slow.inner.lines().len(), 20);
}

#[test]
fn test_shutdown_delivers_pending_entries() {
    let h = json_harness();
    let slow = Arc::new(SlowSink {
        inner: MemorySink::new(),
    });
    let id = config::add_handler(Handler::json(slow.clone(), Level::Debug));
    let listener = config::configure_queued_logging(Some(id), QueueConfig::default()).unwrap();

    let log = Logger::named("app");
    for i in 0..5 {
        log.info("before exit {i}", fields! { "i" => i });
    }
    config::shutdown();

    assert!(!listener.is_running());
    assert_eq!(slow.inner.lines().len(), 5);
    assert_eq!(listener.stats().delivered(), 5);

    // Handlers keep working in-line once the worker is gone.
    log.info("after shutdown", ());
    assert_eq!(slow.inner.lines().len(), 6);
    assert_eq!(h.sink.lines().len(), 6);
}

#[test]
fn test_panicking_queued_handler_does_not_feed_itself() {
    let h = json_harness();
    config::install_panic_hook();
    let sink = Sink::callback(|_line: &str| panic!("sink exploded"))
        .into_log_sink()
        .unwrap();
    let id = config::add_handler(Handler::json(sink, Level::Debug));
    let queue_config = QueueConfig {
        max_retries: 1,
        retry_backoff: Duration::from_millis(1),
        ..QueueConfig::default()
    };
    let listener = config::configure_queued_logging(Some(id), queue_config).unwrap();

    Logger::named("app").info("trigger", ());
    thread::sleep(Duration::from_millis(50));
    listener.stop();

    assert_eq!(listener.stats().enqueued(), 1);
    assert_eq!(listener.stats().failed(), 1);
    let lines = h.sink.json_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["message"], "trigger");
}
