mod common;

use std::sync::Arc;

use common::{harness, json_harness};
use tracing_log_pipeline::config::{self, LoggingConfig};
use tracing_log_pipeline::context::get_contextvars;
use tracing_log_pipeline::exceptions::{handling, CapturedError};
use tracing_log_pipeline::sink::MemorySink;
use tracing_log_pipeline::{fields, Fields, Level, Logger, Sink};

#[test]
fn test_named_placeholder_formats_and_is_consumed() {
    let h = json_harness();
    Logger::named("app").info("Hello {name}", fields! { "name" => "world", "request_id" => "r-1" });

    let lines = h.sink.json_lines();
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert_eq!(line["message"], "Hello world");
    assert!(line.get("name").is_none());
    assert_eq!(line["request_id"], "r-1");
    assert_eq!(line["logger"], "app");
    assert_eq!(line["level"], "INFO");
    assert_eq!(line["severity"], 6);
    assert_eq!(line["service"], "test");
    assert!(line["timestamp"].as_str().unwrap().ends_with('Z'));
    assert!(line.get("event").is_none());
}

#[test]
fn test_failed_format_keeps_raw_message_and_fields() {
    let h = json_harness();
    let log = Logger::named("app");
    log.info("Hello {missing}", fields! { "name" => "world" });
    log.info("{user.name} logged in", fields! { "user" => "bob" });

    let lines = h.sink.json_lines();
    assert_eq!(lines[0]["message"], "Hello {missing}");
    assert_eq!(lines[0]["name"], "world");
    assert_eq!(lines[1]["message"], "{user.name} logged in");
    assert_eq!(lines[1]["user"], "bob");
}

#[test]
fn test_positional_args_are_not_fields() {
    let h = json_harness();
    Logger::named("app").info("{} of {}", Fields::new().arg(3).arg(5));

    let line = &h.sink.json_lines()[0];
    assert_eq!(line["message"], "3 of 5");
    assert_eq!(line.as_object().unwrap().len(), 6);
}

#[test]
fn test_non_string_message() {
    let h = json_harness();
    Logger::named("app").info(42, ());
    assert_eq!(h.sink.json_lines()[0]["message"], "42");
}

#[test]
fn test_level_aliases() {
    let h = json_harness();
    let log = Logger::named("app");
    log.trace("t", ());
    log.success("s", ());
    log.warn("w", ());
    log.fatal("f", ());

    let levels: Vec<String> = h
        .sink
        .json_lines()
        .iter()
        .map(|l| l["level"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(levels, ["DEBUG", "INFO", "WARN", "CRITICAL"]);
}

#[test]
fn test_bound_fields_and_call_fields() {
    let h = json_harness();
    let log = Logger::named("app").bind([("tenant", "acme"), ("region", "eu")]);
    log.info("charged", fields! { "region" => "us", "amount" => 10 });

    let line = &h.sink.json_lines()[0];
    assert_eq!(line["tenant"], "acme");
    assert_eq!(line["region"], "us");
    assert_eq!(line["amount"], 10);
}

#[test]
fn test_events_below_level_are_not_emitted() {
    let h = harness(LoggingConfig::new("test").level(Level::Warn));
    let log = Logger::named("app");
    log.info("hidden", ());
    log.warning("shown", ());

    config::set_logger_level("noisy", Level::Error);
    Logger::named("noisy::client").warning("hidden too", ());
    Logger::named("noisy").error("shown too", ());

    let messages: Vec<String> = h
        .sink
        .json_lines()
        .iter()
        .map(|l| l["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(messages, ["shown", "shown too"]);
}

#[test]
fn test_opt_applies_to_one_call() {
    let h = json_harness();
    let log = Logger::named("app");
    log.opt()
        .exception(CapturedError::new("ValueError", "bad input"))
        .error("validation failed", ());
    log.error("plain", ());

    let lines = h.sink.json_lines();
    assert!(lines[0]["exception"].as_str().unwrap().contains("ValueError: bad input"));
    assert!(lines[0].get("exc_info").is_none());
    assert!(lines[1].get("exception").is_none());
}

#[test]
fn test_opt_stack_info() {
    let h = json_harness();
    Logger::named("app").opt().stack_info(true).info("where am I", ());

    let line = &h.sink.json_lines()[0];
    assert!(line["stack"].is_string());
    assert!(line.get("stack_info").is_none());
}

#[test]
fn test_exception_uses_error_being_handled() {
    let h = json_harness();
    let err = Arc::new(CapturedError::new("KeyError", "'sku'"));
    handling(err, || Logger::named("app").exception("lookup failed", ()));

    let line = &h.sink.json_lines()[0];
    assert_eq!(line["level"], "ERROR");
    assert!(line["exception"].as_str().unwrap().contains("KeyError"));
}

#[test]
fn test_exception_outside_handler_has_no_traceback() {
    let h = json_harness();
    Logger::named("app").exception("nothing raised", ());
    let line = &h.sink.json_lines()[0];
    assert!(line.get("exception").is_none());
}

#[test]
fn test_contextualize_scopes_fields() {
    let h = json_harness();
    let log = Logger::named("app");
    {
        let _guard = log.contextualize([("request_id", "abc")]);
        log.info("inside", ());
    }
    log.info("outside", ());

    let lines = h.sink.json_lines();
    assert_eq!(lines[0]["request_id"], "abc");
    assert!(lines[1].get("request_id").is_none());
    assert!(get_contextvars().is_empty());
}

#[test]
fn test_add_and_remove_handlers() {
    let h = json_harness();
    let log = Logger::named("app");
    let extra = Arc::new(MemorySink::new());
    let id = log.add(Sink::Handler(extra.clone()), Some(Level::Warn)).unwrap();

    log.info("main only", ());
    log.warning("both", ());
    assert_eq!(h.sink.lines().len(), 2);
    assert_eq!(extra.json_lines().len(), 1);
    assert_eq!(extra.json_lines()[0]["message"], "both");

    assert!(log.remove(Some(id)));
    assert!(!log.remove(Some(id)));
    log.warning("after remove", ());
    assert_eq!(extra.lines().len(), 1);
}

#[test]
fn test_remove_none_keeps_configured_handler() {
    let h = json_harness();
    let log = Logger::named("app");
    let a = Arc::new(MemorySink::new());
    let b = Arc::new(MemorySink::new());
    log.add(Sink::Handler(a.clone()), None).unwrap();
    log.add(Sink::Handler(b.clone()), None).unwrap();

    assert!(log.remove(None));
    log.info("x", ());
    assert!(a.lines().is_empty());
    assert!(b.lines().is_empty());
    assert_eq!(h.sink.lines().len(), 1);
}

#[test]
fn test_console_mode() {
    let h = harness(LoggingConfig::new("test").json_logs(false));
    Logger::named("app").info("ready", fields! { "port" => 8080 });

    let lines = h.sink.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("[INFO    ] ready"));
    assert!(lines[0].contains("port=8080"));
}
