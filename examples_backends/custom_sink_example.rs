use std::sync::Arc;

use tracing::{error, info};
use tracing_log_pipeline::config::{self, LoggingConfig};
use tracing_log_pipeline::error::SinkError;
use tracing_log_pipeline::init::init_tracing;
use tracing_log_pipeline::{fields, LogSink, Logger, Sink};

/// Example of integrating a completely custom destination by implementing
/// the `LogSink` trait directly. Imagine this talks to some proprietary
/// store for which this crate does not provide a built-in sink.
struct MyCustomDbSink;

impl LogSink for MyCustomDbSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        // Here you would call your own client library for the target store.
        println!("[my-custom-db] {}", line);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::configure(
        LoggingConfig::new("custom-sink-example").stream(Sink::Handler(Arc::new(MyCustomDbSink))),
    )?;
    init_tracing()?;

    info!("custom sink example started");
    error!(db = "my-custom-db", "simulated error sent via custom sink");

    let log = Logger::named("orders");
    let console = log.add(Sink::callback(|line| eprintln!("[callback] {}", line)), None)?;
    log.warning("order {id} is late", fields! { "id" => 1042, "minutes" => 17 });
    log.remove(Some(console));
    Ok(())
}
