use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use tracing_log_pipeline::config::{self, LoggingConfig};
use tracing_log_pipeline::init::init_tracing;
use tracing_log_pipeline::noop_sink::NullSink;
use tracing_log_pipeline::{fields, Logger, Sink};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::configure(LoggingConfig::new("load").stream(Sink::Handler(Arc::new(NullSink))))?;
    init_tracing()?;

    let n: u64 = 100_000;
    let log = Logger::named("load").bind([("run", "default")]);

    let start = Instant::now();
    for i in 0..n {
        log.error("default load test error {i}", fields! { "i" => i, "worker" => 1 });
    }
    let elapsed = start.elapsed();
    println!(
        "facade: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    let start = Instant::now();
    for i in 0..n {
        error!(iteration = i, "default load test error");
    }
    let elapsed = start.elapsed();
    println!(
        "tracing: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
