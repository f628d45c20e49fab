#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing_log_pipeline::config::{self, LoggingConfig, Snapshot};
use tracing_log_pipeline::sink::MemorySink;
use tracing_log_pipeline::Sink;

static GLOBAL: Mutex<()> = Mutex::new(());

/// Holds the global-state lock for one test and restores the previous
/// configuration when dropped.
pub struct Harness {
    pub sink: Arc<MemorySink>,
    snapshot: Option<Snapshot>,
    _guard: MutexGuard<'static, ()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            config::restore(snapshot);
        }
    }
}

/// Configure with `config`, writing the main handler to an in-memory sink.
pub fn harness(config: LoggingConfig) -> Harness {
    let guard = GLOBAL.lock();
    let snapshot = config::snapshot();
    let sink = Arc::new(MemorySink::new());
    config::configure(config.stream(Sink::Handler(sink.clone())))
        .expect("configure with memory sink");
    Harness {
        sink,
        snapshot: Some(snapshot),
        _guard: guard,
    }
}

/// JSON harness at DEBUG for service `test`.
pub fn json_harness() -> Harness {
    harness(LoggingConfig::new("test").level(tracing_log_pipeline::Level::Debug))
}
