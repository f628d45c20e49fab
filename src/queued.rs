//! Non-blocking delivery.
//!
//! [`QueueHandler`] moves rendering and sink I/O off the logging thread:
//! records are pushed into a channel and a single named worker thread
//! renders and writes them in FIFO order. [`QueueListener::stop`] drains
//! everything enqueued so far before joining the worker. Entries still
//! queued when the process exits are lost unless
//! [`shutdown`](crate::config::shutdown) runs first.

use std::cmp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::EmitGuard;
use crate::error::{ConfigError, SinkError};
use crate::handler::Handler;
use crate::level::Level;
use crate::record::EventRecord;

const MAX_BACKOFF: Duration = Duration::from_secs(10);
const WORKER_THREAD_NAME: &str = "log-queue-worker";

/// Queue sizing and retry policy.
///
/// **Fields**
/// - `capacity`: `None` for an unbounded queue (producers never stall), or
///   the maximum number of pending entries; when full, new entries are
///   dropped and counted.
/// - `batch_size`: entries drained per wake-up before the sink is flushed.
/// - `max_retries`: retries of a failed sink write before the line is
///   reported on stderr and discarded.
/// - `retry_backoff`: delay before the first retry, doubled on each
///   further attempt.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub capacity: Option<usize>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            batch_size: 128,
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Counters shared between producers and the worker.
#[derive(Clone, Debug, Default)]
pub struct QueueStats {
    /// Accepted into the channel.
    enqueued: Arc<AtomicU64>,
    /// Written to the sink.
    delivered: Arc<AtomicU64>,
    /// Rejected because the queue was full or already stopped.
    dropped: Arc<AtomicU64>,
    /// Given up on after exhausting retries.
    failed: Arc<AtomicU64>,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

enum QueueMessage {
    Record {
        logger: String,
        method: String,
        record: EventRecord,
    },
    Shutdown,
}

#[derive(Clone, Debug)]
enum QueueSender {
    Bounded(mpsc::Sender<QueueMessage>),
    Unbounded(mpsc::UnboundedSender<QueueMessage>),
}

enum TrySendError {
    Full(QueueMessage),
    Closed,
}

impl QueueSender {
    fn try_send(&self, message: QueueMessage) -> Result<(), TrySendError> {
        match self {
            QueueSender::Bounded(tx) => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(message) => TrySendError::Full(message),
                mpsc::error::TrySendError::Closed(_) => TrySendError::Closed,
            }),
            QueueSender::Unbounded(tx) => tx.send(message).map_err(|_| TrySendError::Closed),
        }
    }
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<QueueMessage>),
    Unbounded(mpsc::UnboundedReceiver<QueueMessage>),
}

impl QueueReceiver {
    fn blocking_recv(&mut self) -> Option<QueueMessage> {
        match self {
            QueueReceiver::Bounded(rx) => rx.blocking_recv(),
            QueueReceiver::Unbounded(rx) => rx.blocking_recv(),
        }
    }

    /// Refuse further sends; messages already buffered stay receivable.
    fn close(&mut self) {
        match self {
            QueueReceiver::Bounded(rx) => rx.close(),
            QueueReceiver::Unbounded(rx) => rx.close(),
        }
    }

    fn try_recv(&mut self) -> Option<QueueMessage> {
        match self {
            QueueReceiver::Bounded(rx) => rx.try_recv().ok(),
            QueueReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Producer side of queued delivery. Cheap to clone.
#[derive(Clone)]
pub struct QueueHandler {
    sender: QueueSender,
    target: Arc<Handler>,
    stats: QueueStats,
}

impl QueueHandler {
    /// Spawn the worker for `target` and return the producer handle with
    /// the listener that owns the worker.
    pub fn start(
        target: Arc<Handler>,
        config: QueueConfig,
    ) -> Result<(QueueHandler, QueueListener), ConfigError> {
        let config = QueueConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        let (sender, receiver) = match config.capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
        };

        let stats = QueueStats::default();
        let worker_target = Arc::clone(&target);
        let worker_stats = stats.clone();
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(receiver, worker_target, config, worker_stats))
            .map_err(ConfigError::Worker)?;

        let handler = QueueHandler {
            sender: sender.clone(),
            target,
            stats: stats.clone(),
        };
        let listener = QueueListener {
            sender,
            worker: Mutex::new(Some(worker)),
            stats,
        };
        Ok((handler, listener))
    }

    /// Hand a record to the worker without waiting for I/O.
    ///
    /// Returns `false` if the record was dropped because the queue is full
    /// or the worker has stopped.
    pub fn enqueue(&self, logger: &str, method: &str, record: EventRecord) -> bool {
        let message = QueueMessage::Record {
            logger: logger.to_string(),
            method: method.to_string(),
            record,
        };
        match self.sender.try_send(message) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn level(&self) -> Level {
        self.target.level()
    }

    pub fn target(&self) -> &Arc<Handler> {
        &self.target
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

/// Owns the worker thread. Stopping drains pending entries first; dropping
/// the listener stops it.
#[derive(Debug)]
pub struct QueueListener {
    sender: QueueSender,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: QueueStats,
}

impl QueueListener {
    /// Deliver everything enqueued so far, then stop the worker.
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let mut message = QueueMessage::Shutdown;
        loop {
            match self.sender.try_send(message) {
                Ok(()) | Err(TrySendError::Closed) => break,
                Err(TrySendError::Full(returned)) => {
                    message = returned;
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        if worker.join().is_err() {
            eprintln!("log queue worker panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

impl Drop for QueueListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(mut receiver: QueueReceiver, target: Arc<Handler>, config: QueueConfig, stats: QueueStats) {
    // Everything this thread does is delivery, so events raised from here
    // (a panicking sink, a sink that logs) never re-enter the queue.
    let _dispatching = EmitGuard::enter();
    let mut batch = Vec::with_capacity(config.batch_size);
    loop {
        let Some(first) = receiver.blocking_recv() else {
            // Every sender is gone.
            break;
        };
        let mut shutdown = false;
        let mut next = Some(first);
        while let Some(message) = next.take() {
            match message {
                QueueMessage::Record {
                    logger,
                    method,
                    record,
                } => batch.push((logger, method, record)),
                QueueMessage::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            if batch.len() < config.batch_size {
                next = receiver.try_recv();
            }
        }

        deliver_batch(&target, &mut batch, &config, &stats);
        if shutdown {
            // Records that raced in behind the marker still get written;
            // anything sent after the close is counted as dropped.
            receiver.close();
            while let Some(message) = receiver.try_recv() {
                if let QueueMessage::Record {
                    logger,
                    method,
                    record,
                } = message
                {
                    batch.push((logger, method, record));
                }
            }
            deliver_batch(&target, &mut batch, &config, &stats);
            break;
        }
    }
}

fn deliver_batch(
    target: &Handler,
    batch: &mut Vec<(String, String, EventRecord)>,
    config: &QueueConfig,
    stats: &QueueStats,
) {
    if batch.is_empty() {
        return;
    }
    for (logger, method, record) in batch.drain(..) {
        let Ok(line) = target.render(&logger, &method, record) else {
            continue;
        };
        match write_with_retry(target, &line, config) {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                eprintln!(
                    "log sink write failed after {} retries, dropping line: {}",
                    config.max_retries, e
                );
            }
        }
    }
    if let Err(e) = target.flush() {
        eprintln!("error flushing log sink: {}", e);
    }
}

fn write_with_retry(target: &Handler, line: &str, config: &QueueConfig) -> Result<(), SinkError> {
    let mut backoff = config.retry_backoff;
    let mut attempt = 0;
    loop {
        match target.write_line(line) {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= config.max_retries => return Err(e),
            Err(_) => {
                attempt += 1;
                thread::sleep(backoff);
                backoff = cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }
}
