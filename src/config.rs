//! Process-wide logging configuration.
//!
//! One global state object holds the shared processor chain, the registered
//! handlers and the level thresholds. Logging calls read it under a short
//! read lock, then process and write with the lock released.
//! [`snapshot`] and [`restore`] let tests isolate changes to it.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::RwLock;

use crate::context::merge_contextvars;
use crate::env::{env_or, JSON_LOGS_ENV, LOG_LEVEL_ENV, LOG_PATH_ENV};
use crate::error::ConfigError;
use crate::exceptions::{CapturedError, Frame};
use crate::handler::{Handler, HandlerId, Route};
use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::processor::{Processor, SharedProcessor};
use crate::processors::{
    add_log_level, add_logger_name, add_service, add_syslog_severity, ensure_event_is_str,
    normalize_level, render_stack_info, EventRenamer, TimeStamper,
};
use crate::queued::{QueueConfig, QueueHandler, QueueListener};
use crate::record::EventRecord;
use crate::sink::{
    LogSink, RotatingFileSink, Sink, StreamSink, DEFAULT_BACKUP_COUNT, DEFAULT_MAX_BYTES,
};

pub const DEFAULT_SERVICE: &str = "app";

/// Settings applied by [`configure`].
///
/// **Fields**
/// - `service`: added as `service` to every event.
/// - `level`: minimum level for every logger without its own override.
/// - `json_logs`: JSON lines when `true`, console lines otherwise.
/// - `stream`: destination of the main handler (stdout by default).
/// - `clear_handlers`: remove every existing handler first.
/// - `processors`: user stages, run after the standard enrichment and
///   before `event` is renamed to `message`.
pub struct LoggingConfig {
    pub service: String,
    pub level: Level,
    pub json_logs: bool,
    pub stream: Sink,
    pub clear_handlers: bool,
    pub processors: Vec<SharedProcessor>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            level: Level::Info,
            json_logs: true,
            stream: Sink::Stdout,
            clear_handlers: true,
            processors: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the level by name; unknown names degrade to INFO.
    pub fn level_name(mut self, name: &str) -> Self {
        self.level = Level::parse_or(name, Level::Info);
        self
    }

    pub fn json_logs(mut self, json_logs: bool) -> Self {
        self.json_logs = json_logs;
        self
    }

    pub fn stream(mut self, stream: impl Into<Sink>) -> Self {
        self.stream = stream.into();
        self
    }

    pub fn clear_handlers(mut self, clear_handlers: bool) -> Self {
        self.clear_handlers = clear_handlers;
        self
    }

    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }
}

/// The standard chain shared by every handler:
/// context merge, logger name, level, severity, timestamp, service, stack
/// info, string event, then `processors`, then `event` renamed to
/// `message`.
pub fn build_shared_chain(service: &str, processors: Vec<SharedProcessor>) -> Pipeline {
    Pipeline::builder()
        .processor(merge_contextvars)
        .processor(add_logger_name)
        .processor(add_log_level)
        .processor(normalize_level)
        .processor(add_syslog_severity)
        .processor(TimeStamper::default())
        .processor(add_service(service))
        .processor(render_stack_info)
        .processor(ensure_event_is_str)
        .processors(processors)
        .processor(EventRenamer::new("message"))
        .build()
}

fn make_handler(sink: Arc<dyn LogSink>, level: Level, json_logs: bool) -> Handler {
    if json_logs {
        Handler::json(sink, level)
    } else {
        Handler::console(sink, level)
    }
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

fn next_handler_id() -> HandlerId {
    NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone)]
struct State {
    level: Level,
    json_logs: bool,
    shared: Arc<Pipeline>,
    routes: Arc<Vec<(HandlerId, Route)>>,
    logger_levels: Vec<(String, Level)>,
    listeners: Vec<(HandlerId, Arc<QueueListener>)>,
    /// Handlers registered through the facade's `add`.
    added: Vec<HandlerId>,
}

impl State {
    fn initial() -> Self {
        let handler = make_handler(Arc::new(StreamSink::stdout()), Level::Debug, true);
        State {
            level: Level::Info,
            json_logs: true,
            shared: Arc::new(build_shared_chain(DEFAULT_SERVICE, Vec::new())),
            routes: Arc::new(vec![(next_handler_id(), Route::Direct(Arc::new(handler)))]),
            logger_levels: Vec::new(),
            listeners: Vec::new(),
            added: Vec::new(),
        }
    }

    fn effective_level(&self, logger: &str) -> Level {
        self.logger_levels
            .iter()
            .filter(|(name, _)| logger_matches(name, logger))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.level)
    }
}

/// `prefix` names `logger` itself or one of its children
/// (`prefix::child` or `prefix.child`).
fn logger_matches(prefix: &str, logger: &str) -> bool {
    match logger.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with("::") || rest.starts_with('.'),
        None => false,
    }
}

static STATE: OnceLock<RwLock<State>> = OnceLock::new();

fn state() -> &'static RwLock<State> {
    STATE.get_or_init(|| RwLock::new(State::initial()))
}

thread_local! {
    static EMITTING: Cell<bool> = const { Cell::new(false) };
}

pub(crate) struct EmitGuard;

impl EmitGuard {
    pub(crate) fn enter() -> Option<EmitGuard> {
        EMITTING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(EmitGuard)
            }
        })
    }
}

impl Drop for EmitGuard {
    fn drop(&mut self) {
        EMITTING.with(|flag| flag.set(false));
    }
}

/// Whether the current thread is dispatching an event. Events produced
/// while dispatching are discarded.
pub fn is_emitting() -> bool {
    EMITTING.with(Cell::get)
}

/// Minimum level in effect for `logger`: the longest matching per-logger
/// override, or the global level.
pub fn effective_level(logger: &str) -> Level {
    state().read().effective_level(logger)
}

pub fn is_enabled(logger: &str, level: Level) -> bool {
    level >= effective_level(logger)
}

/// Whether handlers created through the facade render JSON.
pub fn json_logs() -> bool {
    state().read().json_logs
}

/// Run `record` through the shared chain and hand it to every handler
/// accepting its level.
pub(crate) fn emit(logger: &str, method: &str, record: EventRecord) {
    let Some(_guard) = EmitGuard::enter() else {
        return;
    };
    let (shared, routes) = {
        let state = state().read();
        (Arc::clone(&state.shared), Arc::clone(&state.routes))
    };
    if routes.is_empty() {
        return;
    }

    let record = match catch_unwind(AssertUnwindSafe(|| shared.process(logger, method, record))) {
        Ok(Ok(record)) => record,
        Ok(Err(_dropped)) => return,
        Err(_) => {
            eprintln!("log processor panicked, event discarded");
            return;
        }
    };

    let level = Level::parse_or(method, Level::Info);
    let accepting: Vec<&Route> = routes
        .iter()
        .map(|(_, route)| route)
        .filter(|route| route.accepts(level))
        .collect();
    if let Some((last, rest)) = accepting.split_last() {
        for route in rest {
            route.emit(logger, method, record.clone());
        }
        last.emit(logger, method, record);
    }
}

/// Flush and stop everything that was removed from the state.
fn retire(routes: Vec<Route>, listeners: Vec<Arc<QueueListener>>) {
    for listener in listeners {
        listener.stop();
    }
    for route in routes {
        if let Err(e) = route.handler().flush() {
            eprintln!("error flushing log sink: {}", e);
        }
    }
}

/// Install the shared chain and a main handler writing to `config.stream`.
pub fn configure(config: LoggingConfig) -> Result<(), ConfigError> {
    let sink = config.stream.into_log_sink()?;
    let handler = make_handler(sink, Level::Debug, config.json_logs);
    let shared = Arc::new(build_shared_chain(&config.service, config.processors));
    let id = next_handler_id();

    let (removed, stopped) = {
        let mut state = state().write();
        let mut routes = if config.clear_handlers {
            Vec::new()
        } else {
            state.routes.as_ref().clone()
        };
        let removed = if config.clear_handlers {
            state.added.clear();
            state.routes.iter().map(|(_, r)| r.clone()).collect()
        } else {
            Vec::new()
        };
        let stopped = if config.clear_handlers {
            state.listeners.drain(..).map(|(_, l)| l).collect()
        } else {
            Vec::new()
        };
        routes.push((id, Route::Direct(Arc::new(handler))));

        state.level = config.level;
        state.json_logs = config.json_logs;
        state.shared = shared;
        state.routes = Arc::new(routes);
        (removed, stopped)
    };
    retire(removed, stopped);
    Ok(())
}

/// Register an additional handler.
pub fn add_handler(handler: Handler) -> HandlerId {
    let id = next_handler_id();
    let mut state = state().write();
    let mut routes = state.routes.as_ref().clone();
    routes.push((id, Route::Direct(Arc::new(handler))));
    state.routes = Arc::new(routes);
    id
}

/// Register a handler for `sink` rendered in the configured mode.
/// `level` defaults to the global level.
pub(crate) fn add_facade_handler(sink: Arc<dyn LogSink>, level: Option<Level>) -> HandlerId {
    let id = next_handler_id();
    let mut state = state().write();
    let level = level.unwrap_or(state.level);
    let handler = make_handler(sink, level, state.json_logs);
    let mut routes = state.routes.as_ref().clone();
    routes.push((id, Route::Direct(Arc::new(handler))));
    state.routes = Arc::new(routes);
    state.added.push(id);
    id
}

/// Remove every handler registered through the facade.
pub(crate) fn remove_facade_handlers() {
    let ids = std::mem::take(&mut state().write().added);
    for id in ids {
        remove_handler(id);
    }
}

pub(crate) fn is_facade_handler(id: HandlerId) -> bool {
    state().read().added.contains(&id)
}

/// Remove a handler, stopping its queue worker if any and flushing its
/// sink. Returns `false` for unknown ids.
pub fn remove_handler(id: HandlerId) -> bool {
    let (removed, stopped) = {
        let mut state = state().write();
        let Some(index) = state.routes.iter().position(|(rid, _)| *rid == id) else {
            return false;
        };
        let mut routes = state.routes.as_ref().clone();
        let (_, route) = routes.remove(index);
        state.routes = Arc::new(routes);
        state.added.retain(|a| *a != id);
        let stopped: Vec<Arc<QueueListener>> = state
            .listeners
            .iter()
            .filter(|(lid, _)| *lid == id)
            .map(|(_, l)| Arc::clone(l))
            .collect();
        state.listeners.retain(|(lid, _)| *lid != id);
        (vec![route], stopped)
    };
    retire(removed, stopped);
    true
}

/// Ids of the registered handlers, in emission order.
pub fn handler_ids() -> Vec<HandlerId> {
    state().read().routes.iter().map(|(id, _)| *id).collect()
}

/// Set the global minimum level.
pub fn set_level(level: Level) {
    state().write().level = level;
}

/// Override the minimum level of `name` and its children.
pub fn set_logger_level(name: impl Into<String>, level: Level) {
    let name = name.into();
    let mut state = state().write();
    match state.logger_levels.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = level,
        None => state.logger_levels.push((name, level)),
    }
}

/// Move a handler behind a background queue.
///
/// With `handler` of `None`, the first registered handler is used. The
/// queued route takes the handler's position, so emission order is
/// unchanged. Entries still queued when the process exits are lost unless
/// [`shutdown`] (or [`QueueListener::stop`]) runs first.
pub fn configure_queued_logging(
    handler: Option<HandlerId>,
    config: QueueConfig,
) -> Result<Arc<QueueListener>, ConfigError> {
    let (id, listener) = {
        let mut state = state().write();
        if state.routes.iter().any(|(_, route)| route.is_queued()) {
            return Err(ConfigError::AlreadyQueued);
        }
        let index = match handler {
            Some(id) => state
                .routes
                .iter()
                .position(|(rid, _)| *rid == id)
                .ok_or(ConfigError::UnknownHandler(id))?,
            None => state
                .routes
                .iter()
                .position(|(_, route)| !route.is_queued())
                .ok_or(ConfigError::NoSuitableHandler)?,
        };

        let mut routes = state.routes.as_ref().clone();
        let (id, route) = &routes[index];
        let id = *id;
        let target = Arc::clone(route.handler());
        let (queue, listener) = QueueHandler::start(target, config)?;
        let listener = Arc::new(listener);

        routes[index] = (id, Route::Queued(queue));
        state.routes = Arc::new(routes);
        state.listeners.push((id, Arc::clone(&listener)));
        (id, listener)
    };
    tracing::debug!(handler = id, "queued logging enabled");
    Ok(listener)
}

/// A copy of the global state.
pub struct Snapshot {
    state: State,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        state: state().read().clone(),
    }
}

/// Replace the global state with `snapshot`. Queue workers that are not
/// part of the snapshot are stopped after their pending entries are
/// delivered.
pub fn restore(snapshot: Snapshot) {
    let previous = std::mem::replace(&mut *state().write(), snapshot.state.clone());
    let stopped: Vec<Arc<QueueListener>> = previous
        .listeners
        .into_iter()
        .filter(|(_, l)| !snapshot.state.listeners.iter().any(|(_, kept)| Arc::ptr_eq(l, kept)))
        .map(|(_, l)| l)
        .collect();
    retire(Vec::new(), stopped);
}

/// Back to the initial state: INFO, JSON lines on stdout, no overrides.
pub fn reset() {
    restore(Snapshot {
        state: State::initial(),
    });
}

/// Flush logging before the process exits.
///
/// Every queue worker delivers what it holds and stops, queued handlers go
/// back to writing in-line, and every sink is flushed. Logging keeps
/// working afterwards. Call it at the end of `main` when queued logging is
/// in use, since worker threads do not outlive the process.
pub fn shutdown() {
    let (routes, stopped) = {
        let mut state = state().write();
        let routes: Vec<(HandlerId, Route)> = state
            .routes
            .iter()
            .map(|(id, route)| {
                let route = match route {
                    Route::Queued(queue) => Route::Direct(Arc::clone(queue.target())),
                    direct => direct.clone(),
                };
                (*id, route)
            })
            .collect();
        let flushed = routes.iter().map(|(_, r)| r.clone()).collect();
        state.routes = Arc::new(routes);
        let stopped = state.listeners.drain(..).map(|(_, l)| l).collect();
        (flushed, stopped)
    };
    retire(routes, stopped);
}

/// Configure from `LOG_LEVEL`, `JSON_LOGS` and `LOG_PATH`.
///
/// Loggers in `suppress_loggers` are limited to WARN. When `LOG_PATH` is
/// set, a rotating JSON file handler (50 MiB, 5 backups) is added. Panics
/// are logged through the pipeline.
pub fn setup_from_env(service: &str, suppress_loggers: &[&str]) -> Result<(), ConfigError> {
    let level = Level::parse_or(&env_or(LOG_LEVEL_ENV, "INFO"), Level::Info);
    let json_logs = env_or(JSON_LOGS_ENV, "1") != "0";

    configure(LoggingConfig::new(service).level(level).json_logs(json_logs))?;

    for name in suppress_loggers {
        set_logger_level(*name, Level::Warn);
    }

    let log_path = env_or(LOG_PATH_ENV, "");
    if !log_path.is_empty() {
        let sink = RotatingFileSink::open(&log_path, DEFAULT_MAX_BYTES, DEFAULT_BACKUP_COUNT)?;
        add_handler(Handler::json(Arc::new(sink), Level::Debug));
    }

    install_panic_hook();
    tracing::debug!(service, level = %level, json_logs, "logging configured from environment");
    Ok(())
}

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Log panics as CRITICAL `Uncaught panic` events carrying the panic
/// message and location. Installing more than once has no effect.
///
/// A panic raised while an event is being emitted goes to the previously
/// installed hook instead.
pub fn install_panic_hook() {
    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if is_emitting() {
            previous(info);
            return;
        }
        let mut err = CapturedError::new("panic", panic_message(info.payload()));
        if let Some(location) = info.location() {
            err = err.with_frames(vec![Frame::new(location.file(), location.line(), "panic")]);
        }
        let mut record = EventRecord::with_event("Uncaught panic");
        record.insert("exc_info", err);
        if let Some(name) = thread::current().name() {
            record.insert("thread", name);
        }
        emit("panic", "critical", record);
    }));
}
