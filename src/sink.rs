use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ConfigError, SinkError};

/// Destination for rendered log lines.
///
/// Implementations receive one fully rendered line per event (without a
/// trailing newline) and are responsible for transporting it to a concrete
/// destination (stream, file, callback, memory).
pub trait LogSink: Send + Sync {
    /// Write a single rendered line.
    ///
    /// **Returns**
    /// - `Ok(())` if the line was accepted.
    /// - `Err(..)` if the destination failed. The emitting handler reports
    ///   the failure on stderr; it never reaches the logging call.
    ///
    /// Called from the logging thread, or from the queue worker when queued
    /// delivery is active.
    fn write(&self, line: &str) -> Result<(), SinkError>;

    /// Flush any buffered output.
    ///
    /// Default implementation is a no-op.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Whether output lands on an interactive terminal. Used to decide
    /// whether console output is colorized.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Writes lines to an open stream such as stdout, stderr or a socket.
pub struct StreamSink {
    writer: Mutex<Box<dyn Write + Send>>,
    terminal: bool,
}

impl StreamSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            terminal: false,
        }
    }

    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(io::stdout())),
            terminal: crate::render::stdout_is_terminal(),
        }
    }

    pub fn stderr() -> Self {
        Self {
            writer: Mutex::new(Box::new(io::stderr())),
            terminal: crate::render::stderr_is_terminal(),
        }
    }
}

impl LogSink for StreamSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().flush()?;
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }
}

fn open_append(path: &Path) -> Result<File, ConfigError> {
    if path.is_dir() {
        return Err(ConfigError::UnsupportedSink(format!(
            "{} is a directory",
            path.display()
        )));
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfigError::OpenSink {
            path: path.to_path_buf(),
            source,
        })
}

/// Appends lines to a file, UTF-8, one line per event.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.file.lock().flush()?;
        Ok(())
    }
}

/// Rotation size used by environment-driven setup (50 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;
/// Rotated files kept by environment-driven setup.
pub const DEFAULT_BACKUP_COUNT: usize = 5;

struct RotatingState {
    file: File,
    size: u64,
}

/// File sink with size-based rotation.
///
/// When writing a line would grow the file beyond `max_bytes`, the file is
/// renamed to `<path>.1`, older backups shift up by one (`.1` to `.2`, ...)
/// and the oldest beyond `backup_count` is deleted. A `max_bytes` of zero
/// disables rotation.
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    state: Mutex<RotatingState>,
}

impl RotatingFileSink {
    pub fn open(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        backup_count: usize,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let file = open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            state: Mutex::new(RotatingState { file, size }),
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&self, state: &mut RotatingState) -> io::Result<()> {
        state.file.flush()?;
        if self.backup_count > 0 {
            for index in (1..self.backup_count).rev() {
                let from = self.backup_path(index);
                if from.exists() {
                    fs::rename(&from, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
        }
        state.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        state.size = 0;
        Ok(())
    }
}

impl LogSink for RotatingFileSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        let incoming = line.len() as u64 + 1;
        if self.max_bytes > 0 && state.size > 0 && state.size + incoming > self.max_bytes {
            self.rotate(&mut state)?;
        }
        state.file.write_all(line.as_bytes())?;
        state.file.write_all(b"\n")?;
        state.size += incoming;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.state.lock().file.flush()?;
        Ok(())
    }
}

type LineCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Hands each line to a user callback. A panicking callback is reported as
/// [`SinkError::CallbackPanicked`].
pub struct CallbackSink {
    callback: LineCallback,
}

impl CallbackSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl LogSink for CallbackSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        catch_unwind(AssertUnwindSafe(|| (self.callback)(line))).map_err(|_| SinkError::CallbackPanicked)
    }
}

/// Keeps every line in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Lines parsed as JSON; lines that are not JSON are skipped.
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        self.lines
            .lock()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

/// Where a handler writes, resolved into a [`LogSink`] once at
/// registration time.
pub enum Sink {
    Stdout,
    Stderr,
    /// Append to a file.
    Path(PathBuf),
    /// Any open writer.
    Stream(Box<dyn Write + Send>),
    /// Call a function with each rendered line.
    Callback(LineCallback),
    /// A pre-built sink.
    Handler(Arc<dyn LogSink>),
}

impl Sink {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Sink::Callback(Box::new(callback))
    }

    pub fn stream(writer: impl Write + Send + 'static) -> Self {
        Sink::Stream(Box::new(writer))
    }

    /// Parse a sink spec: `stdout`, `stderr`, `file://<path>` or a plain
    /// path.
    ///
    /// Examples:
    /// - "stdout"
    /// - "file:///var/log/app.jsonl"
    /// - "logs/app.jsonl"
    ///
    /// Any other `scheme://` is rejected as unsupported.
    pub fn parse(spec: &str) -> Result<Sink, ConfigError> {
        let lower = spec.to_ascii_lowercase();

        if lower == "stdout" || lower == "-" {
            Ok(Sink::Stdout)
        } else if lower == "stderr" {
            Ok(Sink::Stderr)
        } else if lower.starts_with("file://") {
            Ok(Sink::Path(PathBuf::from(&spec["file://".len()..])))
        } else if let Some((scheme, _)) = spec.split_once("://") {
            Err(ConfigError::UnsupportedSink(format!("{}://", scheme)))
        } else if spec.is_empty() {
            Err(ConfigError::UnsupportedSink("empty sink spec".to_string()))
        } else {
            Ok(Sink::Path(PathBuf::from(spec)))
        }
    }

    /// Resolve into a concrete sink, opening files as needed.
    pub fn into_log_sink(self) -> Result<Arc<dyn LogSink>, ConfigError> {
        let sink: Arc<dyn LogSink> = match self {
            Sink::Stdout => Arc::new(StreamSink::stdout()),
            Sink::Stderr => Arc::new(StreamSink::stderr()),
            Sink::Path(path) => Arc::new(FileSink::open(path)?),
            Sink::Stream(writer) => Arc::new(StreamSink::new(writer)),
            Sink::Callback(callback) => Arc::new(CallbackSink { callback }),
            Sink::Handler(sink) => sink,
        };
        Ok(sink)
    }
}

impl Default for Sink {
    fn default() -> Self {
        Sink::Stdout
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Stdout => f.write_str("Stdout"),
            Sink::Stderr => f.write_str("Stderr"),
            Sink::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Sink::Stream(_) => f.write_str("Stream(..)"),
            Sink::Callback(_) => f.write_str("Callback(..)"),
            Sink::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl From<PathBuf> for Sink {
    fn from(path: PathBuf) -> Self {
        Sink::Path(path)
    }
}

impl From<&Path> for Sink {
    fn from(path: &Path) -> Self {
        Sink::Path(path.to_path_buf())
    }
}

impl From<Arc<dyn LogSink>> for Sink {
    fn from(sink: Arc<dyn LogSink>) -> Self {
        Sink::Handler(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_specs() {
        assert!(matches!(Sink::parse("stdout"), Ok(Sink::Stdout)));
        assert!(matches!(Sink::parse("STDERR"), Ok(Sink::Stderr)));
        match Sink::parse("file:///tmp/app.log").unwrap() {
            Sink::Path(p) => assert_eq!(p, PathBuf::from("/tmp/app.log")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(Sink::parse("logs/app.log"), Ok(Sink::Path(_))));
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let err = Sink::parse("kafka://broker/topic").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedSink(_)));
        assert!(err.to_string().contains("kafka://"));
    }

    #[test]
    fn test_directory_is_unsupported() {
        let dir = tempdir().unwrap();
        let err = Sink::Path(dir.path().to_path_buf()).into_log_sink().err().unwrap();
        assert!(matches!(err, ConfigError::UnsupportedSink(_)));
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = FileSink::open(&path).unwrap();
        sink.write("one").unwrap();
        sink.write("two").unwrap();
        sink.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_rotating_file_sink_rotates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = RotatingFileSink::open(&path, 10, 2).unwrap();
        for line in ["aaaaaa", "bbbbbb", "cccccc", "dddddd"] {
            sink.write(line).unwrap();
        }
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddd\n");
        let mut backup1 = path.clone().into_os_string();
        backup1.push(".1");
        let mut backup2 = path.clone().into_os_string();
        backup2.push(".2");
        let mut backup3 = path.clone().into_os_string();
        backup3.push(".3");
        assert_eq!(fs::read_to_string(backup1).unwrap(), "cccccc\n");
        assert_eq!(fs::read_to_string(backup2).unwrap(), "bbbbbb\n");
        assert!(!PathBuf::from(backup3).exists());
    }

    #[test]
    fn test_callback_sink_reports_panic() {
        let sink = CallbackSink::new(|_| panic!("downstream closed"));
        assert!(matches!(sink.write("x"), Err(SinkError::CallbackPanicked)));
    }

    #[test]
    fn test_stream_sink_writes_newline_terminated() {
        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buf = Shared::default();
        let sink = Sink::stream(buf.clone()).into_log_sink().unwrap();
        sink.write(r#"{"a":1}"#).unwrap();
        assert_eq!(buf.0.lock().as_slice(), b"{\"a\":1}\n");
        assert!(!sink.is_terminal());
    }
}
