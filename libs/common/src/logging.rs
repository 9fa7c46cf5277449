//! Logging for the overheight detection services
//!
//! Two outputs share one `EnvFilter`:
//! - console on stderr (suppressed in quiet mode)
//! - a daily file `{YYYYMMDD}_{service}.log` in the log directory, written
//!   through `tracing_appender::non_blocking`
//!
//! The log directory is size-capped: when the `*.log` files in it add up to
//! more than the configured limit, the oldest files are deleted.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default directory cap: 6,000,000 bytes
pub const DEFAULT_MAX_DIR_BYTES: u64 = 6_000_000;

/// Bytes written between directory size checks
const CAP_CHECK_INTERVAL: u64 = 64 * 1024;

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message fields`
///
/// Example output: `2025-12-02 08:50:44.809 [INFO] Session accepted peer=10.0.0.5:40112`
pub struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        // Field devices log in local time
        let now = chrono::Local::now();
        write!(writer, "{} ", now.format("%Y-%m-%d %H:%M:%S%.3f"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn daily_file_name(date: &str, service_name: &str) -> String {
    format!("{}_{}.log", date, service_name)
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// Delete the oldest `*.log` files in `log_dir` until their total size is at
/// most `limit`. `keep` is never deleted. Returns the number of bytes freed.
pub fn prune_log_dir(log_dir: &Path, limit: u64, keep: Option<&Path>) -> std::io::Result<u64> {
    let mut files: Vec<(String, PathBuf, u64)> = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, path, meta.len()));
    }

    let mut total: u64 = files.iter().map(|(_, _, len)| len).sum();
    if total <= limit {
        return Ok(0);
    }

    // Names start with YYYYMMDD, so name order is age order
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut freed = 0;
    for (_, path, len) in files {
        if total <= limit {
            break;
        }
        if keep.is_some_and(|k| k == path.as_path()) {
            continue;
        }
        fs::remove_file(&path)?;
        total = total.saturating_sub(len);
        freed += len;
    }
    Ok(freed)
}

/// Daily log file writer that keeps its directory under a size cap
///
/// Naming format: `{YYYYMMDD}_{service}.log`. A new file is opened when the
/// local date changes or the current file disappears.
pub struct CappedDirWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: String,
    current_path: PathBuf,
    file: File,
    /// Shared so the limit can change after a config reload
    max_dir_bytes: Arc<AtomicU64>,
    written_since_check: u64,
}

impl CappedDirWriter {
    pub fn new(
        service_name: impl Into<String>,
        log_dir: impl Into<PathBuf>,
        max_dir_bytes: Arc<AtomicU64>,
    ) -> std::io::Result<Self> {
        let service_name = service_name.into();
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;

        let current_date = today();
        let current_path = log_dir.join(daily_file_name(&current_date, &service_name));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_path)?;

        let mut writer = Self {
            service_name,
            log_dir,
            current_date,
            current_path,
            file,
            max_dir_bytes,
            written_since_check: 0,
        };
        writer.enforce_cap();
        Ok(writer)
    }

    /// Path of the file currently written
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    fn roll_if_needed(&mut self) -> std::io::Result<()> {
        let date = today();
        if date == self.current_date && self.current_path.exists() {
            return Ok(());
        }

        fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(daily_file_name(&date, &self.service_name));
        self.file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.current_date = date;
        self.current_path = path;
        self.enforce_cap();
        Ok(())
    }

    fn enforce_cap(&mut self) {
        self.written_since_check = 0;
        let limit = self.max_dir_bytes.load(Ordering::Relaxed);
        if let Err(e) = prune_log_dir(&self.log_dir, limit, Some(&self.current_path)) {
            // The subscriber is the one writing here; stderr is all that is left
            eprintln!("Failed to prune log directory {:?}: {}", self.log_dir, e);
        }
    }
}

impl Write for CappedDirWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.roll_if_needed()?;
        let written = self.file.write(buf)?;
        self.written_since_check += written as u64;
        if self.written_since_check >= CAP_CHECK_INTERVAL {
            self.enforce_cap();
        }
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used in the file name
    pub service_name: String,
    /// Directory for daily log files
    pub log_dir: PathBuf,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
    /// Write to stderr as well as the file
    pub console: bool,
    /// Directory cap in bytes
    pub max_dir_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: PathBuf::from("log"),
            default_filter: "info".to_string(),
            console: true,
            max_dir_bytes: DEFAULT_MAX_DIR_BYTES,
        }
    }
}

/// Keeps the file writer alive; flushes pending lines when dropped
pub struct LogGuard {
    _worker: WorkerGuard,
    max_dir_bytes: Arc<AtomicU64>,
}

impl LogGuard {
    /// Change the directory cap, e.g. after `logFileLimit` is reloaded
    pub fn set_max_dir_bytes(&self, bytes: u64) {
        self.max_dir_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Handle for adjusting the cap from elsewhere
    pub fn limit_handle(&self) -> LogLimit {
        LogLimit(Arc::clone(&self.max_dir_bytes))
    }
}

/// Shared log directory cap
#[derive(Debug, Clone)]
pub struct LogLimit(Arc<AtomicU64>);

impl LogLimit {
    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Initialize logging system with configuration
///
/// Fails if the log directory cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(config: LogConfig) -> std::io::Result<LogGuard> {
    let max_dir_bytes = Arc::new(AtomicU64::new(config.max_dir_bytes));
    let file_writer = CappedDirWriter::new(
        config.service_name.clone(),
        config.log_dir.clone(),
        Arc::clone(&max_dir_bytes),
    )?;
    let (non_blocking, worker) = tracing_appender::non_blocking(file_writer);

    // Respect RUST_LOG when set
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.as_str()));

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .event_format(BracketedLevelFormat)
    });

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(BracketedLevelFormat);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(std::io::Error::other)?;

    Ok(LogGuard {
        _worker: worker,
        max_dir_bytes,
    })
}
