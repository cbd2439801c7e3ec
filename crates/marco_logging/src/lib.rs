//! Tracing setup shared by Marco binaries.
//!
//! Everything goes to a size-rotated file under `~/.marco/logs/`; stderr only
//! shows warnings unless `verbose` is set, so command output stays readable.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "marco=info,marco_mcp=info,marco_intent=info";
/// Rolled-over files kept next to the live one.
const KEEP_LOG_FILES: usize = 4;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for a binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Overrides `~/.marco/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => ensure_logs_dir().context("Failed to ensure log directory")?,
    };
    let file_writer =
        RotatingLog::open(&log_dir, config.app_name, KEEP_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// Marco home directory.
///
/// Priority:
/// 1) MARCO_HOME
/// 2) the user's home directory + `.marco`
/// 3) ./.marco
pub fn marco_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("MARCO_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".marco")
}

/// Logs directory: ~/.marco/logs
pub fn logs_dir() -> PathBuf {
    marco_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only log file that rolls over at `max_size`. Older generations are
/// `<name>.log.1` (newest) through `<name>.log.<keep>`.
struct RotatingLog {
    path: PathBuf,
    keep: usize,
    max_size: u64,
    current: Mutex<OpenLog>,
}

struct OpenLog {
    file: File,
    len: u64,
}

impl OpenLog {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl RotatingLog {
    fn open(dir: &Path, app_name: &str, keep: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", sanitize_name(app_name)));
        let current = Mutex::new(OpenLog::open(&path)?);
        Ok(Self {
            path,
            keep,
            max_size,
            current,
        })
    }

    /// Generation 0 is the live file.
    fn generation(&self, n: usize) -> PathBuf {
        if n == 0 {
            return self.path.clone();
        }
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn roll(&self, current: &mut OpenLog) -> io::Result<()> {
        current.file.flush()?;
        // renaming onto the last generation replaces it
        for n in (0..self.keep).rev() {
            let from = self.generation(n);
            if from.exists() {
                fs::rename(&from, self.generation(n + 1))?;
            }
        }
        *current = OpenLog::open(&self.path)?;
        Ok(())
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, OpenLog>> {
        self.current
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }
}

impl Write for &RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut current = self.lock()?;
        if current.len > 0 && current.len + buf.len() as u64 > self.max_size {
            self.roll(&mut current)?;
        }
        let written = current.file.write(buf)?;
        current.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingLog {
    type Writer = &'a RotatingLog;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
