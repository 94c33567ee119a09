//! Logging capability handed to the translator and dispatcher, plus log4rs setup
//! for integrators that want the `FacadeLog` output persisted to rolling files.

use crate::errors::ConfigError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Log target used by [`FacadeLog`].
pub const QUERY_TARGET: &str = "urlquery::query";

/// Leveled logging sink. Implementations must be cheap to call and never panic.
pub trait QueryLog: Send + Sync {
    fn debug(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Discards everything. Used when no logger is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLog;

impl QueryLog for NoopLog {
    fn debug(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}

/// Forwards to the `log` facade under [`QUERY_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeLog;

impl QueryLog for FacadeLog {
    fn debug(&self, msg: &str) {
        log::debug!(target: QUERY_TARGET, "{msg}");
    }
    fn error(&self, msg: &str) {
        log::error!(target: QUERY_TARGET, "{msg}");
    }
}

/// Keeps every line in memory, tagged with its level. Handy for asserting on diagnostics.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Captured error-level messages without their level tag.
    pub fn errors(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter_map(|l| l.strip_prefix("[ERROR] ").map(str::to_owned))
            .collect()
    }

    /// Drain and return the captured lines.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl QueryLog for MemoryLog {
    fn debug(&self, msg: &str) {
        self.lines.lock().push(format!("[DEBUG] {msg}"));
    }
    fn error(&self, msg: &str) {
        self.lines.lock().push(format!("[ERROR] {msg}"));
    }
}

static HANDLE: Mutex<Option<log4rs::Handle>> = Mutex::new(None);

fn parse_level(level: Option<&str>) -> log::LevelFilter {
    use log::LevelFilter;
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling_appender(
    base: &Path,
    stem: &str,
    keep: u32,
) -> Result<log4rs::append::rolling_file::RollingFileAppender, ConfigError> {
    use log4rs::append::rolling_file::RollingFileAppender;
    use log4rs::append::rolling_file::policy::compound::{
        CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
    };
    use log4rs::encode::pattern::PatternEncoder;
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}")))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Configure process-wide logging to rolling files under `dir` (current directory if `None`).
///
/// Writes `app.log` for everything and `query.log` for the [`QUERY_TARGET`] stream.
/// Calling it again replaces the active configuration.
///
/// # Errors
/// Returns an error if the directory or appenders cannot be created.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<u32>,
) -> Result<(), ConfigError> {
    use log4rs::config::{Appender, Config, Logger, Root};
    let base = match dir {
        Some(d) => PathBuf::from(d),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&base)?;
    let keep = retention.unwrap_or(7);
    let lvl = parse_level(level);

    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling_appender(&base, "app", keep)?)))
        .appender(
            Appender::builder().build("query", Box::new(rolling_appender(&base, "query", keep)?)),
        )
        .logger(Logger::builder().appender("query").build(QUERY_TARGET, lvl))
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let mut handle = HANDLE.lock();
    match handle.as_ref() {
        Some(h) => h.set_config(config),
        None => {
            let h = log4rs::init_config(config).map_err(|e| ConfigError::Logging(e.to_string()))?;
            *handle = Some(h);
        }
    }
    Ok(())
}

/// Configure logging from environment variables if present:
/// - `URLQUERY_LOG_DIR`
/// - `URLQUERY_LOG_LEVEL`
/// - `URLQUERY_LOG_RETENTION`
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), ConfigError> {
    let dir = std::env::var("URLQUERY_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("URLQUERY_LOG_LEVEL").ok();
    let retention =
        std::env::var("URLQUERY_LOG_RETENTION").ok().and_then(|s| s.parse::<u32>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention)
}
