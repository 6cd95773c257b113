//! Logging setup
//!
//! Console lines look like `2025-12-02T00:50:44.809Z [INFO] message fields`.
//! An optional daily file mirrors the console without colors. The filter sits
//! behind a reload handle so `PUT /api/log-level` can change it live.

use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

fn bracketed(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

struct BracketedLevelFormat;

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
        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )?;

        let (tag, color) = bracketed(*event.metadata().level());
        if writer.has_ansi_escapes() {
            write!(writer, "{color}{tag}\x1b[0m ")?;
        } else {
            write!(writer, "{tag} ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FilterState {
    handle: reload::Handle<EnvFilter, Registry>,
    current: Mutex<String>,
}

static FILTER: OnceLock<FilterState> = OnceLock::new();
// Dropping the guard would stop the file writer thread
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter target for the service crate and log file prefix
    pub service_name: String,
    pub log_dir: PathBuf,
    /// Level used when `RUST_LOG` is unset
    pub console_level: Level,
    pub enable_file: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "satproxy".to_string(),
            log_dir: PathBuf::from("logs"),
            console_level: Level::INFO,
            enable_file: false,
            ansi: true,
        }
    }
}

/// `RUST_LOG` when set, otherwise the configured level for everything
fn initial_filter(config: &LogConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(filter) if !filter.trim().is_empty() => filter,
        _ => {
            let level = config.console_level.as_str().to_lowercase();
            format!("{},{}={}", level, config.service_name.replace('-', "_"), level)
        },
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = initial_filter(&config);
    let (filter_layer, handle) = reload::Layer::new(EnvFilter::try_new(&filter)?);

    let console = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file = if config.enable_file {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(
            &config.log_dir,
            format!("{}.log", config.service_name),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console)
        .with(file)
        .try_init()?;

    let _ = FILTER.set(FilterState {
        handle,
        current: Mutex::new(filter.clone()),
    });
    tracing::info!(filter = %filter, file = config.enable_file, "Logging initialized");
    Ok(())
}

/// Replace the active filter.
///
/// Accepts a plain level (`debug`) or a full filter spec (`info,satproxy=debug`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let state = FILTER
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    state
        .handle
        .reload(filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;
    *state.current.lock() = level.to_string();

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Active filter, or `unknown` before initialization
pub fn get_log_level() -> String {
    FILTER
        .get()
        .map(|state| state.current.lock().clone())
        .unwrap_or_else(|| "unknown".to_string())
}
