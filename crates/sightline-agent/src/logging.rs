//! Logging initialization.
//!
//! Driven by the `[logging]` section of [`SightlineConfig`](sightline_core::SightlineConfig):
//! - **Production**: JSON logs to rolling files + compact logs to stdout. The
//!   scanner, actor and resolver targets are capped at `debug`, so the
//!   per-sighting `trace!` lines never reach the files even when the base
//!   level is `trace`.
//! - **Development**: Pretty logs to stdout with span events, no caps.
//!
//! `RUST_LOG` replaces the computed filter entirely.

use std::path::PathBuf;
use std::sync::OnceLock;

use sightline_core::LoggingConfig;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Static guards to keep non-blocking file writers alive.
/// These must persist for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Rolling file name prefix.
const LOG_FILE_PREFIX: &str = "sightline-agent";

/// Targets that log every sighting at `trace`.
const SIGHTING_TARGETS: &[&str] = &[
    "sightline_core::scanner",
    "sightline_core::actor",
    "sightline_core::resolver",
];

/// Dependencies that are chatty below `warn`.
const QUIET_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "tower_http"];

/// Initialize the logging system from `config`.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or the production log
/// directory cannot be created.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(&config.level, config.production)))?;

    if config.production {
        let dir = config.directory.clone().unwrap_or_else(log_directory);
        init_production(env_filter, dir)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// Filter string for a base level.
///
/// A plain level gets per-target caps appended; anything else is taken as a
/// full directive string and used as is.
fn filter_directives(level: &str, production: bool) -> String {
    let level = level.trim();
    let Ok(base) = level.parse::<LevelFilter>() else {
        return level.to_string();
    };

    let mut directives = vec![base.to_string().to_ascii_lowercase()];
    for target in QUIET_DEPENDENCIES {
        directives.push(format!("{target}={}", cap(base, LevelFilter::WARN)));
    }
    if production {
        for target in SIGHTING_TARGETS {
            directives.push(format!("{target}={}", cap(base, LevelFilter::DEBUG)));
        }
    }
    directives.join(",")
}

/// The less verbose of `level` and `ceiling`.
fn cap(level: LevelFilter, ceiling: LevelFilter) -> String {
    level.min(ceiling).to_string().to_ascii_lowercase()
}

/// Initialize production logging with file + stdout output.
fn init_production(env_filter: EnvFilter, log_dir: PathBuf) -> anyhow::Result<()> {
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // Pipeline events carry beacon and action fields; keep them queryable
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false); // journald

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    tracing::debug!(dir = %log_dir.display(), "File logging enabled");
    Ok(())
}

/// Initialize development logging with pretty stdout output.
fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Platform log directory used when the config names none.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/sightline")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "sightline")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
