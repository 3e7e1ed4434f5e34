//! Logging system configuration and initialization
//!
//! Layered tracing setup driven by `LoggingConfig`: console output for the
//! operator terminal and optional non-blocking file output next to the
//! persisted state. Noisy dependency modules are downshifted unless the
//! configured level is trace.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use lazy_static::lazy_static;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

// Re-export LoggingConfig from config module
pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_NAME: &str = "callwatch.log";

// Global guard to keep the non-blocking log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Log directory next to the application's persisted state.
pub fn get_log_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("callwatch")
        .join("logs")
}

/// Initialize the logging system with default configuration.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Initialize the logging system from configuration. Must be called once,
/// before any engine component starts emitting.
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&config.level);

        if !config.level.to_lowercase().contains("trace") {
            // HTTP client internals are only interesting when tracing
            filter = filter
                .add_directive("reqwest=warn".parse().expect("directive"))
                .add_directive("hyper=warn".parse().expect("directive"))
                .add_directive(
                    format!("callwatch={}", config.level)
                        .parse()
                        .expect("directive"),
                );
        }

        for (module, level) in &config.module_filters {
            match format!("{module}={level}").parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring bad module filter {module}={level}: {e}"),
            }
        }

        filter
    });

    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.console_output) {
        (true, console) => {
            let log_dir = get_log_directory();
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create log directory {log_dir:?}"))?;

            let file_appender = rolling::never(&log_dir, LOG_FILE_NAME);
            let (file_writer, file_guard) = non_blocking(file_appender);

            // Keep the guard alive for the process lifetime
            LOG_GUARDS.lock().unwrap().push(file_guard);

            let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

            if console {
                registry
                    .with(file_layer)
                    .with(fmt::layer())
                    .try_init()
                    .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
            } else {
                registry
                    .with(file_layer)
                    .try_init()
                    .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
            }
        }
        (false, _) => {
            registry
                .with(fmt::layer())
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
        }
    }

    tracing::info!("Logging initialized (level: {})", config.level);
    Ok(())
}
