use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use spdlog::sink::{RotatingFileSink, RotationPolicy, StdStream, StdStreamSink};
use spdlog::{Level, LevelFilter, Logger, LoggerBuilder};

use crate::config::{Config, Log, LogLevel};

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Critical => Level::Critical,
            LogLevel::Error => Level::Error,
            LogLevel::Warn => Level::Warn,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
            LogLevel::Trace => Level::Trace,
        }
    }
}

/// `<cache dir>/blogstore/log/<name>.log`, used when the config has no location.
pub fn default_log_location(name: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("blogstore")
        .join("log")
        .join(format!("{}.log", name))
}

fn add_console_sinks(builder: &mut LoggerBuilder) -> spdlog::Result<()> {
    let stdout = Arc::new(StdStreamSink::builder()
        .std_stream(StdStream::Stdout)
        .level_filter(LevelFilter::MoreVerbose(Level::Warn))
        .build()?);

    let stderr = Arc::new(StdStreamSink::builder()
        .std_stream(StdStream::Stderr)
        .level_filter(LevelFilter::MoreSevereEqual(Level::Warn))
        .build()?);

    builder.sink(stdout).sink(stderr);

    Ok(())
}

fn file_sink(location: PathBuf, max_files: usize) -> spdlog::Result<Arc<RotatingFileSink>> {
    let sink = RotatingFileSink::builder()
        .base_path(location)
        .rotation_policy(RotationPolicy::Daily { hour: 0, minute: 0 })
        .max_files(max_files)
        .build()?;
    Ok(Arc::new(sink))
}

/// Logger named after the binary, writing to a daily file and optionally
/// to the console.
pub fn build_logger(log: &Log, name: &str) -> spdlog::Result<Arc<Logger>> {
    let location = log.location.clone().unwrap_or_else(|| default_log_location(name));

    let mut builder = Logger::builder();
    builder.name(name).sink(file_sink(location, log.max_files)?);
    if log.log_to_console {
        add_console_sinks(&mut builder)?;
    }

    let logger = Arc::new(builder.build()?);
    logger.set_level_filter(LevelFilter::MoreSevereEqual(log.level.into()));
    // Git failures are logged at warn, keep them on disk right away
    logger.set_flush_level_filter(LevelFilter::MoreSevereEqual(Level::Warn));
    logger.set_flush_period(Some(Duration::from_secs(2)));
    Ok(logger)
}

/// Without a `[log]` section the default console logger stays in place.
pub fn configure_logger(config: &Config, name: &str) -> spdlog::Result<()> {
    if let Some(ref log) = config.log {
        spdlog::set_default_logger(build_logger(log, name)?);
    }
    Ok(())
}
