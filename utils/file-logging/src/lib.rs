use anyhow::Result;
use chrono::format::strftime::StrftimeItems;
use chrono::format::DelayedFormat;
use chrono::{DateTime, Local};
use flexi_logger::{
    style, AdaptiveFormat, Age, Cleanup, Criterion, DeferredNow, Duplicate, Logger, Naming, Record,
};
use std::path::{Path, PathBuf};

pub use flexi_logger::LoggerHandle;

/// Modules that are too chatty on `debug`, kept on `info` unless overridden.
const QUIET_MODULES: &str = "hyper=info,reqwest=info,rustls=info,r2d2=info,tokio_util=info";

/// Where and how much to log.
#[derive(Clone, Debug)]
pub struct LogConfig {
    pub default_level: String,
    pub log_dir: Option<PathBuf>,
    pub module_overrides: String,
    pub force_debug: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            default_level: "info".to_string(),
            log_dir: None,
            module_overrides: String::new(),
            force_debug: false,
        }
    }
}

impl LogConfig {
    /// Filter spec in `env_logger` syntax. `RUST_LOG` still wins when set.
    pub fn filter_spec(&self) -> String {
        let level = if self.force_debug {
            "debug"
        } else {
            self.default_level.as_str()
        };

        [level, QUIET_MODULES, self.module_overrides.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn log_format_date(now: &mut DeferredNow) -> DelayedFormat<StrftimeItems> {
    let local_date = DateTime::<Local>::from(*now.now());

    // 2026-10-19T07:56:22.348+02:00
    const DATE_FORMAT_STR: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";
    local_date.format(DATE_FORMAT_STR)
}

fn log_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "[{} {:5} {}] {}",
        log_format_date(now),
        record.level(),
        record.module_path().unwrap_or("<unnamed>"),
        record.args()
    )
}

fn log_format_color(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    write!(
        w,
        "[{} {:5} {}] {}",
        yansi::Color::Fixed(247).paint(log_format_date(now)),
        style(level, level),
        yansi::Color::Fixed(247).paint(record.module_path().unwrap_or("<unnamed>")),
        &record.args()
    )
}

fn set_logging_to_files(logger: Logger, log_dir: &Path) -> Logger {
    logger
        .log_to_file()
        .directory(log_dir)
        .basename("attestd")
        .rotate(
            Criterion::AgeOrSize(Age::Day, /*size in bytes*/ 256 * 1024 * 1024),
            Naming::Timestamps,
            Cleanup::KeepLogAndCompressedFiles(1, 10),
        )
        .print_message()
        .duplicate_to_stderr(Duplicate::All)
}

pub fn start_logger(config: &LogConfig) -> Result<LoggerHandle> {
    let mut logger = Logger::with_env_or_str(config.filter_spec()).format(log_format);
    if let Some(log_dir) = &config.log_dir {
        logger = set_logging_to_files(logger, log_dir);
    }
    logger = logger
        .adaptive_format_for_stderr(AdaptiveFormat::Custom(log_format, log_format_color))
        .set_palette("9;11;2;7;8".to_string());

    Ok(logger.start()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_spec_force_debug() {
        let config = LogConfig {
            force_debug: true,
            module_overrides: "attest_whisper=trace".to_string(),
            ..Default::default()
        };
        let spec = config.filter_spec();
        assert!(spec.starts_with("debug,"));
        assert!(spec.ends_with("attest_whisper=trace"));
    }

    #[test]
    fn test_filter_spec_default() {
        let spec = LogConfig::default().filter_spec();
        assert!(spec.starts_with("info,hyper=info"));
    }
}
