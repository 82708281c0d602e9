// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicU8, Ordering};

use colored::Colorize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogLevel {
    Quiet,
    Normal,
    Verbose,
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Normal as u8);

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Quiet,
        1 => LogLevel::Normal,
        _ => LogLevel::Verbose,
    }
}

pub fn prefix() -> colored::ColoredString {
    "[umsinspect]".cyan()
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::utils::log_level() != $crate::utils::LogLevel::Quiet {
            eprintln!("{} {}", $crate::utils::prefix(), format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_verbose {
    ($($arg:tt)*) => {
        if $crate::utils::log_level() == $crate::utils::LogLevel::Verbose {
            eprintln!("{} {}", $crate::utils::prefix(), format_args!($($arg)*));
        }
    };
}

/// Forwards library records to stderr in verbose mode.
struct CliLogger;

impl log::Log for CliLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        log_level() == LogLevel::Verbose || metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            log::Level::Error => "error".red(),
            log::Level::Warn => "warn".yellow(),
            log::Level::Info => "info".green(),
            log::Level::Debug => "debug".normal(),
            log::Level::Trace => "trace".dimmed(),
        };
        eprintln!("{} {level} {}: {}", prefix(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: CliLogger = CliLogger;

pub fn init_logger(level: LogLevel) {
    set_log_level(level);
    let filter = match level {
        LogLevel::Quiet => log::LevelFilter::Error,
        LogLevel::Normal => log::LevelFilter::Warn,
        LogLevel::Verbose => log::LevelFilter::Debug,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(filter);
    }
}
