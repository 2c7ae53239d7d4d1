//! Global logger

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::io::Write;

/// Add escape sequence to print with color in Linux console
macro_rules! with_color {
    ($args: ident, $color_code: ident) => {{
        format_args!("\u{1B}[{}m{}\u{1B}[0m", $color_code as u8, $args)
    }};
}

/// Print msg with color to stderr, keeping stdout for file contents
fn print_in_color(args: fmt::Arguments, color_code: u8) {
    let _ = std::io::stderr().write_fmt(with_color!(args, color_code));
}

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        print_in_color(
            format_args!(
                "[{:>5}][{}] {}\n",
                record.level(),
                record.target(),
                record.args()
            ),
            color,
        );
    }
    fn flush(&self) {}
}

fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_uppercase().as_str() {
        "OFF" => Some(LevelFilter::Off),
        "ERROR" => Some(LevelFilter::Error),
        "WARN" => Some(LevelFilter::Warn),
        "INFO" => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        "TRACE" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Install the logger. `level` comes from `--log`; the `LOG` environment
/// variable is used when it is absent, and `WARN` when neither parses.
pub fn init(level: Option<&str>) {
    static LOGGER: SimpleLogger = SimpleLogger;
    if log::set_logger(&LOGGER).is_err() {
        return;
    }
    let from_env = std::env::var("LOG").ok();
    let filter = level
        .or(from_env.as_deref())
        .and_then(parse_level)
        .unwrap_or(LevelFilter::Warn);
    log::set_max_level(filter);
}
