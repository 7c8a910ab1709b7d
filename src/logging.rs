use log::{self, Level, LevelFilter, Log, Metadata, Record};

/// A simple logger that prints all log messages
struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // red
            Level::Warn => 93,  // bright yellow
            Level::Info => 34,  // blue
            Level::Debug => 32, // green
            Level::Trace => 36, // cyan
        };
        println!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            color,
            record.level(),
            record.args(),
        );
    }
    fn flush(&self) {}
}

/// Map a `LOG` style level name onto a filter. Unknown names turn logging off.
pub fn parse_level(s: &str) -> LevelFilter {
    match s.to_ascii_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "INFO" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Install the logger with the level taken from the `LOG` environment variable.
pub fn init() {
    let level = std::env::var("LOG")
        .map(|s| parse_level(&s))
        .unwrap_or(LevelFilter::Off);
    init_with(level);
}

/// Install the logger with an explicit level. Calling it again only changes
/// the level.
pub fn init_with(level: LevelFilter) {
    static LOGGER: SimpleLogger = SimpleLogger;
    // a logger may already be installed by an earlier call
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("TRACE"), LevelFilter::Trace);
        assert_eq!(parse_level("info"), LevelFilter::Info);
        assert_eq!(parse_level("loud"), LevelFilter::Off);
    }
}
