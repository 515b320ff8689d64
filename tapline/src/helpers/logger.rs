use std::{
    env,
    io::{stderr, IsTerminal, Write},
    str::FromStr,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use log::{LevelFilter, Metadata, Record};
use termcolor::{BufferedStandardStream, Color, ColorChoice, ColorSpec, WriteColor};
use time::{macros::format_description, OffsetDateTime};

/// Logger handling all log:: messages of the agent.
pub(crate) struct Logger {
    /// Max level the logger will output.
    max_level: LevelFilter,
    /// Inner writer, alongside its configuration.
    inner: Mutex<LoggerWriter>,
}

struct LoggerWriter {
    /// Diagnostics only go to stderr; stdout is reserved for reports so it can
    /// be piped to other tools.
    stderr: BufferedStandardStream,
    /// Should colors be used in the output?
    use_colors: bool,
}

impl Logger {
    pub(crate) fn init(max_level: LevelFilter) -> Result<Arc<Self>> {
        let logger = Arc::new(Logger {
            max_level,
            inner: Mutex::new(LoggerWriter {
                stderr: BufferedStandardStream::stderr(ColorChoice::Auto),
                use_colors: Self::check_color_use(stderr()),
            }),
        });

        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(Arc::clone(&logger)))?;

        Ok(logger)
    }

    /// Convert a `--log-level` value into a level filter.
    pub(crate) fn parse_level(level: &str) -> Result<LevelFilter> {
        LevelFilter::from_str(level).map_err(|_| anyhow!("Invalid log level '{level}'"))
    }

    fn try_log(&self, record: &Record) -> Result<()> {
        static LEVEL_COLORS: &[Option<Color>] = &[
            None,                // Default.
            Some(Color::Red),    // Error.
            Some(Color::Yellow), // Warn.
            Some(Color::Blue),   // Info.
            Some(Color::Cyan),   // Debug.
            Some(Color::White),  // Trace.
        ];
        let inner: &mut LoggerWriter = &mut self.inner.lock().unwrap();

        // Timestamps are only useful when following the event flow.
        if self.max_level >= LevelFilter::Debug {
            OffsetDateTime::now_utc().format_into(
                &mut inner.stderr,
                format_description!("[hour]:[minute]:[second].[subsecond digits:6] "),
            )?;
        }

        if record.level() <= LevelFilter::Warn || self.max_level >= LevelFilter::Debug {
            if inner.use_colors {
                inner
                    .stderr
                    .set_color(ColorSpec::new().set_fg(LEVEL_COLORS[record.level() as usize]))?;
            }
            write!(inner.stderr, "{:5} ", record.level())?;
            if inner.use_colors {
                inner.stderr.reset()?;
            }
        }

        writeln!(inner.stderr, "{}", record.args())?;

        inner.stderr.flush()?;
        Ok(())
    }

    fn check_color_use<T: IsTerminal>(t: T) -> bool {
        t.is_terminal() && matches!(env::var("TERM"), Ok(x) if x != "dumb")
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Not much we can do to report the error...
        let _ = self.try_log(record);
    }

    fn flush(&self) {
        let _ = self.inner.lock().unwrap().stderr.flush();
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use test_case::test_case;

    use super::*;

    #[test_case("error", LevelFilter::Error)]
    #[test_case("info", LevelFilter::Info)]
    #[test_case("TRACE", LevelFilter::Trace)]
    fn parse_level(input: &str, level: LevelFilter) {
        assert_eq!(Logger::parse_level(input).unwrap(), level);
    }

    #[test]
    fn parse_invalid_level() {
        assert!(Logger::parse_level("verbose").is_err());
    }

    #[test]
    #[serial(logger)]
    fn init_once() {
        // Other tests might have installed a logger already, only the second
        // call is guaranteed to fail.
        let _ = Logger::init(LevelFilter::Debug);
        assert!(Logger::init(LevelFilter::Debug).is_err());
    }
}
