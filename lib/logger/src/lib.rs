//! A small [`log::Log`] backend for the server.
//!
//! A `Log` impl paired with a private, `Display`-formatted record type,
//! stripped down for a single-threaded process: no background flush thread,
//! no simulated time, no per-host context. Every record is written
//! synchronously to the configured sink as soon as it's logged.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Installs the server logger as the global `log` backend.
///
/// `sink` is either stdout or a file opened in append mode (see
/// [`ServerLogger::to_file`] / [`ServerLogger::to_stdout`]). `max_level`
/// filters out anything less severe before it reaches the sink.
pub fn init(sink: Box<dyn Write + Send>, max_level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = ServerLogger {
        sink: Mutex::new(sink),
        max_level,
    };
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(())
}

/// Opens `path` in append mode for use as the log sink.
pub fn file_sink(path: &Path) -> std::io::Result<Box<dyn Write + Send>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

pub fn stdout_sink() -> Box<dyn Write + Send> {
    Box::new(std::io::stdout())
}

struct ServerLogger {
    sink: Mutex<Box<dyn Write + Send>>,
    max_level: LevelFilter,
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        );
        let mut sink = self.sink.lock().unwrap();
        // Best-effort: a write failure on the log sink must not crash the
        // reactor it's reporting on.
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }

    fn flush(&self) {
        let mut sink = self.sink.lock().unwrap();
        let _ = sink.flush();
    }
}

/// Maps the CLI's level vocabulary onto [`LevelFilter`].
///
/// `log` has no `Notice`/`Crit` levels; `NOTICE` is treated as `Info` and
/// `CRIT` as `Error`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, clap::ValueEnum)]
pub enum CliLevel {
    Trace,
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Crit,
}

impl From<CliLevel> for LevelFilter {
    fn from(level: CliLevel) -> Self {
        match level {
            CliLevel::Trace => LevelFilter::Trace,
            CliLevel::Debug => LevelFilter::Debug,
            CliLevel::Info => LevelFilter::Info,
            CliLevel::Notice => LevelFilter::Info,
            CliLevel::Warn => LevelFilter::Warn,
            CliLevel::Error => LevelFilter::Error,
            CliLevel::Crit => LevelFilter::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn format_matches_wire_spec() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let logger = ServerLogger {
            sink: Mutex::new(Box::new(SharedBuf(buf.clone()))),
            max_level: LevelFilter::Trace,
        };
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("peer closed the connection"))
                .build(),
        );
        let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(out.ends_with(" [WARN] peer closed the connection\n"));
        // "YYYY-MM-DD HH:MM:SS" is exactly 19 characters before the level tag
        assert_eq!(&out[4..5], "-");
        assert_eq!(&out[7..8], "-");
        assert_eq!(&out[10..11], " ");
    }

    #[test]
    fn level_filter_drops_quieter_records() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let logger = ServerLogger {
            sink: Mutex::new(Box::new(SharedBuf(buf.clone()))),
            max_level: LevelFilter::Warn,
        };
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("should be dropped"))
                .build(),
        );
        assert!(buf.lock().unwrap().is_empty());
    }

    #[test]
    fn notice_and_crit_map_onto_existing_levels() {
        assert_eq!(LevelFilter::from(CliLevel::Notice), LevelFilter::Info);
        assert_eq!(LevelFilter::from(CliLevel::Crit), LevelFilter::Error);
    }
}
