//! A minimal [`log::Log`] sink selectable between stdout, a file, or both.
//!
//! The reactor core never calls into this module directly — it only emits
//! through the `log` facade (`log::trace!`/`debug!`/`error!`, exactly as
//! mio's own hot paths do). `init` is a convenience for applications that
//! want §6's "mode selector STDOUT | FILE | BOTH" without pulling in a
//! full-blown logging framework; any other `log::Log` implementation
//! (`env_logger`, `fern`, ...) works just as well and this module is never
//! required.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};

/// Where log records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stdout,
    File,
    Both,
}

struct Sink {
    mode: Mode,
    file: Option<Mutex<File>>,
}

impl Log for Sink {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{:<5}] {}:{} - {}\n",
            record.level(),
            record.target(),
            record.line().unwrap_or(0),
            record.args()
        );
        if matches!(self.mode, Mode::Stdout | Mode::Both) {
            let _ = std::io::stdout().write_all(line.as_bytes());
        }
        if matches!(self.mode, Mode::File | Mode::Both) {
            if let Some(file) = &self.file {
                let mut guard = file.lock().unwrap();
                let _ = guard.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap().flush();
        }
        let _ = std::io::stdout().flush();
    }
}

/// Installs a process-wide logger writing at `level` to `mode`.
///
/// `path` is required when `mode` is [`Mode::File`] or [`Mode::Both`].
/// Returns an error if a logger is already installed (mirrors
/// [`log::set_boxed_logger`]'s contract) or if the log file cannot be
/// opened.
pub fn init(mode: Mode, level: LevelFilter, path: Option<&Path>) -> Result<(), log::SetLoggerError> {
    let file = match mode {
        Mode::Stdout => None,
        Mode::File | Mode::Both => {
            let path = path.expect("Mode::File/Both requires a log file path");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("failed to open log file");
            Some(Mutex::new(file))
        }
    };
    log::set_boxed_logger(Box::new(Sink { mode, file }))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_without_file_does_not_panic() {
        let sink = Sink {
            mode: Mode::Stdout,
            file: None,
        };
        let record = Record::builder()
            .args(format_args!("hello"))
            .level(log::Level::Info)
            .target("test")
            .build();
        sink.log(&record);
        sink.flush();
    }
}
