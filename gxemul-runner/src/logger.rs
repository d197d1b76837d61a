//! A minimal logger for the `gxemul-run` binary. Library crates
//! only ever call through the `log` facade; nothing upstream of this
//! module requires a particular logger backend, so tests never pull one
//! in. Plain line-oriented output to stderr, no filtering beyond the
//! standard `log::LevelFilter`.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct LineLogger;

impl Log for LineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: LineLogger = LineLogger;

/// Installs [`LineLogger`] as the global `log` backend. Idempotent in
/// practice (a second call just gets and ignores `SetLoggerError`) so
/// callers embedding the runner in their own process don't need to
/// guard it themselves.
pub fn install_default_logger(filter: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
}
