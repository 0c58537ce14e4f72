use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{:<5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Install the stderr sink for the library's log output. `trace` turns
/// on everything, otherwise info and above.
pub fn init(trace: bool) {
    let level = if trace {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
