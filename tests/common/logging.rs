use std::{io, sync::Once, thread};

use isaac_rs::types::data_types::Address;
use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Set up a logger that logs all log messages with level `level` and above.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

// Log `message` at Info level, prefixed with the node it concerns, or with "Test" if it concerns the
// whole test.
pub(crate) fn log_with_context(node: Option<&Address>, message: &str) {
    match node {
        Some(node) => log::info!("[{}] {}", node, message),
        None => log::info!("[Test] {}", message),
    }
}
