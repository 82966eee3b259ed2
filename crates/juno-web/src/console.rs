//! `tracing` output to the browser console.
//!
//! Each event is formatted by `tracing-subscriber`'s fmt layer and handed
//! to the `console` method matching its level, so the browser's own level
//! filter works on it.

use std::io;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use wasm_bindgen::JsValue;
use web_sys::console;

use crate::error::WebError;

/// [`MakeWriter`] producing one [`ConsoleWriter`] per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleMakeWriter;

/// Buffers one formatted event and writes it to the console on drop.
#[derive(Debug)]
pub struct ConsoleWriter {
    level: Level,
    buffer: Vec<u8>,
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buffer);
        let line = JsValue::from_str(text.trim_end());
        match self.level {
            Level::ERROR => console::error_1(&line),
            Level::WARN => console::warn_1(&line),
            Level::INFO => console::info_1(&line),
            Level::DEBUG => console::debug_1(&line),
            Level::TRACE => console::log_1(&line),
        }
    }
}

impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter {
            level: Level::INFO,
            buffer: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ConsoleWriter {
            level: *meta.level(),
            buffer: Vec::new(),
        }
    }
}

/// Install the console subscriber (and, with `panic-hook`, the panic hook).
///
/// # Errors
///
/// [`WebError::Logging`] if a global subscriber is already set.
pub fn init(level: Level) -> Result<(), WebError> {
    #[cfg(feature = "panic-hook")]
    console_error_panic_hook::set_once();
    tracing_subscriber::fmt()
        .with_writer(ConsoleMakeWriter)
        .with_max_level(level)
        .with_ansi(false)
        .without_time()
        .with_target(true)
        .try_init()
        .map_err(|err| WebError::Logging(err.to_string()))
}
