//! Routes `tracing` output to the browser console.

use std::io;
use std::sync::OnceLock;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use wasm_bindgen::prelude::*;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Writes one formatted event to the console method matching its level.
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
        let line = String::from_utf8_lossy(&self.buffer);
        let line = JsValue::from_str(line.trim_end());
        match self.level {
            Level::ERROR => web_sys::console::error_1(&line),
            Level::WARN => web_sys::console::warn_1(&line),
            Level::INFO => web_sys::console::info_1(&line),
            _ => web_sys::console::debug_1(&line),
        }
    }
}

/// Hands out a [`ConsoleWriter`] per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleMakeWriter;

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

/// Installs the console logger. Only the first call has an effect.
///
/// `level` is a filter directive such as `"debug"` or
/// `"nfc_evm_signer_core=trace"`; it defaults to `"info"`.
///
/// # Example
///
/// ```javascript
/// import { initLogging } from 'nfc-evm-signer-wasm';
///
/// initLogging("debug");
/// ```
#[wasm_bindgen(js_name = "initLogging")]
pub fn init_logging(level: Option<String>) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::builder().parse_lossy(level.as_deref().unwrap_or("info"));
        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(ConsoleMakeWriter)
                    .without_time()
                    .with_target(true),
            )
            .with(filter)
            .try_init();
    });
}
