//! Console logger for the `log` facade.
//!
//! Records are written as `[LEVEL] target: message` followed by CRLF to a
//! single [`Serial`] sink. The sink is registered once at boot; records
//! emitted before that are dropped.

use crate::Serial;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

type Sink = &'static mut (dyn Serial + Send);

/// `log` backend writing to the boot console.
pub struct ConsoleLogger {
    sink: Mutex<Option<Sink>>,
}

/// Wrapper to implement `core::fmt::Write` for any Serial impl.
pub struct SerialWriter<'a, S: Serial + ?Sized>(pub &'a mut S);

impl<S: Serial + ?Sized> Write for SerialWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.0.write_byte(b'\r');
            }
            self.0.write_byte(b);
        }
        Ok(())
    }
}

static LOGGER: ConsoleLogger = ConsoleLogger::new();

impl ConsoleLogger {
    pub const fn new() -> Self {
        Self { sink: Mutex::new(None) }
    }

    /// Replace the output sink.
    pub fn set_sink(&self, sink: Sink) {
        *self.sink.lock() = Some(sink);
    }

    /// Detach the sink; used before handing over to the kernel.
    pub fn take_sink(&self) -> Option<Sink> {
        self.sink.lock().take()
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut guard = self.sink.lock();
        if let Some(sink) = guard.as_mut() {
            let mut w = SerialWriter(&mut **sink);
            let _ = writeln!(w, "[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the console logger with `sink` as output.
///
/// Calling this again only swaps the sink and level.
pub fn init(sink: Sink, level: LevelFilter) {
    LOGGER.set_sink(sink);
    // Already-installed is fine: the static logger stays in place.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Stop logging to the console and return the sink.
pub fn shutdown() -> Option<Sink> {
    LOGGER.take_sink()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use std::boxed::Box;
    use std::vec::Vec;

    struct VecSerial(Vec<u8>);

    impl Serial for VecSerial {
        fn init(&mut self, _baud: u32) -> Result<()> {
            Ok(())
        }
        fn write_byte(&mut self, byte: u8) {
            self.0.push(byte);
        }
        fn read_byte(&mut self) -> u8 {
            0
        }
        fn data_available(&self) -> bool {
            false
        }
    }

    struct SharedSerial(&'static Mutex<Vec<u8>>);

    impl Serial for SharedSerial {
        fn init(&mut self, _baud: u32) -> Result<()> {
            Ok(())
        }
        fn write_byte(&mut self, byte: u8) {
            self.0.lock().push(byte);
        }
        fn read_byte(&mut self) -> u8 {
            0
        }
        fn data_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn formats_records_and_filters_by_level() {
        static OUT: Mutex<Vec<u8>> = Mutex::new(Vec::new());
        let logger = ConsoleLogger::new();
        logger.set_sink(Box::leak(Box::new(SharedSerial(&OUT))));
        log::set_max_level(LevelFilter::Info);
        logger.log(
            &Record::builder()
                .args(format_args!("hello {}", 7))
                .level(log::Level::Warn)
                .target("gpcdma")
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("noise"))
                .level(log::Level::Debug)
                .target("gpcdma")
                .build(),
        );
        assert_eq!(OUT.lock().as_slice(), b"[WARN] gpcdma: hello 7\r\n");
        assert!(logger.take_sink().is_some());
        assert!(logger.take_sink().is_none());
    }

    #[test]
    fn serial_writer_expands_newlines() {
        let mut s = VecSerial(Vec::new());
        write!(SerialWriter(&mut s), "a\nb").unwrap();
        assert_eq!(s.0, b"a\r\nb");
    }
}
