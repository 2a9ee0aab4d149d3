//! `log` crate backend (§4.P): every `log::{info,warn,error,debug,trace}`
//! call a subsystem makes is funneled through this logger onto the serial
//! port, with `warn` and `error` additionally mirrored to the VGA console
//! the way the donor's `println!`/`serial_println!` pair both fire for
//! important boot messages.
//!
//! Installed once, early in [`crate::bootstrap::kernel_init`], well before
//! the heap or scheduler exist — the serial port needs nothing but direct
//! I/O port access, so logging is live from the first boot line onward.
//! Anything traced before this runs (or if it panics) still reaches the
//! serial port through the separate `early_serial`/`early_println!` path.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!("[{:<5}] {}", record.level(), record.args());
        if record.level() <= Level::Warn {
            crate::println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the logger as the `log` facade's global backend. Called once
/// from `bootstrap::kernel_init`; a second call would panic, so nothing
/// else in the kernel should call this.
pub fn init() {
    log::set_logger(&LOGGER).expect("logger already installed");
    log::set_max_level(LevelFilter::Trace);
}
