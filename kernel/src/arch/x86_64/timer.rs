//! x86_64 timer implementation

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Get current timer ticks
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Increment timer ticks (called from timer interrupt)
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    // Trigger scheduler tick
    crate::sched::timer_tick();
}

/// PIT base oscillator frequency in Hz.
const PIT_FREQUENCY: u32 = 1_193_182;

/// Tick rate the scheduler's quantum accounting is built around (§4.I).
pub const TICK_HZ: u32 = 100;

/// Program the legacy PIT (channel 0, mode 2, lobyte/hibyte) for 100 Hz
/// periodic interrupts on IRQ0.
pub fn setup_timer() {
    let divisor = PIT_FREQUENCY / TICK_HZ;

    unsafe {
        use x86_64::instructions::port::Port;

        let mut cmd_port: Port<u8> = Port::new(0x43);
        let mut data_port: Port<u8> = Port::new(0x40);

        cmd_port.write(0x34); // channel 0, lobyte/hibyte, mode 2 (rate generator), binary
        data_port.write((divisor & 0xFF) as u8);
        data_port.write((divisor >> 8) as u8);
    }

    println!("[TIMER] Configured PIT for {} Hz", TICK_HZ);
}
