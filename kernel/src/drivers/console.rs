//! Console device (§4.J): "a thin wrapper around low-level VGA text output
//! behind a single mutex so that interleaved prints from multiple tasks
//! stay coherent."
//!
//! The VGA buffer writer itself (`arch::x86_64::vga::WRITER`) already is
//! that mutex; this module just exposes the two operations the syscall
//! table needs (`putchar`, `clear`) on top of it.

use crate::arch::x86_64::vga::WRITER;

pub fn init() {
    crate::println!("[CONSOLE] VGA text console ready");
}

/// Write one byte to the console, holding the VGA writer's mutex for the
/// duration so concurrent writers from different tasks cannot interleave
/// mid-character.
pub fn putchar(byte: u8) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        WRITER.lock().write_byte(byte);
    });
}

/// Blank the screen and reset the cursor to the top-left corner.
pub fn clear() {
    x86_64::instructions::interrupts::without_interrupts(|| {
        WRITER.lock().clear();
    });
}
