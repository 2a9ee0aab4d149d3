//! `tinyos-kernel` binary entry point.
//!
//! The real boot entry point (`entry_point!`) lives in
//! [`tinyos_kernel::arch::x86_64::boot`]: the bootloader hands control
//! straight to the library crate, since that's what owns the allocator,
//! the scheduler, and everything else the kernel boots into. This file
//! only supplies the panic handler a non-test, bare-metal build needs.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use tinyos_kernel::println;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", info);
    tinyos_kernel::arch::x86_64::halt();
}
