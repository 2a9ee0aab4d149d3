//! Smoke test: does the kernel image boot far enough to run a test case at
//! all.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(tinyos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

use tinyos_kernel::{error::KernelError, serial_println, test_panic_handler};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Basic Boot");
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

#[test_case]
fn test_serial_output() -> Result<(), KernelError> {
    serial_println!("serial port is alive");
    Ok(())
}

#[test_case]
fn test_simple_arithmetic() -> Result<(), KernelError> {
    let x = 2 + 2;
    if x != 4 {
        return Err(KernelError::InvalidState);
    }
    Ok(())
}
