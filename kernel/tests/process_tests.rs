//! Process-management integration tests: page-table creation for a new
//! address space (§4.N), which needs real paging hardware and so cannot
//! run as a host `#[cfg(test)]` unit test.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(tinyos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use tinyos_kernel::{
    error::KernelError, kernel_assert, process, sched, test_panic_handler,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Process Management");
    tinyos_kernel::arch::x86_64::init();
    tinyos_kernel::mm::init();
    process::init();
    sched::init();
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
fn test_new_page_table_clones_kernel_half() -> Result<(), KernelError> {
    let root_a = process::address_space::new_page_table()?;
    let root_b = process::address_space::new_page_table()?;
    kernel_assert!(root_a != root_b);
    Ok(())
}
