//! Scheduler integration tests: task creation and the ready/all-tasks
//! lists, exercised against real hardware paging (bare-metal only).

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(tinyos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use tinyos_kernel::{
    error::KernelError,
    kernel_assert, kernel_assert_eq,
    sched::{self, task::Task},
    serial_println, test_panic_handler,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Scheduler");
    tinyos_kernel::arch::x86_64::init();
    tinyos_kernel::mm::init();
    sched::init();
    let idle = Task::create_idle().expect("idle task allocation failed");
    sched::spawn_idle(idle);
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

extern "C" fn noop_body(_arg: usize) -> ! {
    loop {
        sched::yield_now();
    }
}

#[test_case]
fn test_kernel_task_creation() -> Result<(), KernelError> {
    let task = Task::create_kernel("sched_test", noop_body, 0)?;
    let pid = unsafe { task.as_ref() }.pid;
    sched::spawn(task);

    let mut found = false;
    sched::for_each_task(|t| {
        if t.pid == pid {
            found = true;
        }
    });
    kernel_assert!(found);
    Ok(())
}

#[test_case]
fn test_task_starts_ready() -> Result<(), KernelError> {
    let task = Task::create_kernel("sched_test_ready", noop_body, 0)?;
    kernel_assert_eq!(
        unsafe { task.as_ref() }.state,
        tinyos_kernel::TaskState::Ready
    );
    sched::spawn(task);
    Ok(())
}
