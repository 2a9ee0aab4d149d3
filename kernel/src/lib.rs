//! Teaching kernel library: a round-robin, x86_64 long-mode kernel built
//! around a one-page-PCB scheduler, a two-pool physical allocator, and a
//! minimal on-disk filesystem.
//!
//! This crate exists mainly so integration tests (`tests/`) and the
//! `tinyos-kernel` binary share one implementation.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// naked_functions is stable since Rust 1.88.0, no feature flag needed.
// Custom test runner only for bare-metal; host target uses the standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// On bare-metal, kmalloc/kfree (component D) back the global allocator so
// Vec/String/Box work the same on the host and on real hardware. On the
// host target (used for `cargo test`/coverage), delegate to the system
// allocator instead.
#[cfg(target_os = "none")]
struct KernelAllocator;

#[cfg(target_os = "none")]
unsafe impl core::alloc::GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        match mm::slab::kmalloc(layout.size()) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: core::alloc::Layout) {
        if let Some(nn) = core::ptr::NonNull::new(ptr) {
            unsafe { mm::slab::kfree(nn) };
        }
    }
}

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod bootstrap;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod logging;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod services;
pub mod sync;
mod syscall;
pub mod utils;

mod test_framework;

// Re-exported for `tests/` integration binaries and the kernel's own
// service/shell layers.
pub use error::{KernelError, KernelResult};
pub use mm::{FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, PAGE_SIZE};
pub use sched::task::{Pid, Task, TaskState};
#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, BenchmarkRunner, QemuExitCode,
    Testable,
};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}
