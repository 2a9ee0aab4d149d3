//! `fork`/`execv` process model: component N.
//!
//! The PCB itself lives in [`crate::sched::task`]; this module only adds
//! what sits on top of an already-running task: per-process page tables
//! ([`address_space`]), duplicating one into a new, independent task
//! ([`fork`]), replacing a task's image in place with an ELF binary
//! ([`exec`]), and loading a brand-new task that has no running parent to
//! fork from or exec over in the first place ([`spawn`]).

use crate::println;

pub mod address_space;
pub mod exec;
pub mod fork;
pub mod spawn;

pub use crate::sched::task::Pid;
pub use exec::exec_current;
pub use fork::fork_process;
pub use spawn::spawn;

/// Initialize the process subsystem: captures the boot-time kernel page
/// table as the template every new process's address space clones its
/// kernel half from.
pub fn init() {
    println!("[PROCESS] Initializing process management...");
    address_space::init();
    println!("[PROCESS] Process management initialized");
}
