//! User-facing services layered on top of the scheduler and file system.
//!
//! The donor carried a whole userland here (IPC brokers, a driver
//! framework, an init system); this kernel's user-facing surface is the
//! shell alone (§4.O), so this module is left as a thin front door onto
//! it.

pub mod shell;

pub use shell::Shell;

/// Spawn the shell as the system's first task. Called once from
/// [`crate::bootstrap`] after the scheduler and file system are both up.
pub fn init() {
    crate::println!("[SERVICES] starting shell");
    shell::spawn_init();
}
