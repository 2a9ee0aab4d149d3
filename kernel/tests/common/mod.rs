//! Shared setup for the kernel's bare-metal integration tests.

use tinyos_kernel::serial_println;

/// Print a banner identifying which integration test binary is running.
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} ===", subsystem);
}
