//! Architecture support. This kernel targets x86_64 long mode only.

pub mod context;
pub mod x86_64;

pub use self::x86_64::*;
