//! First-touch stack page fault handling (§4.G).
//!
//! The user stack is never pre-mapped: `Task::create_user`/`exec_current`
//! only set `rsp`/the trap frame to [`USER_STACK_TOP`]; the page backing it
//! is allocated the first time something actually touches it. This is the
//! *only* kind of page fault this kernel resolves — general demand paging,
//! copy-on-write, and signal delivery are explicit non-goals (§1) — so any
//! other not-present fault, or any protection fault, is unrecoverable.

use crate::arch::x86_64::usermode::USER_STACK_TOP;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{KernelPoolFrames, PageMapper, PageTable};
use crate::mm::{FrameNumber, PageFlags, VirtualAddress, PAGE_SIZE};

/// How far below `USER_STACK_TOP` a fault is still considered stack growth
/// rather than a genuine wild access (256 KiB).
const MAX_STACK_SIZE: u64 = 256 * 1024;

/// Reason a page fault occurred, decoded from the architecture's error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultReason {
    NotPresent,
    ProtectionViolation,
}

/// A page fault as reported by the IDT's `#PF` handler (`irq`, §4.I).
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    pub faulting_address: u64,
    pub reason: PageFaultReason,
    pub was_write: bool,
    pub was_user_mode: bool,
    pub instruction_pointer: u64,
}

/// Decode an x86_64 `#PF` error code and `cr2` into a [`PageFaultInfo`].
///
/// Error code bits (Intel SDM): bit 0 present, bit 1 write, bit 2 user.
pub fn from_x86_64(error_code: u64, cr2: u64, rip: u64) -> PageFaultInfo {
    let reason = if error_code & 1 == 0 {
        PageFaultReason::NotPresent
    } else {
        PageFaultReason::ProtectionViolation
    };
    PageFaultInfo {
        faulting_address: cr2,
        reason,
        was_write: error_code & 2 != 0,
        was_user_mode: error_code & 4 != 0,
        instruction_pointer: rip,
    }
}

/// Resolve a page fault. Only a not-present fault inside the user stack's
/// growth window, on the task currently running, is resolved by mapping a
/// fresh zeroed page; anything else is an error the caller should turn into
/// a kernel panic (there is no process signal mechanism to fall back to).
pub fn handle_page_fault(info: PageFaultInfo) -> KernelResult<()> {
    if info.reason != PageFaultReason::NotPresent {
        return Err(KernelError::PermissionDenied {
            operation: "page protection violation",
        });
    }

    let stack_bottom = USER_STACK_TOP as u64 - MAX_STACK_SIZE;
    if !(stack_bottom..USER_STACK_TOP as u64).contains(&info.faulting_address) {
        return Err(KernelError::InvalidAddress {
            addr: info.faulting_address as usize,
        });
    }

    let current = crate::sched::current_task_ptr();
    let task = unsafe { current.as_mut() };
    let root = task.page_table_root.ok_or(KernelError::NotInitialized {
        subsystem: "process::address_space",
    })?;

    let page_size = PAGE_SIZE as u64;
    let page_addr = info.faulting_address & !(page_size - 1);

    let l4 = root as *mut PageTable;
    let mut mapper = unsafe { PageMapper::new(l4) };
    let mut frames = KernelPoolFrames;

    if mapper.translate(VirtualAddress::new(page_addr)).is_some() {
        // Already mapped: some other CPU/fault beat us to it, or this is a
        // genuine protection fault masquerading as not-present. Either way
        // there is nothing left for first-touch handling to do.
        return Err(KernelError::InvalidAddress {
            addr: info.faulting_address as usize,
        });
    }

    let frame_addr = crate::mm::alloc_user_pages(1)?;
    unsafe {
        core::ptr::write_bytes(frame_addr as *mut u8, 0, PAGE_SIZE);
    }
    let frame_number = FrameNumber::new(frame_addr as u64 / page_size);
    let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::NO_EXECUTE;
    mapper
        .map_page(VirtualAddress::new(page_addr), frame_number, flags, &mut frames)
        .map_err(|_| KernelError::OutOfMemory {
            requested: 1,
            available: 0,
        })?;

    if let Some(pool) = task.user_vaddr_pool.as_mut() {
        let _ = pool.mark_addr(page_addr as usize);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_not_present_user_write() {
        let info = from_x86_64(0b110, 0xDEAD_BEEF, 0x4010_0000);
        assert_eq!(info.reason, PageFaultReason::NotPresent);
        assert!(info.was_write);
        assert!(info.was_user_mode);
        assert_eq!(info.faulting_address, 0xDEAD_BEEF);
    }

    #[test]
    fn decodes_protection_violation() {
        let info = from_x86_64(0b001, 0x1000, 0x2000);
        assert_eq!(info.reason, PageFaultReason::ProtectionViolation);
    }
}
