//! Per-process page tables (§4.G "Page tables").
//!
//! Every process gets its own PML4, but the kernel's own identity-mapped
//! region (PML4 index 0, where [`crate::mm::KERNEL_POOL_BASE`] and
//! [`crate::mm::USER_POOL_BASE`] live) must be identical in all of them —
//! a process shouldn't be able to fault the kernel out of existence just
//! by tearing down its own tables. [`new_page_table`] clones that single
//! PML4 entry from a template captured once at boot and installs the
//! reserved recursive self-map slot used by
//! [`crate::mm::page_table::PageMapper`]. A process's own program/heap
//! range ([`crate::mm::USER_VADDR_START`], PML4 index 1) and its stack
//! ([`crate::arch::x86_64::usermode::USER_STACK_TOP`], PML4 index 255)
//! live in different top-level entries than the kernel's, so cloning one
//! entry is all "kernel entries cloned" (§4.G) requires here.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{ActivePageTable, PageTable, PageTableIndex};
use crate::mm::{PageFlags, PhysicalAddress};

/// PML4 index housing the kernel's identity-mapped pools and image.
const KERNEL_IDENTITY_INDEX: usize = 0;

/// Reserved PML4 slot for the recursive self-map ([`PageMapper`]'s
/// `recursive_index`).
pub const RECURSIVE_INDEX: PageTableIndex = PageTableIndex::new_truncate(510);

static KERNEL_L4_TEMPLATE: Mutex<Option<PhysicalAddress>> = Mutex::new(None);

/// Capture the page table the bootloader handed the kernel as the template
/// every process's upper half is cloned from. Must run once, early, before
/// any process's page table is built.
pub fn init() {
    let active = ActivePageTable::current();
    *KERNEL_L4_TEMPLATE.lock() = Some(active.l4_phys());
    println!("[PROCESS] Captured kernel L4 template at {:#x}", active.l4_phys().as_u64());
}

/// Build a fresh PML4 for a new process: kernel upper half cloned from the
/// boot-time template, recursive self-map slot installed, everything else
/// zero. Returns the new table's physical address (== `cr3` value, since
/// this kernel runs with physical memory identity-mapped into every
/// address space's kernel half).
pub fn new_page_table() -> KernelResult<u64> {
    let template_addr = KERNEL_L4_TEMPLATE
        .lock()
        .ok_or(KernelError::NotInitialized {
            subsystem: "process::address_space",
        })?;

    let new_addr = crate::mm::alloc_kernel_pages(1)?;
    let new_table = unsafe { &mut *(new_addr as *mut PageTable) };
    new_table.zero();

    let template = unsafe { &*(template_addr.as_u64() as *const PageTable) };
    new_table[KERNEL_IDENTITY_INDEX] = template[KERNEL_IDENTITY_INDEX];

    new_table[RECURSIVE_INDEX].set_addr(
        PhysicalAddress::new(new_addr as u64),
        PageFlags::PRESENT | PageFlags::WRITABLE,
    );

    Ok(new_addr as u64)
}
