//! Memory management: components A (bitmap), C (physical/virtual pools),
//! and D (slab/arena small-object allocator).
//!
//! `bitmap`/`pool` replace the donor's NUMA+buddy `frame_allocator.rs`
//! with the reference kernel's simpler two-pool design
//! (`kernel/memory.{c,h}`): one physical pool for kernel pages, one for
//! user pages, plus a per-process bitmap of the user virtual-address
//! range. `page_table` keeps the donor's 4-level `PageTable`/`PageMapper`
//! types, generalized off the deleted NUMA frame allocator onto `Pool`.
//! `slab` is the small-object allocator layered on top (§4.C).

pub mod bitmap;
pub mod page_fault;
pub mod page_table;
pub mod pool;
pub mod slab;

use spin::Mutex;

pub use page_table::{PageTable, PageTableEntry, PageTableIndex, VirtualAddressBreakdown};
pub use pool::PAGE_SIZE;

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Frame/page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
    pub const fn as_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    OutOfMemory,
    InvalidFrame,
    InvalidSize,
}

/// Page table entry flags, matching the donor's bit layout.
#[derive(Debug, Clone, Copy)]
pub struct PageFlags(pub u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    pub const NO_EXECUTE: Self = Self(1 << 63);
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Two physical page pools, matching the reference kernel's kernel/user
/// split (`MEM_BITMAP_BASE`, `kernel_pool`/`user_pool` in `memory.c`).
/// Sized generously for a QEMU `-m 256M` boot; a real loader would
/// instead size these from the memory map the bootloader hands off.
const KERNEL_POOL_PAGES: usize = 8192; // 32 MiB
const USER_POOL_PAGES: usize = 8192; // 32 MiB

static KERNEL_POOL_BITS: Mutex<[u8; KERNEL_POOL_PAGES / 8]> =
    Mutex::new([0; KERNEL_POOL_PAGES / 8]);
static USER_POOL_BITS: Mutex<[u8; USER_POOL_PAGES / 8]> = Mutex::new([0; USER_POOL_PAGES / 8]);

/// Kernel pool base (virtual == physical, identity-mapped region the
/// bootloader hands over).
pub const KERNEL_POOL_BASE: usize = 0x0020_0000; // just above the low 2 MiB
pub const USER_POOL_BASE: usize = KERNEL_POOL_BASE + KERNEL_POOL_PAGES * PAGE_SIZE;

/// Per-process user virtual-address range tracked by each task's
/// `user_vaddr_pool` bitmap (§4.G "User vaddr bitmap"). Deliberately a
/// modest window (1 GiB) rather than the full 47-bit canonical user range:
/// a literal page-granularity bitmap over the whole canonical range would
/// itself be gigabytes. The user stack lives at the fixed address
/// [`crate::arch::x86_64::usermode::USER_STACK_TOP`], near the very top of
/// the canonical lower half (PML4 index 255), and is tracked separately by
/// first-touch page-fault mapping rather than this bitmap (§4.G).
///
/// Deliberately placed in PML4 index 1 (`0x0000_0080_0000_0000` and up) —
/// a different top-level entry than the kernel's own identity-mapped
/// region (index 0, where [`KERNEL_POOL_BASE`]/[`USER_POOL_BASE`] live) and
/// than the user stack (index 255) — so that `process::address_space`
/// cloning "just the kernel's PML4 entries" into a new process can operate
/// at whole-entry granularity without a program's address range ever
/// aliasing the kernel's.
pub const USER_VADDR_START: u64 = 0x0000_0080_0040_0000;
pub const USER_VADDR_END: u64 = 0x0000_0080_4000_0000;

/// Initialize memory management: wires up the kernel/user physical pools.
/// Page tables and the kernel heap slab arenas are brought up afterward by
/// their own `init()` entry points once a frame is available to back them.
pub fn init() {
    println!("[MM] Initializing memory management...");
    println!(
        "[MM] kernel pool: {} pages at {:#x}",
        KERNEL_POOL_PAGES, KERNEL_POOL_BASE
    );
    println!(
        "[MM] user pool: {} pages at {:#x}",
        USER_POOL_PAGES, USER_POOL_BASE
    );
    println!("[MM] Memory management initialized");
}

/// Allocate `count` pages from the kernel physical pool.
pub fn alloc_kernel_pages(count: usize) -> crate::error::KernelResult<usize> {
    let mut bits = KERNEL_POOL_BITS.lock();
    let mut pool = pool::Pool::new(KERNEL_POOL_BASE, KERNEL_POOL_PAGES, &mut bits[..]);
    pool.alloc_pages(count)
}

/// Free `count` pages previously drawn from the kernel physical pool.
pub fn free_kernel_pages(addr: usize, count: usize) {
    let mut bits = KERNEL_POOL_BITS.lock();
    let mut pool = pool::Pool::new(KERNEL_POOL_BASE, KERNEL_POOL_PAGES, &mut bits[..]);
    pool.free_pages(addr, count);
}

/// Allocate `count` pages from the user physical pool (backs process page
/// tables and user stacks; §4.C/§4.G).
pub fn alloc_user_pages(count: usize) -> crate::error::KernelResult<usize> {
    let mut bits = USER_POOL_BITS.lock();
    let mut pool = pool::Pool::new(USER_POOL_BASE, USER_POOL_PAGES, &mut bits[..]);
    pool.alloc_pages(count)
}

pub fn free_user_pages(addr: usize, count: usize) {
    let mut bits = USER_POOL_BITS.lock();
    let mut pool = pool::Pool::new(USER_POOL_BASE, USER_POOL_PAGES, &mut bits[..]);
    pool.free_pages(addr, count);
}
