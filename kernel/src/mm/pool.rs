//! Physical and virtual memory pools: component C.
//!
//! Two physical pools (kernel, user) and a per-process user virtual-address
//! pool, each a [`Bitmap`] over a reserved memory range plus a base address,
//! matching the reference kernel's `mem_pool` (`kernel/memory.{c,h}`):
//! `phy_start`, `pool_size`, and a bitmap of page-granularity allocation
//! state. `Pool::alloc_pages`/`free_pages` are the physical-page analogue of
//! `pool_alloc`/`pool_free` there.
//!
//! Fixes open question #1 (`malloc_page`'s partial-failure leak,
//! `SPEC_FULL.md` §9): if a multi-page request's mapping step fails partway
//! through, every frame already committed for this request — both the
//! pool's allocated bits and any page-table entries already installed — is
//! rolled back before the error is returned. The donor's `malloc_page`
//! freed only the bitmap bits it had consumed for the *frame* allocation
//! and never undid partial virtual-address installation; we undo both.

use crate::error::{KernelError, KernelResult};
use crate::mm::bitmap::Bitmap;

pub const PAGE_SIZE: usize = 4096;

/// A bitmap-backed allocator over a contiguous page-granular address range.
///
/// `base` is the first byte address the pool covers (physical for the
/// kernel/user physical pools, virtual for a process's user address pool).
pub struct Pool<'a> {
    base: usize,
    bitmap: Bitmap<'a>,
    page_count: usize,
}

impl<'a> Pool<'a> {
    /// `backing` must have at least `page_count.div_ceil(8)` bytes.
    pub fn new(base: usize, page_count: usize, backing: &'a mut [u8]) -> Self {
        Self {
            base,
            bitmap: Bitmap::new(backing, page_count),
            page_count,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn free_page_count(&self) -> usize {
        self.bitmap.free_count()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    fn addr_of(&self, page_index: usize) -> usize {
        self.base + page_index * PAGE_SIZE
    }

    fn index_of(&self, addr: usize) -> usize {
        (addr - self.base) / PAGE_SIZE
    }

    /// Whether the page at `addr` is currently marked allocated.
    pub fn is_allocated(&self, addr: usize) -> bool {
        self.bitmap.is_set(self.index_of(addr))
    }

    /// Mark the page at `addr` allocated without drawing it from the free
    /// scan (fork's vaddr-bitmap copy installs the same addresses the
    /// parent already has set, §4.N).
    pub fn mark_addr(&mut self, addr: usize) -> KernelResult<()> {
        self.reserve(addr, 1)
    }

    /// Iterate the page-index of every currently allocated page.
    pub fn iter_allocated(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.page_count).filter(move |&i| self.bitmap.is_set(i))
    }

    /// Raw bitmap bytes, for copying a user-vaddr bitmap wholesale into a
    /// freshly allocated one at `fork` time.
    pub fn bits(&self) -> &[u8] {
        self.bitmap.as_bytes()
    }

    pub fn bits_mut(&mut self) -> &mut [u8] {
        self.bitmap.as_bytes_mut()
    }

    /// Allocate `count` contiguous pages, returning the base address of the
    /// run. Pure bookkeeping: callers that also need page-table entries
    /// installed should use [`Pool::alloc_pages_mapped`].
    pub fn alloc_pages(&mut self, count: usize) -> KernelResult<usize> {
        let start = self
            .bitmap
            .alloc(count)
            .map_err(|e| KernelError::OutOfMemory {
                requested: e.requested,
                available: e.available,
            })?;
        Ok(self.addr_of(start))
    }

    pub fn free_pages(&mut self, addr: usize, count: usize) {
        let start = self.index_of(addr);
        self.bitmap.free(start, count);
    }

    /// Reserve a specific already-known range (used at boot to carve out
    /// the kernel image / bootloader-reserved regions before the pool is
    /// handed out for general allocation).
    pub fn reserve(&mut self, addr: usize, count: usize) -> KernelResult<()> {
        let start = self.index_of(addr);
        self.bitmap
            .mark(start, count)
            .map_err(|e| KernelError::OutOfMemory {
                requested: e.requested,
                available: e.available,
            })
    }

    /// Allocate `count` pages and install page-table entries for each via
    /// `map_one`, rolling back (unmapping already-installed entries via
    /// `unmap_one` and clearing the bitmap run) if any `map_one` call fails
    /// partway through. This is the corrected `malloc_page` (open question
    /// #1): the donor only freed the frames it had drawn from the bitmap on
    /// partial failure and left any already-installed page-table entries
    /// dangling.
    pub fn alloc_pages_mapped(
        &mut self,
        count: usize,
        mut map_one: impl FnMut(usize, usize) -> KernelResult<()>,
        mut unmap_one: impl FnMut(usize, usize),
    ) -> KernelResult<usize> {
        let base = self.alloc_pages(count)?;
        for i in 0..count {
            let page_addr = base + i * PAGE_SIZE;
            if let Err(e) = map_one(page_addr, i) {
                for j in 0..i {
                    unmap_one(base + j * PAGE_SIZE, j);
                }
                self.free_pages(base, count);
                return Err(e);
            }
        }
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_reuses_space() {
        let mut backing = [0u8; 8];
        let mut pool = Pool::new(0x1000, 64, &mut backing);
        let a = pool.alloc_pages(4).unwrap();
        assert_eq!(a, 0x1000);
        let b = pool.alloc_pages(4).unwrap();
        assert_eq!(b, 0x1000 + 4 * PAGE_SIZE);
        pool.free_pages(a, 4);
        let c = pool.alloc_pages(4).unwrap();
        assert_eq!(c, 0x1000);
    }

    #[test]
    fn reserve_then_alloc_skips_reserved() {
        let mut backing = [0u8; 4];
        let mut pool = Pool::new(0x2000, 32, &mut backing);
        pool.reserve(0x2000, 8).unwrap();
        let a = pool.alloc_pages(1).unwrap();
        assert_eq!(a, 0x2000 + 8 * PAGE_SIZE);
    }

    #[test]
    fn partial_mapping_failure_rolls_back() {
        let mut backing = [0u8; 4];
        let mut pool = Pool::new(0x3000, 32, &mut backing);
        let free_before = pool.free_page_count();
        let result = pool.alloc_pages_mapped(
            4,
            |_addr, i| {
                if i == 2 {
                    Err(KernelError::OutOfMemory {
                        requested: 1,
                        available: 0,
                    })
                } else {
                    Ok(())
                }
            },
            |_addr, _i| {},
        );
        assert!(result.is_err());
        assert_eq!(pool.free_page_count(), free_before);
    }
}
