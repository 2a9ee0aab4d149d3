//! Small-object allocator: component D.
//!
//! Grounded on the reference kernel's `thread/malloc.c`: an arena is a
//! single page prefixed by a header (`descriptor | null`, `count`,
//! `large_flag`); large requests (> 1024 B) become a run of whole pages
//! with `large_flag` set, while small requests are served from one of
//! seven fixed-size descriptors (16..1024 B), each backed by arenas whose
//! free blocks are threaded through an embedded free-list node. The donor
//! `mm/heap.rs` slab skeleton (size classes, `FreeObject` free-list nodes)
//! is the Rust-side precedent for the free-list shape; its actual
//! allocation logic always fell through to `linked_list_allocator` and is
//! replaced here with the arena algorithm the spec requires.

use core::ptr::NonNull;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::pool::PAGE_SIZE;

/// Block size classes, smallest first. A request picks the smallest class
/// whose size is `>=` the request.
pub const BLOCK_SIZES: [usize; 7] = [16, 32, 64, 128, 256, 512, 1024];

const LARGEST_SMALL_BLOCK: usize = 1024;

#[repr(C)]
struct ArenaHeader {
    /// Owning descriptor for a small arena, or null for a large one.
    descriptor: Option<NonNull<Descriptor>>,
    /// Free block count (small arena) or page count (large arena).
    count: u32,
    large: bool,
}

struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

struct Descriptor {
    block_size: usize,
    blocks_per_arena: usize,
    free_list: Option<NonNull<FreeBlock>>,
}

impl Descriptor {
    const fn new(block_size: usize) -> Self {
        let header = core::mem::size_of::<ArenaHeader>();
        Self {
            block_size,
            blocks_per_arena: (PAGE_SIZE - header) / block_size,
            free_list: None,
        }
    }
}

/// A page-backed source of pages for one allocator instance: the kernel
/// pool for the kernel heap, or a process's own user pool for its
/// userspace blocks (§4.C: "each user process keeps its own so that user
/// blocks are pageable into user memory").
pub trait PageSource {
    fn alloc_page(&mut self) -> KernelResult<usize>;
    fn free_page(&mut self, addr: usize);
}

/// Draws arena pages from the kernel physical pool.
pub struct KernelPages;

impl PageSource for KernelPages {
    fn alloc_page(&mut self) -> KernelResult<usize> {
        crate::mm::alloc_kernel_pages(1)
    }
    fn free_page(&mut self, addr: usize) {
        crate::mm::free_kernel_pages(addr, 1);
    }
}

/// Draws arena pages from the kernel's user physical pool. Good enough for
/// a uniprocessor teaching kernel where user block arenas aren't mapped
/// into the process's own address space; a fuller implementation would
/// route this through the owning process's page tables instead.
pub struct UserPages;

impl PageSource for UserPages {
    fn alloc_page(&mut self) -> KernelResult<usize> {
        crate::mm::alloc_user_pages(1)
    }
    fn free_page(&mut self, addr: usize) {
        crate::mm::free_user_pages(addr, 1);
    }
}

/// Arena-based small-object allocator. One instance backs the kernel heap
/// (`sys_malloc`/`sys_free`'s kernel-side counterpart); a separate instance
/// is intended per process for user-space blocks.
pub struct ArenaAllocator<S: PageSource + PageRunSource> {
    descriptors: [Descriptor; 7],
    source: S,
}

impl<S: PageSource + PageRunSource> ArenaAllocator<S> {
    pub const fn new(source: S) -> Self {
        Self {
            descriptors: [
                Descriptor::new(BLOCK_SIZES[0]),
                Descriptor::new(BLOCK_SIZES[1]),
                Descriptor::new(BLOCK_SIZES[2]),
                Descriptor::new(BLOCK_SIZES[3]),
                Descriptor::new(BLOCK_SIZES[4]),
                Descriptor::new(BLOCK_SIZES[5]),
                Descriptor::new(BLOCK_SIZES[6]),
            ],
            source,
        }
    }

    /// Allocate `size` bytes. Requests over 1024 B are served as a run of
    /// whole pages with `large_flag` set; everything else comes from the
    /// smallest-fitting block descriptor.
    pub fn alloc(&mut self, size: usize) -> KernelResult<NonNull<u8>> {
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "zero",
            });
        }
        if size > LARGEST_SMALL_BLOCK {
            return self.alloc_large(size);
        }
        self.alloc_small(size)
    }

    fn alloc_large(&mut self, size: usize) -> KernelResult<NonNull<u8>> {
        let header = core::mem::size_of::<ArenaHeader>();
        let pages = (size + header).div_ceil(PAGE_SIZE);
        let base = self.source.alloc_page_run(pages)?;
        unsafe {
            let header_ptr = base as *mut ArenaHeader;
            header_ptr.write(ArenaHeader {
                descriptor: None,
                count: pages as u32,
                large: true,
            });
            let body = (base + header) as *mut u8;
            Ok(NonNull::new_unchecked(body))
        }
    }

    fn alloc_small(&mut self, size: usize) -> KernelResult<NonNull<u8>> {
        let class = BLOCK_SIZES
            .iter()
            .position(|&s| s >= size)
            .expect("size already checked <= LARGEST_SMALL_BLOCK");

        if self.descriptors[class].free_list.is_none() {
            self.grow(class)?;
        }

        let desc = &mut self.descriptors[class];
        let block = desc.free_list.take().expect("just grew the free list");
        unsafe {
            desc.free_list = (*block.as_ptr()).next;
        }

        let header = unsafe { &mut *self.arena_header_of(block.as_ptr() as usize) };
        header.count -= 1;

        Ok(block.cast())
    }

    /// Back a fresh arena for `class` and thread all of its blocks onto
    /// the descriptor's free list.
    fn grow(&mut self, class: usize) -> KernelResult<()> {
        let page = self.source.alloc_page()?;
        let header_size = core::mem::size_of::<ArenaHeader>();
        let blocks_per_arena = self.descriptors[class].blocks_per_arena;
        let block_size = self.descriptors[class].block_size;

        unsafe {
            (page as *mut ArenaHeader).write(ArenaHeader {
                descriptor: Some(NonNull::new_unchecked(
                    &mut self.descriptors[class] as *mut Descriptor,
                )),
                count: blocks_per_arena as u32,
                large: false,
            });

            crate::arch::x86_64::without_interrupts(|| {
                for i in 0..blocks_per_arena {
                    let addr = page + header_size + i * block_size;
                    let block = addr as *mut FreeBlock;
                    block.write(FreeBlock {
                        next: self.descriptors[class].free_list,
                    });
                    self.descriptors[class].free_list = Some(NonNull::new_unchecked(block));
                }
            });
        }
        Ok(())
    }

    /// Free a pointer previously returned by [`Self::alloc`]. Identifies
    /// the owning arena by masking down to the containing page.
    ///
    /// # Safety
    /// `ptr` must be a still-live allocation from this same allocator.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let page_base = (ptr.as_ptr() as usize) & !(PAGE_SIZE - 1);
        let header = unsafe { &mut *(page_base as *mut ArenaHeader) };

        if header.large {
            self.source.free_page_run(page_base, header.count as usize);
            return;
        }

        let desc = unsafe { &mut *header.descriptor.expect("small arena has a descriptor").as_ptr() };
        let block = ptr.cast::<FreeBlock>();

        crate::arch::x86_64::without_interrupts(|| {
            unsafe {
                (*block.as_ptr()).next = desc.free_list;
            }
            desc.free_list = Some(block);
            header.count += 1;

            if header.count as usize == desc.blocks_per_arena {
                self.evict_arena(desc, page_base, core::mem::size_of::<ArenaHeader>());
            }
        });
    }

    /// Remove every block belonging to a now-fully-free arena from its
    /// descriptor's free list and release the page.
    fn evict_arena(&mut self, desc: &mut Descriptor, page_base: usize, header_size: usize) {
        let page_end = page_base + PAGE_SIZE;
        let in_arena = |addr: usize| addr >= page_base + header_size && addr < page_end;

        let mut kept: Option<NonNull<FreeBlock>> = None;
        let mut cursor = desc.free_list.take();
        while let Some(node) = cursor {
            let addr = node.as_ptr() as usize;
            let next = unsafe { (*node.as_ptr()).next };
            if !in_arena(addr) {
                unsafe {
                    (*node.as_ptr()).next = kept;
                }
                kept = Some(node);
            }
            cursor = next;
        }
        desc.free_list = kept;
        self.source.free_page(page_base);
    }

    fn arena_header_of(&self, block_addr: usize) -> *mut ArenaHeader {
        let page_base = block_addr & !(PAGE_SIZE - 1);
        page_base as *mut ArenaHeader
    }
}

/// Extends [`PageSource`] with multi-page runs, needed for large
/// (>1024 B) allocations.
pub trait PageRunSource: PageSource {
    fn alloc_page_run(&mut self, pages: usize) -> KernelResult<usize>;
    fn free_page_run(&mut self, addr: usize, pages: usize);
}

impl PageRunSource for KernelPages {
    fn alloc_page_run(&mut self, pages: usize) -> KernelResult<usize> {
        crate::mm::alloc_kernel_pages(pages)
    }
    fn free_page_run(&mut self, addr: usize, pages: usize) {
        crate::mm::free_kernel_pages(addr, pages)
    }
}

impl PageRunSource for UserPages {
    fn alloc_page_run(&mut self, pages: usize) -> KernelResult<usize> {
        crate::mm::alloc_user_pages(pages)
    }
    fn free_page_run(&mut self, addr: usize, pages: usize) {
        crate::mm::free_user_pages(addr, pages)
    }
}

/// The kernel's own heap: backs `kmalloc`/`kfree` and, transitively, the
/// `#[global_allocator]` hookup in `lib.rs`.
pub static KERNEL_HEAP: Mutex<ArenaAllocator<KernelPages>> =
    Mutex::new(ArenaAllocator::new(KernelPages));

pub fn kmalloc(size: usize) -> KernelResult<NonNull<u8>> {
    KERNEL_HEAP.lock().alloc(size)
}

/// # Safety
/// `ptr` must be a still-live allocation previously returned by [`kmalloc`].
pub unsafe fn kfree(ptr: NonNull<u8>) {
    unsafe { KERNEL_HEAP.lock().free(ptr) };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePages {
        arena: [u8; PAGE_SIZE * 4],
        next: usize,
    }

    impl FakePages {
        fn new() -> Self {
            Self {
                arena: [0; PAGE_SIZE * 4],
                next: 0,
            }
        }
    }

    impl PageSource for FakePages {
        fn alloc_page(&mut self) -> KernelResult<usize> {
            let addr = self.arena.as_mut_ptr() as usize + self.next;
            self.next += PAGE_SIZE;
            Ok(addr)
        }
        fn free_page(&mut self, _addr: usize) {}
    }

    impl PageRunSource for FakePages {
        fn alloc_page_run(&mut self, pages: usize) -> KernelResult<usize> {
            let addr = self.arena.as_mut_ptr() as usize + self.next;
            self.next += pages * PAGE_SIZE;
            Ok(addr)
        }
        fn free_page_run(&mut self, _addr: usize, _pages: usize) {}
    }

    #[test]
    fn small_alloc_roundtrip() {
        let mut a = ArenaAllocator::new(FakePages::new());
        let p = a.alloc(24).unwrap();
        unsafe {
            a.free(p);
        }
    }

    #[test]
    fn large_alloc_sets_flag() {
        let mut a = ArenaAllocator::new(FakePages::new());
        let p = a.alloc(3000).unwrap();
        let page_base = (p.as_ptr() as usize) & !(PAGE_SIZE - 1);
        let header = unsafe { &*(page_base as *const ArenaHeader) };
        assert!(header.large);
    }

    #[test]
    fn repeated_small_allocs_grow_new_arenas() {
        let mut a = ArenaAllocator::new(FakePages::new());
        let blocks_per_arena = a.descriptors[0].blocks_per_arena;
        let mut ptrs = heapless_vec(blocks_per_arena + 1, &mut a);
        assert_eq!(ptrs.len(), blocks_per_arena + 1);
        for p in ptrs.drain(..) {
            unsafe { a.free(p) };
        }
    }

    fn heapless_vec(n: usize, a: &mut ArenaAllocator<FakePages>) -> alloc::vec::Vec<NonNull<u8>> {
        (0..n).map(|_| a.alloc(16).unwrap()).collect()
    }
}
