//! Inode table (§3, §4.M): fixed 60-byte on-disk records, 12 direct block
//! pointers plus one single-indirect block of 128 more, and the partition's
//! open-inode cache.
//!
//! Grounded on `examples/original_source/filesys/inode.c`'s `inode_locate`/
//! `inode_open`/`inode_close`/`inode_release`: an inode's on-disk position
//! is computed rather than stored in a directory, a partition keeps exactly
//! one in-memory copy of an open inode no matter how many file descriptors
//! reference it, and closing the last reference frees that copy.

use alloc::vec::Vec;

use crate::error::{FsError, KernelResult};

use super::{FsState, BLOCK_SIZE};

pub const INODE_SIZE: usize = 4 + 4 + 13 * 4;
pub const DIRECT_BLOCKS: usize = 12;
pub const INDIRECT_PTRS: usize = 128;
pub const MAX_BLOCKS: usize = DIRECT_BLOCKS + INDIRECT_PTRS;

/// An inode's in-memory shape mirrors its on-disk record exactly; the
/// open-count and write-deny bookkeeping live one level up, in
/// [`OpenInode`], rather than on this struct, so a plain copy of an `Inode`
/// (e.g. for directory traversal) never accidentally carries stale
/// reference-counting state.
#[derive(Clone, Copy, Debug)]
pub struct Inode {
    pub i_no: u32,
    pub i_size: u32,
    pub block_ptrs: [u32; 13],
}

impl Inode {
    pub fn empty(i_no: u32) -> Self {
        Self {
            i_no,
            i_size: 0,
            block_ptrs: [0; 13],
        }
    }

    fn to_bytes(self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        buf[0..4].copy_from_slice(&self.i_no.to_le_bytes());
        buf[4..8].copy_from_slice(&self.i_size.to_le_bytes());
        for (i, &ptr) in self.block_ptrs.iter().enumerate() {
            let off = 8 + i * 4;
            buf[off..off + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let i_no = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let i_size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let mut block_ptrs = [0u32; 13];
        for (i, ptr) in block_ptrs.iter_mut().enumerate() {
            let off = 8 + i * 4;
            *ptr = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        }
        Self {
            i_no,
            i_size,
            block_ptrs,
        }
    }
}

/// An inode held open by at least one caller: the global open-file table,
/// a task's cwd, or the mount's own root reference.
pub struct OpenInode {
    pub inode: Inode,
    pub open_count: u32,
    pub write_deny: bool,
}

/// Sector and byte offset an inode's on-disk record occupies. The record
/// straddles two sectors whenever `512 - offset < INODE_SIZE`.
pub fn locate(fs: &FsState, i_no: u32) -> (u32, usize) {
    let byte_off = i_no as usize * INODE_SIZE;
    let sector = fs.sb.inode_table_lba + (byte_off / BLOCK_SIZE) as u32;
    let offset = byte_off % BLOCK_SIZE;
    (sector, offset)
}

fn read_inode(fs: &FsState, i_no: u32) -> KernelResult<Inode> {
    let (sector, offset) = locate(fs, i_no);
    if BLOCK_SIZE - offset < INODE_SIZE {
        let mut a = [0u8; BLOCK_SIZE];
        let mut b = [0u8; BLOCK_SIZE];
        super::read_sector(fs, sector, &mut a)?;
        super::read_sector(fs, sector + 1, &mut b)?;
        let first_part = BLOCK_SIZE - offset;
        let mut combined = [0u8; INODE_SIZE];
        combined[..first_part].copy_from_slice(&a[offset..]);
        combined[first_part..].copy_from_slice(&b[..INODE_SIZE - first_part]);
        Ok(Inode::from_bytes(&combined))
    } else {
        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, sector, &mut buf)?;
        Ok(Inode::from_bytes(&buf[offset..offset + INODE_SIZE]))
    }
}

/// Write `inode` back to its on-disk record. In-memory-only fields (open
/// count, write-deny, the open-list link) never touch disk in the first
/// place, so there is nothing to scrub here beyond writing the record.
pub fn sync_inode(fs: &FsState, inode: &Inode) -> KernelResult<()> {
    let (sector, offset) = locate(fs, inode.i_no);
    let bytes = inode.to_bytes();
    if BLOCK_SIZE - offset < INODE_SIZE {
        let mut a = [0u8; BLOCK_SIZE];
        let mut b = [0u8; BLOCK_SIZE];
        super::read_sector(fs, sector, &mut a)?;
        super::read_sector(fs, sector + 1, &mut b)?;
        let first_part = BLOCK_SIZE - offset;
        a[offset..].copy_from_slice(&bytes[..first_part]);
        b[..INODE_SIZE - first_part].copy_from_slice(&bytes[first_part..]);
        super::write_sector(fs, sector, &a)?;
        super::write_sector(fs, sector + 1, &b)?;
    } else {
        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, sector, &mut buf)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(&bytes);
        super::write_sector(fs, sector, &buf)?;
    }
    Ok(())
}

/// Open an inode: bump the existing open count, or read it from disk and
/// cache it with `open_count = 1`.
pub fn open_inode(fs: &mut FsState, i_no: u32) -> KernelResult<()> {
    if let Some(open) = fs.open_inodes.get_mut(&i_no) {
        open.open_count += 1;
        return Ok(());
    }
    let inode = read_inode(fs, i_no)?;
    fs.open_inodes.insert(
        i_no,
        OpenInode {
            inode,
            open_count: 1,
            write_deny: false,
        },
    );
    Ok(())
}

/// Decrement an open inode's reference count, evicting it from the cache
/// once it reaches zero.
pub fn close_inode(fs: &mut FsState, i_no: u32) -> KernelResult<()> {
    let now_zero = match fs.open_inodes.get_mut(&i_no) {
        Some(open) => {
            open.open_count = open.open_count.saturating_sub(1);
            open.open_count == 0
        }
        None => return Err(FsError::NotFound.into()),
    };
    if now_zero {
        fs.open_inodes.remove(&i_no);
    }
    Ok(())
}

pub fn get_inode(fs: &FsState, i_no: u32) -> KernelResult<Inode> {
    fs.open_inodes
        .get(&i_no)
        .map(|open| open.inode)
        .ok_or_else(|| FsError::NotFound.into())
}

/// Read an inode's current fields for callers (path/directory traversal)
/// that don't hold it open: the cached copy if it happens to be open,
/// otherwise a direct disk read. Never changes open-count bookkeeping.
pub fn peek_inode(fs: &FsState, i_no: u32) -> KernelResult<Inode> {
    match fs.open_inodes.get(&i_no) {
        Some(open) => Ok(open.inode),
        None => read_inode(fs, i_no),
    }
}

pub fn put_inode(fs: &mut FsState, inode: Inode) {
    if let Some(open) = fs.open_inodes.get_mut(&inode.i_no) {
        open.inode = inode;
    }
}

pub fn is_open(fs: &FsState, i_no: u32) -> bool {
    fs.open_inodes.contains_key(&i_no)
}

/// The inode's data blocks laid out into their 140 logical slots (12 direct
/// + 128 indirect); an unallocated slot reads as `0`.
pub fn block_slots(fs: &FsState, inode: &Inode) -> KernelResult<[u32; MAX_BLOCKS]> {
    let mut slots = [0u32; MAX_BLOCKS];
    slots[..DIRECT_BLOCKS].copy_from_slice(&inode.block_ptrs[..DIRECT_BLOCKS]);
    if inode.block_ptrs[12] != 0 {
        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, inode.block_ptrs[12], &mut buf)?;
        for i in 0..INDIRECT_PTRS {
            let off = i * 4;
            slots[DIRECT_BLOCKS + i] = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        }
    }
    Ok(slots)
}

/// Every data block currently allocated to the inode, in slot order,
/// skipping holes. Does not include the indirect-block table itself.
pub fn all_blocks(fs: &FsState, inode: &Inode) -> KernelResult<Vec<u32>> {
    Ok(block_slots(fs, inode)?.into_iter().filter(|&b| b != 0).collect())
}

/// Allocate a new data block and install it at logical slot `slot_idx`,
/// allocating (and zeroing) the indirect-block table on the transition
/// from direct to indirect slots.
pub fn append_block(fs: &mut FsState, inode: &mut Inode, slot_idx: usize) -> KernelResult<u32> {
    let new_blk = super::alloc_block(fs)?;
    if slot_idx < DIRECT_BLOCKS {
        inode.block_ptrs[slot_idx] = new_blk;
    } else {
        if inode.block_ptrs[12] == 0 {
            let indirect_blk = super::alloc_block(fs)?;
            inode.block_ptrs[12] = indirect_blk;
            super::write_sector(fs, indirect_blk, &[0u8; BLOCK_SIZE])?;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        super::read_sector(fs, inode.block_ptrs[12], &mut buf)?;
        let off = (slot_idx - DIRECT_BLOCKS) * 4;
        buf[off..off + 4].copy_from_slice(&new_blk.to_le_bytes());
        super::write_sector(fs, inode.block_ptrs[12], &buf)?;
    }
    Ok(new_blk)
}

/// Free every data block (direct and indirect) plus the indirect-block
/// table itself, clear the inode's bitmap bit, and zero its on-disk
/// record. Caller is responsible for refusing release while the inode is
/// still open or in use.
pub fn release_inode(fs: &mut FsState, i_no: u32) -> KernelResult<()> {
    let inode = read_inode(fs, i_no)?;
    for blk in all_blocks(fs, &inode)? {
        super::free_block(fs, blk)?;
    }
    if inode.block_ptrs[12] != 0 {
        super::free_block(fs, inode.block_ptrs[12])?;
    }
    super::free_inode_bit(fs, i_no)?;
    sync_inode(fs, &Inode::empty(i_no))
}
