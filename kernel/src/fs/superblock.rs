//! On-disk superblock (§3, §4.M, §6): one sector, fixed magic, and the LBA
//! layout a mounted partition is built from.
//!
//! Grounded on the reference kernel's `filesys_format`/`super_block_read`
//! (`examples/original_source/filesys/*`): the inode bitmap and inode table
//! are sized from a fixed 4096-inode count, and the free-block bitmap is
//! sized iteratively because it occupies data-region space itself.

use alloc::vec;
use alloc::vec::Vec;

use crate::drivers::partition::Partition;
use crate::error::{FsError, KernelResult};

use super::{BLOCK_SIZE, INODE_COUNT};

pub const SUPERBLOCK_MAGIC: u32 = 0x2001_1124;
pub const INODE_SIZE: usize = super::inode::INODE_SIZE;
const FIELD_COUNT: usize = 13;

/// Fixed layout offsets relative to a partition's start LBA, plus the sector
/// counts of each region. All fields are sector counts or sector-relative
/// LBAs unless noted.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub magic: u32,
    pub total_sectors: u32,
    pub inode_count: u32,
    pub partition_start_lba: u32,
    pub block_bitmap_lba: u32,
    pub block_bitmap_sectors: u32,
    pub inode_bitmap_lba: u32,
    pub inode_bitmap_sectors: u32,
    pub inode_table_lba: u32,
    pub inode_table_sectors: u32,
    pub data_start_lba: u32,
    pub root_inode_no: u32,
    pub dirent_size: u32,
}

impl Superblock {
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        let fields = [
            self.magic,
            self.total_sectors,
            self.inode_count,
            self.partition_start_lba,
            self.block_bitmap_lba,
            self.block_bitmap_sectors,
            self.inode_bitmap_lba,
            self.inode_bitmap_sectors,
            self.inode_table_lba,
            self.inode_table_sectors,
            self.data_start_lba,
            self.root_inode_no,
            self.dirent_size,
        ];
        for (i, field) in fields.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut fields = [0u32; FIELD_COUNT];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        }
        Self {
            magic: fields[0],
            total_sectors: fields[1],
            inode_count: fields[2],
            partition_start_lba: fields[3],
            block_bitmap_lba: fields[4],
            block_bitmap_sectors: fields[5],
            inode_bitmap_lba: fields[6],
            inode_bitmap_sectors: fields[7],
            inode_table_lba: fields[8],
            inode_table_sectors: fields[9],
            data_start_lba: fields[10],
            root_inode_no: fields[11],
            dirent_size: fields[12],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == SUPERBLOCK_MAGIC
    }

    /// Number of data-region sectors once the layout below is fixed.
    pub fn data_region_sectors(&self) -> u32 {
        self.total_sectors - (self.data_start_lba - self.partition_start_lba)
    }

    /// Compute a fresh layout for `partition`: OBR, superblock, free-block
    /// bitmap, inode bitmap, inode table, then the data region. The
    /// free-block bitmap is sized iteratively since it covers the data
    /// region, which shrinks by the bitmap's own size.
    pub fn format_layout(partition: &Partition) -> KernelResult<Self> {
        let total_sectors = partition.sector_count;
        if total_sectors < 16 {
            return Err(FsError::NoSpace.into());
        }

        let inode_bitmap_sectors = (INODE_COUNT as usize).div_ceil(8).div_ceil(BLOCK_SIZE) as u32;
        let inode_table_sectors =
            (INODE_COUNT as usize * INODE_SIZE).div_ceil(BLOCK_SIZE) as u32;

        // OBR (1) + superblock (1) precede the bitmaps.
        let fixed_prefix = 2u32;
        let mut block_bitmap_sectors = 1u32;
        for _ in 0..8 {
            let non_data = fixed_prefix + block_bitmap_sectors + inode_bitmap_sectors + inode_table_sectors;
            if non_data >= total_sectors {
                return Err(FsError::NoSpace.into());
            }
            let data_sectors = total_sectors - non_data;
            let needed = (data_sectors as usize).div_ceil(8).div_ceil(BLOCK_SIZE) as u32;
            let needed = needed.max(1);
            if needed == block_bitmap_sectors {
                break;
            }
            block_bitmap_sectors = needed;
        }

        let block_bitmap_lba = partition.start_lba + fixed_prefix;
        let inode_bitmap_lba = block_bitmap_lba + block_bitmap_sectors;
        let inode_table_lba = inode_bitmap_lba + inode_bitmap_sectors;
        let data_start_lba = inode_table_lba + inode_table_sectors;

        if data_start_lba - partition.start_lba >= total_sectors {
            return Err(FsError::NoSpace.into());
        }

        Ok(Self {
            magic: SUPERBLOCK_MAGIC,
            total_sectors,
            inode_count: INODE_COUNT,
            partition_start_lba: partition.start_lba,
            block_bitmap_lba,
            block_bitmap_sectors,
            inode_bitmap_lba,
            inode_bitmap_sectors,
            inode_table_lba,
            inode_table_sectors,
            data_start_lba,
            root_inode_no: 0,
            dirent_size: super::dirent::DIRENT_SIZE as u32,
        })
    }
}

/// Zeroed sector-sized buffers for a region `sectors` long, used to clear
/// the bitmaps/inode table at format time.
pub fn zeroed_sectors(sectors: u32) -> Vec<u8> {
    vec![0u8; sectors as usize * BLOCK_SIZE]
}
