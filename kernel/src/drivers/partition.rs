//! MBR/EBR partition table scan (§4.L).
//!
//! Grounded on `examples/original_source/device/ide.c`'s `partition_scan`:
//! read one sector, walk its four partition table entries, recurse into
//! type-0x5 (extended) entries remembering the first one's start LBA as the
//! benchmark every nested logical partition's offset is relative to.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::drivers::storage::{Disk, SECTOR_SIZE};

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const MAX_PRIMARY: usize = 4;
const MAX_LOGICAL: usize = 8;
const EXTENDED_FS_TYPE: u8 = 0x5;

#[derive(Debug, Clone, Copy)]
struct RawEntry {
    fs_type: u8,
    start_lba: u32,
    sector_count: u32,
}

fn read_entry(sector: &[u8], index: usize) -> RawEntry {
    let base = PARTITION_TABLE_OFFSET + index * PARTITION_ENTRY_SIZE;
    let fs_type = sector[base + 4];
    let start_lba = u32::from_le_bytes(sector[base + 8..base + 12].try_into().unwrap());
    let sector_count = u32::from_le_bytes(sector[base + 12..base + 16].try_into().unwrap());
    RawEntry {
        fs_type,
        start_lba,
        sector_count,
    }
}

/// A partition discovered on a disk, named the way the reference kernel
/// names them: `<disk>1`..`<disk>4` for primaries, `<disk>5`.. for logicals.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub start_lba: u32,
    pub sector_count: u32,
}

struct ScanState {
    primaries: Vec<Partition>,
    logicals: Vec<Partition>,
    extended_benchmark: u32,
}

/// Walk the MBR and any extended partition chain on `disk`, whose name
/// prefixes the generated partition names (`sda1`, `sda5`, ...).
///
/// # Safety
/// Blocks on the disk's channel semaphore; must run from thread context.
pub unsafe fn scan(disk: &Disk, disk_name: &str) -> Vec<Partition> {
    let mut state = ScanState {
        primaries: Vec::new(),
        logicals: Vec::new(),
        extended_benchmark: 0,
    };
    scan_sector(disk, disk_name, 0, &mut state);

    let mut all = state.primaries;
    all.extend(state.logicals);
    all
}

fn scan_sector(disk: &Disk, disk_name: &str, lba: u32, state: &mut ScanState) {
    let mut sector = vec![0u8; SECTOR_SIZE];
    if unsafe { disk.read_sectors(lba, &mut sector) }.is_err() {
        return;
    }

    for i in 0..4 {
        let entry = read_entry(&sector, i);

        if entry.fs_type == EXTENDED_FS_TYPE {
            if state.extended_benchmark != 0 {
                scan_sector(disk, disk_name, entry.start_lba + state.extended_benchmark, state);
            } else {
                state.extended_benchmark = entry.start_lba;
                scan_sector(disk, disk_name, entry.start_lba, state);
            }
        } else if entry.fs_type != 0 {
            if lba == 0 {
                if state.primaries.len() >= MAX_PRIMARY {
                    continue;
                }
                state.primaries.push(Partition {
                    name: format!("{}{}", disk_name, state.primaries.len() + 1),
                    start_lba: entry.start_lba,
                    sector_count: entry.sector_count,
                });
            } else {
                if state.logicals.len() >= MAX_LOGICAL {
                    return;
                }
                state.logicals.push(Partition {
                    name: format!("{}{}", disk_name, state.logicals.len() + 5),
                    start_lba: lba + entry.start_lba,
                    sector_count: entry.sector_count,
                });
            }
        }
    }
}
