//! ATA (IDE) disk driver (§4.K).
//!
//! Grounded on `examples/original_source/device/ide.c`: two fixed channels
//! (primary at 0x1f0/IRQ 0x2e, secondary at 0x170/IRQ 0x2f), each owning a
//! port base, an `expecting_irq` flag, a reentrant channel mutex, and a
//! binary `disk_done` semaphore. `ide_read`/`ide_write` batch up to 256
//! LBA28 sectors per command and block the caller on the channel's
//! semaphore until the IRQ handler posts it.
//!
//! The read/write semaphore-wait ordering differs between the two
//! directions, matching real ATA PIO semantics rather than the donor's
//! identical-looking-but-subtly-wrong original (decided open question: the
//! controller cannot raise a completion IRQ for a write until it has
//! actually consumed a sector's worth of PIO data, so the write path must
//! poll BSY/DRQ before pushing data and only then wait on the IRQ; the read
//! path waits on the IRQ first since the controller raises it once data is
//! staged for the host).

use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::BlockDevice;
use crate::sync::semaphore::{self, Mutex as ChannelMutex, Semaphore};

pub const SECTOR_SIZE: usize = 512;

const REG_DATA: u16 = 0;
#[allow(dead_code)]
const REG_ERROR: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DEVICE: u16 = 6;
const REG_STATUS: u16 = 7;
const REG_CMD: u16 = 7;

const STAT_BUSY: u8 = 0x80;
#[allow(dead_code)]
const STAT_DRDY: u8 = 0x40;
const STAT_DREQ: u8 = 0x08;

const DEV_MBS: u8 = 0xa0;
const DEV_LBA: u8 = 0x40;
const DEV_SLAVE: u8 = 0x10;

const CMD_READ_SECTOR: u8 = 0x20;
const CMD_WRITE_SECTOR: u8 = 0x30;

/// Maximum sectors transferred by a single READ/WRITE command.
const MAX_BATCH_SECTORS: u32 = 256;

/// One of the two legacy IDE channels.
pub struct IdeChannel {
    #[allow(dead_code)]
    name: &'static str,
    port_base: u16,
    #[allow(dead_code)]
    irq: u8,
    lock: ChannelMutex,
    disk_done: Semaphore,
    expecting_irq: bool,
}

impl IdeChannel {
    const fn new(name: &'static str, port_base: u16, irq: u8) -> Self {
        Self {
            name,
            port_base,
            irq,
            lock: ChannelMutex::new(),
            disk_done: Semaphore::binary(false),
            expecting_irq: false,
        }
    }

    fn port(&self, reg: u16) -> u16 {
        self.port_base + reg
    }

    fn read_u8(&self, reg: u16) -> u8 {
        unsafe { crate::arch::inb(self.port(reg)) }
    }

    fn write_u8(&self, reg: u16, value: u8) {
        unsafe { crate::arch::outb(self.port(reg), value) };
    }

    fn read_data_words(&self, buf: &mut [u8]) {
        let port = self.port(REG_DATA);
        for chunk in buf.chunks_mut(2) {
            let word = unsafe { crate::arch::inw(port) };
            chunk[0] = word as u8;
            if chunk.len() > 1 {
                chunk[1] = (word >> 8) as u8;
            }
        }
    }

    fn write_data_words(&self, buf: &[u8]) {
        let port = self.port(REG_DATA);
        for chunk in buf.chunks(2) {
            let lo = chunk[0];
            let hi = if chunk.len() > 1 { chunk[1] } else { 0 };
            let word = lo as u16 | ((hi as u16) << 8);
            unsafe { crate::arch::outw(port, word) };
        }
    }

    /// Marks an interrupt as expected and issues the command byte.
    fn cmd_out(&mut self, cmd: u8) {
        self.expecting_irq = true;
        self.write_u8(REG_CMD, cmd);
    }

    /// Bounded poll of the status register for BSY=0; returns whether DRQ
    /// also came up. A 30-second-equivalent spin budget, since this kernel
    /// has no sub-tick sleep primitive cheaper than busy-waiting here.
    fn wait_not_busy(&self) -> bool {
        const SPINS: u32 = 30_000_000;
        for _ in 0..SPINS {
            let status = self.read_u8(REG_STATUS);
            if status & STAT_BUSY == 0 {
                return status & STAT_DREQ != 0;
            }
            core::hint::spin_loop();
        }
        false
    }
}

/// Handle a disk IRQ (0x2e or 0x2f). Ignored when the channel isn't
/// expecting one, matching the ISR-side half of `expecting_irq`.
pub fn handle_irq(irq: u8) {
    let channel_no = match irq {
        0x2e => 0,
        0x2f => 1,
        _ => return,
    };

    // SAFETY: interrupt context, single core; CHANNELS is only mutated here
    // and by disk operations that run with interrupts enabled but hold the
    // channel's own reentrant mutex, never this raw pointer concurrently.
    let channel = unsafe { &mut *core::ptr::addr_of_mut!(CHANNELS[channel_no]) };
    if channel.expecting_irq {
        channel.expecting_irq = false;
        unsafe { semaphore::up(&mut channel.disk_done) };
        // acknowledge: reading the status register clears the IRQ line
        channel.read_u8(REG_STATUS);
    }
}

static mut CHANNELS: [IdeChannel; 2] = [
    IdeChannel::new("primary", 0x1f0, 0x2e),
    IdeChannel::new("secondary", 0x170, 0x2f),
];

fn channel_mut(index: usize) -> &'static mut IdeChannel {
    // SAFETY: every caller serializes through the channel's own `lock`
    // before touching registers or `expecting_irq`.
    unsafe { &mut *core::ptr::addr_of_mut!(CHANNELS[index]) }
}

/// A disk attached to one of the two IDE channels.
pub struct Disk {
    name: &'static str,
    channel: usize,
    is_master: bool,
}

impl Disk {
    pub const fn new(name: &'static str, channel: usize, is_master: bool) -> Self {
        Self {
            name,
            channel,
            is_master,
        }
    }

    fn select(&self, channel: &IdeChannel) {
        let mut reg = DEV_MBS | DEV_LBA;
        if !self.is_master {
            reg |= DEV_SLAVE;
        }
        channel.write_u8(REG_DEVICE, reg);
    }

    fn select_sector(&self, channel: &IdeChannel, lba: u32, sector_count: u8) {
        channel.write_u8(REG_SECTOR_COUNT, sector_count);
        channel.write_u8(REG_LBA_LOW, lba as u8);
        channel.write_u8(REG_LBA_MID, (lba >> 8) as u8);
        channel.write_u8(REG_LBA_HIGH, (lba >> 16) as u8);

        let mut dev = DEV_MBS | DEV_LBA | ((lba >> 24) as u8 & 0x0f);
        if !self.is_master {
            dev |= DEV_SLAVE;
        }
        channel.write_u8(REG_DEVICE, dev);
    }

    /// Read `buf.len() / SECTOR_SIZE` sectors starting at `lba`.
    ///
    /// # Safety
    /// Must be called from thread context (blocks on the channel semaphore).
    pub unsafe fn read_sectors(&self, lba: u32, buf: &mut [u8]) -> KernelResult<()> {
        assert!(buf.len() % SECTOR_SIZE == 0, "buffer must be sector-aligned");
        let total_sectors = (buf.len() / SECTOR_SIZE) as u32;

        let channel = channel_mut(self.channel);
        channel.lock.acquire();
        self.select(channel);

        let mut done = 0u32;
        while done < total_sectors {
            let batch = (total_sectors - done).min(MAX_BATCH_SECTORS);
            let batch_byte = batch as usize * SECTOR_SIZE;
            let offset = done as usize * SECTOR_SIZE;

            self.select_sector(channel, lba + done, batch as u8);
            channel.cmd_out(CMD_READ_SECTOR);

            // the controller raises the IRQ once the first sector's data is
            // staged, so wait on it before polling DRQ.
            semaphore::down(&mut channel.disk_done);
            if !channel.wait_not_busy() {
                channel.lock.release();
                panic!("{} read sector {} failed", self.name, lba + done);
            }
            channel.read_data_words(&mut buf[offset..offset + batch_byte]);
            done += batch;
        }

        channel.lock.release();
        Ok(())
    }

    /// Write `buf.len() / SECTOR_SIZE` sectors starting at `lba`.
    ///
    /// # Safety
    /// Must be called from thread context (blocks on the channel semaphore).
    pub unsafe fn write_sectors(&self, lba: u32, buf: &[u8]) -> KernelResult<()> {
        assert!(buf.len() % SECTOR_SIZE == 0, "buffer must be sector-aligned");
        let total_sectors = (buf.len() / SECTOR_SIZE) as u32;

        let channel = channel_mut(self.channel);
        channel.lock.acquire();
        self.select(channel);

        let mut done = 0u32;
        while done < total_sectors {
            let batch = (total_sectors - done).min(MAX_BATCH_SECTORS);
            let batch_byte = batch as usize * SECTOR_SIZE;
            let offset = done as usize * SECTOR_SIZE;

            self.select_sector(channel, lba + done, batch as u8);
            channel.cmd_out(CMD_WRITE_SECTOR);

            // the controller can't signal completion of a phase it hasn't
            // received data for, so push the sector before waiting on the IRQ.
            if !channel.wait_not_busy() {
                channel.lock.release();
                panic!("{} write sector {} failed", self.name, lba + done);
            }
            channel.write_data_words(&buf[offset..offset + batch_byte]);
            semaphore::down(&mut channel.disk_done);
            done += batch;
        }

        channel.lock.release();
        Ok(())
    }
}

impl BlockDevice for Disk {
    fn name(&self) -> &str {
        self.name
    }

    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn block_count(&self) -> u64 {
        // Capacity comes from IDENTIFY, which partition scanning (§4.L)
        // issues once; this driver doesn't cache it on its own.
        0
    }

    fn read_blocks(&self, start_block: u64, buffer: &mut [u8]) -> Result<(), KernelError> {
        unsafe { self.read_sectors(start_block as u32, buffer) }
    }

    fn write_blocks(&mut self, start_block: u64, buffer: &[u8]) -> Result<(), KernelError> {
        unsafe { self.write_sectors(start_block as u32, buffer) }
    }
}

/// The primary master disk, the only one this kernel boots against.
pub static PRIMARY_MASTER: Disk = Disk::new("hda", 0, true);

pub fn init() {
    crate::println!("[ATA] primary channel at 0x1f0 (IRQ 0x2e), secondary at 0x170 (IRQ 0x2f)");
}
