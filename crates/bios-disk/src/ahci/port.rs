//! Per-port memory structures: command list, received-FIS area and command table.

use crate::bus::{BiosBus, MemoryBus};
use crate::dma::DmaWindow;
use crate::error::DriverError;

const COMMAND_LIST_BYTES: u64 = 32 * 32;
const RECEIVED_FIS_BYTES: u64 = 0x100;
const COMMAND_TABLE_BYTES: u64 = 0x80 + PRDT_ENTRIES as u64 * PRDT_ENTRY_BYTES;
const BOUNCE_BYTES: u64 = 512;

pub(crate) const PRDT_ENTRIES: usize = 8;
const PRDT_ENTRY_BYTES: u64 = 16;
/// DBC is 22 bits of `length - 1`; entries must also carry an even byte count.
pub(crate) const PRDT_MAX_BYTES: u64 = 4 * 1024 * 1024;

const CFIS_OFFSET: u64 = 0x00;
const PRDT_OFFSET: u64 = 0x80;

const FIS_TYPE_REG_H2D: u8 = 0x27;
/// Command (as opposed to device control) update.
const FIS_H2D_C: u8 = 0x80;
const FIS_CFL_DWORDS: u32 = 5;
const CMD_HEADER_WRITE: u32 = 1 << 6;

/// Guest-physical placement of one port's structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMemory {
    pub clb: u64,
    pub fb: u64,
    pub ctba: u64,
    /// Word-aligned sector buffer for IDENTIFY data and odd guest buffers.
    pub bounce: u64,
}

impl PortMemory {
    pub(crate) fn alloc(bus: &mut dyn BiosBus, window: &mut DmaWindow) -> Option<Self> {
        Some(Self {
            clb: window.alloc(bus, COMMAND_LIST_BYTES, 1024)?,
            fb: window.alloc(bus, RECEIVED_FIS_BYTES, 256)?,
            ctba: window.alloc(bus, COMMAND_TABLE_BYTES, 128)?,
            bounce: window.alloc(bus, BOUNCE_BYTES, 2)?,
        })
    }
}

/// Register host-to-device FIS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct H2dFis {
    pub command: u8,
    pub lba: u64,
    /// 0 means 65536 for EXT commands.
    pub count: u16,
    pub device: u8,
}

impl H2dFis {
    pub fn to_bytes(self) -> [u8; 20] {
        let lba = self.lba.to_le_bytes();
        let count = self.count.to_le_bytes();
        let mut fis = [0u8; 20];
        fis[0] = FIS_TYPE_REG_H2D;
        fis[1] = FIS_H2D_C;
        fis[2] = self.command;
        fis[4..7].copy_from_slice(&lba[0..3]);
        fis[7] = self.device;
        fis[8..11].copy_from_slice(&lba[3..6]);
        fis[12..14].copy_from_slice(&count);
        fis
    }
}

/// Data region of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataRegion {
    pub addr: u64,
    pub len: u64,
    pub write: bool,
}

/// Build slot 0's command header and command table.
pub(crate) fn build_command(
    bus: &mut dyn BiosBus,
    mem: &PortMemory,
    fis: &H2dFis,
    data: Option<DataRegion>,
) -> Result<(), DriverError> {
    bus.fill(mem.ctba, COMMAND_TABLE_BYTES as usize, 0);
    bus.write_physical(mem.ctba + CFIS_OFFSET, &fis.to_bytes());

    let mut prdtl = 0u32;
    let mut write = false;
    if let Some(data) = data {
        if data.addr & 1 != 0 {
            return Err(DriverError::Protocol("PRDT data base must be word aligned"));
        }
        write = data.write;
        let mut offset = 0u64;
        while offset < data.len {
            if prdtl as usize == PRDT_ENTRIES {
                return Err(DriverError::TransferTooLarge);
            }
            let len = PRDT_MAX_BYTES.min(data.len - offset);
            let dba = data.addr + offset;
            let entry = mem.ctba + PRDT_OFFSET + u64::from(prdtl) * PRDT_ENTRY_BYTES;
            bus.write_u32(entry, dba as u32);
            bus.write_u32(entry + 4, (dba >> 32) as u32);
            bus.write_u32(entry + 8, 0);
            bus.write_u32(entry + 12, (len - 1) as u32 & 0x003F_FFFF);
            prdtl += 1;
            offset += len;
        }
    }

    let mut dw0 = FIS_CFL_DWORDS | (prdtl << 16);
    if write {
        dw0 |= CMD_HEADER_WRITE;
    }
    bus.write_u32(mem.clb, dw0);
    bus.write_u32(mem.clb + 4, 0);
    bus.write_u32(mem.clb + 8, mem.ctba as u32);
    bus.write_u32(mem.clb + 12, (mem.ctba >> 32) as u32);
    Ok(())
}

/// Sectors that fit in one command table.
pub(crate) const fn max_sectors_per_command(sector_size: u64) -> u64 {
    PRDT_ENTRIES as u64 * PRDT_MAX_BYTES / sector_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h2d_fis_layout() {
        let fis = H2dFis {
            command: 0x25,
            lba: 0x0605_0403_0201,
            count: 0x0102,
            device: 0x40,
        }
        .to_bytes();
        assert_eq!(fis[0], 0x27);
        assert_eq!(fis[1], 0x80);
        assert_eq!(fis[2], 0x25);
        assert_eq!(&fis[4..8], &[0x01, 0x02, 0x03, 0x40]);
        assert_eq!(&fis[8..11], &[0x04, 0x05, 0x06]);
        assert_eq!(&fis[12..14], &[0x02, 0x01]);
    }

    #[test]
    fn command_table_capacity() {
        assert_eq!(max_sectors_per_command(512), 65536);
        assert_eq!(COMMAND_TABLE_BYTES, 0x100);
    }
}
