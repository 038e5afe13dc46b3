//! BIOS Data Area fields owned by the disk services.

use crate::bus::BiosBus;
use crate::bus::MemoryBus;

pub const BDA_BASE: u64 = 0x0000_0400;

const BDA_HD_LAST_STATUS_OFFSET: u64 = 0x74; // 0x40:0x74 -> 0x474 absolute
const BDA_HD_COUNT_OFFSET: u64 = 0x75; // 0x40:0x75 -> 0x475 absolute

pub const BDA_HD_LAST_STATUS_ADDR: u64 = BDA_BASE + BDA_HD_LAST_STATUS_OFFSET;
pub const BDA_HD_COUNT_ADDR: u64 = BDA_BASE + BDA_HD_COUNT_OFFSET;

pub fn write_hard_disk_count(bus: &mut dyn BiosBus, count: u8) {
    bus.write_u8(BDA_HD_COUNT_ADDR, count);
}

pub fn write_last_status(bus: &mut dyn BiosBus, status: u8) {
    bus.write_u8(BDA_HD_LAST_STATUS_ADDR, status);
}

pub fn read_last_status(bus: &mut dyn BiosBus) -> u8 {
    bus.read_u8(BDA_HD_LAST_STATUS_ADDR)
}
