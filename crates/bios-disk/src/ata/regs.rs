//! ATA task-file layout, status bits and command opcodes.

use bitflags::bitflags;

pub(crate) const ATA_REG_DATA: u16 = 0;
pub(crate) const ATA_REG_ERROR_FEATURES: u16 = 1;
pub(crate) const ATA_REG_SECTOR_COUNT: u16 = 2;
pub(crate) const ATA_REG_LBA0: u16 = 3;
pub(crate) const ATA_REG_LBA1: u16 = 4;
pub(crate) const ATA_REG_LBA2: u16 = 5;
pub(crate) const ATA_REG_DEVICE: u16 = 6;
pub(crate) const ATA_REG_STATUS_COMMAND: u16 = 7;

pub(crate) const ATA_CTRL_ALT_STATUS_DEVICE_CTRL: u16 = 0;

/// Obsolete bits 7/5 of the device register, set for compatibility.
pub(crate) const ATA_DEVICE_OBS: u8 = 0xA0;
pub(crate) const ATA_DEVICE_LBA: u8 = 0x40;
pub(crate) const ATA_DEVICE_SLAVE: u8 = 0x10;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        const BSY = 0x80;
        const DRDY = 0x40;
        const DF = 0x20;
        const DSC = 0x10;
        const DRQ = 0x08;
        const CORR = 0x04;
        const IDX = 0x02;
        const ERR = 0x01;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaError: u8 {
        const BBK = 0x80;
        const UNC = 0x40;
        const MC = 0x20;
        const IDNF = 0x10;
        const MCR = 0x08;
        const ABRT = 0x04;
        const TK0NF = 0x02;
        const AMNF = 0x01;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceControl: u8 {
        const HOB = 0x80;
        const SRST = 0x04;
        const NIEN = 0x02;
    }
}

bitflags! {
    /// ATAPI interrupt reason, read from the sector count register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptReason: u8 {
        const REL = 0x04;
        const IO = 0x02;
        const COD = 0x01;
    }
}

pub(crate) const ATA_CMD_READ_SECTORS: u8 = 0x20;
pub(crate) const ATA_CMD_READ_SECTORS_EXT: u8 = 0x24;
pub(crate) const ATA_CMD_READ_MULTIPLE_EXT: u8 = 0x29;
pub(crate) const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
pub(crate) const ATA_CMD_WRITE_SECTORS_EXT: u8 = 0x34;
pub(crate) const ATA_CMD_WRITE_MULTIPLE_EXT: u8 = 0x39;
pub(crate) const ATA_CMD_READ_VERIFY_SECTORS: u8 = 0x40;
pub(crate) const ATA_CMD_READ_VERIFY_SECTORS_EXT: u8 = 0x42;
pub(crate) const ATA_CMD_PACKET: u8 = 0xA0;
pub(crate) const ATA_CMD_IDENTIFY_PACKET_DEVICE: u8 = 0xA1;
pub(crate) const ATA_CMD_READ_MULTIPLE: u8 = 0xC4;
pub(crate) const ATA_CMD_WRITE_MULTIPLE: u8 = 0xC5;
pub(crate) const ATA_CMD_SET_MULTIPLE_MODE: u8 = 0xC6;
pub(crate) const ATA_CMD_IDENTIFY: u8 = 0xEC;

/// Device class reported by the post-reset signature in LBA mid/high.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Ata,
    Atapi,
}

impl DeviceClass {
    /// Classify a post-reset `(sector count, lba low, lba mid, lba high)` signature.
    pub fn from_signature(count: u8, lba0: u8, lba1: u8, lba2: u8) -> Option<Self> {
        if count != 0x01 || lba0 != 0x01 {
            return None;
        }
        match (lba1, lba2) {
            (0x00, 0x00) | (0x3C, 0xC3) => Some(DeviceClass::Ata),
            (0x14, 0xEB) | (0x69, 0x96) => Some(DeviceClass::Atapi),
            _ => None,
        }
    }
}
