//! AHCI 1.x register layout.

pub(crate) const HBA_REG_CAP: u64 = 0x00;
pub(crate) const HBA_REG_GHC: u64 = 0x04;
pub(crate) const HBA_REG_PI: u64 = 0x0C;
pub(crate) const HBA_REG_VS: u64 = 0x10;

pub(crate) const PORT_BASE: u64 = 0x100;
pub(crate) const PORT_STRIDE: u64 = 0x80;

pub(crate) const PORT_REG_CLB: u64 = 0x00;
pub(crate) const PORT_REG_CLBU: u64 = 0x04;
pub(crate) const PORT_REG_FB: u64 = 0x08;
pub(crate) const PORT_REG_FBU: u64 = 0x0C;
pub(crate) const PORT_REG_IS: u64 = 0x10;
pub(crate) const PORT_REG_IE: u64 = 0x14;
pub(crate) const PORT_REG_CMD: u64 = 0x18;
pub(crate) const PORT_REG_TFD: u64 = 0x20;
pub(crate) const PORT_REG_SIG: u64 = 0x24;
pub(crate) const PORT_REG_SSTS: u64 = 0x28;
pub(crate) const PORT_REG_SCTL: u64 = 0x2C;
pub(crate) const PORT_REG_SERR: u64 = 0x30;
pub(crate) const PORT_REG_CI: u64 = 0x38;

pub(crate) const GHC_AE: u32 = 1 << 31;

pub(crate) const PORT_CMD_ST: u32 = 1 << 0;
pub(crate) const PORT_CMD_FRE: u32 = 1 << 4;
pub(crate) const PORT_CMD_FR: u32 = 1 << 14;
pub(crate) const PORT_CMD_CR: u32 = 1 << 15;

pub(crate) const PORT_IS_TFES: u32 = 1 << 30;

pub(crate) const TFD_STS_ERR: u32 = 1 << 0;
pub(crate) const TFD_STS_DRQ: u32 = 1 << 3;
pub(crate) const TFD_STS_BSY: u32 = 1 << 7;

pub(crate) const SSTS_DET_MASK: u32 = 0xF;
pub(crate) const SSTS_DET_PRESENT: u32 = 3;
pub(crate) const SCTL_DET_COMRESET: u32 = 1;

pub(crate) const SATA_SIG_ATA: u32 = 0x0000_0101;
pub(crate) const SATA_SIG_ATAPI: u32 = 0xEB14_0101;
pub(crate) const SATA_SIG_SEMB: u32 = 0xC33C_0101;
pub(crate) const SATA_SIG_PM: u32 = 0x9669_0101;

pub(crate) const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
pub(crate) const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;
pub(crate) const ATA_CMD_READ_VERIFY_SECTORS_EXT: u8 = 0x42;
pub(crate) const ATA_CMD_IDENTIFY: u8 = 0xEC;

/// CAP.NP + 1.
pub(crate) fn cap_port_count(cap: u32) -> u32 {
    (cap & 0x1F) + 1
}

pub(crate) fn port_reg(abar: u64, port: usize, reg: u64) -> u64 {
    abar + PORT_BASE + port as u64 * PORT_STRIDE + reg
}
