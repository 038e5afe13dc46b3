//! Storage controller models for exercising the disk firmware.
//!
//! Each model exposes the register surface the firmware drives (`io_read`/`io_write` for port
//! I/O, `read_u32`/`write_u32` for MMIO) and completes every command synchronously. Fault
//! injection hooks let tests wedge a controller to check that the drivers give up on time.

pub mod ahci;
pub mod atapi;
pub mod disk;
pub mod ide;
pub mod scsi;

pub use ahci::{AhciController, AhciFault};
pub use atapi::{AtapiCdrom, CD_SECTOR_SIZE};
pub use disk::MemDisk;
pub use ide::{AtaDisk, IdeChannel};
pub use scsi::{ScsiAdapterModel, ScsiTarget};
