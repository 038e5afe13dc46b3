//! Legacy BIOS disk services (`INT 13h`) over ATA/ATAPI, AHCI and SCSI controllers.
//!
//! The crate models the disk half of a PC BIOS:
//! - [`registry`]: the logical drive number space (`0x80..` fixed disks, `0xE0..` CD-ROMs)
//!   populated at POST by the controller drivers.
//! - [`ata`], [`ahci`], [`scsi`]: polled drivers for the three supported controller families.
//! - [`eltorito`]: boot catalog parsing and floppy/hard-disk emulation backed by a CD image.
//! - [`int13`]: the guest-facing dispatcher (legacy CHS and EDD functions).
//! - [`boot`]: boot device selection and hand-off.
//!
//! Hardware is reached exclusively through [`bus::BiosBus`], so the same code runs against
//! real port I/O/MMIO or the device models used by the tests.

pub mod ahci;
pub mod ata;
pub mod bda;
pub mod boot;
pub mod bus;
pub mod config;
pub mod controller;
pub mod cpu;
pub mod dma;
pub mod eltorito;
pub mod error;
pub mod geometry;
pub mod int13;
pub mod poll;
pub mod registry;
pub mod scsi;

mod bios;

pub use bios::DiskBios;
pub use boot::{BootError, BootHandoff};
pub use bus::{BiosBus, FarPtr, Mmio, PortIo};
pub use config::{BootDevice, DiskBiosConfig, IdeChannelPorts, PollBudgets, ScsiWindow};
pub use controller::{DiskController, MediaCommand, Transfer, TransferOp};
pub use cpu::RealModeCpu;
pub use error::{DriverError, Int13Status, WaitFor};
pub use geometry::{Chs, ChsAddress};
pub use int13::Disposition;
pub use registry::{ControllerKind, DriveEntry, DriveRegistry, IoBase};

/// Sector size of fixed disks and of every INT 13h CHS transfer.
pub const DISK_SECTOR_SIZE: usize = 512;

/// Sector size of ATAPI/ISO 9660 media.
pub const CD_SECTOR_SIZE: usize = 2048;
