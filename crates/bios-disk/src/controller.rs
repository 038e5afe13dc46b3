use crate::bus::BiosBus;
use crate::error::DriverError;
use crate::registry::{DriveEntry, DriveRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Read,
    Write,
    Verify,
}

/// One sector transfer request in the unit's native sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub op: TransferOp,
    pub lba: u64,
    pub count: u32,
    /// Guest physical address of the data buffer (ignored for verify).
    pub buffer: u64,
}

impl Transfer {
    pub const fn read(lba: u64, count: u32, buffer: u64) -> Self {
        Self {
            op: TransferOp::Read,
            lba,
            count,
            buffer,
        }
    }

    pub const fn write(lba: u64, count: u32, buffer: u64) -> Self {
        Self {
            op: TransferOp::Write,
            lba,
            count,
            buffer,
        }
    }

    pub const fn verify(lba: u64, count: u32) -> Self {
        Self {
            op: TransferOp::Verify,
            lba,
            count,
            buffer: 0,
        }
    }

    /// Reject requests that run past the end of `entry`'s medium.
    pub fn check_bounds(&self, entry: &DriveEntry) -> Result<(), DriverError> {
        match self.lba.checked_add(u64::from(self.count)) {
            Some(end) if end <= entry.sectors => Ok(()),
            _ => Err(DriverError::OutOfRange),
        }
    }
}

/// Removable-media operations (INT 13h AH=45h/46h, test unit ready).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    Lock,
    Unlock,
    Eject,
    TestUnitReady,
}

/// Common surface of every storage driver the dispatcher can target.
pub trait DiskController {
    /// Enumerate attached units into `registry`; returns the number registered.
    fn detect(&mut self, bus: &mut dyn BiosBus, registry: &mut DriveRegistry) -> usize;

    /// Reset the channel/port/adapter owning `unit`. Never changes the registry.
    fn reset(&mut self, bus: &mut dyn BiosBus, unit: &DriveEntry) -> Result<(), DriverError>;

    fn transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        unit: &DriveEntry,
        xfer: &Transfer,
    ) -> Result<(), DriverError>;

    fn media(
        &mut self,
        _bus: &mut dyn BiosBus,
        _unit: &DriveEntry,
        _cmd: MediaCommand,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported)
    }
}
