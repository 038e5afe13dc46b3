//! Register-window backends for the SCSI adapter.

use std::fmt;

use bitflags::bitflags;

use crate::bus::BiosBus;
use crate::config::ScsiWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiReg {
    CommandStatus = 0,
    Data = 1,
    Detect = 2,
    Reset = 3,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdapterStatus: u8 {
        const BUSY = 0x01;
        const DATA_IN = 0x02;
        const DATA_OUT = 0x04;
        const COMPLETE = 0x08;
        const NO_TARGET = 0x80;
    }
}

/// Byte-wide access to the adapter's four registers.
pub trait ScsiBackend: fmt::Debug {
    fn read(&self, bus: &mut dyn BiosBus, reg: ScsiReg) -> u8;
    fn write(&self, bus: &mut dyn BiosBus, reg: ScsiReg, val: u8);
}

/// Byte registers at consecutive I/O ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBackend {
    base: u16,
}

impl PortBackend {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }
}

impl ScsiBackend for PortBackend {
    fn read(&self, bus: &mut dyn BiosBus, reg: ScsiReg) -> u8 {
        bus.inb(self.base + reg as u16)
    }

    fn write(&self, bus: &mut dyn BiosBus, reg: ScsiReg, val: u8) {
        bus.outb(self.base + reg as u16, val);
    }
}

/// 32-bit registers at a 4-byte stride; only the low byte is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioBackend {
    base: u64,
}

impl MmioBackend {
    pub const STRIDE: u64 = 4;

    pub const fn new(base: u64) -> Self {
        Self { base }
    }
}

impl ScsiBackend for MmioBackend {
    fn read(&self, bus: &mut dyn BiosBus, reg: ScsiReg) -> u8 {
        bus.mmio_read32(self.base + reg as u64 * Self::STRIDE) as u8
    }

    fn write(&self, bus: &mut dyn BiosBus, reg: ScsiReg, val: u8) {
        bus.mmio_write32(self.base + reg as u64 * Self::STRIDE, u32::from(val));
    }
}

pub fn backend_for(window: ScsiWindow) -> Box<dyn ScsiBackend> {
    match window {
        ScsiWindow::Port(base) => Box::new(PortBackend::new(base)),
        ScsiWindow::Mmio(base) => Box::new(MmioBackend::new(base)),
    }
}
