//! Hardware access seam.
//!
//! The firmware never touches hardware directly. Port I/O, MMIO and guest memory all go through
//! [`BiosBus`], which lets the drivers run unchanged against the device models in the test
//! suite.

pub use memory::MemoryBus;

/// x86 port I/O space.
pub trait PortIo {
    fn inb(&mut self, port: u16) -> u8;
    fn outb(&mut self, port: u16, val: u8);
    fn inw(&mut self, port: u16) -> u16;
    fn outw(&mut self, port: u16, val: u16);
}

/// 32-bit memory-mapped register access.
pub trait Mmio {
    fn mmio_read32(&mut self, addr: u64) -> u32;
    fn mmio_write32(&mut self, addr: u64, val: u32);
}

/// Everything the disk BIOS needs from the platform.
pub trait BiosBus: MemoryBus + PortIo + Mmio {}
impl<T: MemoryBus + PortIo + Mmio> BiosBus for T {}

/// Real-mode `segment:offset` pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FarPtr {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr {
    /// `FFFF:FFFF`, used by EDD to mean "use the 64-bit flat address instead".
    pub const FLAT_MARKER: FarPtr = FarPtr::new(0xFFFF, 0xFFFF);

    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }

    /// Decode the little-endian `offset, segment` dword layout used by BIOS parameter blocks.
    pub const fn from_dword(raw: u32) -> Self {
        Self {
            segment: (raw >> 16) as u16,
            offset: raw as u16,
        }
    }

    pub const fn to_dword(self) -> u32 {
        ((self.segment as u32) << 16) | self.offset as u32
    }

    /// 20-bit linear address (`segment * 16 + offset`), without A20 wrap.
    pub const fn linear(self) -> u64 {
        ((self.segment as u64) << 4) + self.offset as u64
    }
}
