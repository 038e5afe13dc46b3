//! Reserved low-memory region for controller data structures.

use crate::bus::{BiosBus, MemoryBus};

/// Bump allocator over the reserved low-memory DMA window.
///
/// Allocations live until [`DmaWindow::reset`], which only happens on BIOS re-initialization.
#[derive(Debug, Clone)]
pub struct DmaWindow {
    base: u64,
    size: u64,
    next: u64,
}

impl DmaWindow {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size, next: 0 }
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Whether `[start, start + len)` touches any part of the window.
    pub fn overlaps(&self, start: u64, len: u64) -> bool {
        len > 0 && self.size > 0 && start < self.base + self.size && start + len > self.base
    }

    /// Carve out `len` zeroed bytes aligned to `align` (a power of two).
    pub fn alloc(&mut self, bus: &mut dyn BiosBus, len: u64, align: u64) -> Option<u64> {
        debug_assert!(align.is_power_of_two());
        let start = (self.base + self.next).checked_add(align - 1)? & !(align - 1);
        let end = start.checked_add(len)?;
        if end > self.base + self.size || end > 1 << 32 {
            return None;
        }
        self.next = end - self.base;
        bus.fill(start, len as usize, 0);
        Some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::DenseMemory;

    struct RamOnly(DenseMemory);

    impl MemoryBus for RamOnly {
        fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
            self.0.read_physical(paddr, buf);
        }

        fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
            self.0.write_physical(paddr, buf);
        }
    }

    impl crate::bus::PortIo for RamOnly {
        fn inb(&mut self, _port: u16) -> u8 {
            0xFF
        }
        fn outb(&mut self, _port: u16, _val: u8) {}
        fn inw(&mut self, _port: u16) -> u16 {
            0xFFFF
        }
        fn outw(&mut self, _port: u16, _val: u16) {}
    }

    impl crate::bus::Mmio for RamOnly {
        fn mmio_read32(&mut self, _addr: u64) -> u32 {
            u32::MAX
        }
        fn mmio_write32(&mut self, _addr: u64, _val: u32) {}
    }

    #[test]
    fn allocations_are_aligned_zeroed_and_bounded() {
        let mut bus = RamOnly(DenseMemory::new(0x2000));
        bus.fill(0x1000, 0x1000, 0xAA);
        let mut window = DmaWindow::new(0x1010, 0xFF0);

        let a = window.alloc(&mut bus, 0x10, 0x400).unwrap();
        assert_eq!(a, 0x1400);
        assert_eq!(bus.read_u32(a), 0);
        assert_eq!(bus.read_u8(0x1010), 0xAA);

        let b = window.alloc(&mut bus, 0x100, 0x100).unwrap();
        assert_eq!(b, 0x1500);
        assert_eq!(window.alloc(&mut bus, 0x1000, 1), None);

        window.reset();
        assert_eq!(window.alloc(&mut bus, 0x10, 0x400), Some(0x1400));
    }

    #[test]
    fn overlap_is_half_open() {
        let window = DmaWindow::new(0x9_0000, 0xF000);
        assert!(!window.overlaps(0x8_0000, 0x1_0000));
        assert!(window.overlaps(0x8_F000, 0x1001));
        assert!(window.overlaps(0x9_E000, 0x10));
        assert!(!window.overlaps(0x9_F000, 0x1000));
        assert!(!window.overlaps(0x9_0000, 0));
        assert!(!DmaWindow::new(0x9_0000, 0).overlaps(0x9_0000, 0x200));
    }
}
