use crate::MemoryBus;

/// Flat RAM backed by a single `Vec<u8>`.
///
/// Accesses past the end behave like an unpopulated bus: reads return `0xFF` and writes are
/// dropped.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Vec<u8>,
}

impl DenseMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy `len` bytes out of RAM, starting at `paddr`.
    pub fn read_bytes(&self, paddr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0xFF; len];
        for (i, slot) in out.iter_mut().enumerate() {
            if let Some(&b) = self.byte(paddr.wrapping_add(i as u64)) {
                *slot = b;
            }
        }
        out
    }

    fn byte(&self, paddr: u64) -> Option<&u8> {
        usize::try_from(paddr).ok().and_then(|i| self.data.get(i))
    }

    fn in_bounds(&self, paddr: u64, len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(paddr).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

impl MemoryBus for DenseMemory {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        if let Some(range) = self.in_bounds(paddr, buf.len()) {
            buf.copy_from_slice(&self.data[range]);
            return;
        }
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.byte(paddr.wrapping_add(i as u64)).copied().unwrap_or(0xFF);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        if let Some(range) = self.in_bounds(paddr, buf.len()) {
            self.data[range].copy_from_slice(buf);
            return;
        }
        for (i, &b) in buf.iter().enumerate() {
            let Ok(idx) = usize::try_from(paddr.wrapping_add(i as u64)) else {
                continue;
            };
            if let Some(slot) = self.data.get_mut(idx) {
                *slot = b;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn little_endian_helpers_roundtrip_through_ram() {
        let mut mem = DenseMemory::new(0x100);
        mem.write_u32(0x10, 0xDEAD_BEEF);
        assert_eq!(mem.read_u8(0x10), 0xEF);
        assert_eq!(mem.read_u16(0x12), 0xDEAD);
        mem.write_u64(0x20, 0x0102_0304_0506_0708);
        assert_eq!(mem.read_u64(0x20), 0x0102_0304_0506_0708);
    }

    #[test]
    fn accesses_past_the_end_float_high_and_drop_writes() {
        let mut mem = DenseMemory::new(0x10);
        mem.write_u32(0x0E, 0x1122_3344);
        assert_eq!(mem.read_u8(0x0E), 0x44);
        assert_eq!(mem.read_u8(0x0F), 0x33);
        assert_eq!(mem.read_u16(0x10), 0xFFFF);
        assert_eq!(mem.read_bytes(0x0F, 2), vec![0x33, 0xFF]);
    }

    #[test]
    fn fill_covers_exactly_the_requested_span() {
        let mut mem = DenseMemory::new(0x400);
        mem.fill(0x10, 0x300, 0xA5);
        assert_eq!(mem.read_u8(0x0F), 0);
        assert_eq!(mem.read_u8(0x10), 0xA5);
        assert_eq!(mem.read_u8(0x30F), 0xA5);
        assert_eq!(mem.read_u8(0x310), 0);
    }

    proptest! {
        #[test]
        fn bulk_write_is_visible_to_bulk_read(
            off in 0u64..0x800,
            data in proptest::collection::vec(any::<u8>(), 0..0x200),
        ) {
            let mut mem = DenseMemory::new(0x1000);
            mem.write_physical(off, &data);
            let mut back = vec![0u8; data.len()];
            mem.read_physical(off, &mut back);
            prop_assert_eq!(back, data);
        }
    }
}
