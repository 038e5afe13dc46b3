use std::collections::BTreeMap;

/// Sparse RAM-backed block device.
///
/// Sectors never written read back as [`MemDisk::pattern`], so multi-gigabyte disks cost nothing
/// until a test writes to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemDisk {
    sectors: u64,
    sector_size: usize,
    written: BTreeMap<u64, Vec<u8>>,
}

impl MemDisk {
    pub fn new(sectors: u64, sector_size: usize) -> Self {
        Self {
            sectors,
            sector_size,
            written: BTreeMap::new(),
        }
    }

    /// Contents of an unwritten sector.
    pub fn pattern(lba: u64, sector_size: usize) -> Vec<u8> {
        let seed = (lba as u8).wrapping_mul(31) ^ (lba >> 8) as u8;
        (0..sector_size)
            .map(|i| seed.wrapping_add(i as u8))
            .collect()
    }

    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn read(&self, lba: u64, count: u64) -> Option<Vec<u8>> {
        let end = lba.checked_add(count)?;
        if end > self.sectors {
            return None;
        }
        let mut out = Vec::with_capacity(count as usize * self.sector_size);
        for lba in lba..end {
            match self.written.get(&lba) {
                Some(data) => out.extend_from_slice(data),
                None => out.extend(Self::pattern(lba, self.sector_size)),
            }
        }
        Some(out)
    }

    /// Write whole sectors; returns `false` (and writes nothing) past the end.
    pub fn write(&mut self, lba: u64, data: &[u8]) -> bool {
        let count = (data.len() / self.sector_size) as u64;
        match lba.checked_add(count) {
            Some(end) if end <= self.sectors => {}
            _ => return false,
        }
        for (i, chunk) in data.chunks_exact(self.sector_size).enumerate() {
            self.written.insert(lba + i as u64, chunk.to_vec());
        }
        true
    }
}
