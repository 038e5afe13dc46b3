//! CHS geometry and CHS <-> LBA translation.
//!
//! INT 13h CHS calls can address at most 1024 cylinders, 255 heads and 63 sectors per track.
//! Disks whose native geometry doesn't fit (or is missing) get an LBA-assisted translation derived
//! from their total sector count.

pub const MAX_CYLINDERS: u32 = 1024;
pub const MAX_HEADS: u32 = 255;
pub const MAX_SECTORS_PER_TRACK: u32 = 63;

/// Native ATA geometry limit for heads (IDENTIFY word 3, 4-bit head select).
const MAX_NATIVE_HEADS: u32 = 16;

/// LBA-assisted head counts, tried in order.
const ASSISTED_HEADS: [u32; 5] = [16, 32, 64, 128, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
}

/// One CHS address; `sector` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChsAddress {
    pub cylinder: u32,
    pub head: u32,
    pub sector: u32,
}

impl ChsAddress {
    /// Decode the INT 13h register form: `CH` = cylinder low bits, `CL[7:6]` = cylinder bits 9:8,
    /// `CL[5:0]` = sector, `DH` = head.
    pub fn from_int13(cx: u16, dh: u8) -> Self {
        let cylinder = u32::from(cx >> 8) | (u32::from(cx & 0x00C0) << 2);
        Self {
            cylinder,
            head: u32::from(dh),
            sector: u32::from(cx & 0x3F),
        }
    }
}

impl Chs {
    pub const fn new(cylinders: u32, heads: u32, sectors_per_track: u32) -> Self {
        Self {
            cylinders,
            heads,
            sectors_per_track,
        }
    }

    pub fn total_sectors(&self) -> u64 {
        u64::from(self.cylinders) * u64::from(self.heads) * u64::from(self.sectors_per_track)
    }

    /// Whether the geometry is addressable through the legacy CHS register interface.
    pub fn is_legacy_compatible(&self) -> bool {
        (1..=MAX_CYLINDERS).contains(&self.cylinders)
            && (1..=MAX_HEADS).contains(&self.heads)
            && (1..=MAX_SECTORS_PER_TRACK).contains(&self.sectors_per_track)
    }

    /// LBA-assisted translation of `total` sectors.
    pub fn lba_assisted(total: u64) -> Option<Chs> {
        if total == 0 {
            return None;
        }
        let spt = total.min(u64::from(MAX_SECTORS_PER_TRACK));
        let tracks = total / spt;
        let wanted_heads = ASSISTED_HEADS
            .iter()
            .copied()
            .find(|&h| tracks <= u64::from(h) * u64::from(MAX_CYLINDERS))
            .unwrap_or(MAX_HEADS);
        let heads = u64::from(wanted_heads).min(tracks.max(1));
        let cylinders = (total / (heads * spt)).min(u64::from(MAX_CYLINDERS));
        Some(Chs::new(cylinders as u32, heads as u32, spt as u32))
    }

    /// Geometry the registry publishes for a disk of `total` sectors.
    ///
    /// A usable native geometry (IDENTIFY words 1/3/6) is kept, with its cylinder count clipped
    /// to the capacity; anything degenerate or beyond 1024 cylinders falls back to
    /// [`Chs::lba_assisted`].
    pub fn translate(native: Option<Chs>, total: u64) -> Option<Chs> {
        if let Some(native) = native {
            let usable = (1..=MAX_CYLINDERS).contains(&native.cylinders)
                && (1..=MAX_NATIVE_HEADS).contains(&native.heads)
                && (1..=MAX_SECTORS_PER_TRACK).contains(&native.sectors_per_track);
            if usable {
                let per_cylinder = u64::from(native.heads) * u64::from(native.sectors_per_track);
                let fits = (total / per_cylinder).min(u64::from(native.cylinders));
                if fits > 0 {
                    return Some(Chs::new(fits as u32, native.heads, native.sectors_per_track));
                }
            }
        }
        Chs::lba_assisted(total)
    }

    pub fn to_lba(&self, addr: ChsAddress) -> Option<u64> {
        if addr.cylinder >= self.cylinders
            || addr.head >= self.heads
            || addr.sector == 0
            || addr.sector > self.sectors_per_track
        {
            return None;
        }
        let track = u64::from(addr.cylinder) * u64::from(self.heads) + u64::from(addr.head);
        Some(track * u64::from(self.sectors_per_track) + u64::from(addr.sector - 1))
    }

    pub fn from_lba(&self, lba: u64) -> Option<ChsAddress> {
        if lba >= self.total_sectors() {
            return None;
        }
        let spt = u64::from(self.sectors_per_track);
        let heads = u64::from(self.heads);
        Some(ChsAddress {
            cylinder: (lba / (spt * heads)) as u32,
            head: ((lba / spt) % heads) as u32,
            sector: (lba % spt) as u32 + 1,
        })
    }

    /// `(CX, DH)` for INT 13h AH=08h: maximum cylinder/head indices and sectors per track.
    pub fn int13_limits(&self) -> (u16, u8) {
        let max_cyl = self.cylinders.saturating_sub(1).min(MAX_CYLINDERS - 1);
        let ch = (max_cyl & 0xFF) as u16;
        let cl = (self.sectors_per_track & 0x3F) as u16 | ((max_cyl >> 2) & 0xC0) as u16;
        let dh = self.heads.saturating_sub(1).min(0xFF) as u8;
        ((ch << 8) | cl, dh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn one_million_sectors_uses_sixteen_heads() {
        let chs = Chs::lba_assisted(1_000_000).unwrap();
        assert_eq!(chs, Chs::new(992, 16, 63));
    }

    #[test]
    fn large_disks_saturate_at_1024_cylinders() {
        let chs = Chs::lba_assisted(100_000_000).unwrap();
        assert_eq!(chs.heads, 255);
        assert_eq!(chs.cylinders, 1024);
        assert_eq!(chs.sectors_per_track, 63);
    }

    #[test]
    fn head_count_steps_up_past_each_threshold() {
        let sixteen = 1024 * 16 * 63;
        assert_eq!(Chs::lba_assisted(sixteen).unwrap().heads, 16);
        assert_eq!(Chs::lba_assisted(sixteen + 63).unwrap().heads, 32);
        assert_eq!(Chs::lba_assisted(1024 * 64 * 63 + 63).unwrap().heads, 128);
    }

    #[test]
    fn tiny_disks_use_a_single_head() {
        assert_eq!(Chs::lba_assisted(40).unwrap(), Chs::new(1, 1, 40));
        assert_eq!(Chs::lba_assisted(200).unwrap(), Chs::new(1, 3, 63));
        assert_eq!(Chs::lba_assisted(0), None);
    }

    #[test]
    fn sane_native_geometry_is_kept() {
        let native = Chs::new(1000, 16, 63);
        assert_eq!(Chs::translate(Some(native), 1_008_000), Some(native));
        // Clipped to what the capacity actually covers.
        assert_eq!(Chs::translate(Some(native), 500_000), Some(Chs::new(496, 16, 63)));
    }

    #[test]
    fn degenerate_native_geometry_falls_back() {
        let total = 1_000_000;
        let assisted = Chs::lba_assisted(total);
        assert_eq!(Chs::translate(Some(Chs::new(0, 16, 63)), total), assisted);
        assert_eq!(Chs::translate(Some(Chs::new(1000, 17, 63)), total), assisted);
        assert_eq!(Chs::translate(Some(Chs::new(1000, 16, 64)), total), assisted);
        assert_eq!(Chs::translate(Some(Chs::new(16383, 16, 63)), total), assisted);
        assert_eq!(Chs::translate(None, total), assisted);
    }

    #[test]
    fn int13_register_encoding() {
        let addr = ChsAddress::from_int13(0x2A_C5, 3);
        assert_eq!(addr, ChsAddress { cylinder: 0x32A, head: 3, sector: 5 });

        let (cx, dh) = Chs::new(1024, 255, 63).int13_limits();
        assert_eq!(cx, 0xFF_FF);
        assert_eq!(dh, 254);
        let (cx, dh) = Chs::new(80, 2, 18).int13_limits();
        assert_eq!(cx, 0x4F_12);
        assert_eq!(dh, 1);
    }

    #[test]
    fn address_bounds() {
        let chs = Chs::new(80, 2, 18);
        assert_eq!(chs.to_lba(ChsAddress { cylinder: 0, head: 0, sector: 1 }), Some(0));
        assert_eq!(chs.to_lba(ChsAddress { cylinder: 1, head: 1, sector: 18 }), Some(71));
        assert_eq!(chs.to_lba(ChsAddress { cylinder: 0, head: 0, sector: 0 }), None);
        assert_eq!(chs.to_lba(ChsAddress { cylinder: 0, head: 2, sector: 1 }), None);
        assert_eq!(chs.to_lba(ChsAddress { cylinder: 80, head: 0, sector: 1 }), None);
    }

    proptest! {
        #[test]
        fn translated_geometry_never_exceeds_capacity(
            total in 1u64..(1u64 << 40),
            cyl in 0u32..20_000,
            heads in 0u32..20,
            spt in 0u32..70,
            has_native in any::<bool>(),
        ) {
            let native = has_native.then_some(Chs::new(cyl, heads, spt));
            let chs = Chs::translate(native, total).unwrap();
            prop_assert!(chs.is_legacy_compatible());
            prop_assert!(chs.total_sectors() <= total);
        }

        #[test]
        fn chs_lba_conversion_is_bijective(total in 1u64..50_000_000, pick in any::<u64>()) {
            let chs = Chs::lba_assisted(total).unwrap();
            let lba = pick % chs.total_sectors();
            let addr = chs.from_lba(lba).unwrap();
            prop_assert_eq!(chs.to_lba(addr), Some(lba));
        }
    }
}
