use crate::geometry::Chs;

/// Fields of an IDENTIFY (PACKET) DEVICE response the BIOS cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyData {
    pub model: String,
    /// Words 1/3/6 when all are non-zero.
    pub native_chs: Option<Chs>,
    pub lba: bool,
    pub lba48: bool,
    /// Words 60-61.
    pub lba28_sectors: u32,
    /// Words 100-103.
    pub lba48_sectors: u64,
    /// Word 47 bits 7:0.
    pub max_multiple: u16,
    pub removable: bool,
    /// ATAPI only: packet length from word 0 bits 1:0.
    pub packet_len: u8,
    /// ATAPI only: peripheral device type from word 0 bits 12:8.
    pub device_type: u8,
}

pub(crate) const ATAPI_TYPE_CDROM: u8 = 0x05;

impl IdentifyData {
    pub fn parse(words: &[u16; 256]) -> Self {
        let native = Chs::new(
            u32::from(words[1]),
            u32::from(words[3]),
            u32::from(words[6]),
        );
        let native_chs = (native.cylinders != 0
            && native.heads != 0
            && native.sectors_per_track != 0)
            .then_some(native);
        let lba = words[49] & (1 << 9) != 0;
        let lba48 = words[83] & (1 << 10) != 0;
        let lba28_sectors = u32::from(words[60]) | (u32::from(words[61]) << 16);
        let lba48_sectors = (0..4)
            .fold(0u64, |acc, i| acc | (u64::from(words[100 + i]) << (16 * i)));
        Self {
            model: ata_string(&words[27..47]),
            native_chs,
            lba,
            lba48,
            lba28_sectors,
            lba48_sectors,
            max_multiple: words[47] & 0x00FF,
            removable: words[0] & (1 << 7) != 0,
            packet_len: if words[0] & 0x3 == 1 { 16 } else { 12 },
            device_type: ((words[0] >> 8) & 0x1F) as u8,
        }
    }

    /// User-addressable capacity in sectors, `0` for CHS-only devices without geometry.
    pub fn total_sectors(&self) -> u64 {
        if self.lba48 && self.lba48_sectors != 0 {
            self.lba48_sectors
        } else if self.lba {
            u64::from(self.lba28_sectors)
        } else {
            self.native_chs.map_or(0, |chs| chs.total_sectors())
        }
    }
}

/// Decode an ATA string: two characters per word, high byte first, space padded.
fn ata_string(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}
