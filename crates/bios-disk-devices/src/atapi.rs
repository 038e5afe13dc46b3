//! ATAPI CD-ROM device model (the packet-command half; the IDE channel moves the bytes).

use tracing::debug;

use crate::disk::MemDisk;

pub const CD_SECTOR_SIZE: usize = 2048;

pub(crate) const SENSE_NOT_READY: u8 = 0x02;
pub(crate) const SENSE_ILLEGAL_REQUEST: u8 = 0x05;
pub(crate) const SENSE_UNIT_ATTENTION: u8 = 0x06;

const ASC_INVALID_OPCODE: u8 = 0x20;
const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3A;
const ASC_REMOVAL_PREVENTED: u8 = 0x53;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    fn new(key: u8, asc: u8) -> Self {
        Self { key, asc, ascq: 0 }
    }

    /// Fixed-format sense data.
    pub(crate) fn to_bytes(self) -> [u8; 18] {
        let mut data = [0u8; 18];
        data[0] = 0x70;
        data[2] = self.key & 0x0F;
        data[7] = 10;
        data[12] = self.asc;
        data[13] = self.ascq;
        data
    }
}

/// Outcome of one packet command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PacketResult {
    DataIn(Vec<u8>),
    NoData,
    Error(Sense),
}

#[derive(Debug, Clone)]
pub struct AtapiCdrom {
    media: Option<MemDisk>,
    sense: Sense,
    locked: bool,
}

impl AtapiCdrom {
    pub fn new(media: Option<MemDisk>) -> Self {
        Self {
            media,
            sense: Sense::default(),
            locked: false,
        }
    }

    pub fn media_present(&self) -> bool {
        self.media.is_some()
    }

    pub fn insert_media(&mut self, disk: MemDisk) {
        self.media = Some(disk);
        self.sense = Sense::new(SENSE_UNIT_ATTENTION, 0x28);
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// IDENTIFY PACKET DEVICE: removable CD-ROM, 12-byte packets.
    pub fn identify_packet_data(&self) -> [u16; 256] {
        let mut words = [0u16; 256];
        words[0] = 0x8000 | (0x05 << 8) | (1 << 7);
        write_ata_string(&mut words[27..47], "BIOS-DISK ATAPI CD-ROM");
        words[49] = 1 << 9;
        words
    }

    pub(crate) fn handle_packet(&mut self, packet: &[u8; 12]) -> PacketResult {
        let result = self.execute(packet);
        if let PacketResult::Error(sense) = &result {
            debug!(opcode = packet[0], ?sense, "ATAPI check condition");
            self.sense = *sense;
        } else if packet[0] != 0x03 {
            self.sense = Sense::default();
        }
        result
    }

    fn execute(&mut self, packet: &[u8; 12]) -> PacketResult {
        match packet[0] {
            // REQUEST SENSE reports and clears the latched sense.
            0x03 => {
                let data = self.sense.to_bytes();
                self.sense = Sense::default();
                let alloc = usize::from(packet[4]).min(data.len());
                PacketResult::DataIn(data[..alloc].to_vec())
            }
            0x00 => match self.media {
                Some(_) => PacketResult::NoData,
                None => PacketResult::Error(Sense::new(SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT)),
            },
            0x1E => {
                self.locked = packet[4] & 1 != 0;
                PacketResult::NoData
            }
            // START STOP UNIT with LoEj.
            0x1B => {
                if packet[4] & 0x02 == 0 {
                    return PacketResult::NoData;
                }
                if self.locked {
                    return PacketResult::Error(Sense::new(
                        SENSE_ILLEGAL_REQUEST,
                        ASC_REMOVAL_PREVENTED,
                    ));
                }
                self.media = None;
                PacketResult::NoData
            }
            0x25 => {
                let Some(media) = &self.media else {
                    return PacketResult::Error(Sense::new(SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT));
                };
                let last = media.sectors().saturating_sub(1) as u32;
                let mut data = Vec::with_capacity(8);
                data.extend_from_slice(&last.to_be_bytes());
                data.extend_from_slice(&(CD_SECTOR_SIZE as u32).to_be_bytes());
                PacketResult::DataIn(data)
            }
            0x28 => {
                let Some(media) = &self.media else {
                    return PacketResult::Error(Sense::new(SENSE_NOT_READY, ASC_MEDIUM_NOT_PRESENT));
                };
                let lba = u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]);
                let blocks = u16::from_be_bytes([packet[7], packet[8]]);
                match media.read(u64::from(lba), u64::from(blocks)) {
                    Some(data) if blocks > 0 => PacketResult::DataIn(data),
                    Some(_) => PacketResult::NoData,
                    None => PacketResult::Error(Sense::new(
                        SENSE_ILLEGAL_REQUEST,
                        ASC_LBA_OUT_OF_RANGE,
                    )),
                }
            }
            _ => PacketResult::Error(Sense::new(SENSE_ILLEGAL_REQUEST, ASC_INVALID_OPCODE)),
        }
    }
}

/// ATA string: two characters per word, first character in the high byte.
pub(crate) fn write_ata_string(dst: &mut [u16], src: &str) {
    let mut bytes = vec![b' '; dst.len() * 2];
    let n = src.len().min(bytes.len());
    bytes[..n].copy_from_slice(&src.as_bytes()[..n]);
    for (w, pair) in dst.iter_mut().zip(bytes.chunks_exact(2)) {
        *w = u16::from_be_bytes([pair[0], pair[1]]);
    }
}
