//! SCSI command descriptor blocks shared by the SCSI adapter driver and ATAPI packets.

pub const TEST_UNIT_READY: u8 = 0x00;
pub const REQUEST_SENSE: u8 = 0x03;
pub const INQUIRY: u8 = 0x12;
pub const START_STOP_UNIT: u8 = 0x1B;
pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
pub const READ_CAPACITY_10: u8 = 0x25;
pub const READ_10: u8 = 0x28;
pub const WRITE_10: u8 = 0x2A;
pub const VERIFY_10: u8 = 0x2F;

pub const STATUS_GOOD: u8 = 0x00;
pub const STATUS_CHECK_CONDITION: u8 = 0x02;

/// Fixed-format sense data returned by REQUEST SENSE.
pub const SENSE_LEN: usize = 18;
pub const INQUIRY_LEN: usize = 36;
pub const READ_CAPACITY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; 16],
    len: u8,
}

impl Cdb {
    fn six(opcode: u8) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = opcode;
        Self { bytes, len: 6 }
    }

    fn ten(opcode: u8) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = opcode;
        Self { bytes, len: 10 }
    }

    fn ten_lba(opcode: u8, lba: u32, blocks: u16) -> Self {
        let mut cdb = Self::ten(opcode);
        cdb.bytes[2..6].copy_from_slice(&lba.to_be_bytes());
        cdb.bytes[7..9].copy_from_slice(&blocks.to_be_bytes());
        cdb
    }

    pub fn test_unit_ready() -> Self {
        Self::six(TEST_UNIT_READY)
    }

    pub fn request_sense(alloc: u8) -> Self {
        let mut cdb = Self::six(REQUEST_SENSE);
        cdb.bytes[4] = alloc;
        cdb
    }

    pub fn inquiry(alloc: u8) -> Self {
        let mut cdb = Self::six(INQUIRY);
        cdb.bytes[4] = alloc;
        cdb
    }

    /// START STOP UNIT with `LoEj=1, Start=0`.
    pub fn eject() -> Self {
        let mut cdb = Self::six(START_STOP_UNIT);
        cdb.bytes[4] = 0x02;
        cdb
    }

    pub fn prevent_removal(prevent: bool) -> Self {
        let mut cdb = Self::six(PREVENT_ALLOW_MEDIUM_REMOVAL);
        cdb.bytes[4] = u8::from(prevent);
        cdb
    }

    pub fn read_capacity() -> Self {
        Self::ten(READ_CAPACITY_10)
    }

    pub fn read10(lba: u32, blocks: u16) -> Self {
        Self::ten_lba(READ_10, lba, blocks)
    }

    pub fn write10(lba: u32, blocks: u16) -> Self {
        Self::ten_lba(WRITE_10, lba, blocks)
    }

    pub fn verify10(lba: u32, blocks: u16) -> Self {
        Self::ten_lba(VERIFY_10, lba, blocks)
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }
}

/// `(last LBA, block length)` from READ CAPACITY(10) data.
pub fn parse_capacity(data: &[u8]) -> Option<(u32, u32)> {
    let last = u32::from_be_bytes(data.get(0..4)?.try_into().ok()?);
    let block = u32::from_be_bytes(data.get(4..8)?.try_into().ok()?);
    Some((last, block))
}

/// `(sense key, ASC, ASCQ)` from fixed-format sense data.
pub fn parse_sense(data: &[u8]) -> Option<(u8, u8, u8)> {
    Some((*data.get(2)? & 0x0F, *data.get(12)?, *data.get(13)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read10_layout() {
        let cdb = Cdb::read10(0x0102_0304, 0x0506);
        assert_eq!(
            cdb.as_bytes(),
            &[READ_10, 0, 0x01, 0x02, 0x03, 0x04, 0, 0x05, 0x06, 0]
        );
    }

    #[test]
    fn six_byte_commands() {
        assert_eq!(Cdb::inquiry(36).as_bytes(), &[INQUIRY, 0, 0, 0, 36, 0]);
        assert_eq!(Cdb::eject().as_bytes()[4], 0x02);
        assert_eq!(Cdb::prevent_removal(true).as_bytes()[4], 1);
        assert_eq!(Cdb::test_unit_ready().opcode(), TEST_UNIT_READY);
    }

    #[test]
    fn capacity_and_sense_parsing() {
        let cap = [0x00, 0x1E, 0x84, 0x7F, 0x00, 0x00, 0x02, 0x00];
        assert_eq!(parse_capacity(&cap), Some((1_999_999, 512)));
        assert_eq!(parse_capacity(&cap[..7]), None);

        let mut sense = [0u8; SENSE_LEN];
        sense[0] = 0x70;
        sense[2] = 0x02;
        sense[12] = 0x3A;
        assert_eq!(parse_sense(&sense), Some((0x02, 0x3A, 0x00)));
    }
}
