//! ATAPI PACKET protocol.

use tracing::debug;

use super::regs::*;
use super::IdeIo;
use crate::error::{DriverError, WaitFor};
use crate::scsi::cdb::{self, Cdb};

/// Byte count limit programmed for every packet command (a whole number of CD sectors).
const BYTE_COUNT_LIMIT: u16 = 0xF800;

impl IdeIo<'_> {
    /// Run one packet command, collecting up to `data_len` bytes of data-in.
    ///
    /// A failed command is followed by REQUEST SENSE so the error carries the full sense triple.
    pub(crate) fn packet(
        &mut self,
        unit: u8,
        packet_len: u8,
        command: &Cdb,
        data_len: usize,
    ) -> Result<Vec<u8>, DriverError> {
        match self.packet_once(unit, packet_len, command, data_len) {
            Err(DriverError::Device { error, .. }) if command.opcode() != cdb::REQUEST_SENSE => {
                let key = error >> 4;
                let sense = self.packet_once(
                    unit,
                    packet_len,
                    &Cdb::request_sense(cdb::SENSE_LEN as u8),
                    cdb::SENSE_LEN,
                );
                let (asc, ascq) = match sense.ok().as_deref().and_then(cdb::parse_sense) {
                    Some((_, asc, ascq)) => (asc, ascq),
                    None => (0, 0),
                };
                debug!(unit, opcode = command.opcode(), key, asc, ascq, "ATAPI command failed");
                Err(DriverError::Sense { key, asc, ascq })
            }
            other => other,
        }
    }

    fn packet_once(
        &mut self,
        unit: u8,
        packet_len: u8,
        command: &Cdb,
        data_len: usize,
    ) -> Result<Vec<u8>, DriverError> {
        self.select(unit, 0);
        self.wait_not_busy()?;
        self.write(ATA_REG_ERROR_FEATURES, 0);
        self.write(ATA_REG_LBA1, BYTE_COUNT_LIMIT as u8);
        self.write(ATA_REG_LBA2, (BYTE_COUNT_LIMIT >> 8) as u8);
        self.write(ATA_REG_STATUS_COMMAND, ATA_CMD_PACKET);
        self.settle();

        let budget = self.polls.ata_drq;
        budget.poll(WaitFor::PacketAccepted, || {
            let raw = self.raw_alt_status();
            if raw == 0xFF {
                return Err(DriverError::NotPresent);
            }
            let status = AtaStatus::from_bits_retain(raw);
            if status.contains(AtaStatus::BSY) {
                return Ok(None);
            }
            if status.intersects(AtaStatus::ERR | AtaStatus::DF) {
                return Err(self.fail(status));
            }
            Ok(status.contains(AtaStatus::DRQ).then_some(()))
        })?;
        let reason = InterruptReason::from_bits_truncate(self.read(ATA_REG_SECTOR_COUNT));
        if !reason.contains(InterruptReason::COD) || reason.contains(InterruptReason::IO) {
            self.status();
            return Err(DriverError::Protocol("device not accepting a command packet"));
        }

        let mut packet = [0u8; 16];
        let bytes = command.as_bytes();
        packet[..bytes.len()].copy_from_slice(bytes);
        let len = if packet_len == 16 { 16 } else { 12 };
        self.write_data(&packet[..len]);
        self.settle();

        let mut data = Vec::with_capacity(data_len);
        let mut streamed = 0usize;
        loop {
            let status = self.wait_not_busy()?;
            if status.intersects(AtaStatus::ERR | AtaStatus::DF) {
                return Err(self.fail(status));
            }
            if !status.contains(AtaStatus::DRQ) {
                break;
            }
            let reason = InterruptReason::from_bits_truncate(self.read(ATA_REG_SECTOR_COUNT));
            if reason.contains(InterruptReason::COD) || !reason.contains(InterruptReason::IO) {
                self.status();
                return Err(DriverError::Protocol("unexpected ATAPI phase"));
            }
            let count =
                usize::from(self.read(ATA_REG_LBA1)) | (usize::from(self.read(ATA_REG_LBA2)) << 8);
            if count == 0 {
                self.status();
                return Err(DriverError::Protocol("zero ATAPI byte count"));
            }
            streamed += count;
            if streamed > data_len + usize::from(BYTE_COUNT_LIMIT) {
                self.status();
                return Err(DriverError::Protocol("device overran the requested length"));
            }
            let mut chunk = vec![0u8; (count + 1) & !1];
            self.read_data(&mut chunk);
            chunk.truncate(count);
            let room = data_len - data.len();
            data.extend_from_slice(&chunk[..count.min(room)]);
        }
        self.status();
        Ok(data)
    }

    /// Capacity in 2048-byte sectors.
    pub(crate) fn read_capacity(&mut self, unit: u8, packet_len: u8) -> Result<u64, DriverError> {
        let data = self.packet(unit, packet_len, &Cdb::read_capacity(), cdb::READ_CAPACITY_LEN)?;
        let (last, _block) = cdb::parse_capacity(&data)
            .ok_or(DriverError::Protocol("short READ CAPACITY data"))?;
        Ok(u64::from(last) + 1)
    }
}
