//! Driver for the message-register SCSI host adapter.
//!
//! The adapter takes a header byte (`target << 5 | cdb_len`) and the CDB through the
//! command/status register, then streams data one byte at a time through the data register.
//! Once `COMPLETE` is raised, reading the data register yields the SCSI status byte.

pub mod backend;
pub mod cdb;

use tracing::{debug, info, warn};

use crate::bus::{BiosBus, MemoryBus};
use crate::config::{PollBudgets, ScsiWindow};
use crate::controller::{DiskController, Transfer, TransferOp};
use crate::error::{DriverError, WaitFor};
use crate::geometry::Chs;
use crate::registry::{AtaCaps, ControllerKind, DriveEntry, DriveRegistry, IoBase};
use crate::DISK_SECTOR_SIZE;

use backend::{backend_for, AdapterStatus, ScsiBackend, ScsiReg};
use cdb::Cdb;

const DETECT_PATTERNS: [u8; 2] = [0x55, 0xAA];
const PERIPHERAL_DIRECT_ACCESS: u8 = 0x00;
const PERIPHERAL_CDROM: u8 = 0x05;
/// Blocks per READ(10)/WRITE(10).
const MAX_BLOCKS_PER_COMMAND: u32 = 128;
/// Surplus data-in bytes drained before a target is declared broken.
const MAX_OVERRUN: usize = 64 * 1024;

/// Data phase of one command.
enum DataPhase<'a> {
    None,
    In(usize),
    Out(&'a [u8]),
}

#[derive(Debug)]
pub struct ScsiAdapter {
    index: usize,
    window: ScsiWindow,
    backend: Box<dyn ScsiBackend>,
    polls: PollBudgets,
    max_targets: u8,
}

impl ScsiAdapter {
    pub fn new(index: usize, window: ScsiWindow, polls: PollBudgets, max_targets: u8) -> Self {
        Self {
            index,
            window,
            backend: backend_for(window),
            polls,
            max_targets: max_targets.min(8),
        }
    }

    /// Identity probe through the detect register.
    pub fn present(&self, bus: &mut dyn BiosBus) -> bool {
        DETECT_PATTERNS.iter().all(|&pattern| {
            self.backend.write(bus, ScsiReg::Detect, pattern);
            self.backend.read(bus, ScsiReg::Detect) == pattern
        })
    }

    fn status(&self, bus: &mut dyn BiosBus) -> AdapterStatus {
        AdapterStatus::from_bits_retain(self.backend.read(bus, ScsiReg::CommandStatus))
    }

    fn wait_idle(&self, bus: &mut dyn BiosBus) -> Result<(), DriverError> {
        self.polls.scsi_ready.wait_until(WaitFor::AdapterReady, || {
            !self.status(bus).contains(AdapterStatus::BUSY)
        })
    }

    /// Reset the adapter and wait for it to go idle.
    pub fn reset_adapter(&self, bus: &mut dyn BiosBus) -> Result<(), DriverError> {
        self.backend.write(bus, ScsiReg::Reset, 0);
        self.wait_idle(bus)
    }

    /// Poll until the adapter offers (`want = DATA_IN`) or requests (`DATA_OUT`) a byte.
    ///
    /// Returns `false` when the command completes instead.
    fn wait_byte(&self, bus: &mut dyn BiosBus, want: AdapterStatus) -> Result<bool, DriverError> {
        self.polls.scsi_byte.poll(WaitFor::ScsiData, || {
            let status = self.status(bus);
            if status.contains(AdapterStatus::NO_TARGET) {
                return Err(DriverError::NotPresent);
            }
            if status.contains(want) {
                return Ok(Some(true));
            }
            if status.contains(AdapterStatus::COMPLETE) {
                return Ok(Some(false));
            }
            Ok(None)
        })
    }

    fn command_once(
        &self,
        bus: &mut dyn BiosBus,
        target: u8,
        command: &Cdb,
        phase: &DataPhase<'_>,
    ) -> Result<(u8, Vec<u8>), DriverError> {
        self.wait_idle(bus)?;
        let bytes = command.as_bytes();
        self.backend
            .write(bus, ScsiReg::CommandStatus, (target << 5) | bytes.len() as u8);
        for &b in bytes {
            self.backend.write(bus, ScsiReg::CommandStatus, b);
        }

        let mut data = Vec::new();
        let mut sent = None;
        match *phase {
            DataPhase::None => {}
            DataPhase::In(len) => {
                data.reserve(len);
                let mut streamed = 0usize;
                while self.wait_byte(bus, AdapterStatus::DATA_IN)? {
                    let b = self.backend.read(bus, ScsiReg::Data);
                    streamed += 1;
                    if streamed <= len {
                        data.push(b);
                    } else if streamed > len + MAX_OVERRUN {
                        return Err(DriverError::Protocol("target overran the requested length"));
                    }
                }
            }
            DataPhase::Out(out) => {
                let mut n = 0usize;
                while n < out.len() && self.wait_byte(bus, AdapterStatus::DATA_OUT)? {
                    self.backend.write(bus, ScsiReg::Data, out[n]);
                    n += 1;
                }
                sent = Some((n, out.len()));
            }
        }

        self.polls.scsi_ready.poll(WaitFor::ScsiCompletion, || {
            let status = self.status(bus);
            if status.contains(AdapterStatus::NO_TARGET) {
                return Err(DriverError::NotPresent);
            }
            Ok(status.contains(AdapterStatus::COMPLETE).then_some(()))
        })?;
        let status = self.backend.read(bus, ScsiReg::Data);
        // A target may cut data-out short with CHECK CONDITION, never with GOOD.
        if let Some((n, len)) = sent.filter(|&(n, len)| n < len && status == cdb::STATUS_GOOD) {
            warn!(target, sent = n, len, "SCSI data-out phase ended early");
            return Err(DriverError::Protocol("adapter ended data-out phase early"));
        }
        Ok((status, data))
    }

    /// `sendCommand`: run one CDB, turning CHECK CONDITION into the sense triple.
    fn send_command(
        &self,
        bus: &mut dyn BiosBus,
        target: u8,
        command: &Cdb,
        phase: DataPhase<'_>,
    ) -> Result<Vec<u8>, DriverError> {
        let (status, data) = self.command_once(bus, target, command, &phase)?;
        match status {
            cdb::STATUS_GOOD => Ok(data),
            cdb::STATUS_CHECK_CONDITION if command.opcode() != cdb::REQUEST_SENSE => {
                let sense = self.command_once(
                    bus,
                    target,
                    &Cdb::request_sense(cdb::SENSE_LEN as u8),
                    &DataPhase::In(cdb::SENSE_LEN),
                )?;
                let (key, asc, ascq) = cdb::parse_sense(&sense.1).unwrap_or((0, 0, 0));
                debug!(target, opcode = command.opcode(), key, asc, ascq, "SCSI check condition");
                Err(DriverError::Sense { key, asc, ascq })
            }
            other => Err(DriverError::ScsiStatus(other)),
        }
    }

    fn probe_target(&self, bus: &mut dyn BiosBus, target: u8) -> Option<DriveEntry> {
        let inquiry = self
            .send_command(
                bus,
                target,
                &Cdb::inquiry(cdb::INQUIRY_LEN as u8),
                DataPhase::In(cdb::INQUIRY_LEN),
            )
            .ok()?;
        let byte0 = *inquiry.first()?;
        if byte0 >> 5 != 0 {
            return None;
        }
        let removable = inquiry.get(1).is_some_and(|b| b & 0x80 != 0);
        match byte0 & 0x1F {
            PERIPHERAL_DIRECT_ACCESS => {}
            PERIPHERAL_CDROM => {
                warn!(adapter = self.index, target, "SCSI CD-ROM not supported, skipped");
                return None;
            }
            other => {
                debug!(
                    adapter = self.index,
                    target,
                    peripheral = other,
                    "SCSI device type skipped"
                );
                return None;
            }
        }

        let capacity = match self.send_command(
            bus,
            target,
            &Cdb::read_capacity(),
            DataPhase::In(cdb::READ_CAPACITY_LEN),
        ) {
            Ok(data) => data,
            Err(err) => {
                warn!(adapter = self.index, target, %err, "READ CAPACITY failed");
                return None;
            }
        };
        let (last, block) = cdb::parse_capacity(&capacity)?;
        if block != DISK_SECTOR_SIZE as u32 {
            warn!(adapter = self.index, target, block, "unsupported SCSI block size, skipped");
            return None;
        }
        let sectors = u64::from(last) + 1;

        Some(DriveEntry {
            kind: ControllerKind::Scsi,
            controller: self.index,
            channel: 0,
            unit: target,
            io: IoBase::Scsi(self.window),
            sectors,
            sector_size: DISK_SECTOR_SIZE as u16,
            chs: Chs::translate(None, sectors),
            removable,
            cdrom: false,
            caps: AtaCaps::default(),
        })
    }
}

impl DiskController for ScsiAdapter {
    /// `enumerate`: INQUIRY then READ CAPACITY for each target id.
    fn detect(&mut self, bus: &mut dyn BiosBus, registry: &mut DriveRegistry) -> usize {
        if !self.present(bus) {
            debug!(window = ?self.window, "no SCSI adapter");
            return 0;
        }
        if let Err(err) = self.reset_adapter(bus) {
            warn!(window = ?self.window, %err, "SCSI adapter did not come out of reset");
            return 0;
        }
        let mut found = 0;
        for target in 0..self.max_targets {
            let Some(entry) = self.probe_target(bus, target) else {
                continue;
            };
            if let Some(drive) = registry.register(entry) {
                info!(
                    drive = format_args!("{drive:#04x}"),
                    adapter = self.index,
                    target,
                    sectors = entry.sectors,
                    "SCSI disk"
                );
                found += 1;
            }
        }
        found
    }

    fn reset(&mut self, bus: &mut dyn BiosBus, _unit: &DriveEntry) -> Result<(), DriverError> {
        self.reset_adapter(bus)
    }

    fn transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        unit: &DriveEntry,
        xfer: &Transfer,
    ) -> Result<(), DriverError> {
        xfer.check_bounds(unit)?;
        let mut done = 0u32;
        while done < xfer.count {
            let n = MAX_BLOCKS_PER_COMMAND.min(xfer.count - done);
            let lba = u32::try_from(xfer.lba + u64::from(done))
                .map_err(|_| DriverError::OutOfRange)?;
            let addr = xfer.buffer + u64::from(done) * DISK_SECTOR_SIZE as u64;
            let len = n as usize * DISK_SECTOR_SIZE;
            match xfer.op {
                TransferOp::Read => {
                    let cdb = Cdb::read10(lba, n as u16);
                    let data = self.send_command(bus, unit.unit, &cdb, DataPhase::In(len))?;
                    if data.len() < len {
                        return Err(DriverError::Protocol("short SCSI read"));
                    }
                    bus.write_physical(addr, &data);
                }
                TransferOp::Write => {
                    let mut data = vec![0u8; len];
                    bus.read_physical(addr, &mut data);
                    let cdb = Cdb::write10(lba, n as u16);
                    self.send_command(bus, unit.unit, &cdb, DataPhase::Out(&data))?;
                }
                TransferOp::Verify => {
                    let cdb = Cdb::verify10(lba, n as u16);
                    self.send_command(bus, unit.unit, &cdb, DataPhase::None)?;
                }
            }
            done += n;
        }
        Ok(())
    }
}
