//! Polled PIO driver for IDE channels (ATA disks and ATAPI CD-ROMs).
//!
//! Every command follows the same shape: select the unit, wait for `BSY` to clear, program the
//! task file, then move one DRQ block at a time through the data port and read Status to
//! acknowledge completion. Nothing is retried.

pub mod atapi;
pub mod identify;
pub mod regs;

use tracing::{debug, info, warn};

use crate::bus::{BiosBus, MemoryBus};
use crate::config::{IdeChannelPorts, PollBudgets};
use crate::controller::{DiskController, MediaCommand, Transfer, TransferOp};
use crate::error::{DriverError, WaitFor};
use crate::geometry::Chs;
use crate::registry::{AtaCaps, ControllerKind, DriveEntry, DriveRegistry, IoBase};
use crate::scsi::cdb::Cdb;
use crate::{CD_SECTOR_SIZE, DISK_SECTOR_SIZE};

use identify::{IdentifyData, ATAPI_TYPE_CDROM};
use regs::*;

/// Largest LBA28 command.
const MAX_LBA28_SECTORS: u32 = 256;
/// Largest LBA48 command.
const MAX_LBA48_SECTORS: u32 = 65536;
/// First sector that needs LBA48 addressing.
const LBA28_LIMIT: u64 = 1 << 28;
/// CD sectors per ATAPI READ(10).
const MAX_ATAPI_SECTORS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnitSettings {
    class: DeviceClass,
    multiple: u16,
}

/// Register access to one IDE channel for the duration of a command.
pub(crate) struct IdeIo<'a> {
    bus: &'a mut dyn BiosBus,
    ports: IdeChannelPorts,
    polls: PollBudgets,
}

impl<'a> IdeIo<'a> {
    pub(crate) fn new(
        bus: &'a mut dyn BiosBus,
        ports: IdeChannelPorts,
        polls: PollBudgets,
    ) -> Self {
        Self { bus, ports, polls }
    }

    fn read(&mut self, reg: u16) -> u8 {
        self.bus.inb(self.ports.cmd_base + reg)
    }

    fn write(&mut self, reg: u16, val: u8) {
        self.bus.outb(self.ports.cmd_base + reg, val);
    }

    fn write_control(&mut self, ctrl: DeviceControl) {
        self.bus
            .outb(self.ports.ctrl_base + ATA_CTRL_ALT_STATUS_DEVICE_CTRL, ctrl.bits());
    }

    fn raw_alt_status(&mut self) -> u8 {
        self.bus.inb(self.ports.ctrl_base + ATA_CTRL_ALT_STATUS_DEVICE_CTRL)
    }

    /// Read Status, acknowledging any pending interrupt.
    fn status(&mut self) -> AtaStatus {
        AtaStatus::from_bits_retain(self.read(ATA_REG_STATUS_COMMAND))
    }

    /// ~400ns settle time after a select or command write.
    fn settle(&mut self) {
        for _ in 0..4 {
            self.raw_alt_status();
        }
    }

    fn select(&mut self, unit: u8, low_bits: u8) {
        let slave = if unit != 0 { ATA_DEVICE_SLAVE } else { 0 };
        self.write(ATA_REG_DEVICE, ATA_DEVICE_OBS | slave | low_bits);
        self.settle();
    }

    fn poll_not_busy(&mut self, what: WaitFor) -> Result<AtaStatus, DriverError> {
        let budget = if what == WaitFor::ResetComplete {
            self.polls.ata_reset
        } else {
            self.polls.ata_busy
        };
        budget.poll(what, || {
            let raw = self.raw_alt_status();
            if raw == 0xFF {
                return Err(DriverError::NotPresent);
            }
            let status = AtaStatus::from_bits_retain(raw);
            Ok((!status.contains(AtaStatus::BSY)).then_some(status))
        })
    }

    fn wait_not_busy(&mut self) -> Result<AtaStatus, DriverError> {
        self.poll_not_busy(WaitFor::NotBusy)
    }

    /// Abort path: latch the Error register and clear the interrupt line.
    fn fail(&mut self, status: AtaStatus) -> DriverError {
        let error = self.read(ATA_REG_ERROR_FEATURES);
        self.status();
        DriverError::Device {
            status: status.bits(),
            error,
        }
    }

    fn wait_drq(&mut self) -> Result<(), DriverError> {
        let budget = self.polls.ata_drq;
        budget.poll(WaitFor::DataRequest, || {
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
            if !status.contains(AtaStatus::DRQ) {
                self.status();
                return Err(DriverError::Protocol("device did not request data"));
            }
            Ok(Some(()))
        })
    }

    /// Wait for the command to finish and check the final status.
    fn finish(&mut self) -> Result<(), DriverError> {
        self.wait_not_busy()?;
        let status = self.status();
        if status.intersects(AtaStatus::ERR | AtaStatus::DF) {
            return Err(self.fail(status));
        }
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) {
        let port = self.ports.cmd_base + ATA_REG_DATA;
        for pair in buf.chunks_exact_mut(2) {
            pair.copy_from_slice(&self.bus.inw(port).to_le_bytes());
        }
    }

    fn write_data(&mut self, buf: &[u8]) {
        let port = self.ports.cmd_base + ATA_REG_DATA;
        for pair in buf.chunks_exact(2) {
            self.bus.outw(port, u16::from_le_bytes([pair[0], pair[1]]));
        }
    }

    /// Pulse SRST and wait for the channel to come back.
    ///
    /// A floating status register only means device 0 is missing; [`IdeIo::probe`] decides
    /// which units exist.
    fn soft_reset(&mut self) -> Result<(), DriverError> {
        self.write_control(DeviceControl::SRST | DeviceControl::NIEN);
        self.settle();
        self.write_control(DeviceControl::NIEN);
        self.settle();
        match self.poll_not_busy(WaitFor::ResetComplete) {
            Ok(_) | Err(DriverError::NotPresent) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Read a unit's post-reset signature.
    fn probe(&mut self, unit: u8) -> Option<DeviceClass> {
        self.select(unit, 0);
        if self.raw_alt_status() == 0xFF {
            return None;
        }
        self.poll_not_busy(WaitFor::ResetComplete).ok()?;
        DeviceClass::from_signature(
            self.read(ATA_REG_SECTOR_COUNT),
            self.read(ATA_REG_LBA0),
            self.read(ATA_REG_LBA1),
            self.read(ATA_REG_LBA2),
        )
    }

    fn identify(&mut self, unit: u8, class: DeviceClass) -> Result<IdentifyData, DriverError> {
        self.select(unit, 0);
        self.wait_not_busy()?;
        let cmd = match class {
            DeviceClass::Ata => ATA_CMD_IDENTIFY,
            DeviceClass::Atapi => ATA_CMD_IDENTIFY_PACKET_DEVICE,
        };
        self.write(ATA_REG_STATUS_COMMAND, cmd);
        self.settle();
        self.wait_drq()?;
        let mut raw = [0u8; DISK_SECTOR_SIZE];
        self.read_data(&mut raw);
        self.finish()?;
        let mut words = [0u16; 256];
        for (w, pair) in words.iter_mut().zip(raw.chunks_exact(2)) {
            *w = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(IdentifyData::parse(&words))
    }

    fn set_multiple(&mut self, unit: u8, sectors: u16) -> Result<(), DriverError> {
        self.select(unit, 0);
        self.wait_not_busy()?;
        self.write(ATA_REG_SECTOR_COUNT, sectors as u8);
        self.write(ATA_REG_STATUS_COMMAND, ATA_CMD_SET_MULTIPLE_MODE);
        self.settle();
        self.finish()
    }

    /// Issue one READ/WRITE/VERIFY command of at most one command's worth of sectors.
    fn rw_command(
        &mut self,
        entry: &DriveEntry,
        op: TransferOp,
        lba: u64,
        count: u32,
        buffer: u64,
    ) -> Result<(), DriverError> {
        let caps = entry.caps;
        let ext = caps.lba48 && (lba + u64::from(count) > LBA28_LIMIT || count > MAX_LBA28_SECTORS);
        let multiple = caps.multiple > 1 && op != TransferOp::Verify;
        let cmd = match (op, ext, multiple) {
            (TransferOp::Read, false, false) => ATA_CMD_READ_SECTORS,
            (TransferOp::Read, false, true) => ATA_CMD_READ_MULTIPLE,
            (TransferOp::Read, true, false) => ATA_CMD_READ_SECTORS_EXT,
            (TransferOp::Read, true, true) => ATA_CMD_READ_MULTIPLE_EXT,
            (TransferOp::Write, false, false) => ATA_CMD_WRITE_SECTORS,
            (TransferOp::Write, false, true) => ATA_CMD_WRITE_MULTIPLE,
            (TransferOp::Write, true, false) => ATA_CMD_WRITE_SECTORS_EXT,
            (TransferOp::Write, true, true) => ATA_CMD_WRITE_MULTIPLE_EXT,
            (TransferOp::Verify, false, _) => ATA_CMD_READ_VERIFY_SECTORS,
            (TransferOp::Verify, true, _) => ATA_CMD_READ_VERIFY_SECTORS_EXT,
        };

        if ext {
            self.select(entry.unit, ATA_DEVICE_LBA);
            self.wait_not_busy()?;
            // Previous-content (HOB) bytes first, then the low bytes.
            self.write(ATA_REG_SECTOR_COUNT, (count >> 8) as u8);
            self.write(ATA_REG_LBA0, (lba >> 24) as u8);
            self.write(ATA_REG_LBA1, (lba >> 32) as u8);
            self.write(ATA_REG_LBA2, (lba >> 40) as u8);
            self.write(ATA_REG_SECTOR_COUNT, count as u8);
            self.write(ATA_REG_LBA0, lba as u8);
            self.write(ATA_REG_LBA1, (lba >> 8) as u8);
            self.write(ATA_REG_LBA2, (lba >> 16) as u8);
        } else if caps.lba {
            self.select(entry.unit, ATA_DEVICE_LBA | ((lba >> 24) as u8 & 0x0F));
            self.wait_not_busy()?;
            self.write(ATA_REG_SECTOR_COUNT, count as u8);
            self.write(ATA_REG_LBA0, lba as u8);
            self.write(ATA_REG_LBA1, (lba >> 8) as u8);
            self.write(ATA_REG_LBA2, (lba >> 16) as u8);
        } else {
            let native = caps.native_chs.ok_or(DriverError::Unsupported)?;
            let addr = native.from_lba(lba).ok_or(DriverError::OutOfRange)?;
            self.select(entry.unit, addr.head as u8 & 0x0F);
            self.wait_not_busy()?;
            self.write(ATA_REG_SECTOR_COUNT, count as u8);
            self.write(ATA_REG_LBA0, addr.sector as u8);
            self.write(ATA_REG_LBA1, addr.cylinder as u8);
            self.write(ATA_REG_LBA2, (addr.cylinder >> 8) as u8);
        }
        self.write(ATA_REG_STATUS_COMMAND, cmd);
        self.settle();

        let block = if multiple { u32::from(caps.multiple) } else { 1 };
        let mut done = 0u32;
        match op {
            TransferOp::Verify => {}
            TransferOp::Read => {
                while done < count {
                    let n = block.min(count - done);
                    self.wait_drq()?;
                    let mut data = vec![0u8; n as usize * DISK_SECTOR_SIZE];
                    self.read_data(&mut data);
                    self.bus
                        .write_physical(buffer + u64::from(done) * DISK_SECTOR_SIZE as u64, &data);
                    done += n;
                }
            }
            TransferOp::Write => {
                while done < count {
                    let n = block.min(count - done);
                    let mut data = vec![0u8; n as usize * DISK_SECTOR_SIZE];
                    let addr = buffer + u64::from(done) * DISK_SECTOR_SIZE as u64;
                    self.bus.read_physical(addr, &mut data);
                    self.wait_drq()?;
                    self.write_data(&data);
                    done += n;
                }
            }
        }
        self.finish()
    }
}

/// Driver for every configured IDE channel.
#[derive(Debug, Clone)]
pub struct AtaDriver {
    channels: Vec<IdeChannelPorts>,
    units: Vec<[Option<UnitSettings>; 2]>,
    polls: PollBudgets,
    max_multiple: u16,
}

impl AtaDriver {
    pub fn new(channels: &[IdeChannelPorts], polls: PollBudgets, max_multiple: u16) -> Self {
        Self {
            channels: channels.to_vec(),
            units: vec![[None; 2]; channels.len()],
            polls,
            max_multiple,
        }
    }

    fn io<'b>(&self, bus: &'b mut dyn BiosBus, channel: usize) -> Option<IdeIo<'b>> {
        let ports = *self.channels.get(channel)?;
        Some(IdeIo::new(bus, ports, self.polls))
    }

    fn register_ata(
        &mut self,
        io: &mut IdeIo<'_>,
        registry: &mut DriveRegistry,
        channel: usize,
        unit: u8,
    ) -> Option<u8> {
        let id = match io.identify(unit, DeviceClass::Ata) {
            Ok(id) => id,
            Err(err) => {
                warn!(channel, unit, %err, "IDENTIFY failed, unit skipped");
                return None;
            }
        };
        let sectors = id.total_sectors();
        if sectors == 0 {
            warn!(channel, unit, model = %id.model, "disk reports zero capacity, unit skipped");
            return None;
        }

        let mut multiple = id.max_multiple.min(self.max_multiple).max(1);
        if multiple > 1 {
            if let Err(err) = io.set_multiple(unit, multiple) {
                debug!(channel, unit, multiple, %err, "SET MULTIPLE MODE rejected");
                multiple = 1;
            }
        }

        let entry = DriveEntry {
            kind: ControllerKind::Ata,
            controller: 0,
            channel: channel as u8,
            unit,
            io: IoBase::Ide(io.ports),
            sectors,
            sector_size: DISK_SECTOR_SIZE as u16,
            chs: Chs::translate(id.native_chs, sectors),
            removable: id.removable,
            cdrom: false,
            caps: AtaCaps {
                lba: id.lba,
                lba48: id.lba48,
                multiple,
                native_chs: id.native_chs,
                packet_len: 0,
            },
        };
        let drive = registry.register(entry)?;
        self.units[channel][usize::from(unit)] = Some(UnitSettings {
            class: DeviceClass::Ata,
            multiple,
        });
        info!(
            drive = format_args!("{drive:#04x}"),
            channel,
            unit,
            model = %id.model,
            sectors,
            lba48 = id.lba48,
            multiple,
            "ATA disk"
        );
        Some(drive)
    }

    fn register_atapi(
        &mut self,
        io: &mut IdeIo<'_>,
        registry: &mut DriveRegistry,
        channel: usize,
        unit: u8,
    ) -> Option<u8> {
        let id = match io.identify(unit, DeviceClass::Atapi) {
            Ok(id) => id,
            Err(err) => {
                warn!(channel, unit, %err, "IDENTIFY PACKET failed, unit skipped");
                return None;
            }
        };
        if id.device_type != ATAPI_TYPE_CDROM {
            warn!(channel, unit, device_type = id.device_type, "non-CD ATAPI device skipped");
            return None;
        }
        let sectors = match io.read_capacity(unit, id.packet_len) {
            Ok(sectors) => sectors,
            Err(err) => {
                debug!(channel, unit, %err, "no readable medium at detection");
                0
            }
        };

        let entry = DriveEntry {
            kind: ControllerKind::Atapi,
            controller: 0,
            channel: channel as u8,
            unit,
            io: IoBase::Ide(io.ports),
            sectors,
            sector_size: CD_SECTOR_SIZE as u16,
            chs: None,
            removable: true,
            cdrom: true,
            caps: AtaCaps {
                packet_len: id.packet_len,
                multiple: 1,
                ..AtaCaps::default()
            },
        };
        let drive = registry.register(entry)?;
        self.units[channel][usize::from(unit)] = Some(UnitSettings {
            class: DeviceClass::Atapi,
            multiple: 1,
        });
        info!(
            drive = format_args!("{drive:#04x}"),
            channel,
            unit,
            model = %id.model,
            sectors,
            "ATAPI CD-ROM"
        );
        Some(drive)
    }

    fn atapi_transfer(
        &mut self,
        io: &mut IdeIo<'_>,
        entry: &DriveEntry,
        xfer: &Transfer,
    ) -> Result<(), DriverError> {
        if xfer.op == TransferOp::Write {
            return Err(DriverError::WriteProtected);
        }
        let mut done = 0u32;
        while done < xfer.count {
            let n = MAX_ATAPI_SECTORS.min(xfer.count - done);
            let lba = u32::try_from(xfer.lba + u64::from(done))
                .map_err(|_| DriverError::OutOfRange)?;
            let len = n as usize * CD_SECTOR_SIZE;
            let command = Cdb::read10(lba, n as u16);
            let data = io.packet(entry.unit, entry.caps.packet_len, &command, len)?;
            if data.len() < len {
                return Err(DriverError::Protocol("short ATAPI read"));
            }
            if xfer.op == TransferOp::Read {
                io.bus
                    .write_physical(xfer.buffer + u64::from(done) * CD_SECTOR_SIZE as u64, &data);
            }
            done += n;
        }
        Ok(())
    }
}

impl DiskController for AtaDriver {
    fn detect(&mut self, bus: &mut dyn BiosBus, registry: &mut DriveRegistry) -> usize {
        let mut found = 0;
        for channel in 0..self.channels.len() {
            self.units[channel] = [None; 2];
            let Some(mut io) = self.io(bus, channel) else {
                continue;
            };
            if let Err(err) = io.soft_reset() {
                warn!(channel, %err, "IDE channel did not come out of reset");
                continue;
            }
            // Signatures are only valid until the first command, so read both before identifying.
            let classes = [io.probe(0), io.probe(1)];
            for (unit, class) in classes.into_iter().enumerate() {
                let registered = match class {
                    Some(DeviceClass::Ata) => {
                        self.register_ata(&mut io, registry, channel, unit as u8)
                    }
                    Some(DeviceClass::Atapi) => {
                        self.register_atapi(&mut io, registry, channel, unit as u8)
                    }
                    None => None,
                };
                found += usize::from(registered.is_some());
            }
        }
        found
    }

    fn reset(&mut self, bus: &mut dyn BiosBus, unit: &DriveEntry) -> Result<(), DriverError> {
        let channel = usize::from(unit.channel);
        let settings = *self.units.get(channel).ok_or(DriverError::NotPresent)?;
        let mut io = self.io(bus, channel).ok_or(DriverError::NotPresent)?;
        io.soft_reset()?;
        for (idx, settings) in settings.iter().enumerate() {
            let Some(settings) = settings else {
                continue;
            };
            let class = io.probe(idx as u8);
            if class != Some(settings.class) {
                warn!(
                    channel,
                    unit = idx,
                    ?class,
                    expected = ?settings.class,
                    "signature changed across reset"
                );
            }
            if settings.class == DeviceClass::Ata && settings.multiple > 1 {
                io.set_multiple(idx as u8, settings.multiple)?;
            }
        }
        debug!(channel, "IDE channel reset");
        Ok(())
    }

    fn transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        unit: &DriveEntry,
        xfer: &Transfer,
    ) -> Result<(), DriverError> {
        let mut io = self
            .io(bus, usize::from(unit.channel))
            .ok_or(DriverError::NotPresent)?;
        if unit.kind == ControllerKind::Atapi {
            return self.atapi_transfer(&mut io, unit, xfer);
        }

        xfer.check_bounds(unit)?;
        let per_command = if unit.caps.lba48 {
            MAX_LBA48_SECTORS
        } else {
            MAX_LBA28_SECTORS
        };
        let mut done = 0u32;
        while done < xfer.count {
            let n = per_command.min(xfer.count - done);
            let buffer = xfer.buffer + u64::from(done) * DISK_SECTOR_SIZE as u64;
            io.rw_command(unit, xfer.op, xfer.lba + u64::from(done), n, buffer)?;
            done += n;
        }
        Ok(())
    }

    fn media(
        &mut self,
        bus: &mut dyn BiosBus,
        unit: &DriveEntry,
        cmd: MediaCommand,
    ) -> Result<(), DriverError> {
        if unit.kind != ControllerKind::Atapi {
            return Err(DriverError::Unsupported);
        }
        let mut io = self
            .io(bus, usize::from(unit.channel))
            .ok_or(DriverError::NotPresent)?;
        let cdb = match cmd {
            MediaCommand::Lock => Cdb::prevent_removal(true),
            MediaCommand::Unlock => Cdb::prevent_removal(false),
            MediaCommand::Eject => Cdb::eject(),
            MediaCommand::TestUnitReady => Cdb::test_unit_ready(),
        };
        io.packet(unit.unit, unit.caps.packet_len, &cdb, 0).map(|_| ())
    }
}
