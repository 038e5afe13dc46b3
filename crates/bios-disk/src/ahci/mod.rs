//! Polled AHCI driver.
//!
//! The HBA is switched into AHCI mode, every implemented port gets a command list, a received-FIS
//! area and one command table carved out of the DMA window, and ATA commands are issued through
//! command slot 0 only. Completion is detected by polling `PxCI`.

pub mod port;
pub(crate) mod regs;

use tracing::{debug, info, warn};

use crate::ata::identify::IdentifyData;
use crate::bus::{BiosBus, MemoryBus};
use crate::config::PollBudgets;
use crate::controller::{DiskController, Transfer, TransferOp};
use crate::dma::DmaWindow;
use crate::error::{DriverError, WaitFor};
use crate::geometry::Chs;
use crate::registry::{AtaCaps, ControllerKind, DriveEntry, DriveRegistry, IoBase};
use crate::DISK_SECTOR_SIZE;

pub use port::PortMemory;
use port::{build_command, max_sectors_per_command, DataRegion, H2dFis};
use regs::*;

const ATA_DEVICE_LBA: u8 = 0x40;
const MAX_PORTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    /// `portInit` succeeded; commands may be issued.
    Ready(PortMemory),
    /// `portInit` failed; the port is never touched again this session.
    Abandoned,
}

/// One AHCI host bus adapter.
#[derive(Debug, Clone)]
pub struct AhciHba {
    index: usize,
    abar: u64,
    polls: PollBudgets,
    ports: Vec<Option<PortState>>,
    memory: Vec<Option<PortMemory>>,
}

impl AhciHba {
    /// `hbaInit`: enable AHCI mode and initialize every implemented port.
    pub fn init(
        bus: &mut dyn BiosBus,
        index: usize,
        abar: u64,
        window: &mut DmaWindow,
        polls: PollBudgets,
    ) -> Self {
        let cap = bus.mmio_read32(abar + HBA_REG_CAP);
        let pi = bus.mmio_read32(abar + HBA_REG_PI);
        let vs = bus.mmio_read32(abar + HBA_REG_VS);
        let ghc = bus.mmio_read32(abar + HBA_REG_GHC);
        bus.mmio_write32(abar + HBA_REG_GHC, ghc | GHC_AE);

        // PI may list fewer ports than CAP.NP reports, never more.
        let slots = (32 - pi.leading_zeros()).max(cap_port_count(cap)) as usize;
        let slots = slots.min(MAX_PORTS);
        debug!(
            abar = format_args!("{abar:#x}"),
            cap = format_args!("{cap:#010x}"),
            pi = format_args!("{pi:#010x}"),
            version = format_args!("{vs:#010x}"),
            "AHCI HBA"
        );

        let mut hba = Self {
            index,
            abar,
            polls,
            ports: vec![None; slots],
            memory: vec![None; slots],
        };
        for port in (0..slots).filter(|p| pi & (1 << p) != 0) {
            let Some(mem) = PortMemory::alloc(bus, window) else {
                warn!(port, "AHCI DMA window exhausted, port skipped");
                hba.ports[port] = Some(PortState::Abandoned);
                continue;
            };
            hba.memory[port] = Some(mem);
            if let Err(err) = hba.port_init(bus, port) {
                warn!(abar = format_args!("{abar:#x}"), port, %err, "AHCI port abandoned");
            }
        }
        hba
    }

    pub fn abar(&self) -> u64 {
        self.abar
    }

    /// Whether `port` finished `portInit` and accepts commands.
    pub fn port_ready(&self, port: usize) -> bool {
        matches!(self.ports.get(port), Some(Some(PortState::Ready(_))))
    }

    fn reg(&self, port: usize, reg: u64) -> u64 {
        port_reg(self.abar, port, reg)
    }

    fn ready_memory(&self, port: usize) -> Result<PortMemory, DriverError> {
        match self.ports.get(port) {
            Some(Some(PortState::Ready(mem))) => Ok(*mem),
            _ => Err(DriverError::NotPresent),
        }
    }

    /// Clear ST then FRE, waiting for the engine and FIS receive to stop.
    fn stop_port(&self, bus: &mut dyn BiosBus, port: usize) -> Result<(), DriverError> {
        let cmd_reg = self.reg(port, PORT_REG_CMD);
        let cmd = bus.mmio_read32(cmd_reg);
        bus.mmio_write32(cmd_reg, cmd & !PORT_CMD_ST);
        self.polls
            .ahci_port_stop
            .wait_until(WaitFor::PortStop, || bus.mmio_read32(cmd_reg) & PORT_CMD_CR == 0)?;

        let cmd = bus.mmio_read32(cmd_reg);
        bus.mmio_write32(cmd_reg, cmd & !PORT_CMD_FRE);
        self.polls
            .ahci_port_stop
            .wait_until(WaitFor::PortStop, || bus.mmio_read32(cmd_reg) & PORT_CMD_FR == 0)
    }

    fn start_port(&self, bus: &mut dyn BiosBus, port: usize) {
        let cmd_reg = self.reg(port, PORT_REG_CMD);
        let cmd = bus.mmio_read32(cmd_reg) | PORT_CMD_FRE;
        bus.mmio_write32(cmd_reg, cmd);
        bus.mmio_write32(cmd_reg, cmd | PORT_CMD_ST);
    }

    /// `portInit`: stop the port, point it at its memory and restart it with interrupts masked.
    ///
    /// A port that won't stop is abandoned and reported as [`WaitFor::PortStop`].
    pub fn port_init(&mut self, bus: &mut dyn BiosBus, port: usize) -> Result<(), DriverError> {
        let mem = self
            .memory
            .get(port)
            .copied()
            .flatten()
            .ok_or(DriverError::NotPresent)?;
        if let Err(err) = self.stop_port(bus, port) {
            self.ports[port] = Some(PortState::Abandoned);
            return Err(err);
        }

        bus.mmio_write32(self.reg(port, PORT_REG_CLB), mem.clb as u32);
        bus.mmio_write32(self.reg(port, PORT_REG_CLBU), (mem.clb >> 32) as u32);
        bus.mmio_write32(self.reg(port, PORT_REG_FB), mem.fb as u32);
        bus.mmio_write32(self.reg(port, PORT_REG_FBU), (mem.fb >> 32) as u32);
        bus.mmio_write32(self.reg(port, PORT_REG_SERR), u32::MAX);
        bus.mmio_write32(self.reg(port, PORT_REG_IS), u32::MAX);
        bus.mmio_write32(self.reg(port, PORT_REG_IE), 0);
        self.start_port(bus, port);

        self.ports[port] = Some(PortState::Ready(mem));
        Ok(())
    }

    /// `portDeinit`: stop the port and detach its memory.
    pub fn port_deinit(&mut self, bus: &mut dyn BiosBus, port: usize) -> Result<(), DriverError> {
        if !self.port_ready(port) {
            return Ok(());
        }
        self.ports[port] = None;
        self.stop_port(bus, port)?;
        for reg in [PORT_REG_CLB, PORT_REG_CLBU, PORT_REG_FB, PORT_REG_FBU] {
            bus.mmio_write32(self.reg(port, reg), 0);
        }
        Ok(())
    }

    /// Deinitialize every ready port.
    pub fn shutdown(&mut self, bus: &mut dyn BiosBus) {
        for port in 0..self.ports.len() {
            if let Err(err) = self.port_deinit(bus, port) {
                warn!(port, %err, "AHCI port did not stop");
            }
        }
    }

    /// Stop/start cycle that drops whatever was in flight and clears error state.
    fn recover_port(&self, bus: &mut dyn BiosBus, port: usize) {
        if let Err(err) = self.stop_port(bus, port) {
            warn!(port, %err, "AHCI port did not stop during recovery");
        }
        bus.mmio_write32(self.reg(port, PORT_REG_SERR), u32::MAX);
        bus.mmio_write32(self.reg(port, PORT_REG_IS), u32::MAX);
        self.start_port(bus, port);
    }

    /// `cmdSubmit`: issue one command through slot 0 and poll it to completion.
    fn submit(
        &self,
        bus: &mut dyn BiosBus,
        port: usize,
        fis: &H2dFis,
        data: Option<DataRegion>,
    ) -> Result<(), DriverError> {
        let mem = self.ready_memory(port)?;
        build_command(bus, &mem, fis, data)?;

        let tfd_reg = self.reg(port, PORT_REG_TFD);
        let is_reg = self.reg(port, PORT_REG_IS);
        let ci_reg = self.reg(port, PORT_REG_CI);
        self.polls.ahci_device_ready.wait_until(WaitFor::DeviceReady, || {
            bus.mmio_read32(tfd_reg) & (TFD_STS_BSY | TFD_STS_DRQ) == 0
        })?;

        bus.mmio_write32(is_reg, u32::MAX);
        bus.mmio_write32(ci_reg, 1);

        let outcome = self.polls.ahci_command.poll(WaitFor::CommandComplete, || {
            let is = bus.mmio_read32(is_reg);
            let tfd = bus.mmio_read32(tfd_reg);
            if is & PORT_IS_TFES != 0 || (tfd & TFD_STS_ERR != 0 && tfd & TFD_STS_BSY == 0) {
                return Err(DriverError::Device {
                    status: tfd as u8,
                    error: (tfd >> 8) as u8,
                });
            }
            Ok((bus.mmio_read32(ci_reg) & 1 == 0).then_some(()))
        });
        if let Err(err) = outcome {
            debug!(port, command = fis.command, %err, "AHCI command failed");
            self.recover_port(bus, port);
            return Err(err);
        }
        Ok(())
    }

    fn link_up(&self, bus: &mut dyn BiosBus, port: usize) -> bool {
        bus.mmio_read32(self.reg(port, PORT_REG_SSTS)) & SSTS_DET_MASK == SSTS_DET_PRESENT
    }

    /// `portDetectDevice`: bring the link up and identify an ATA device.
    fn detect_device(&self, bus: &mut dyn BiosBus, port: usize) -> Option<IdentifyData> {
        let ssts_reg = self.reg(port, PORT_REG_SSTS);
        if !self.link_up(bus, port) {
            let sctl_reg = self.reg(port, PORT_REG_SCTL);
            let sctl = bus.mmio_read32(sctl_reg) & !SSTS_DET_MASK;
            bus.mmio_write32(sctl_reg, sctl | SCTL_DET_COMRESET);
            // COMRESET must be held for at least 1ms; a few register reads stand in for it.
            for _ in 0..8 {
                bus.mmio_read32(ssts_reg);
            }
            bus.mmio_write32(sctl_reg, sctl);
            if self
                .polls
                .ahci_link
                .wait_until(WaitFor::LinkUp, || self.link_up(bus, port))
                .is_err()
            {
                debug!(port, "no SATA link");
                return None;
            }
        }
        bus.mmio_write32(self.reg(port, PORT_REG_SERR), u32::MAX);

        let tfd_reg = self.reg(port, PORT_REG_TFD);
        if let Err(err) = self.polls.ahci_device_ready.wait_until(WaitFor::DeviceReady, || {
            bus.mmio_read32(tfd_reg) & (TFD_STS_BSY | TFD_STS_DRQ) == 0
        }) {
            warn!(port, %err, "SATA device never became ready");
            return None;
        }

        match bus.mmio_read32(self.reg(port, PORT_REG_SIG)) {
            SATA_SIG_ATA => {}
            sig @ (SATA_SIG_ATAPI | SATA_SIG_PM | SATA_SIG_SEMB) => {
                info!(port, sig = format_args!("{sig:#010x}"), "unsupported SATA device skipped");
                return None;
            }
            sig => {
                warn!(port, sig = format_args!("{sig:#010x}"), "unknown SATA signature");
                return None;
            }
        }

        let mem = self.ready_memory(port).ok()?;
        let fis = H2dFis {
            command: ATA_CMD_IDENTIFY,
            lba: 0,
            count: 0,
            device: 0,
        };
        let region = DataRegion {
            addr: mem.bounce,
            len: DISK_SECTOR_SIZE as u64,
            write: false,
        };
        if let Err(err) = self.submit(bus, port, &fis, Some(region)) {
            warn!(port, %err, "IDENTIFY failed");
            return None;
        }
        let mut words = [0u16; 256];
        for (i, w) in words.iter_mut().enumerate() {
            *w = bus.read_u16(mem.bounce + 2 * i as u64);
        }
        Some(IdentifyData::parse(&words))
    }

    /// Move one sector per command through the port's bounce buffer; PRDT data bases can't be
    /// odd.
    fn transfer_bounced(
        &self,
        bus: &mut dyn BiosBus,
        port: usize,
        command: u8,
        xfer: &Transfer,
    ) -> Result<(), DriverError> {
        let mem = self.ready_memory(port)?;
        let write = xfer.op == TransferOp::Write;
        let mut sector = [0u8; DISK_SECTOR_SIZE];
        for i in 0..xfer.count {
            let guest = xfer.buffer + u64::from(i) * DISK_SECTOR_SIZE as u64;
            if write {
                bus.read_physical(guest, &mut sector);
                bus.write_physical(mem.bounce, &sector);
            }
            let fis = H2dFis {
                command,
                lba: xfer.lba + u64::from(i),
                count: 1,
                device: ATA_DEVICE_LBA,
            };
            let region = DataRegion {
                addr: mem.bounce,
                len: DISK_SECTOR_SIZE as u64,
                write,
            };
            self.submit(bus, port, &fis, Some(region))?;
            if !write {
                bus.read_physical(mem.bounce, &mut sector);
                bus.write_physical(guest, &sector);
            }
        }
        Ok(())
    }
}

impl DiskController for AhciHba {
    fn detect(&mut self, bus: &mut dyn BiosBus, registry: &mut DriveRegistry) -> usize {
        let mut found = 0;
        for port in 0..self.ports.len() {
            if !self.port_ready(port) {
                continue;
            }
            let Some(id) = self.detect_device(bus, port) else {
                continue;
            };
            let sectors = id.total_sectors();
            if sectors == 0 || !id.lba48 {
                warn!(port, model = %id.model, lba48 = id.lba48, "SATA disk unusable, skipped");
                continue;
            }
            let entry = DriveEntry {
                kind: ControllerKind::Ahci,
                controller: self.index,
                channel: port as u8,
                unit: 0,
                io: IoBase::Ahci {
                    abar: self.abar,
                    port_regs: self.reg(port, 0),
                },
                sectors,
                sector_size: DISK_SECTOR_SIZE as u16,
                chs: Chs::translate(id.native_chs, sectors),
                removable: id.removable,
                cdrom: false,
                caps: AtaCaps {
                    lba: true,
                    lba48: true,
                    multiple: 1,
                    native_chs: id.native_chs,
                    packet_len: 0,
                },
            };
            if let Some(drive) = registry.register(entry) {
                info!(
                    drive = format_args!("{drive:#04x}"),
                    abar = format_args!("{:#x}", self.abar),
                    port,
                    model = %id.model,
                    sectors,
                    "SATA disk"
                );
                found += 1;
            }
        }
        found
    }

    fn reset(&mut self, bus: &mut dyn BiosBus, unit: &DriveEntry) -> Result<(), DriverError> {
        let port = usize::from(unit.channel);
        self.ready_memory(port)?;
        self.recover_port(bus, port);
        Ok(())
    }

    fn transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        unit: &DriveEntry,
        xfer: &Transfer,
    ) -> Result<(), DriverError> {
        xfer.check_bounds(unit)?;
        let port = usize::from(unit.channel);
        let per_command = max_sectors_per_command(DISK_SECTOR_SIZE as u64).min(65536) as u32;
        let command = match xfer.op {
            TransferOp::Read => ATA_CMD_READ_DMA_EXT,
            TransferOp::Write => ATA_CMD_WRITE_DMA_EXT,
            TransferOp::Verify => ATA_CMD_READ_VERIFY_SECTORS_EXT,
        };
        if xfer.op != TransferOp::Verify && xfer.buffer & 1 != 0 {
            return self.transfer_bounced(bus, port, command, xfer);
        }
        let mut done = 0u32;
        while done < xfer.count {
            let n = per_command.min(xfer.count - done);
            let fis = H2dFis {
                command,
                lba: xfer.lba + u64::from(done),
                count: n as u16,
                device: ATA_DEVICE_LBA,
            };
            let data = (xfer.op != TransferOp::Verify).then(|| DataRegion {
                addr: xfer.buffer + u64::from(done) * DISK_SECTOR_SIZE as u64,
                len: u64::from(n) * DISK_SECTOR_SIZE as u64,
                write: xfer.op == TransferOp::Write,
            });
            self.submit(bus, port, &fis, data)?;
            done += n;
        }
        Ok(())
    }
}
