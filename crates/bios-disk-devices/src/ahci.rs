//! AHCI HBA model with one ATA disk per port and synchronous command processing.
//!
//! Software writes `PxCI` through [`AhciController::write_u32`]; the owner of guest memory then
//! calls [`AhciController::process`], which walks the command list, moves data through the
//! PRDT and posts a D2H register FIS.

use memory::MemoryBus;
use tracing::{debug, trace};

use crate::ide::{AtaDisk, SECTOR_SIZE};

const HBA_REG_CAP: u64 = 0x00;
const HBA_REG_GHC: u64 = 0x04;
const HBA_REG_IS: u64 = 0x08;
const HBA_REG_PI: u64 = 0x0C;
const HBA_REG_VS: u64 = 0x10;

const PORT_BASE: u64 = 0x100;
const PORT_STRIDE: u64 = 0x80;

const PORT_REG_CLB: u64 = 0x00;
const PORT_REG_CLBU: u64 = 0x04;
const PORT_REG_FB: u64 = 0x08;
const PORT_REG_FBU: u64 = 0x0C;
const PORT_REG_IS: u64 = 0x10;
const PORT_REG_IE: u64 = 0x14;
const PORT_REG_CMD: u64 = 0x18;
const PORT_REG_TFD: u64 = 0x20;
const PORT_REG_SIG: u64 = 0x24;
const PORT_REG_SSTS: u64 = 0x28;
const PORT_REG_SCTL: u64 = 0x2C;
const PORT_REG_SERR: u64 = 0x30;
const PORT_REG_CI: u64 = 0x38;

const GHC_HR: u32 = 1 << 0;
const GHC_AE: u32 = 1 << 31;

const PORT_CMD_ST: u32 = 1 << 0;
const PORT_CMD_FRE: u32 = 1 << 4;
const PORT_CMD_FR: u32 = 1 << 14;
const PORT_CMD_CR: u32 = 1 << 15;

const PORT_IS_DHRS: u32 = 1 << 0;
const PORT_IS_TFES: u32 = 1 << 30;

const SSTS_LINK_UP: u32 = 0x0000_0123;
const SCTL_DET_MASK: u32 = 0xF;
const SIG_ATA: u32 = 0x0000_0101;

const TFD_IDLE: u32 = 0x50;
const TFD_BSY: u32 = 0x80;
const TFD_NO_DEVICE: u32 = 0x7F;
const ATA_STATUS_ERR: u32 = 0x01;
const ATA_ERROR_ABRT: u32 = 0x04;
const ATA_ERROR_IDNF: u32 = 0x10;

const FIS_TYPE_REG_H2D: u8 = 0x27;
const FIS_TYPE_REG_D2H: u8 = 0x34;
const RFIS_OFFSET: u64 = 0x40;
const PRDT_OFFSET: u64 = 0x80;

/// Ways a port can misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhciFault {
    /// `PxCMD.CR`/`FR` stay set after ST/FRE are cleared.
    StuckRunning,
    /// The PHY never reports a device, even after COMRESET.
    NoLink,
    /// `PxTFD.BSY` never clears.
    DeviceBusy,
    /// Issued commands are accepted but never complete.
    HungCommand,
}

#[derive(Debug, Clone)]
struct PortRegs {
    clb: u64,
    fb: u64,
    is: u32,
    ie: u32,
    cmd: u32,
    tfd: u32,
    sctl: u32,
    serr: u32,
    ci: u32,
}

impl PortRegs {
    fn new() -> Self {
        Self {
            clb: 0,
            fb: 0,
            is: 0,
            ie: 0,
            cmd: 0,
            tfd: TFD_NO_DEVICE,
            sctl: 0,
            serr: 0,
            ci: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct AhciPort {
    regs: PortRegs,
    disk: Option<AtaDisk>,
    link_up: bool,
    fault: Option<AhciFault>,
}

impl AhciPort {
    fn new() -> Self {
        Self {
            regs: PortRegs::new(),
            disk: None,
            link_up: false,
            fault: None,
        }
    }

    fn has_link(&self) -> bool {
        self.link_up && self.disk.is_some() && self.fault != Some(AhciFault::NoLink)
    }

    fn update_running_bits(&mut self) {
        if self.fault == Some(AhciFault::StuckRunning) {
            self.regs.cmd |= PORT_CMD_CR | PORT_CMD_FR;
            return;
        }
        self.regs.cmd &= !(PORT_CMD_CR | PORT_CMD_FR);
        if self.regs.cmd & PORT_CMD_ST != 0 {
            self.regs.cmd |= PORT_CMD_CR;
        } else {
            // Stopping the engine discards everything outstanding.
            self.regs.ci = 0;
        }
        if self.regs.cmd & PORT_CMD_FRE != 0 {
            self.regs.cmd |= PORT_CMD_FR;
        }
    }

    /// COMRESET finished: the device reports its signature and becomes idle.
    fn comreset(&mut self) {
        self.link_up = self.disk.is_some();
        self.regs.tfd = if self.disk.is_some() { TFD_IDLE } else { TFD_NO_DEVICE };
    }

    fn read(&self, reg: u64) -> u32 {
        match reg {
            PORT_REG_CLB => self.regs.clb as u32,
            PORT_REG_CLBU => (self.regs.clb >> 32) as u32,
            PORT_REG_FB => self.regs.fb as u32,
            PORT_REG_FBU => (self.regs.fb >> 32) as u32,
            PORT_REG_IS => self.regs.is,
            PORT_REG_IE => self.regs.ie,
            PORT_REG_CMD => self.regs.cmd,
            PORT_REG_TFD if self.fault == Some(AhciFault::DeviceBusy) => TFD_BSY,
            PORT_REG_TFD => self.regs.tfd,
            PORT_REG_SIG if self.has_link() => SIG_ATA,
            PORT_REG_SIG => u32::MAX,
            PORT_REG_SSTS if self.has_link() => SSTS_LINK_UP,
            PORT_REG_SSTS => 0,
            PORT_REG_SCTL => self.regs.sctl,
            PORT_REG_SERR => self.regs.serr,
            PORT_REG_CI => self.regs.ci,
            _ => 0,
        }
    }

    fn write(&mut self, reg: u64, val: u32) {
        match reg {
            PORT_REG_CLB => {
                self.regs.clb = (self.regs.clb & !0xFFFF_FFFF) | u64::from(val & !0x3FF)
            }
            PORT_REG_CLBU => {
                self.regs.clb = (self.regs.clb & 0xFFFF_FFFF) | (u64::from(val) << 32)
            }
            PORT_REG_FB => self.regs.fb = (self.regs.fb & !0xFFFF_FFFF) | u64::from(val & !0xFF),
            PORT_REG_FBU => self.regs.fb = (self.regs.fb & 0xFFFF_FFFF) | (u64::from(val) << 32),
            PORT_REG_IS => self.regs.is &= !val,
            PORT_REG_IE => self.regs.ie = val,
            PORT_REG_CMD => {
                let keep = self.regs.cmd & (PORT_CMD_CR | PORT_CMD_FR);
                self.regs.cmd = (val & !(PORT_CMD_CR | PORT_CMD_FR)) | keep;
                self.update_running_bits();
            }
            PORT_REG_SCTL => {
                let was_comreset = self.regs.sctl & SCTL_DET_MASK == 1;
                self.regs.sctl = val;
                if val & SCTL_DET_MASK == 1 {
                    self.link_up = false;
                } else if was_comreset {
                    self.comreset();
                }
            }
            PORT_REG_SERR => self.regs.serr &= !val,
            PORT_REG_CI => {
                if self.regs.cmd & PORT_CMD_ST != 0 {
                    self.regs.ci |= val;
                }
            }
            _ => {}
        }
    }
}

/// AHCI host bus adapter.
#[derive(Debug, Clone)]
pub struct AhciController {
    ghc: u32,
    ports: Vec<AhciPort>,
}

impl AhciController {
    pub fn new(num_ports: usize) -> Self {
        let num_ports = num_ports.clamp(1, 32);
        Self {
            ghc: 0,
            ports: (0..num_ports).map(|_| AhciPort::new()).collect(),
        }
    }

    /// Attach a disk with its link already established.
    pub fn attach_disk(&mut self, port: usize, disk: AtaDisk) {
        if let Some(p) = self.ports.get_mut(port) {
            p.disk = Some(disk);
            p.comreset();
        }
    }

    /// Drop the link so the firmware has to COMRESET before it sees the disk.
    pub fn drop_link(&mut self, port: usize) {
        if let Some(p) = self.ports.get_mut(port) {
            p.link_up = false;
        }
    }

    pub fn set_fault(&mut self, port: usize, fault: Option<AhciFault>) {
        if let Some(p) = self.ports.get_mut(port) {
            p.fault = fault;
            p.update_running_bits();
        }
    }

    pub fn disk(&self, port: usize) -> Option<&AtaDisk> {
        self.ports.get(port)?.disk.as_ref()
    }

    fn cap(&self) -> u32 {
        // S64A, 32 command slots, NP.
        (1 << 31) | (31 << 8) | (self.ports.len() as u32 - 1)
    }

    fn ports_implemented(&self) -> u32 {
        match self.ports.len() {
            32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }

    pub fn reset(&mut self) {
        self.ghc = 0;
        for port in &mut self.ports {
            let disk = port.disk.take();
            let fault = port.fault;
            *port = AhciPort::new();
            port.disk = disk;
            port.fault = fault;
            port.comreset();
        }
    }

    pub fn read_u32(&mut self, offset: u64) -> u32 {
        match offset {
            HBA_REG_CAP => self.cap(),
            HBA_REG_GHC => self.ghc,
            HBA_REG_IS => self
                .ports
                .iter()
                .enumerate()
                .filter(|(_, p)| p.regs.is != 0)
                .fold(0, |acc, (i, _)| acc | (1 << i)),
            HBA_REG_PI => self.ports_implemented(),
            HBA_REG_VS => 0x0001_0300,
            _ => match decode_port_offset(offset) {
                Some((port, reg)) => self.ports.get(port).map_or(0, |p| p.read(reg)),
                None => 0,
            },
        }
    }

    pub fn write_u32(&mut self, offset: u64, val: u32) {
        match offset {
            HBA_REG_GHC => {
                if val & GHC_HR != 0 {
                    self.reset();
                }
                self.ghc = val & GHC_AE;
            }
            HBA_REG_IS => {
                for (i, port) in self.ports.iter_mut().enumerate() {
                    if val & (1 << i) != 0 {
                        port.regs.is = 0;
                    }
                }
            }
            _ => {
                if let Some((port, reg)) = decode_port_offset(offset) {
                    if let Some(p) = self.ports.get_mut(port) {
                        p.write(reg, val);
                    }
                }
            }
        }
    }

    /// Execute every issued command slot.
    pub fn process(&mut self, mem: &mut dyn MemoryBus) {
        for port in 0..self.ports.len() {
            self.process_port(port, mem);
        }
    }

    fn process_port(&mut self, port: usize, mem: &mut dyn MemoryBus) {
        let p = &mut self.ports[port];
        if p.regs.cmd & PORT_CMD_ST == 0 || p.fault == Some(AhciFault::HungCommand) {
            return;
        }
        for slot in 0..32 {
            if p.regs.ci & (1 << slot) == 0 {
                continue;
            }
            let header = CommandHeader::read(mem, p.regs.clb + slot as u64 * 32);
            let outcome = execute(p.disk.as_mut(), mem, &header);
            trace!(port, slot, ?outcome, "AHCI command");
            match outcome {
                Ok(()) => {
                    p.regs.tfd = TFD_IDLE;
                    p.regs.is |= PORT_IS_DHRS;
                    p.regs.ci &= !(1 << slot);
                }
                Err(error) => {
                    debug!(port, slot, error, "AHCI command aborted");
                    p.regs.tfd = (error << 8) | TFD_IDLE | ATA_STATUS_ERR;
                    p.regs.is |= PORT_IS_TFES;
                }
            }
            if p.regs.cmd & PORT_CMD_FRE != 0 {
                write_d2h_fis(mem, p.regs.fb, p.regs.tfd);
            }
            if p.regs.is & PORT_IS_TFES != 0 {
                // The engine halts on a task-file error until software restarts it.
                break;
            }
        }
    }
}

fn decode_port_offset(offset: u64) -> Option<(usize, u64)> {
    let rel = offset.checked_sub(PORT_BASE)?;
    Some(((rel / PORT_STRIDE) as usize, rel % PORT_STRIDE))
}

#[derive(Debug, Clone, Copy)]
struct CommandHeader {
    write: bool,
    prdtl: u16,
    ctba: u64,
}

impl CommandHeader {
    fn read(mem: &mut dyn MemoryBus, addr: u64) -> Self {
        let dw0 = mem.read_u32(addr);
        let ctba = u64::from(mem.read_u32(addr + 8)) | u64::from(mem.read_u32(addr + 12)) << 32;
        Self {
            write: dw0 & (1 << 6) != 0,
            prdtl: (dw0 >> 16) as u16,
            ctba,
        }
    }

    /// `(address, byte count)` of every PRDT entry.
    fn regions(&self, mem: &mut dyn MemoryBus) -> Vec<(u64, usize)> {
        (0..u64::from(self.prdtl))
            .map(|i| {
                let entry = self.ctba + PRDT_OFFSET + i * 16;
                let dba = u64::from(mem.read_u32(entry)) | u64::from(mem.read_u32(entry + 4)) << 32;
                let dbc = (mem.read_u32(entry + 12) & 0x003F_FFFF) as usize + 1;
                (dba, dbc)
            })
            .collect()
    }
}

/// Run one command; `Err` carries the ATA error register.
fn execute(
    disk: Option<&mut AtaDisk>,
    mem: &mut dyn MemoryBus,
    header: &CommandHeader,
) -> Result<(), u32> {
    let disk = disk.ok_or(ATA_ERROR_ABRT)?;
    let mut cfis = [0u8; 20];
    mem.read_physical(header.ctba, &mut cfis);
    if cfis[0] != FIS_TYPE_REG_H2D {
        return Err(ATA_ERROR_ABRT);
    }
    let lba = u64::from_le_bytes([cfis[4], cfis[5], cfis[6], cfis[8], cfis[9], cfis[10], 0, 0]);
    let count = match u64::from(u16::from_le_bytes([cfis[12], cfis[13]])) {
        0 => 65536,
        n => n,
    };
    let regions = header.regions(mem);
    // DBA bit 0 is reserved; the data base must be word aligned.
    if regions.iter().any(|&(addr, _)| addr & 1 != 0) {
        return Err(ATA_ERROR_ABRT);
    }
    match cfis[2] {
        0xEC => {
            let words = disk.identify_data();
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            scatter(mem, &regions, &bytes);
            Ok(())
        }
        0x25 => {
            let data = disk.disk.read(lba, count).ok_or(ATA_ERROR_IDNF)?;
            scatter(mem, &regions, &data);
            Ok(())
        }
        0x35 if header.write => {
            let mut data = gather(mem, &regions);
            data.resize(count as usize * SECTOR_SIZE, 0);
            disk.disk
                .write(lba, &data)
                .then_some(())
                .ok_or(ATA_ERROR_IDNF)
        }
        0x42 => (lba + count <= disk.disk.sectors())
            .then_some(())
            .ok_or(ATA_ERROR_IDNF),
        _ => Err(ATA_ERROR_ABRT),
    }
}

fn scatter(mem: &mut dyn MemoryBus, regions: &[(u64, usize)], mut data: &[u8]) {
    for &(addr, len) in regions {
        if data.is_empty() {
            break;
        }
        let n = len.min(data.len());
        mem.write_physical(addr, &data[..n]);
        data = &data[n..];
    }
}

fn gather(mem: &mut dyn MemoryBus, regions: &[(u64, usize)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(addr, len) in regions {
        let start = out.len();
        out.resize(start + len, 0);
        mem.read_physical(addr, &mut out[start..]);
    }
    out
}

fn write_d2h_fis(mem: &mut dyn MemoryBus, fb: u64, tfd: u32) {
    let mut fis = [0u8; 20];
    fis[0] = FIS_TYPE_REG_D2H;
    fis[2] = tfd as u8;
    fis[3] = (tfd >> 8) as u8;
    mem.write_physical(fb + RFIS_OFFSET, &fis);
}
