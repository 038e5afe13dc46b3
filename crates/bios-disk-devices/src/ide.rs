//! Legacy IDE channel model: one command block, one control block, master and slave slots.
//!
//! Only PIO is modelled. Status and Alternate Status read the same value and there is no
//! interrupt line; the BIOS driver polls.

use tracing::trace;

use crate::atapi::{write_ata_string, AtapiCdrom, PacketResult};
use crate::disk::MemDisk;

pub const SECTOR_SIZE: usize = 512;

const REG_DATA: u16 = 0;
const REG_ERROR_FEATURES: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA0: u16 = 3;
const REG_LBA1: u16 = 4;
const REG_LBA2: u16 = 5;
const REG_DEVICE: u16 = 6;
const REG_STATUS_COMMAND: u16 = 7;

const STATUS_BSY: u8 = 0x80;
const STATUS_DRDY: u8 = 0x40;
const STATUS_DSC: u8 = 0x10;
const STATUS_DRQ: u8 = 0x08;
const STATUS_ERR: u8 = 0x01;

const ERROR_ABRT: u8 = 0x04;
const ERROR_IDNF: u8 = 0x10;

const CTRL_SRST: u8 = 0x04;

/// ATAPI interrupt reasons.
const REASON_COMMAND: u8 = 0x01;
const REASON_DATA_IN: u8 = 0x02;
const REASON_STATUS: u8 = 0x03;

/// An ATA hard disk attached to an IDE slot.
#[derive(Debug, Clone)]
pub struct AtaDisk {
    pub disk: MemDisk,
    pub lba: bool,
    pub lba48: bool,
    /// Native cylinders/heads/sectors reported in IDENTIFY words 1/3/6.
    pub chs: (u16, u16, u16),
    pub max_multiple: u16,
}

impl AtaDisk {
    /// LBA48-capable disk of `sectors` 512-byte sectors.
    pub fn new(sectors: u64) -> Self {
        let cylinders = (sectors / (16 * 63)).clamp(1, 16383) as u16;
        Self {
            disk: MemDisk::new(sectors, SECTOR_SIZE),
            lba: true,
            lba48: true,
            chs: (cylinders, 16, 63),
            max_multiple: 16,
        }
    }

    /// Old disk that only understands CHS addressing.
    pub fn chs_only(cylinders: u16, heads: u16, sectors_per_track: u16) -> Self {
        let total = u64::from(cylinders) * u64::from(heads) * u64::from(sectors_per_track);
        Self {
            disk: MemDisk::new(total, SECTOR_SIZE),
            lba: false,
            lba48: false,
            chs: (cylinders, heads, sectors_per_track),
            max_multiple: 0,
        }
    }

    pub fn without_lba48(mut self) -> Self {
        self.lba48 = false;
        self
    }

    pub fn with_max_multiple(mut self, sectors: u16) -> Self {
        self.max_multiple = sectors;
        self
    }

    pub fn identify_data(&self) -> [u16; 256] {
        let mut words = [0u16; 256];
        words[0] = 0x0040;
        words[1] = self.chs.0;
        words[3] = self.chs.1;
        words[6] = self.chs.2;
        write_ata_string(&mut words[27..47], "BIOS-DISK ATA DISK");
        if self.max_multiple > 0 {
            words[47] = 0x8000 | (self.max_multiple & 0xFF);
        }
        let sectors = self.disk.sectors();
        if self.lba {
            words[49] = 1 << 9;
            let lba28 = sectors.min(0x0FFF_FFFF) as u32;
            words[60] = lba28 as u16;
            words[61] = (lba28 >> 16) as u16;
        }
        if self.lba48 {
            words[83] = (1 << 14) | (1 << 10);
            for i in 0..4 {
                words[100 + i] = (sectors >> (16 * i)) as u16;
            }
        }
        words
    }

    fn address_chs(&self, cylinder: u64, head: u64, sector: u64) -> Option<u64> {
        let (_, heads, spt) = self.chs;
        let (heads, spt) = (u64::from(heads), u64::from(spt));
        if sector == 0 || sector > spt || head >= heads {
            return None;
        }
        Some((cylinder * heads + head) * spt + sector - 1)
    }
}

#[derive(Debug, Clone)]
enum IdeDevice {
    Ata(AtaDisk),
    Atapi(AtapiCdrom),
}

/// Shadow registers with the LBA48 "previous content" FIFO.
#[derive(Debug, Clone, Default)]
struct TaskFile {
    features: u8,
    sector_count: u8,
    lba0: u8,
    lba1: u8,
    lba2: u8,
    device: u8,
    hob_sector_count: u8,
    hob_lba0: u8,
    hob_lba1: u8,
    hob_lba2: u8,
}

impl TaskFile {
    fn write_reg(&mut self, reg: u16, val: u8) {
        let (low, hob) = match reg {
            REG_ERROR_FEATURES => {
                self.features = val;
                return;
            }
            REG_SECTOR_COUNT => (&mut self.sector_count, &mut self.hob_sector_count),
            REG_LBA0 => (&mut self.lba0, &mut self.hob_lba0),
            REG_LBA1 => (&mut self.lba1, &mut self.hob_lba1),
            REG_LBA2 => (&mut self.lba2, &mut self.hob_lba2),
            _ => return,
        };
        *hob = *low;
        *low = val;
    }

    fn reg(&self, reg: u16) -> u8 {
        match reg {
            REG_SECTOR_COUNT => self.sector_count,
            REG_LBA0 => self.lba0,
            REG_LBA1 => self.lba1,
            REG_LBA2 => self.lba2,
            REG_DEVICE => self.device,
            _ => 0,
        }
    }

    fn lba28(&self) -> u64 {
        u64::from(self.device & 0x0F) << 24
            | u64::from(self.lba2) << 16
            | u64::from(self.lba1) << 8
            | u64::from(self.lba0)
    }

    fn lba48(&self) -> u64 {
        u64::from(self.hob_lba2) << 40
            | u64::from(self.hob_lba1) << 32
            | u64::from(self.hob_lba0) << 24
            | u64::from(self.lba2) << 16
            | u64::from(self.lba1) << 8
            | u64::from(self.lba0)
    }

    fn sector_count28(&self) -> u64 {
        match self.sector_count {
            0 => 256,
            n => u64::from(n),
        }
    }

    fn sector_count48(&self) -> u64 {
        match u64::from(self.hob_sector_count) << 8 | u64::from(self.sector_count) {
            0 => 65536,
            n => n,
        }
    }

    fn set_signature(&mut self, atapi: bool) {
        self.sector_count = 1;
        self.lba0 = 1;
        (self.lba1, self.lba2) = if atapi { (0x14, 0xEB) } else { (0, 0) };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Device to host; `rest` holds ATAPI data beyond the current byte-count chunk.
    PioIn { rest: Vec<u8> },
    /// Host to device, committed at `lba` once the buffer fills.
    PioOut { lba: u64 },
    Packet,
}

/// One IDE channel.
#[derive(Debug, Clone)]
pub struct IdeChannel {
    cmd_base: u16,
    ctrl_base: u16,
    devices: [Option<IdeDevice>; 2],
    multiple: [u16; 2],
    tf: TaskFile,
    status: u8,
    error: u8,
    control: u8,
    phase: Phase,
    data: Vec<u8>,
    index: usize,
    /// Devices whose signature has not yet been overwritten by a command.
    signature: [bool; 2],
    stuck_busy: bool,
}

impl IdeChannel {
    pub fn new(cmd_base: u16, ctrl_base: u16) -> Self {
        Self {
            cmd_base,
            ctrl_base,
            devices: [None, None],
            multiple: [0; 2],
            tf: TaskFile::default(),
            status: STATUS_DRDY | STATUS_DSC,
            error: 0x01,
            control: 0,
            phase: Phase::Idle,
            data: Vec::new(),
            index: 0,
            signature: [true; 2],
            stuck_busy: false,
        }
    }

    pub fn attach_master_ata(&mut self, disk: AtaDisk) {
        self.devices[0] = Some(IdeDevice::Ata(disk));
    }

    pub fn attach_slave_ata(&mut self, disk: AtaDisk) {
        self.devices[1] = Some(IdeDevice::Ata(disk));
    }

    pub fn attach_master_atapi(&mut self, cd: AtapiCdrom) {
        self.devices[0] = Some(IdeDevice::Atapi(cd));
    }

    pub fn attach_slave_atapi(&mut self, cd: AtapiCdrom) {
        self.devices[1] = Some(IdeDevice::Atapi(cd));
    }

    pub fn ata_disk(&self, unit: usize) -> Option<&AtaDisk> {
        match self.devices.get(unit)? {
            Some(IdeDevice::Ata(disk)) => Some(disk),
            _ => None,
        }
    }

    pub fn atapi(&self, unit: usize) -> Option<&AtapiCdrom> {
        match self.devices.get(unit)? {
            Some(IdeDevice::Atapi(cd)) => Some(cd),
            _ => None,
        }
    }

    pub fn atapi_mut(&mut self, unit: usize) -> Option<&mut AtapiCdrom> {
        match self.devices.get_mut(unit)? {
            Some(IdeDevice::Atapi(cd)) => Some(cd),
            _ => None,
        }
    }

    /// Keep BSY set forever, as a wedged drive would.
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    pub fn cmd_base(&self) -> u16 {
        self.cmd_base
    }

    pub fn ctrl_base(&self) -> u16 {
        self.ctrl_base
    }

    /// Whether `port` belongs to this channel.
    pub fn decodes(&self, port: u16) -> bool {
        (self.cmd_base..self.cmd_base + 8).contains(&port) || port == self.ctrl_base
    }

    fn selected(&self) -> usize {
        usize::from((self.tf.device >> 4) & 1)
    }

    fn present(&self) -> bool {
        self.devices[self.selected()].is_some()
    }

    pub fn io_read(&mut self, port: u16, size: u8) -> u32 {
        if self.devices.iter().all(Option::is_none) {
            return if size == 2 { 0xFFFF } else { 0xFF };
        }
        if port == self.ctrl_base {
            return u32::from(self.read_status());
        }
        let reg = port.wrapping_sub(self.cmd_base);
        if reg == REG_DATA {
            return if size == 2 {
                u32::from(self.data_in_u16())
            } else {
                u32::from(self.data_in_u8())
            };
        }
        if !self.present() && reg != REG_DEVICE {
            return 0xFF;
        }
        u32::from(match reg {
            REG_ERROR_FEATURES => self.error,
            REG_STATUS_COMMAND => self.read_status(),
            other => self.tf.reg(other),
        })
    }

    pub fn io_write(&mut self, port: u16, size: u8, val: u32) {
        if port == self.ctrl_base {
            self.write_control(val as u8);
            return;
        }
        let reg = port.wrapping_sub(self.cmd_base);
        match reg {
            REG_DATA => {
                if size == 2 {
                    self.data_out(&(val as u16).to_le_bytes());
                } else {
                    self.data_out(&[val as u8]);
                }
            }
            REG_DEVICE => self.select(val as u8),
            REG_STATUS_COMMAND => self.command(val as u8),
            _ => self.tf.write_reg(reg, val as u8),
        }
    }

    fn read_status(&self) -> u8 {
        if !self.present() {
            0xFF
        } else if self.stuck_busy || self.control & CTRL_SRST != 0 {
            STATUS_BSY
        } else {
            self.status
        }
    }

    fn select(&mut self, val: u8) {
        self.tf.device = val;
        let unit = self.selected();
        if self.signature[unit] {
            let atapi = matches!(self.devices[unit], Some(IdeDevice::Atapi(_)));
            self.tf.set_signature(atapi);
        }
    }

    fn write_control(&mut self, val: u8) {
        let was_reset = self.control & CTRL_SRST != 0;
        self.control = val;
        if was_reset && val & CTRL_SRST == 0 {
            self.reset();
        }
    }

    fn reset(&mut self) {
        trace!(cmd_base = self.cmd_base, "IDE soft reset");
        self.phase = Phase::Idle;
        self.data.clear();
        self.index = 0;
        self.error = 0x01;
        self.status = STATUS_DRDY | STATUS_DSC;
        self.multiple = [0; 2];
        self.signature = [true; 2];
        self.tf.device = 0;
        self.select(0);
    }

    fn complete(&mut self) {
        self.phase = Phase::Idle;
        self.data.clear();
        self.index = 0;
        self.error = 0;
        self.status = STATUS_DRDY | STATUS_DSC;
    }

    fn abort(&mut self, error: u8) {
        self.complete();
        self.error = error;
        self.status |= STATUS_ERR;
    }

    fn begin_in(&mut self, data: Vec<u8>) {
        self.data = data;
        self.index = 0;
        self.phase = Phase::PioIn { rest: Vec::new() };
        self.error = 0;
        self.status = STATUS_DRDY | STATUS_DSC | STATUS_DRQ;
    }

    fn begin_out(&mut self, len: usize, phase: Phase) {
        self.data = vec![0; len];
        self.index = 0;
        self.phase = phase;
        self.error = 0;
        self.status = STATUS_DRDY | STATUS_DSC | STATUS_DRQ;
    }

    fn command(&mut self, cmd: u8) {
        let unit = self.selected();
        if self.devices[unit].is_none() {
            return;
        }
        self.signature[unit] = false;
        // Only the EXT commands consume the previous-content bytes.
        let ext = matches!(cmd, 0x24 | 0x29 | 0x34 | 0x39 | 0x42);
        if !ext {
            self.tf.hob_sector_count = 0;
            self.tf.hob_lba0 = 0;
            self.tf.hob_lba1 = 0;
            self.tf.hob_lba2 = 0;
        }
        trace!(cmd_base = self.cmd_base, unit, cmd, "IDE command");

        let is_atapi = matches!(self.devices[unit], Some(IdeDevice::Atapi(_)));
        match (cmd, is_atapi) {
            (0xEC, false) => {
                if let Some(IdeDevice::Ata(disk)) = &self.devices[unit] {
                    let words = disk.identify_data();
                    self.begin_in(words_to_bytes(&words));
                }
            }
            (0xA1, true) => {
                if let Some(IdeDevice::Atapi(cd)) = &self.devices[unit] {
                    let words = cd.identify_packet_data();
                    self.begin_in(words_to_bytes(&words));
                }
            }
            (0xEC, true) => {
                self.tf.set_signature(true);
                self.abort(ERROR_ABRT);
            }
            (0xA0, true) => {
                self.tf.sector_count = REASON_COMMAND;
                self.begin_out(12, Phase::Packet);
            }
            (0xC6, false) => self.set_multiple(unit),
            (_, false) => self.ata_rw(unit, cmd),
            _ => self.abort(ERROR_ABRT),
        }
    }

    fn set_multiple(&mut self, unit: usize) {
        let Some(IdeDevice::Ata(disk)) = &self.devices[unit] else {
            return;
        };
        let count = u16::from(self.tf.sector_count);
        if count != 0 && (count > disk.max_multiple || !count.is_power_of_two()) {
            self.abort(ERROR_ABRT);
            return;
        }
        self.multiple[unit] = count;
        self.complete();
    }

    fn ata_rw(&mut self, unit: usize, cmd: u8) {
        let Some(IdeDevice::Ata(disk)) = &self.devices[unit] else {
            return;
        };
        let (ext, multiple) = match cmd {
            0x20 | 0x30 | 0x40 => (false, false),
            0xC4 | 0xC5 => (false, true),
            0x24 | 0x34 | 0x42 => (true, false),
            0x29 | 0x39 => (true, true),
            _ => {
                self.abort(ERROR_ABRT);
                return;
            }
        };
        if (multiple && self.multiple[unit] == 0) || (ext && !disk.lba48) {
            self.abort(ERROR_ABRT);
            return;
        }
        let (lba, count) = if ext {
            (Some(self.tf.lba48()), self.tf.sector_count48())
        } else if self.tf.device & 0x40 != 0 {
            (disk.lba.then(|| self.tf.lba28()), self.tf.sector_count28())
        } else {
            let cylinder = u64::from(self.tf.lba2) << 8 | u64::from(self.tf.lba1);
            let head = u64::from(self.tf.device & 0x0F);
            let addr = disk.address_chs(cylinder, head, u64::from(self.tf.lba0));
            (addr, self.tf.sector_count28())
        };
        let Some(lba) = lba.filter(|lba| lba + count <= disk.disk.sectors()) else {
            self.abort(ERROR_IDNF | ERROR_ABRT);
            return;
        };

        match cmd {
            0x20 | 0xC4 | 0x24 | 0x29 => match disk.disk.read(lba, count) {
                Some(data) => self.begin_in(data),
                None => self.abort(ERROR_IDNF),
            },
            0x30 | 0xC5 | 0x34 | 0x39 => {
                self.begin_out(count as usize * SECTOR_SIZE, Phase::PioOut { lba })
            }
            _ => self.complete(),
        }
    }

    fn data_in_u8(&mut self) -> u8 {
        let Some(&b) = self.data.get(self.index) else {
            return 0;
        };
        self.index += 1;
        if self.index >= self.data.len() {
            self.end_in_chunk();
        }
        b
    }

    fn data_in_u16(&mut self) -> u16 {
        let lo = self.data.get(self.index).copied();
        let hi = self.data.get(self.index + 1).copied().unwrap_or(0);
        let Some(lo) = lo else {
            return 0;
        };
        self.index += 2;
        if self.index >= self.data.len() {
            self.end_in_chunk();
        }
        u16::from_le_bytes([lo, hi])
    }

    fn end_in_chunk(&mut self) {
        let rest = match &mut self.phase {
            Phase::PioIn { rest } => std::mem::take(rest),
            _ => Vec::new(),
        };
        if rest.is_empty() {
            if matches!(self.devices[self.selected()], Some(IdeDevice::Atapi(_))) {
                self.tf.sector_count = REASON_STATUS;
            }
            self.complete();
        } else {
            self.atapi_chunk(rest);
        }
    }

    fn data_out(&mut self, bytes: &[u8]) {
        if !matches!(self.phase, Phase::PioOut { .. } | Phase::Packet) {
            return;
        }
        for &b in bytes {
            if let Some(slot) = self.data.get_mut(self.index) {
                *slot = b;
                self.index += 1;
            }
        }
        if self.index < self.data.len() {
            return;
        }
        let data = std::mem::take(&mut self.data);
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::PioOut { lba } => {
                let unit = self.selected();
                let written = match &mut self.devices[unit] {
                    Some(IdeDevice::Ata(disk)) => disk.disk.write(lba, &data),
                    _ => false,
                };
                if written {
                    self.complete();
                } else {
                    self.abort(ERROR_IDNF);
                }
            }
            Phase::Packet => self.packet(&data),
            _ => {}
        }
    }

    fn packet(&mut self, bytes: &[u8]) {
        let unit = self.selected();
        let Some(IdeDevice::Atapi(cd)) = &mut self.devices[unit] else {
            self.abort(ERROR_ABRT);
            return;
        };
        let mut packet = [0u8; 12];
        packet.copy_from_slice(&bytes[..12]);
        match cd.handle_packet(&packet) {
            PacketResult::DataIn(data) if !data.is_empty() => self.atapi_chunk(data),
            PacketResult::DataIn(_) | PacketResult::NoData => {
                self.tf.sector_count = REASON_STATUS;
                self.complete();
            }
            PacketResult::Error(sense) => {
                self.tf.sector_count = REASON_STATUS;
                self.abort(sense.key << 4 | ERROR_ABRT);
            }
        }
    }

    /// Present the next byte-count-limited chunk of ATAPI data.
    fn atapi_chunk(&mut self, mut data: Vec<u8>) {
        let limit = match u16::from(self.tf.lba2) << 8 | u16::from(self.tf.lba1) {
            0 | 0xFFFF => 0xFFFE,
            n => n & !1,
        };
        let limit = usize::from(limit);
        let rest = if data.len() > limit {
            data.split_off(limit)
        } else {
            Vec::new()
        };
        let len = data.len() as u16;
        self.tf.sector_count = REASON_DATA_IN;
        self.tf.lba1 = len as u8;
        self.tf.lba2 = (len >> 8) as u8;
        self.begin_in(data);
        self.phase = Phase::PioIn { rest };
    }
}

fn words_to_bytes(words: &[u16; 256]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
