//! Logical drive numbering.
//!
//! Fixed disks are numbered from `0x80`, CD-ROMs from `0xE0`, in discovery order. The two spaces
//! never overlap and a number, once handed out, keeps pointing at the same unit for the rest of
//! the session.

use tracing::{debug, warn};

use crate::config::{IdeChannelPorts, ScsiWindow};
use crate::geometry::Chs;

pub const MAX_HARD_DISKS: usize = 16;
pub const MAX_CDROMS: usize = 8;

pub const FIRST_HARD_DISK: u8 = 0x80;
pub const FIRST_CDROM: u8 = 0xE0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Ata,
    Atapi,
    Ahci,
    Scsi,
}

/// Where a unit's registers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBase {
    Ide(IdeChannelPorts),
    Ahci { abar: u64, port_regs: u64 },
    Scsi(ScsiWindow),
}

/// ATA/ATAPI capabilities negotiated at detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtaCaps {
    pub lba: bool,
    pub lba48: bool,
    /// READ/WRITE MULTIPLE block size; 1 means single-sector PIO.
    pub multiple: u16,
    /// IDENTIFY words 1/3/6, used for CHS-only devices.
    pub native_chs: Option<Chs>,
    /// ATAPI packet length (12 or 16).
    pub packet_len: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveEntry {
    pub kind: ControllerKind,
    /// Index of the owning controller instance within its kind.
    pub controller: usize,
    /// IDE channel or AHCI port.
    pub channel: u8,
    /// IDE master/slave or SCSI target id.
    pub unit: u8,
    pub io: IoBase,
    /// Native capacity in `sector_size` units.
    pub sectors: u64,
    pub sector_size: u16,
    /// Translated geometry; `None` for optical units.
    pub chs: Option<Chs>,
    pub removable: bool,
    pub cdrom: bool,
    pub caps: AtaCaps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveRegistry {
    hard_disks: Vec<DriveEntry>,
    cdroms: Vec<DriveEntry>,
}

impl DriveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.hard_disks.clear();
        self.cdroms.clear();
    }

    /// Assign the next free drive number of the entry's class.
    ///
    /// Returns `None` (and drops the unit) once the class is full.
    pub fn register(&mut self, entry: DriveEntry) -> Option<u8> {
        let (table, first, max) = if entry.cdrom {
            (&mut self.cdroms, FIRST_CDROM, MAX_CDROMS)
        } else {
            (&mut self.hard_disks, FIRST_HARD_DISK, MAX_HARD_DISKS)
        };
        if table.len() >= max {
            warn!(kind = ?entry.kind, cdrom = entry.cdrom, "drive table full, unit dropped");
            return None;
        }
        let drive = first + table.len() as u8;
        table.push(entry);
        debug!(
            drive = format_args!("{drive:#04x}"),
            kind = ?entry.kind,
            sectors = entry.sectors,
            sector_size = entry.sector_size,
            chs = ?entry.chs,
            "drive registered"
        );
        Some(drive)
    }

    pub fn get(&self, drive: u8) -> Option<&DriveEntry> {
        match drive {
            FIRST_CDROM..=0xFF => self.cdroms.get(usize::from(drive - FIRST_CDROM)),
            FIRST_HARD_DISK..=0xDF => self.hard_disks.get(usize::from(drive - FIRST_HARD_DISK)),
            _ => None,
        }
    }

    pub fn hard_disk_count(&self) -> u8 {
        self.hard_disks.len() as u8
    }

    pub fn cdrom_count(&self) -> u8 {
        self.cdroms.len() as u8
    }

    pub fn hard_disks(&self) -> impl Iterator<Item = (u8, &DriveEntry)> {
        (FIRST_HARD_DISK..).zip(self.hard_disks.iter())
    }

    pub fn cdroms(&self) -> impl Iterator<Item = (u8, &DriveEntry)> {
        (FIRST_CDROM..).zip(self.cdroms.iter())
    }

    /// All registered units, fixed disks first.
    pub fn entries(&self) -> impl Iterator<Item = (u8, &DriveEntry)> {
        self.hard_disks().chain(self.cdroms())
    }
}
