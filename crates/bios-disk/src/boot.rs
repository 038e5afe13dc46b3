//! Boot device selection and hand-off.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bda;
use crate::bios::{BiosCdReader, DiskBios, Target};
use crate::bus::{BiosBus, MemoryBus};
use crate::config::BootDevice;
use crate::controller::Transfer;
use crate::eltorito::{read_boot_catalog, ElToritoError, EmulationProfile, EmulationState};
use crate::registry::{DriveEntry, FIRST_HARD_DISK};
use crate::{CD_SECTOR_SIZE, DISK_SECTOR_SIZE};

/// Physical address boot sectors are loaded to (0000:7C00).
pub const BOOT_SECTOR_ADDR: u64 = 0x7C00;
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// End of conventional memory; no-emulation images must load below it.
const CONVENTIONAL_MEMORY_END: u64 = 0xA_0000;

/// Where to jump and with which DL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootHandoff {
    pub drive: u8,
    pub cs: u16,
    pub ip: u16,
    /// El Torito profile when booting from CD.
    pub emulation: Option<EmulationProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("no bootable device")]
    NoBootableDevice,
}

fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= DISK_SECTOR_SIZE && sector[510..512] == BOOT_SIGNATURE
}

impl DiskBios {
    /// Try every device class in `boot_order` and load the first bootable image.
    pub fn boot(&mut self, bus: &mut dyn BiosBus) -> Result<BootHandoff, BootError> {
        self.emulation = None;
        for device in self.config.boot_order.clone() {
            let handoff = match device {
                BootDevice::Cdrom => self.boot_cdrom(bus),
                BootDevice::HardDisk => self.boot_hard_disk(bus),
            };
            if let Some(handoff) = handoff {
                info!(
                    drive = format_args!("{:#04x}", handoff.drive),
                    cs = format_args!("{:#06x}", handoff.cs),
                    ip = format_args!("{:#06x}", handoff.ip),
                    emulation = ?handoff.emulation,
                    "boot hand-off"
                );
                return Ok(handoff);
            }
        }
        warn!("no bootable device");
        Err(BootError::NoBootableDevice)
    }

    fn boot_cdrom(&mut self, bus: &mut dyn BiosBus) -> Option<BootHandoff> {
        let cdroms: Vec<(u8, DriveEntry)> =
            self.registry.cdroms().map(|(d, e)| (d, *e)).collect();
        for (drive, cd) in cdroms {
            match self.boot_from_cd(bus, drive, cd) {
                Ok(handoff) => return Some(handoff),
                Err(err) => {
                    warn!(drive = format_args!("{drive:#04x}"), %err, "CD-ROM not bootable")
                }
            }
        }
        None
    }

    fn boot_from_cd(
        &mut self,
        bus: &mut dyn BiosBus,
        cd_drive: u8,
        cd: DriveEntry,
    ) -> Result<BootHandoff, ElToritoError> {
        let catalog = read_boot_catalog(&mut BiosCdReader {
            bios: self,
            bus: &mut *bus,
            cd,
        })?;
        let initial = catalog.initial;

        if initial.profile == EmulationProfile::NoEmulation {
            let load = u64::from(initial.load_segment) << 4;
            let len = u64::from(initial.sector_count) * DISK_SECTOR_SIZE as u64;
            if load + len > CONVENTIONAL_MEMORY_END {
                return Err(ElToritoError::ImageTooLarge);
            }
            if self.window.overlaps(load, len) {
                return Err(ElToritoError::OverlapsDmaWindow);
            }
            let mut sector = [0u8; CD_SECTOR_SIZE];
            let mut loaded = 0u64;
            let mut lba = initial.load_rba;
            while loaded < len {
                self.read_cd_sector(bus, &cd, lba, &mut sector)?;
                let n = (len - loaded).min(CD_SECTOR_SIZE as u64);
                bus.write_physical(load + loaded, &sector[..n as usize]);
                loaded += n;
                lba += 1;
            }
            let state = EmulationState::install(&catalog, cd_drive, &cd, cd_drive, None);
            self.emulation = Some(state);
            return Ok(BootHandoff {
                drive: cd_drive,
                cs: initial.load_segment,
                ip: 0,
                emulation: Some(EmulationProfile::NoEmulation),
            });
        }

        let mut first = [0u8; CD_SECTOR_SIZE];
        self.read_cd_sector(bus, &cd, initial.load_rba, &mut first)?;
        if !has_boot_signature(&first) {
            return Err(ElToritoError::NoBootSignature);
        }
        let hard_disk = initial.profile == EmulationProfile::HardDisk;
        let drive = if hard_disk {
            FIRST_HARD_DISK + self.registry.hard_disk_count()
        } else {
            self.config.emulated_floppy_drive
        };
        let mbr = hard_disk.then_some(&first[..DISK_SECTOR_SIZE]);
        self.emulation = Some(EmulationState::install(&catalog, cd_drive, &cd, drive, mbr));
        if hard_disk {
            bda::write_hard_disk_count(bus, self.visible_hard_disks());
        }
        bus.write_physical(BOOT_SECTOR_ADDR, &first[..DISK_SECTOR_SIZE]);
        Ok(BootHandoff {
            drive,
            cs: 0,
            ip: BOOT_SECTOR_ADDR as u16,
            emulation: Some(initial.profile),
        })
    }

    fn boot_hard_disk(&mut self, bus: &mut dyn BiosBus) -> Option<BootHandoff> {
        let disks: Vec<(u8, DriveEntry)> =
            self.registry.hard_disks().map(|(d, e)| (d, *e)).collect();
        for (drive, entry) in disks {
            let boot_sector = Transfer::read(0, 1, BOOT_SECTOR_ADDR);
            let target = Target::Physical(entry);
            let read = self.with_controller(bus, &target, |controller, bus, entry| {
                controller.transfer(bus, entry, &boot_sector)
            });
            if let Err(err) = read {
                warn!(drive = format_args!("{drive:#04x}"), %err, "boot sector read failed");
                continue;
            }
            let mut sector = [0u8; DISK_SECTOR_SIZE];
            bus.read_physical(BOOT_SECTOR_ADDR, &mut sector);
            if !has_boot_signature(&sector) {
                debug!(drive = format_args!("{drive:#04x}"), "no boot signature");
                continue;
            }
            return Some(BootHandoff {
                drive,
                cs: 0,
                ip: BOOT_SECTOR_ADDR as u16,
                emulation: None,
            });
        }
        None
    }
}
