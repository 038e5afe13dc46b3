use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::ahci::AhciHba;
use crate::ata::AtaDriver;
use crate::bda;
use crate::bus::{BiosBus, MemoryBus};
use crate::config::DiskBiosConfig;
use crate::controller::{DiskController, Transfer};
use crate::dma::DmaWindow;
use crate::eltorito::{CdromReader, EmulatedDisk, EmulationState};
use crate::error::DriverError;
use crate::registry::{ControllerKind, DriveEntry, DriveRegistry};
use crate::scsi::ScsiAdapter;
use crate::{CD_SECTOR_SIZE, DISK_SECTOR_SIZE};

/// The disk half of the BIOS: drivers, drive registry and El Torito state.
///
/// Created once per machine; [`DiskBios::post`] (re)builds everything from the hardware.
#[derive(Debug)]
pub struct DiskBios {
    pub(crate) config: DiskBiosConfig,
    pub(crate) registry: DriveRegistry,
    pub(crate) ata: AtaDriver,
    pub(crate) ahci: Vec<AhciHba>,
    pub(crate) scsi: Vec<ScsiAdapter>,
    pub(crate) window: DmaWindow,
    /// CD-sector scratch buffer inside the DMA window.
    pub(crate) bounce: Option<u64>,
    pub(crate) emulation: Option<EmulationState>,
    pub(crate) last_status: u8,
    /// AH=45h lock counts by drive number.
    pub(crate) locks: BTreeMap<u8, u8>,
}

/// The unit a dispatched call operates on.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target {
    Physical(DriveEntry),
    Emulated {
        state: EmulationState,
        cd: DriveEntry,
        /// Synthesized entry describing the emulated disk.
        view: DriveEntry,
    },
}

impl Target {
    pub(crate) fn entry(&self) -> &DriveEntry {
        match self {
            Target::Physical(entry) => entry,
            Target::Emulated { view, .. } => view,
        }
    }

    pub(crate) fn emulation(&self) -> Option<&EmulationState> {
        match self {
            Target::Physical(_) => None,
            Target::Emulated { state, .. } => Some(state),
        }
    }
}

impl DiskBios {
    pub fn new(config: DiskBiosConfig) -> Self {
        let ata = AtaDriver::new(&config.ide_channels, config.polls, config.max_multiple_sectors);
        let window = DmaWindow::new(config.ahci_dma_base, config.ahci_dma_size);
        Self {
            config,
            registry: DriveRegistry::new(),
            ata,
            ahci: Vec::new(),
            scsi: Vec::new(),
            window,
            bounce: None,
            emulation: None,
            last_status: 0,
            locks: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &DiskBiosConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriveRegistry {
        &self.registry
    }

    /// The El Torito record installed by [`DiskBios::boot`], if any.
    pub fn emulation(&self) -> Option<&EmulationState> {
        self.emulation.as_ref()
    }

    /// `detect`: enumerate every configured controller and publish the fixed-disk count.
    ///
    /// Legacy IDE channels come first, then AHCI HBAs in PCI scan order, then SCSI adapters.
    /// Returns the number of registered drives.
    pub fn post(&mut self, bus: &mut dyn BiosBus) -> usize {
        for hba in &mut self.ahci {
            hba.shutdown(bus);
        }
        self.ahci.clear();
        self.scsi.clear();
        self.registry.clear();
        self.emulation = None;
        self.locks.clear();
        self.last_status = 0;

        self.window.reset();
        self.bounce = self.window.alloc(bus, CD_SECTOR_SIZE as u64, 16);
        if self.bounce.is_none() {
            warn!("DMA window too small for the CD bounce buffer; El Torito emulation disabled");
        }

        let polls = self.config.polls;
        self.ata.detect(bus, &mut self.registry);
        for (index, &abar) in self.config.ahci_abars.iter().enumerate() {
            let mut hba = AhciHba::init(bus, index, abar, &mut self.window, polls);
            hba.detect(bus, &mut self.registry);
            self.ahci.push(hba);
        }
        for (index, &window) in self.config.scsi_adapters.iter().enumerate() {
            let mut adapter =
                ScsiAdapter::new(index, window, polls, self.config.scsi_max_targets);
            adapter.detect(bus, &mut self.registry);
            self.scsi.push(adapter);
        }

        bda::write_hard_disk_count(bus, self.registry.hard_disk_count());
        bda::write_last_status(bus, 0);
        info!(
            hard_disks = self.registry.hard_disk_count(),
            cdroms = self.registry.cdrom_count(),
            "disk POST complete"
        );
        self.registry.hard_disk_count() as usize + self.registry.cdrom_count() as usize
    }

    pub(crate) fn controller_mut(&mut self, entry: &DriveEntry) -> Option<&mut dyn DiskController> {
        match entry.kind {
            ControllerKind::Ata | ControllerKind::Atapi => {
                Some(&mut self.ata as &mut dyn DiskController)
            }
            ControllerKind::Ahci => self
                .ahci
                .get_mut(entry.controller)
                .map(|hba| hba as &mut dyn DiskController),
            ControllerKind::Scsi => self
                .scsi
                .get_mut(entry.controller)
                .map(|adapter| adapter as &mut dyn DiskController),
        }
    }

    /// Map a guest drive number to its unit, honouring the El Torito alias.
    pub(crate) fn resolve(&self, drive: u8) -> Option<Target> {
        if let Some(state) = self.emulation.filter(|s| s.redirects(drive)) {
            let cd = *self.registry.get(state.cd_drive)?;
            let view = DriveEntry {
                sectors: state.sectors,
                sector_size: DISK_SECTOR_SIZE as u16,
                chs: state.chs,
                removable: state.profile.is_floppy(),
                cdrom: false,
                ..cd
            };
            return Some(Target::Emulated { state, cd, view });
        }
        self.registry.get(drive).copied().map(Target::Physical)
    }

    /// Run `op` against the controller serving `target`.
    pub(crate) fn with_controller<T>(
        &mut self,
        bus: &mut dyn BiosBus,
        target: &Target,
        op: impl FnOnce(
            &mut dyn DiskController,
            &mut dyn BiosBus,
            &DriveEntry,
        ) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        match *target {
            Target::Physical(entry) => {
                let controller = self.controller_mut(&entry).ok_or(DriverError::NotPresent)?;
                op(controller, bus, &entry)
            }
            Target::Emulated { state, cd, view } => {
                let bounce = self.bounce.ok_or(DriverError::NotPresent)?;
                let backing = self.controller_mut(&cd).ok_or(DriverError::NotPresent)?;
                let mut disk = EmulatedDisk::new(backing, cd, &state, bounce);
                op(&mut disk, bus, &view)
            }
        }
    }

    /// Read one 2048-byte sector from a CD drive through the bounce buffer.
    pub(crate) fn read_cd_sector(
        &mut self,
        bus: &mut dyn BiosBus,
        cd: &DriveEntry,
        lba: u32,
        buf: &mut [u8; CD_SECTOR_SIZE],
    ) -> Result<(), DriverError> {
        let bounce = self.bounce.ok_or(DriverError::NotPresent)?;
        let controller = self.controller_mut(cd).ok_or(DriverError::NotPresent)?;
        controller.transfer(bus, cd, &Transfer::read(u64::from(lba), 1, bounce))?;
        bus.read_physical(bounce, buf);
        debug!(lba, "CD sector read");
        Ok(())
    }
}

/// [`CdromReader`] over one registered CD drive.
pub(crate) struct BiosCdReader<'a> {
    pub(crate) bios: &'a mut DiskBios,
    pub(crate) bus: &'a mut dyn BiosBus,
    pub(crate) cd: DriveEntry,
}

impl CdromReader for BiosCdReader<'_> {
    fn read_sector(&mut self, lba: u32, buf: &mut [u8; CD_SECTOR_SIZE]) -> Result<(), DriverError> {
        self.bios.read_cd_sector(self.bus, &self.cd, lba, buf)
    }
}
