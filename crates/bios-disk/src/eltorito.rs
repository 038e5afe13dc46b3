//! El Torito (bootable CD-ROM) support.
//!
//! [`read_boot_catalog`] locates and validates the boot catalog through the boot record volume
//! descriptor at sector 17. [`EmulationState::install`] turns the catalog's boot entry into the
//! single emulation record the dispatcher consults, and [`EmulatedDisk`] serves the emulated
//! drive's 512-byte sectors out of the CD image.

use thiserror::Error;
use tracing::{debug, info};

use crate::bus::{BiosBus, MemoryBus};
use crate::controller::{DiskController, Transfer, TransferOp};
use crate::error::DriverError;
use crate::geometry::Chs;
use crate::registry::{DriveEntry, DriveRegistry};
use crate::{CD_SECTOR_SIZE, DISK_SECTOR_SIZE};

/// Sector holding the boot record volume descriptor.
pub const BOOT_RECORD_SECTOR: u32 = 17;

const ISO9660_STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";
const ISO9660_VERSION: u8 = 1;
const EL_TORITO_ID: &[u8] = b"EL TORITO SPECIFICATION";
const BOOT_CATALOG_POINTER: usize = 0x47;

const ENTRY_BYTES: usize = 32;
const VALIDATION_HEADER_ID: u8 = 0x01;
const BOOT_INDICATOR_BOOTABLE: u8 = 0x88;
const PLATFORM_X86: u8 = 0x00;
const SECTION_HEADER: u8 = 0x90;
const FINAL_SECTION_HEADER: u8 = 0x91;

/// Load segment used when the catalog leaves it zero.
pub const DEFAULT_LOAD_SEGMENT: u16 = 0x07C0;
/// Virtual sectors loaded when the catalog leaves the count zero.
pub const DEFAULT_SECTOR_COUNT: u16 = 4;

const VIRTUAL_PER_CD_SECTOR: u64 = (CD_SECTOR_SIZE / DISK_SECTOR_SIZE) as u64;
/// CD sectors moved per backing read when the request is aligned.
const MAX_DIRECT_CD_SECTORS: u64 = 32;

/// Size of the INT 13h AH=4Bh specification packet.
pub const SPEC_PACKET_LEN: usize = 0x13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ElToritoError {
    #[error("missing El Torito boot record")]
    NoBootRecord,

    #[error("invalid boot catalog validation entry")]
    InvalidValidationEntry,

    #[error("boot catalog checksum mismatch")]
    ChecksumMismatch,

    #[error("initial entry is not bootable")]
    NotBootable,

    #[error("unsupported platform id {0:#04x}")]
    UnsupportedPlatform(u8),

    #[error("unsupported boot media type {0:#x}")]
    UnsupportedMedia(u8),

    #[error("boot image lacks the 55AA signature")]
    NoBootSignature,

    #[error("boot image does not fit below 640 KiB")]
    ImageTooLarge,

    #[error("boot image overlaps the firmware DMA window")]
    OverlapsDmaWindow,

    #[error("CD read failed: {0}")]
    Read(#[from] DriverError),
}

/// Sector-level access to a CD used while parsing.
pub trait CdromReader {
    fn read_sector(&mut self, lba: u32, buf: &mut [u8; CD_SECTOR_SIZE]) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationProfile {
    NoEmulation,
    Floppy1200K,
    Floppy1440K,
    Floppy2880K,
    HardDisk,
}

impl EmulationProfile {
    /// Decode the initial entry's media-type nibble.
    pub fn from_media_type(media: u8) -> Option<Self> {
        match media & 0x0F {
            0 => Some(Self::NoEmulation),
            1 => Some(Self::Floppy1200K),
            2 => Some(Self::Floppy1440K),
            3 => Some(Self::Floppy2880K),
            4 => Some(Self::HardDisk),
            _ => None,
        }
    }

    pub fn media_type(self) -> u8 {
        match self {
            Self::NoEmulation => 0,
            Self::Floppy1200K => 1,
            Self::Floppy1440K => 2,
            Self::Floppy2880K => 3,
            Self::HardDisk => 4,
        }
    }

    pub fn is_floppy(self) -> bool {
        matches!(self, Self::Floppy1200K | Self::Floppy1440K | Self::Floppy2880K)
    }

    pub fn floppy_geometry(self) -> Option<Chs> {
        match self {
            Self::Floppy1200K => Some(Chs::new(80, 2, 15)),
            Self::Floppy1440K => Some(Chs::new(80, 2, 18)),
            Self::Floppy2880K => Some(Chs::new(80, 2, 36)),
            _ => None,
        }
    }

    /// CMOS drive type reported in BL by INT 13h AH=08h.
    pub fn floppy_cmos_type(self) -> Option<u8> {
        match self {
            Self::Floppy1200K => Some(0x02),
            Self::Floppy1440K => Some(0x04),
            Self::Floppy2880K => Some(0x06),
            _ => None,
        }
    }
}

/// Initial/default entry, with zero fields replaced by their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialEntry {
    pub profile: EmulationProfile,
    pub load_segment: u16,
    pub system_type: u8,
    /// 512-byte virtual sectors to load.
    pub sector_count: u16,
    /// CD sector where the image starts.
    pub load_rba: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootCatalog {
    pub catalog_lba: u32,
    pub initial: InitialEntry,
}

/// Catalog LBA from a boot record volume descriptor.
pub fn parse_boot_record(sector: &[u8]) -> Result<u32, ElToritoError> {
    if sector.len() < BOOT_CATALOG_POINTER + 4
        || sector[0] != 0x00
        || &sector[1..6] != ISO9660_STANDARD_IDENTIFIER
        || sector[6] != ISO9660_VERSION
    {
        return Err(ElToritoError::NoBootRecord);
    }
    // Space padding is canonical; some authoring tools pad with NULs.
    let system_id = &sector[7..39];
    if !system_id.starts_with(EL_TORITO_ID)
        || system_id[EL_TORITO_ID.len()..]
            .iter()
            .any(|&b| b != 0 && b != b' ')
    {
        return Err(ElToritoError::NoBootRecord);
    }
    let mut lba = [0u8; 4];
    lba.copy_from_slice(&sector[BOOT_CATALOG_POINTER..BOOT_CATALOG_POINTER + 4]);
    Ok(u32::from_le_bytes(lba))
}

/// 16-bit little-endian word sum of a validation entry; valid entries sum to zero.
pub fn validation_checksum(entry: &[u8]) -> u16 {
    entry
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])))
}

/// Validate the validation entry and pick the boot entry of a catalog sector.
///
/// The initial entry wins when it is a bootable x86 image. Otherwise the section headers that
/// follow it (`0x90`, or `0x91` for the last one) are walked for the first bootable entry of an
/// x86 section. When nothing qualifies the initial entry's own rejection is reported.
pub fn parse_catalog(catalog_lba: u32, sector: &[u8]) -> Result<BootCatalog, ElToritoError> {
    if sector.len() < 2 * ENTRY_BYTES {
        return Err(ElToritoError::InvalidValidationEntry);
    }
    let validation = &sector[..ENTRY_BYTES];
    if validation[0] != VALIDATION_HEADER_ID
        || validation[0x1E] != 0x55
        || validation[0x1F] != 0xAA
    {
        return Err(ElToritoError::InvalidValidationEntry);
    }
    if validation_checksum(validation) != 0 {
        return Err(ElToritoError::ChecksumMismatch);
    }

    let initial = if validation[1] == PLATFORM_X86 {
        boot_entry(&sector[ENTRY_BYTES..2 * ENTRY_BYTES])
    } else {
        Err(ElToritoError::UnsupportedPlatform(validation[1]))
    };
    let rejection = match initial {
        Ok(initial) => return Ok(BootCatalog { catalog_lba, initial }),
        Err(err) => err,
    };

    let mut platform = None;
    for entry in sector.chunks_exact(ENTRY_BYTES).skip(2) {
        match entry[0] {
            SECTION_HEADER | FINAL_SECTION_HEADER => platform = Some(entry[1]),
            BOOT_INDICATOR_BOOTABLE if platform == Some(PLATFORM_X86) => {
                if let Ok(initial) = boot_entry(entry) {
                    debug!(catalog_lba, %rejection, "initial entry skipped for a section entry");
                    return Ok(BootCatalog { catalog_lba, initial });
                }
            }
            _ => {}
        }
    }
    Err(rejection)
}

/// Decode an initial or section entry.
fn boot_entry(entry: &[u8]) -> Result<InitialEntry, ElToritoError> {
    if entry[0] != BOOT_INDICATOR_BOOTABLE {
        return Err(ElToritoError::NotBootable);
    }
    let profile = EmulationProfile::from_media_type(entry[1])
        .ok_or(ElToritoError::UnsupportedMedia(entry[1]))?;
    let load_segment = match u16::from_le_bytes([entry[2], entry[3]]) {
        0 => DEFAULT_LOAD_SEGMENT,
        seg => seg,
    };
    let sector_count = match u16::from_le_bytes([entry[6], entry[7]]) {
        0 => DEFAULT_SECTOR_COUNT,
        n => n,
    };
    Ok(InitialEntry {
        profile,
        load_segment,
        system_type: entry[4],
        sector_count,
        load_rba: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
    })
}

/// `parseCatalog`: boot record at sector 17, then the catalog it points at.
pub fn read_boot_catalog(reader: &mut dyn CdromReader) -> Result<BootCatalog, ElToritoError> {
    let mut sector = [0u8; CD_SECTOR_SIZE];
    reader.read_sector(BOOT_RECORD_SECTOR, &mut sector)?;
    let catalog_lba = parse_boot_record(&sector)?;
    reader.read_sector(catalog_lba, &mut sector)?;
    let catalog = parse_catalog(catalog_lba, &sector)?;
    debug!(catalog_lba, initial = ?catalog.initial, "El Torito boot catalog");
    Ok(catalog)
}

/// Geometry of a hard-disk image from the furthest partition end in its MBR.
pub fn hard_disk_image_geometry(mbr: &[u8]) -> Option<Chs> {
    if mbr.len() < DISK_SECTOR_SIZE || mbr[0x1FE] != 0x55 || mbr[0x1FF] != 0xAA {
        return None;
    }
    let mut max: Option<Chs> = None;
    for part in mbr[0x1BE..0x1FE].chunks_exact(16) {
        if part[4] == 0 {
            continue;
        }
        let end_head = u32::from(part[5]);
        let end_sector = u32::from(part[6] & 0x3F);
        let end_cyl = u32::from(part[7]) | (u32::from(part[6] & 0xC0) << 2);
        if end_sector == 0 {
            continue;
        }
        let chs = Chs::new(end_cyl + 1, end_head + 1, end_sector);
        max = Some(match max {
            Some(m) => Chs::new(
                m.cylinders.max(chs.cylinders),
                m.heads.max(chs.heads),
                m.sectors_per_track.max(chs.sectors_per_track),
            ),
            None => chs,
        });
    }
    max.filter(Chs::is_legacy_compatible)
}

/// The single El Torito record for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulationState {
    /// Cleared by AH=4Bh AL=00h; never set again.
    pub active: bool,
    pub profile: EmulationProfile,
    /// Drive number the guest sees; the CD drive itself for no-emulation boots.
    pub drive: u8,
    pub cd_drive: u8,
    /// Index of the CD's controller for the specification packet.
    pub controller_index: u8,
    /// IDE master/slave or SCSI target of the CD, for the specification packet.
    pub device_spec: u16,
    /// First CD sector of the image.
    pub image_lba: u32,
    /// Image size in 512-byte sectors.
    pub sectors: u64,
    pub chs: Option<Chs>,
    pub load_segment: u16,
    pub load_sectors: u16,
    pub catalog_lba: u32,
    pub system_type: u8,
}

impl EmulationState {
    /// `installEmulation`.
    ///
    /// `drive` is the number the emulated disk answers to; for hard-disk images `mbr` (the image's
    /// first sector) supplies the geometry.
    pub fn install(
        catalog: &BootCatalog,
        cd_drive: u8,
        cd: &DriveEntry,
        drive: u8,
        mbr: Option<&[u8]>,
    ) -> Self {
        let initial = catalog.initial;
        let (chs, sectors) = match initial.profile {
            EmulationProfile::NoEmulation => (None, u64::from(initial.sector_count)),
            EmulationProfile::HardDisk => match mbr.and_then(hard_disk_image_geometry) {
                Some(chs) => (Some(chs), chs.total_sectors()),
                None => {
                    let sectors = u64::from(initial.sector_count);
                    (Chs::lba_assisted(sectors), sectors)
                }
            },
            floppy => {
                let chs = floppy.floppy_geometry();
                (chs, chs.map_or(0, |c| c.total_sectors()))
            }
        };
        let drive = if initial.profile == EmulationProfile::NoEmulation {
            cd_drive
        } else {
            drive
        };
        let state = Self {
            active: initial.profile != EmulationProfile::NoEmulation,
            profile: initial.profile,
            drive,
            cd_drive,
            controller_index: cd.controller as u8,
            device_spec: u16::from(cd.unit) | (u16::from(cd.channel) << 8),
            image_lba: initial.load_rba,
            sectors,
            chs,
            load_segment: initial.load_segment,
            load_sectors: initial.sector_count,
            catalog_lba: catalog.catalog_lba,
            system_type: initial.system_type,
        };
        info!(
            profile = ?state.profile,
            drive = format_args!("{drive:#04x}"),
            cd_drive = format_args!("{cd_drive:#04x}"),
            image_lba = state.image_lba,
            sectors = state.sectors,
            "El Torito boot image"
        );
        state
    }

    /// Whether calls for `drive` must be served from the image.
    pub fn redirects(&self, drive: u8) -> bool {
        self.active && self.profile != EmulationProfile::NoEmulation && self.drive == drive
    }

    /// Specification packet returned by INT 13h AH=4Bh.
    pub fn spec_packet(&self) -> [u8; SPEC_PACKET_LEN] {
        let mut p = [0u8; SPEC_PACKET_LEN];
        p[0] = SPEC_PACKET_LEN as u8;
        p[1] = self.profile.media_type();
        p[2] = self.drive;
        p[3] = self.controller_index;
        p[4..8].copy_from_slice(&self.image_lba.to_le_bytes());
        p[8..10].copy_from_slice(&self.device_spec.to_le_bytes());
        p[12..14].copy_from_slice(&self.load_segment.to_le_bytes());
        p[14..16].copy_from_slice(&self.load_sectors.to_le_bytes());
        if let Some(chs) = self.chs {
            let (cx, dh) = chs.int13_limits();
            p[16] = (cx >> 8) as u8;
            p[17] = cx as u8;
            p[18] = dh;
        }
        p
    }
}

/// Emulated floppy/hard disk backed by a range of CD sectors.
pub struct EmulatedDisk<'a> {
    backing: &'a mut dyn DiskController,
    cd: DriveEntry,
    state: &'a EmulationState,
    bounce: u64,
}

impl<'a> EmulatedDisk<'a> {
    /// `bounce` is a CD-sector-sized scratch buffer in guest memory.
    pub fn new(
        backing: &'a mut dyn DiskController,
        cd: DriveEntry,
        state: &'a EmulationState,
        bounce: u64,
    ) -> Self {
        Self {
            backing,
            cd,
            state,
            bounce,
        }
    }

    fn cd_lba(&self, virtual_lba: u64) -> u64 {
        u64::from(self.state.image_lba) + virtual_lba / VIRTUAL_PER_CD_SECTOR
    }
}

impl DiskController for EmulatedDisk<'_> {
    /// Emulated drives are installed by the boot path, never enumerated.
    fn detect(&mut self, _bus: &mut dyn BiosBus, _registry: &mut DriveRegistry) -> usize {
        0
    }

    fn reset(&mut self, bus: &mut dyn BiosBus, _unit: &DriveEntry) -> Result<(), DriverError> {
        self.backing.reset(bus, &self.cd)
    }

    fn transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        _unit: &DriveEntry,
        xfer: &Transfer,
    ) -> Result<(), DriverError> {
        match xfer.lba.checked_add(u64::from(xfer.count)) {
            Some(end) if end <= self.state.sectors => {}
            _ => return Err(DriverError::OutOfRange),
        }
        if xfer.op == TransferOp::Write {
            return Err(DriverError::WriteProtected);
        }

        let total = u64::from(xfer.count);
        let mut done = 0u64;
        while done < total {
            let vlba = xfer.lba + done;
            let cd_lba = self.cd_lba(vlba);
            let within = vlba % VIRTUAL_PER_CD_SECTOR;
            let dest = xfer.buffer + done * DISK_SECTOR_SIZE as u64;

            if xfer.op == TransferOp::Verify {
                let cd_end = self.cd_lba(xfer.lba + total - 1);
                self.backing.transfer(
                    bus,
                    &self.cd,
                    &Transfer::verify(cd_lba, (cd_end - cd_lba + 1) as u32),
                )?;
                break;
            }

            let remaining = total - done;
            if within == 0 && remaining >= VIRTUAL_PER_CD_SECTOR {
                let whole = (remaining / VIRTUAL_PER_CD_SECTOR).min(MAX_DIRECT_CD_SECTORS);
                self.backing
                    .transfer(bus, &self.cd, &Transfer::read(cd_lba, whole as u32, dest))?;
                done += whole * VIRTUAL_PER_CD_SECTOR;
                continue;
            }

            self.backing
                .transfer(bus, &self.cd, &Transfer::read(cd_lba, 1, self.bounce))?;
            let n = (VIRTUAL_PER_CD_SECTOR - within).min(remaining);
            let mut chunk = vec![0u8; n as usize * DISK_SECTOR_SIZE];
            bus.read_physical(self.bounce + within * DISK_SECTOR_SIZE as u64, &mut chunk);
            bus.write_physical(dest, &chunk);
            done += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdeChannelPorts;
    use crate::registry::{AtaCaps, ControllerKind, IoBase};

    fn boot_record(catalog_lba: u32) -> Vec<u8> {
        let mut sector = vec![0u8; CD_SECTOR_SIZE];
        sector[0] = 0x00;
        sector[1..6].copy_from_slice(b"CD001");
        sector[6] = 0x01;
        let id = b"EL TORITO SPECIFICATION";
        sector[7..7 + id.len()].copy_from_slice(id);
        sector[0x47..0x4B].copy_from_slice(&catalog_lba.to_le_bytes());
        sector
    }

    fn catalog(media: u8, load_rba: u32, sector_count: u16) -> Vec<u8> {
        let mut sector = vec![0u8; CD_SECTOR_SIZE];
        sector[0] = 0x01;
        sector[0x1E] = 0x55;
        sector[0x1F] = 0xAA;
        let sum = validation_checksum(&sector[..32]);
        sector[0x1C..0x1E].copy_from_slice(&0u16.wrapping_sub(sum).to_le_bytes());

        sector[32] = 0x88;
        sector[33] = media;
        sector[38..40].copy_from_slice(&sector_count.to_le_bytes());
        sector[40..44].copy_from_slice(&load_rba.to_le_bytes());
        sector
    }

    fn cd_entry() -> DriveEntry {
        DriveEntry {
            kind: ControllerKind::Atapi,
            controller: 0,
            channel: 1,
            unit: 0,
            io: IoBase::Ide(IdeChannelPorts::LEGACY[1]),
            sectors: 10_000,
            sector_size: CD_SECTOR_SIZE as u16,
            chs: None,
            removable: true,
            cdrom: true,
            caps: AtaCaps::default(),
        }
    }

    #[test]
    fn boot_record_accepts_space_or_nul_padding() {
        assert_eq!(parse_boot_record(&boot_record(20)), Ok(20));

        let mut spaced = boot_record(21);
        for b in &mut spaced[7 + 23..39] {
            *b = b' ';
        }
        assert_eq!(parse_boot_record(&spaced), Ok(21));

        let mut junk = boot_record(21);
        junk[38] = b'X';
        assert_eq!(parse_boot_record(&junk), Err(ElToritoError::NoBootRecord));

        let mut primary = boot_record(21);
        primary[0] = 0x01;
        assert_eq!(parse_boot_record(&primary), Err(ElToritoError::NoBootRecord));
    }

    #[test]
    fn catalog_defaults_zero_fields() {
        let cat = parse_catalog(20, &catalog(0, 30, 0)).unwrap();
        assert_eq!(cat.initial.profile, EmulationProfile::NoEmulation);
        assert_eq!(cat.initial.load_segment, DEFAULT_LOAD_SEGMENT);
        assert_eq!(cat.initial.sector_count, DEFAULT_SECTOR_COUNT);
        assert_eq!(cat.initial.load_rba, 30);
    }

    #[test]
    fn catalog_rejections() {
        let mut bad_sum = catalog(2, 100, 1);
        bad_sum[4] ^= 0x01;
        assert_eq!(parse_catalog(20, &bad_sum), Err(ElToritoError::ChecksumMismatch));

        let mut bad_key = catalog(2, 100, 1);
        bad_key[0x1F] = 0x00;
        assert_eq!(parse_catalog(20, &bad_key), Err(ElToritoError::InvalidValidationEntry));

        let mut not_bootable = catalog(2, 100, 1);
        not_bootable[32] = 0x00;
        assert_eq!(parse_catalog(20, &not_bootable), Err(ElToritoError::NotBootable));

        assert_eq!(
            parse_catalog(20, &catalog(7, 100, 1)),
            Err(ElToritoError::UnsupportedMedia(7))
        );
    }

    #[test]
    fn later_section_entry_is_used_when_the_initial_entry_is_not_bootable() {
        let mut sector = catalog(0, 30, 0);
        // EFI validation platform; the initial entry is neither x86 nor bootable.
        sector[1] = 0xEF;
        sector[0x1C..0x1E].fill(0);
        let sum = validation_checksum(&sector[..32]);
        sector[0x1C..0x1E].copy_from_slice(&0u16.wrapping_sub(sum).to_le_bytes());
        sector[32] = 0x00;

        // EFI section whose bootable entry must be passed over.
        sector[64] = 0x90;
        sector[65] = 0xEF;
        sector[66] = 1;
        sector[96] = 0x88;
        sector[104..108].copy_from_slice(&77u32.to_le_bytes());

        // Final x86 section with a non-bootable entry, then a floppy image.
        sector[128] = 0x91;
        sector[129] = 0x00;
        sector[130] = 2;
        sector[160] = 0x00;
        sector[192] = 0x88;
        sector[193] = 0x02;
        sector[198..200].copy_from_slice(&1u16.to_le_bytes());
        sector[200..204].copy_from_slice(&40u32.to_le_bytes());

        let cat = parse_catalog(20, &sector).unwrap();
        assert_eq!(cat.catalog_lba, 20);
        assert_eq!(cat.initial.profile, EmulationProfile::Floppy1440K);
        assert_eq!(cat.initial.load_segment, DEFAULT_LOAD_SEGMENT);
        assert_eq!(cat.initial.sector_count, 1);
        assert_eq!(cat.initial.load_rba, 40);

        // Without the x86 section the initial entry's rejection stands.
        sector[128..].fill(0);
        assert_eq!(parse_catalog(20, &sector), Err(ElToritoError::UnsupportedPlatform(0xEF)));
    }

    #[test]
    fn floppy_install_and_spec_packet() {
        let cat = parse_catalog(20, &catalog(2, 100, 1)).unwrap();
        let state = EmulationState::install(&cat, 0xE0, &cd_entry(), 0x00, None);
        assert!(state.active);
        assert_eq!(state.drive, 0x00);
        assert_eq!(state.sectors, 2880);
        assert_eq!(state.chs, Some(Chs::new(80, 2, 18)));
        assert!(state.redirects(0x00));
        assert!(!state.redirects(0x80));

        let p = state.spec_packet();
        assert_eq!(p[0], 0x13);
        assert_eq!(p[1], 2);
        assert_eq!(p[2], 0x00);
        assert_eq!(u32::from_le_bytes([p[4], p[5], p[6], p[7]]), 100);
        assert_eq!(u16::from_le_bytes([p[8], p[9]]), 0x0100);
        assert_eq!(u16::from_le_bytes([p[12], p[13]]), 0x07C0);
        assert_eq!(&p[16..19], &[0x4F, 0x12, 0x01]);
    }

    #[test]
    fn no_emulation_never_redirects() {
        let cat = parse_catalog(20, &catalog(0, 30, 4)).unwrap();
        let state = EmulationState::install(&cat, 0xE0, &cd_entry(), 0x00, None);
        assert!(!state.active);
        assert_eq!(state.drive, 0xE0);
        assert!(!state.redirects(0xE0));
        assert!(!state.redirects(0x00));
    }

    #[test]
    fn hard_disk_geometry_from_partition_table() {
        let mut mbr = vec![0u8; DISK_SECTOR_SIZE];
        mbr[0x1FE] = 0x55;
        mbr[0x1FF] = 0xAA;
        // One partition ending at C=99, H=15, S=63.
        mbr[0x1BE + 4] = 0x06;
        mbr[0x1BE + 5] = 15;
        mbr[0x1BE + 6] = 63;
        mbr[0x1BE + 7] = 99;
        assert_eq!(hard_disk_image_geometry(&mbr), Some(Chs::new(100, 16, 63)));

        let cat = parse_catalog(20, &catalog(4, 50, 1)).unwrap();
        let state = EmulationState::install(&cat, 0xE0, &cd_entry(), 0x81, Some(&mbr));
        assert_eq!(state.sectors, 100 * 16 * 63);
        assert!(state.redirects(0x81));

        let fallback = EmulationState::install(&cat, 0xE0, &cd_entry(), 0x81, Some(&[0u8; 512]));
        assert_eq!(fallback.sectors, 1);
    }
}
