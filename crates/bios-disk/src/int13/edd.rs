//! Enhanced Disk Drive (EDD 3.0) services: AH=42h..44h, 47h and 48h.

use crate::bios::{DiskBios, Target};
use crate::bus::{BiosBus, FarPtr, MemoryBus};
use crate::config::ScsiWindow;
use crate::controller::Transfer;
use crate::cpu::RealModeCpu;
use crate::error::Int13Status;
use crate::registry::{ControllerKind, DriveEntry, IoBase};

use super::{driver_status, Outcome};

/// Smallest disk address packet accepted.
pub const DAP_MIN_SIZE: u8 = 0x10;
/// Packets at least this long may carry a flat 64-bit buffer address.
pub const DAP_FLAT_SIZE: u8 = 0x18;
pub const MAX_DAP_SECTORS: u16 = 0x7F;

const DAP_COUNT_OFFSET: u64 = 0x02;

pub const PARAMS_V1_LEN: usize = 0x1A;
pub const PARAMS_V2_LEN: usize = 0x1E;
pub const PARAMS_V3_LEN: usize = 0x42;

const DEVICE_PATH_KEY: u16 = 0xBEDD;
const DEVICE_PATH_LEN: u8 = 0x24;
const NO_DPTE: u32 = 0xFFFF_FFFF;

const INFO_CHS_VALID: u16 = 1 << 1;
const INFO_REMOVABLE: u16 = 1 << 2;
const INFO_CHANGE_LINE: u16 = 1 << 4;
const INFO_LOCKABLE: u16 = 1 << 5;
const INFO_CHS_MAX: u16 = 1 << 6;

/// Decoded disk address packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskAddressPacket {
    pub size: u8,
    pub count: u16,
    /// Linear address of the caller's buffer.
    pub buffer: u64,
    pub lba: u64,
}

impl DiskAddressPacket {
    /// Decode the packet at `addr`.
    ///
    /// The size byte is checked before any other field is read.
    pub fn read<B: MemoryBus + ?Sized>(bus: &mut B, addr: u64) -> Result<Self, Int13Status> {
        let size = bus.read_u8(addr);
        if size < DAP_MIN_SIZE {
            return Err(Int13Status::InvalidFunction);
        }
        let count = bus.read_u16(addr + DAP_COUNT_OFFSET);
        let ptr = FarPtr::from_dword(bus.read_u32(addr + 0x04));
        let lba = bus.read_u64(addr + 0x08);
        let buffer = if size >= DAP_FLAT_SIZE && ptr == FarPtr::FLAT_MARKER {
            bus.read_u64(addr + 0x10)
        } else {
            ptr.linear()
        };
        Ok(Self {
            size,
            count,
            buffer,
            lba,
        })
    }
}

/// Result buffer of AH=48h, truncated to what the caller's `size` allows.
pub fn drive_parameters(entry: &DriveEntry, size: u16) -> Option<Vec<u8>> {
    let len = match usize::from(size) {
        n if n >= PARAMS_V3_LEN => PARAMS_V3_LEN,
        n if n >= PARAMS_V2_LEN => PARAMS_V2_LEN,
        n if n >= PARAMS_V1_LEN => PARAMS_V1_LEN,
        _ => return None,
    };
    let mut t = vec![0u8; PARAMS_V3_LEN];
    t[0x00..0x02].copy_from_slice(&(len as u16).to_le_bytes());

    let mut info = 0;
    if entry.removable || entry.cdrom {
        info |= INFO_REMOVABLE | INFO_CHANGE_LINE | INFO_LOCKABLE;
    }
    if entry.cdrom {
        info |= INFO_CHS_MAX;
    }
    if let Some(chs) = entry.chs {
        info |= INFO_CHS_VALID;
        t[0x04..0x08].copy_from_slice(&chs.cylinders.to_le_bytes());
        t[0x08..0x0C].copy_from_slice(&chs.heads.to_le_bytes());
        t[0x0C..0x10].copy_from_slice(&chs.sectors_per_track.to_le_bytes());
    }
    t[0x02..0x04].copy_from_slice(&info.to_le_bytes());
    t[0x10..0x18].copy_from_slice(&entry.sectors.to_le_bytes());
    t[0x18..0x1A].copy_from_slice(&entry.sector_size.to_le_bytes());
    t[0x1A..0x1E].copy_from_slice(&NO_DPTE.to_le_bytes());

    t[0x1E..0x20].copy_from_slice(&DEVICE_PATH_KEY.to_le_bytes());
    t[0x20] = DEVICE_PATH_LEN;
    let (host_bus, interface): (&[u8; 4], &[u8; 8]) = match entry.kind {
        ControllerKind::Ata => (b"ISA ", b"ATA     "),
        ControllerKind::Atapi => (b"ISA ", b"ATAPI   "),
        ControllerKind::Ahci => (b"PCI ", b"SATA    "),
        ControllerKind::Scsi => match entry.io {
            IoBase::Scsi(ScsiWindow::Port(_)) => (b"ISA ", b"SCSI    "),
            _ => (b"PCI ", b"SCSI    "),
        },
    };
    t[0x24..0x28].copy_from_slice(host_bus);
    t[0x28..0x30].copy_from_slice(interface);
    match entry.io {
        IoBase::Ide(ports) => t[0x30..0x32].copy_from_slice(&ports.cmd_base.to_le_bytes()),
        IoBase::Scsi(ScsiWindow::Port(base)) => {
            t[0x30..0x32].copy_from_slice(&base.to_le_bytes())
        }
        _ => {}
    }
    match entry.kind {
        ControllerKind::Ahci => t[0x38] = entry.channel,
        ControllerKind::Scsi => {
            t[0x38..0x3A].copy_from_slice(&u16::from(entry.unit).to_le_bytes())
        }
        ControllerKind::Ata | ControllerKind::Atapi => t[0x38] = entry.unit,
    }
    let sum = t[0x1E..0x41].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    t[0x41] = sum.wrapping_neg();

    t.truncate(len);
    Some(t)
}

impl DiskBios {
    /// AH=42h/43h/44h.
    ///
    /// On failure the packet's block count is written back as zero.
    pub(super) fn extended_transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        cpu: &mut RealModeCpu,
        target: &Target,
        drive: u8,
        ah: u8,
    ) -> Outcome {
        let dap_addr = FarPtr::new(cpu.ds, cpu.si()).linear();
        let dap = DiskAddressPacket::read(bus, dap_addr)?;
        let outcome = self.run_extended(bus, target, &dap, drive, ah);
        if outcome.is_err() {
            bus.write_u16(dap_addr + DAP_COUNT_OFFSET, 0);
        }
        outcome
    }

    fn run_extended(
        &mut self,
        bus: &mut dyn BiosBus,
        target: &Target,
        dap: &DiskAddressPacket,
        drive: u8,
        ah: u8,
    ) -> Outcome {
        if dap.count > MAX_DAP_SECTORS {
            return Err(Int13Status::InvalidFunction);
        }
        if dap.count == 0 {
            return Ok(0);
        }
        let count = u32::from(dap.count);
        let xfer = match ah {
            0x42 => Transfer::read(dap.lba, count, dap.buffer),
            0x43 => Transfer::write(dap.lba, count, dap.buffer),
            _ => Transfer::verify(dap.lba, count),
        };
        let entry = target.entry();
        // CD capacity can change with the medium; the drive checks the range itself.
        if !entry.cdrom {
            xfer.check_bounds(entry).map_err(|_| Int13Status::SectorNotFound)?;
        }
        self.with_controller(bus, target, |controller, bus, entry| {
            controller.transfer(bus, entry, &xfer)
        })
        .map_err(|err| driver_status(drive, ah, &err))?;
        Ok(0)
    }
}

/// AH=47h.
pub(super) fn extended_seek(
    bus: &mut dyn BiosBus,
    cpu: &mut RealModeCpu,
    target: &Target,
) -> Outcome {
    let dap = DiskAddressPacket::read(bus, FarPtr::new(cpu.ds, cpu.si()).linear())?;
    let entry = target.entry();
    if !entry.cdrom && dap.lba >= entry.sectors {
        return Err(Int13Status::SectorNotFound);
    }
    Ok(0)
}

/// AH=48h.
pub(super) fn extended_parameters(
    bus: &mut dyn BiosBus,
    cpu: &mut RealModeCpu,
    target: &Target,
) -> Outcome {
    let addr = FarPtr::new(cpu.ds, cpu.si()).linear();
    let size = bus.read_u16(addr);
    let table = drive_parameters(target.entry(), size).ok_or(Int13Status::InvalidFunction)?;
    bus.write_physical(addr, &table);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdeChannelPorts;
    use crate::geometry::Chs;
    use crate::registry::AtaCaps;
    use memory::DenseMemory;

    fn disk() -> DriveEntry {
        DriveEntry {
            kind: ControllerKind::Ata,
            controller: 0,
            channel: 0,
            unit: 1,
            io: IoBase::Ide(IdeChannelPorts::LEGACY[0]),
            sectors: 1_000_000,
            sector_size: 512,
            chs: Chs::translate(None, 1_000_000),
            removable: false,
            cdrom: false,
            caps: AtaCaps::default(),
        }
    }

    #[test]
    fn short_packet_rejected_from_size_byte_alone() {
        let mut mem = DenseMemory::new(0x1000);
        mem.write_u8(0x500, 0x0F);
        mem.write_u16(0x502, 1);
        assert_eq!(
            DiskAddressPacket::read(&mut mem, 0x500),
            Err(Int13Status::InvalidFunction)
        );
    }

    #[test]
    fn segmented_and_flat_buffers() {
        let mut mem = DenseMemory::new(0x1000);
        mem.write_u8(0x500, 0x10);
        mem.write_u16(0x502, 4);
        mem.write_u32(0x504, 0x1000_0020);
        mem.write_u64(0x508, 77);
        let dap = DiskAddressPacket::read(&mut mem, 0x500).unwrap();
        assert_eq!(dap.count, 4);
        assert_eq!(dap.lba, 77);
        assert_eq!(dap.buffer, 0x10020);

        // A 16-byte packet never looks at the flat address even with the marker set.
        mem.write_u32(0x504, 0xFFFF_FFFF);
        mem.write_u64(0x510, 0x1_2000_0000);
        let dap = DiskAddressPacket::read(&mut mem, 0x500).unwrap();
        assert_eq!(dap.buffer, FarPtr::FLAT_MARKER.linear());

        mem.write_u8(0x500, 0x18);
        let dap = DiskAddressPacket::read(&mut mem, 0x500).unwrap();
        assert_eq!(dap.buffer, 0x1_2000_0000);
    }

    #[test]
    fn parameter_table_versions() {
        assert_eq!(drive_parameters(&disk(), 0x19), None);
        assert_eq!(drive_parameters(&disk(), 0x1A).unwrap().len(), PARAMS_V1_LEN);

        let v2 = drive_parameters(&disk(), 0x20).unwrap();
        assert_eq!(v2.len(), PARAMS_V2_LEN);
        assert_eq!(u16::from_le_bytes([v2[0], v2[1]]), 0x1E);
        assert_eq!(&v2[0x1A..0x1E], &[0xFF; 4]);

        let v3 = drive_parameters(&disk(), 0x80).unwrap();
        assert_eq!(v3.len(), PARAMS_V3_LEN);
        assert_eq!(u16::from_le_bytes([v3[0x1E], v3[0x1F]]), 0xBEDD);
        assert_eq!(v3[0x20], 0x24);
        assert_eq!(&v3[0x24..0x28], b"ISA ");
        assert_eq!(&v3[0x28..0x30], b"ATA     ");
        assert_eq!(u16::from_le_bytes([v3[0x30], v3[0x31]]), 0x1F0);
        assert_eq!(v3[0x38], 1);
        let sum = v3[0x1E..0x42].iter().fold(0u8, |a, &b| a.wrapping_add(b));
        assert_eq!(sum, 0);

        let sectors = u64::from_le_bytes(v3[0x10..0x18].try_into().unwrap());
        assert_eq!(sectors, 1_000_000);
        assert_eq!(u16::from_le_bytes([v3[0x18], v3[0x19]]), 512);
        assert_ne!(u16::from_le_bytes([v3[2], v3[3]]) & INFO_CHS_VALID, 0);
    }
}
