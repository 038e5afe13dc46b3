//! Test machine wiring the firmware's bus to the storage controller models.

#![allow(dead_code)]

use bios_disk::{DiskBios, DiskBiosConfig, IdeChannelPorts, Mmio, PortIo, RealModeCpu};
use bios_disk::{Disposition, ScsiWindow};
use bios_disk_devices::{AhciController, IdeChannel, MemDisk, ScsiAdapterModel, CD_SECTOR_SIZE};
use memory::{DenseMemory, MemoryBus};

pub const RAM_SIZE: usize = 0x10_0000;
pub const ABAR: u64 = 0xFEBF_0000;
pub const SCSI_PORT_BASE: u16 = 0x330;
pub const SCSI_MMIO_BASE: u64 = 0xFED0_0000;

const AHCI_WINDOW: u64 = 0x1100;
const AHCI_PORT_BASE: u64 = 0x100;
const AHCI_PORT_STRIDE: u64 = 0x80;
const AHCI_PORT_CI: u64 = 0x38;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub struct TestMachine {
    pub mem: DenseMemory,
    pub ide: Vec<IdeChannel>,
    pub ahci: Option<AhciController>,
    pub scsi: Option<(ScsiWindow, ScsiAdapterModel)>,
    /// Port and MMIO accesses since the last [`TestMachine::clear_io_counts`].
    pub port_accesses: usize,
    pub mmio_accesses: usize,
}

impl Default for TestMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestMachine {
    /// 1 MiB of RAM and four empty legacy IDE channels.
    pub fn new() -> Self {
        let ide = IdeChannelPorts::LEGACY
            .iter()
            .map(|p| IdeChannel::new(p.cmd_base, p.ctrl_base))
            .collect();
        Self {
            mem: DenseMemory::new(RAM_SIZE),
            ide,
            ahci: None,
            scsi: None,
            port_accesses: 0,
            mmio_accesses: 0,
        }
    }

    pub fn with_ahci(mut self, hba: AhciController) -> Self {
        self.ahci = Some(hba);
        self
    }

    pub fn with_scsi(mut self, window: ScsiWindow, adapter: ScsiAdapterModel) -> Self {
        self.scsi = Some((window, adapter));
        self
    }

    /// Configuration describing exactly the attached controllers.
    pub fn config(&self) -> DiskBiosConfig {
        DiskBiosConfig {
            ahci_abars: self.ahci.iter().map(|_| ABAR).collect(),
            scsi_adapters: self.scsi.iter().map(|(window, _)| *window).collect(),
            ..DiskBiosConfig::default()
        }
    }

    /// Build a BIOS for this machine and run POST.
    pub fn post(&mut self) -> DiskBios {
        self.post_with(self.config())
    }

    pub fn post_with(&mut self, config: DiskBiosConfig) -> DiskBios {
        init_tracing();
        let mut bios = DiskBios::new(config);
        bios.post(self);
        bios
    }

    pub fn clear_io_counts(&mut self) {
        self.port_accesses = 0;
        self.mmio_accesses = 0;
    }

    pub fn io_count(&self) -> usize {
        self.port_accesses + self.mmio_accesses
    }

    fn ide_channel(&mut self, port: u16) -> Option<&mut IdeChannel> {
        self.ide.iter_mut().find(|ch| ch.decodes(port))
    }

    fn scsi_port(&mut self, port: u16) -> Option<(&mut ScsiAdapterModel, u8)> {
        match &mut self.scsi {
            Some((ScsiWindow::Port(base), adapter)) if (*base..*base + 4).contains(&port) => {
                let reg = (port - *base) as u8;
                Some((adapter, reg))
            }
            _ => None,
        }
    }

    fn scsi_mmio(&mut self, addr: u64) -> Option<(&mut ScsiAdapterModel, u8)> {
        match &mut self.scsi {
            Some((ScsiWindow::Mmio(base), adapter)) if (*base..*base + 16).contains(&addr) => {
                let reg = ((addr - *base) / 4) as u8;
                Some((adapter, reg))
            }
            _ => None,
        }
    }
}

impl MemoryBus for TestMachine {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        self.mem.read_physical(paddr, buf);
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        self.mem.write_physical(paddr, buf);
    }
}

impl PortIo for TestMachine {
    fn inb(&mut self, port: u16) -> u8 {
        self.port_accesses += 1;
        if let Some(ch) = self.ide_channel(port) {
            return ch.io_read(port, 1) as u8;
        }
        match self.scsi_port(port) {
            Some((adapter, reg)) => adapter.read(reg),
            None => 0xFF,
        }
    }

    fn outb(&mut self, port: u16, val: u8) {
        self.port_accesses += 1;
        if let Some(ch) = self.ide_channel(port) {
            ch.io_write(port, 1, u32::from(val));
        } else if let Some((adapter, reg)) = self.scsi_port(port) {
            adapter.write(reg, val);
        }
    }

    fn inw(&mut self, port: u16) -> u16 {
        self.port_accesses += 1;
        match self.ide_channel(port) {
            Some(ch) => ch.io_read(port, 2) as u16,
            None => 0xFFFF,
        }
    }

    fn outw(&mut self, port: u16, val: u16) {
        self.port_accesses += 1;
        if let Some(ch) = self.ide_channel(port) {
            ch.io_write(port, 2, u32::from(val));
        }
    }
}

impl Mmio for TestMachine {
    fn mmio_read32(&mut self, addr: u64) -> u32 {
        self.mmio_accesses += 1;
        if let Some(hba) = self.ahci.as_mut() {
            if (ABAR..ABAR + AHCI_WINDOW).contains(&addr) {
                return hba.read_u32(addr - ABAR);
            }
        }
        match self.scsi_mmio(addr) {
            Some((adapter, reg)) => u32::from(adapter.read(reg)),
            None => u32::MAX,
        }
    }

    fn mmio_write32(&mut self, addr: u64, val: u32) {
        self.mmio_accesses += 1;
        if let Some(hba) = self.ahci.as_mut() {
            if (ABAR..ABAR + AHCI_WINDOW).contains(&addr) {
                let offset = addr - ABAR;
                hba.write_u32(offset, val);
                let is_ci = offset >= AHCI_PORT_BASE
                    && (offset - AHCI_PORT_BASE) % AHCI_PORT_STRIDE == AHCI_PORT_CI;
                if is_ci {
                    hba.process(&mut self.mem);
                }
                return;
            }
        }
        if let Some((adapter, reg)) = self.scsi_mmio(addr) {
            adapter.write(reg, val as u8);
        }
    }
}

/// Register image for an INT 13h call.
pub fn regs(ax: u16, dl: u8) -> RealModeCpu {
    let mut cpu = RealModeCpu::default();
    cpu.set_ax(ax);
    cpu.set_dl(dl);
    cpu
}

/// Issue INT 13h and require the BIOS to handle it.
pub fn int13(bios: &mut DiskBios, machine: &mut TestMachine, cpu: &mut RealModeCpu) {
    assert_eq!(bios.int13(machine, cpu), Disposition::Handled);
}

/// Write a 16-byte disk address packet at `addr` with a `0000:buffer` pointer.
pub fn write_dap(mem: &mut DenseMemory, addr: u64, count: u16, buffer: u16, lba: u64) {
    mem.write_u8(addr, 0x10);
    mem.write_u8(addr + 1, 0);
    mem.write_u16(addr + 2, count);
    mem.write_u32(addr + 4, u32::from(buffer));
    mem.write_u64(addr + 8, lba);
}

/// AH=42h/43h through a DAP at 0000:0500.
pub fn extended(
    bios: &mut DiskBios,
    machine: &mut TestMachine,
    ah: u8,
    drive: u8,
    lba: u64,
    count: u16,
    buffer: u16,
) -> RealModeCpu {
    write_dap(&mut machine.mem, 0x500, count, buffer, lba);
    let mut cpu = regs(u16::from(ah) << 8, drive);
    cpu.ds = 0;
    cpu.esi = 0x500;
    int13(bios, machine, &mut cpu);
    cpu
}

/// Boot catalog description for [`bootable_cd`].
#[derive(Debug, Clone, Copy)]
pub struct CatalogSpec {
    pub media_type: u8,
    pub load_segment: u16,
    pub sector_count: u16,
    pub load_rba: u32,
    pub corrupt_checksum: bool,
}

pub const CATALOG_LBA: u32 = 20;

/// ISO image with a boot record at sector 17 and a catalog at [`CATALOG_LBA`].
///
/// The image's first CD sector carries a boot signature at byte 510 and is returned alongside.
pub fn bootable_cd(sectors: u64, spec: CatalogSpec) -> (MemDisk, Vec<u8>) {
    let mut cd = MemDisk::new(sectors, CD_SECTOR_SIZE);

    let mut record = vec![0u8; CD_SECTOR_SIZE];
    record[1..6].copy_from_slice(b"CD001");
    record[6] = 1;
    let id = b"EL TORITO SPECIFICATION";
    record[7..7 + id.len()].copy_from_slice(id);
    record[7 + id.len()..39].fill(b' ');
    record[0x47..0x4B].copy_from_slice(&CATALOG_LBA.to_le_bytes());
    assert!(cd.write(17, &record));

    let mut catalog = vec![0u8; CD_SECTOR_SIZE];
    catalog[0] = 0x01;
    catalog[1] = 0x00;
    catalog[4..12].copy_from_slice(b"TESTDISC");
    catalog[0x1E] = 0x55;
    catalog[0x1F] = 0xAA;
    let sum = catalog[..32]
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    let mut fix = sum.wrapping_neg();
    if spec.corrupt_checksum {
        fix = fix.wrapping_add(1);
    }
    catalog[0x1C..0x1E].copy_from_slice(&fix.to_le_bytes());
    catalog[32] = 0x88;
    catalog[33] = spec.media_type;
    catalog[34..36].copy_from_slice(&spec.load_segment.to_le_bytes());
    catalog[38..40].copy_from_slice(&spec.sector_count.to_le_bytes());
    catalog[40..44].copy_from_slice(&spec.load_rba.to_le_bytes());
    assert!(cd.write(u64::from(CATALOG_LBA), &catalog));

    let mut image = MemDisk::pattern(u64::from(spec.load_rba), CD_SECTOR_SIZE);
    image[510] = 0x55;
    image[511] = 0xAA;
    assert!(cd.write(u64::from(spec.load_rba), &image));
    (cd, image)
}
