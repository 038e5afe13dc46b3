use crate::poll::PollBudget;

/// Command/control port pair of one IDE channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdeChannelPorts {
    pub cmd_base: u16,
    pub ctrl_base: u16,
}

impl IdeChannelPorts {
    pub const fn new(cmd_base: u16, ctrl_base: u16) -> Self {
        Self { cmd_base, ctrl_base }
    }

    /// Primary, secondary, tertiary and quaternary ISA channels.
    pub const LEGACY: [IdeChannelPorts; 4] = [
        IdeChannelPorts::new(0x1F0, 0x3F6),
        IdeChannelPorts::new(0x170, 0x376),
        IdeChannelPorts::new(0x1E8, 0x3EE),
        IdeChannelPorts::new(0x168, 0x36E),
    ];
}

/// Register window of a SCSI host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiWindow {
    /// Byte registers at consecutive I/O ports.
    Port(u16),
    /// 32-bit registers at a 4-byte stride.
    Mmio(u64),
}

/// Boot-order device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDevice {
    Cdrom,
    HardDisk,
}

/// Iteration budgets for every bounded hardware wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudgets {
    pub ata_busy: PollBudget,
    pub ata_drq: PollBudget,
    /// Post-SRST settle wait; devices may spin up during this window.
    pub ata_reset: PollBudget,
    pub ahci_port_stop: PollBudget,
    pub ahci_link: PollBudget,
    pub ahci_device_ready: PollBudget,
    pub ahci_command: PollBudget,
    pub scsi_ready: PollBudget,
    /// Per data byte.
    pub scsi_byte: PollBudget,
}

impl Default for PollBudgets {
    fn default() -> Self {
        Self {
            ata_busy: PollBudget::new(100_000),
            ata_drq: PollBudget::new(100_000),
            ata_reset: PollBudget::new(1_000_000),
            ahci_port_stop: PollBudget::new(50_000),
            ahci_link: PollBudget::new(10_000),
            ahci_device_ready: PollBudget::new(100_000),
            ahci_command: PollBudget::new(1_000_000),
            scsi_ready: PollBudget::new(100_000),
            scsi_byte: PollBudget::new(10_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskBiosConfig {
    /// IDE channels probed at POST, in drive-numbering order.
    pub ide_channels: Vec<IdeChannelPorts>,
    /// AHCI base addresses handed over by PCI enumeration, in scan order.
    pub ahci_abars: Vec<u64>,
    pub scsi_adapters: Vec<ScsiWindow>,
    /// Target ids `0..scsi_max_targets` are probed on every adapter.
    pub scsi_max_targets: u8,
    /// Low-memory region reserved for AHCI port contexts and the CD bounce buffer.
    ///
    /// Must lie below 4 GiB and be reserved from the guest (e.g. excluded from E820 RAM).
    pub ahci_dma_base: u64,
    pub ahci_dma_size: u64,
    /// Upper bound for SET MULTIPLE MODE; 0 or 1 disables READ/WRITE MULTIPLE.
    pub max_multiple_sectors: u16,
    /// Drive number given to El Torito floppy emulation.
    pub emulated_floppy_drive: u8,
    pub boot_order: Vec<BootDevice>,
    pub polls: PollBudgets,
}

impl Default for DiskBiosConfig {
    fn default() -> Self {
        Self {
            ide_channels: IdeChannelPorts::LEGACY.to_vec(),
            ahci_abars: Vec::new(),
            scsi_adapters: Vec::new(),
            scsi_max_targets: 8,
            ahci_dma_base: 0x0009_0000,
            ahci_dma_size: 0xF000,
            max_multiple_sectors: 16,
            emulated_floppy_drive: 0x00,
            boot_order: vec![BootDevice::Cdrom, BootDevice::HardDisk],
            polls: PollBudgets::default(),
        }
    }
}
