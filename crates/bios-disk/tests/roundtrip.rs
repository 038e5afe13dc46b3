mod common;

use bios_disk::ScsiWindow;
use bios_disk_devices::{AhciController, AtaDisk, ScsiAdapterModel, ScsiTarget};
use common::{extended, TestMachine, SCSI_MMIO_BASE, SCSI_PORT_BASE};
use memory::MemoryBus;
use proptest::prelude::*;

const SECTORS: u64 = 1 << 16;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Ide,
    Ahci,
    ScsiPort,
    ScsiMmio,
}

fn machine(backend: Backend) -> TestMachine {
    match backend {
        Backend::Ide => {
            let mut machine = TestMachine::new();
            machine.ide[0].attach_master_ata(AtaDisk::new(SECTORS).with_max_multiple(8));
            machine
        }
        Backend::Ahci => {
            let mut hba = AhciController::new(1);
            hba.attach_disk(0, AtaDisk::new(SECTORS));
            TestMachine::new().with_ahci(hba)
        }
        Backend::ScsiPort | Backend::ScsiMmio => {
            let mut adapter = ScsiAdapterModel::new();
            adapter.attach(0, ScsiTarget::disk(SECTORS));
            let window = match backend {
                Backend::ScsiPort => ScsiWindow::Port(SCSI_PORT_BASE),
                _ => ScsiWindow::Mmio(SCSI_MMIO_BASE),
            };
            TestMachine::new().with_scsi(window, adapter)
        }
    }
}

fn backend() -> impl Strategy<Value = Backend> {
    prop_oneof![
        Just(Backend::Ide),
        Just(Backend::Ahci),
        Just(Backend::ScsiPort),
        Just(Backend::ScsiMmio),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn written_sectors_read_back(
        backend in backend(),
        lba in 0u64..SECTORS - 40,
        count in 1u16..40,
        seed in any::<u8>(),
    ) {
        let mut machine = machine(backend);
        let mut bios = machine.post();
        let len = usize::from(count) * 512;
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect();

        machine.mem.write_physical(0x8000, &data);
        let cpu = extended(&mut bios, &mut machine, 0x43, 0x80, lba, count, 0x8000);
        prop_assert!(!cpu.carry(), "write AH={:#04x}", cpu.ah());

        machine.mem.fill(0x8000, len, 0);
        let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, lba, count, 0x8000);
        prop_assert!(!cpu.carry(), "read AH={:#04x}", cpu.ah());
        prop_assert_eq!(machine.mem.read_u16(0x502), count);
        prop_assert_eq!(machine.mem.read_bytes(0x8000, len), data);
    }
}
