mod common;

use bios_disk::ahci::AhciHba;
use bios_disk::dma::DmaWindow;
use bios_disk::poll::PollBudget;
use bios_disk::{ControllerKind, DriverError, IoBase, PollBudgets, WaitFor};
use bios_disk_devices::{AhciController, AhciFault, AtaDisk, MemDisk};
use common::{extended, int13, regs, TestMachine, ABAR};
use memory::MemoryBus;

fn sata_machine(sectors: u64) -> TestMachine {
    let mut hba = AhciController::new(4);
    hba.attach_disk(2, AtaDisk::new(sectors));
    TestMachine::new().with_ahci(hba)
}

#[test]
fn sata_disk_is_registered_and_readable() {
    common::init_tracing();
    let mut machine = sata_machine(1 << 20);
    let mut bios = machine.post();

    let entry = *bios.registry().get(0x80).expect("SATA disk registered");
    assert_eq!(entry.kind, ControllerKind::Ahci);
    assert_eq!(entry.channel, 2);
    assert_eq!(entry.sectors, 1 << 20);
    assert!(matches!(entry.io, IoBase::Ahci { abar, .. } if abar == ABAR));

    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 12_345, 4, 0x2000);
    assert!(!cpu.carry(), "AH={:#04x}", cpu.ah());
    let expect: Vec<u8> = (12_345..12_349).flat_map(|lba| MemDisk::pattern(lba, 512)).collect();
    assert_eq!(machine.mem.read_bytes(0x2000, 4 * 512), expect);
}

#[test]
fn sata_write_then_read_back() {
    let mut machine = sata_machine(1 << 16);
    let mut bios = machine.post();

    let data: Vec<u8> = (0..2 * 512).map(|i| (i % 251) as u8).collect();
    machine.mem.write_physical(0x3000, &data);
    let cpu = extended(&mut bios, &mut machine, 0x43, 0x80, 100, 2, 0x3000);
    assert!(!cpu.carry());
    let disk = machine.ahci.as_ref().unwrap().disk(2).unwrap();
    assert_eq!(disk.disk.read(100, 2), Some(data.clone()));

    machine.mem.fill(0x3000, 2 * 512, 0);
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 100, 2, 0x3000);
    assert!(!cpu.carry());
    assert_eq!(machine.mem.read_bytes(0x3000, 2 * 512), data);
}

#[test]
fn odd_guest_buffer_is_staged_through_aligned_memory() {
    let mut machine = sata_machine(1 << 16);
    let mut bios = machine.post();

    machine.mem.fill(0x2000, 3 * 512, 0xEE);
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 77, 2, 0x2001);
    assert!(!cpu.carry(), "AH={:#04x}", cpu.ah());
    let expect: Vec<u8> = (77..79).flat_map(|lba| MemDisk::pattern(lba, 512)).collect();
    assert_eq!(machine.mem.read_bytes(0x2001, 2 * 512), expect);
    assert_eq!(machine.mem.read_u8(0x2000), 0xEE);
    assert_eq!(machine.mem.read_u8(0x2001 + 2 * 512), 0xEE);

    // PxCLB of port 2, then CTBA from slot 0's header, then the first PRDT entry's DBA.
    let clb = u64::from(machine.ahci.as_mut().unwrap().read_u32(0x100 + 2 * 0x80));
    let ctba = u64::from(machine.mem.read_u32(clb + 8));
    let dba = machine.mem.read_u32(ctba + 0x80);
    assert_eq!(dba & 1, 0, "PRDT DBA {dba:#x}");

    let data: Vec<u8> = (0..512).map(|i| (i * 7 % 256) as u8).collect();
    machine.mem.write_physical(0x3001, &data);
    let cpu = extended(&mut bios, &mut machine, 0x43, 0x80, 500, 1, 0x3001);
    assert!(!cpu.carry(), "AH={:#04x}", cpu.ah());
    let disk = machine.ahci.as_ref().unwrap().disk(2).unwrap();
    assert_eq!(disk.disk.read(500, 1), Some(data));
}

#[test]
fn out_of_range_command_reports_sector_not_found() {
    let mut machine = sata_machine(4096);
    let mut bios = machine.post();

    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 4095, 2, 0x2000);
    assert!(cpu.carry());
    assert_eq!(cpu.ah(), 0x04);

    // The port recovers for the next request.
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 4095, 1, 0x2000);
    assert!(!cpu.carry());
    assert_eq!(machine.mem.read_bytes(0x2000, 512), MemDisk::pattern(4095, 512));
}

#[test]
fn port_that_will_not_stop_is_abandoned() {
    let mut hba = AhciController::new(1);
    hba.attach_disk(0, AtaDisk::new(8192));
    hba.set_fault(0, Some(AhciFault::StuckRunning));
    let mut machine = TestMachine::new().with_ahci(hba);
    let polls = PollBudgets {
        ahci_port_stop: PollBudget::new(16),
        ..PollBudgets::default()
    };
    let config = bios_disk::DiskBiosConfig {
        polls,
        ..machine.config()
    };

    let mut window = DmaWindow::new(config.ahci_dma_base, config.ahci_dma_size);
    let mut hba = AhciHba::init(&mut machine, 0, ABAR, &mut window, polls);
    assert!(!hba.port_ready(0));
    assert_eq!(
        hba.port_init(&mut machine, 0),
        Err(DriverError::Timeout(WaitFor::PortStop))
    );

    let bios = machine.post_with(config);
    assert_eq!(bios.registry().hard_disk_count(), 0);
    assert!(bios.registry().get(0x80).is_none());
}

#[test]
fn comreset_brings_a_dropped_link_back() {
    let mut hba = AhciController::new(1);
    hba.attach_disk(0, AtaDisk::new(2048));
    hba.drop_link(0);
    let mut machine = TestMachine::new().with_ahci(hba);
    let mut bios = machine.post();

    assert_eq!(bios.registry().hard_disk_count(), 1);
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 7, 1, 0x2000);
    assert!(!cpu.carry());
    assert_eq!(machine.mem.read_bytes(0x2000, 512), MemDisk::pattern(7, 512));
}

#[test]
fn port_without_link_registers_nothing() {
    let mut hba = AhciController::new(2);
    hba.attach_disk(1, AtaDisk::new(2048));
    hba.drop_link(1);
    hba.set_fault(1, Some(AhciFault::NoLink));
    let mut machine = TestMachine::new().with_ahci(hba);
    let bios = machine.post();
    assert_eq!(bios.registry().hard_disk_count(), 0);
}

#[test]
fn hung_command_times_out_and_port_recovers() {
    let mut machine = sata_machine(4096);
    let config = bios_disk::DiskBiosConfig {
        polls: PollBudgets {
            ahci_command: PollBudget::new(64),
            ..PollBudgets::default()
        },
        ..machine.config()
    };
    let mut bios = machine.post_with(config);

    machine.ahci.as_mut().unwrap().set_fault(2, Some(AhciFault::HungCommand));
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 0, 1, 0x2000);
    assert!(cpu.carry());
    assert_eq!(cpu.ah(), 0x80);
    assert_eq!(machine.mem.read_u16(0x502), 0);

    machine.ahci.as_mut().unwrap().set_fault(2, None);
    let mut cpu = regs(0x0000, 0x80);
    int13(&mut bios, &mut machine, &mut cpu);
    assert!(!cpu.carry());
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 0, 1, 0x2000);
    assert!(!cpu.carry());
    assert_eq!(machine.mem.read_bytes(0x2000, 512), MemDisk::pattern(0, 512));
}
