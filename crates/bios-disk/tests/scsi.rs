mod common;

use bios_disk::{ControllerKind, IoBase, ScsiWindow};
use bios_disk_devices::{MemDisk, ScsiAdapterModel, ScsiTarget};
use common::{extended, TestMachine, SCSI_MMIO_BASE, SCSI_PORT_BASE};
use memory::MemoryBus;

fn adapter_with_disk(id: u8, blocks: u64) -> ScsiAdapterModel {
    let mut adapter = ScsiAdapterModel::new();
    adapter.attach(id, ScsiTarget::disk(blocks));
    adapter
}

fn check_backend(window: ScsiWindow) {
    common::init_tracing();
    let mut machine = TestMachine::new().with_scsi(window, adapter_with_disk(3, 2_000_000));
    let mut bios = machine.post();

    let entry = *bios.registry().get(0x80).expect("SCSI disk registered");
    assert_eq!(entry.kind, ControllerKind::Scsi);
    assert_eq!(entry.unit, 3);
    assert_eq!(entry.sector_size, 512);
    assert_eq!(entry.sectors, 2_000_000);
    assert_eq!(entry.io, IoBase::Scsi(window));

    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 1_999_998, 2, 0x2000);
    assert!(!cpu.carry(), "AH={:#04x}", cpu.ah());
    let mut expect = MemDisk::pattern(1_999_998, 512);
    expect.extend(MemDisk::pattern(1_999_999, 512));
    assert_eq!(machine.mem.read_bytes(0x2000, 1024), expect);

    let data = vec![0x5Au8; 512];
    machine.mem.write_physical(0x4000, &data);
    let cpu = extended(&mut bios, &mut machine, 0x43, 0x80, 42, 1, 0x4000);
    assert!(!cpu.carry());
    let (_, adapter) = machine.scsi.as_ref().unwrap();
    assert_eq!(adapter.target(3).unwrap().disk.read(42, 1), Some(data));
}

#[test]
fn port_backend_reads_and_writes() {
    check_backend(ScsiWindow::Port(SCSI_PORT_BASE));
}

#[test]
fn mmio_backend_reads_and_writes() {
    check_backend(ScsiWindow::Mmio(SCSI_MMIO_BASE));
}

#[test]
fn targets_are_numbered_in_id_order_and_cdroms_skipped() {
    let mut adapter = ScsiAdapterModel::new();
    adapter.attach(5, ScsiTarget::disk(4096));
    adapter.attach(1, ScsiTarget::disk(8192));
    adapter.attach(2, ScsiTarget::cdrom(300));
    let mut machine = TestMachine::new().with_scsi(ScsiWindow::Port(SCSI_PORT_BASE), adapter);
    let bios = machine.post();

    let registry = bios.registry();
    assert_eq!(registry.hard_disk_count(), 2);
    assert_eq!(registry.cdrom_count(), 0);
    assert_eq!(registry.get(0x80).unwrap().unit, 1);
    assert_eq!(registry.get(0x81).unwrap().unit, 5);
}

#[test]
fn missing_adapter_registers_nothing() {
    let mut machine = TestMachine::new();
    let config = bios_disk::DiskBiosConfig {
        scsi_adapters: vec![ScsiWindow::Port(SCSI_PORT_BASE)],
        ..machine.config()
    };
    let bios = machine.post_with(config);
    assert_eq!(bios.registry().hard_disk_count(), 0);
}

#[test]
fn read_past_capacity_fails_without_a_transfer() {
    let mut machine =
        TestMachine::new().with_scsi(ScsiWindow::Port(SCSI_PORT_BASE), adapter_with_disk(0, 64));
    let mut bios = machine.post();
    let cpu = extended(&mut bios, &mut machine, 0x42, 0x80, 64, 1, 0x2000);
    assert!(cpu.carry());
    assert_eq!(cpu.ah(), 0x04);
}

#[test]
fn data_out_phase_cut_short_is_not_a_successful_write() {
    let mut machine = TestMachine::new()
        .with_scsi(ScsiWindow::Port(SCSI_PORT_BASE), adapter_with_disk(0, 4096));
    let mut bios = machine.post();
    machine.scsi.as_mut().unwrap().1.set_data_out_cutoff(Some(100));

    machine.mem.write_physical(0x4000, &[0xA5; 1024]);
    let cpu = extended(&mut bios, &mut machine, 0x43, 0x80, 10, 2, 0x4000);
    assert!(cpu.carry());
    assert_eq!(cpu.ah(), 0x20);
    assert_eq!(machine.mem.read_u16(0x502), 0);
    let (_, adapter) = machine.scsi.as_ref().unwrap();
    assert_eq!(adapter.target(0).unwrap().disk.read(10, 2), {
        let mut expect = MemDisk::pattern(10, 512);
        expect.extend(MemDisk::pattern(11, 512));
        Some(expect)
    });

    machine.scsi.as_mut().unwrap().1.set_data_out_cutoff(None);
    let cpu = extended(&mut bios, &mut machine, 0x43, 0x80, 10, 2, 0x4000);
    assert!(!cpu.carry(), "AH={:#04x}", cpu.ah());
    let (_, adapter) = machine.scsi.as_ref().unwrap();
    assert_eq!(adapter.target(0).unwrap().disk.read(10, 2), Some(vec![0xA5; 1024]));
}
