//! INT 13h dispatcher.
//!
//! Every call decodes AH, resolves DL to a unit (through the El Torito alias when one is
//! active), validates addresses against the cached geometry, runs the owning driver and folds
//! the outcome into CF/AH and the last-status byte. Legacy CHS functions live here; the EDD
//! functions are in [`edd`] and the removable-media/El Torito ones in `cdrom`.

mod cdrom;
pub mod edd;

use tracing::{debug, trace, warn};

use crate::bda;
use crate::bios::{DiskBios, Target};
use crate::bus::{BiosBus, FarPtr};
use crate::controller::{MediaCommand, Transfer};
use crate::cpu::RealModeCpu;
use crate::error::{DriverError, Int13Status};
use crate::geometry::ChsAddress;
use crate::registry::{FIRST_CDROM, FIRST_HARD_DISK};

/// What the caller should do after [`DiskBios::int13`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The register image holds the result.
    Handled,
    /// The drive belongs to another handler (floppy services); invoke the previous vector.
    Chain,
}

/// `Ok(ah)` on success, the failure status otherwise.
pub(crate) type Outcome = Result<u8, Int13Status>;

/// Largest AL accepted by the CHS transfer functions.
pub const MAX_CHS_SECTORS: u8 = 128;

/// Fold a driver failure into its INT 13h status, logging it.
pub(crate) fn driver_status(drive: u8, ah: u8, err: &DriverError) -> Int13Status {
    let status = Int13Status::from(err);
    match err {
        DriverError::Timeout(_) => warn!(
            drive = format_args!("{drive:#04x}"),
            ah = format_args!("{ah:#04x}"),
            %err,
            "disk command timed out"
        ),
        _ => debug!(
            drive = format_args!("{drive:#04x}"),
            ah = format_args!("{ah:#04x}"),
            %err,
            status = format_args!("{:#04x}", status.code()),
            "disk command failed"
        ),
    }
    status
}

fn is_fixed_disk(drive: u8) -> bool {
    (FIRST_HARD_DISK..FIRST_CDROM).contains(&drive)
}

impl DiskBios {
    /// Service one INT 13h call described by `cpu`.
    pub fn int13(&mut self, bus: &mut dyn BiosBus, cpu: &mut RealModeCpu) -> Disposition {
        let ah = cpu.ah();
        let drive = cpu.dl();
        trace!(
            ah = format_args!("{ah:#04x}"),
            drive = format_args!("{drive:#04x}"),
            "INT 13h"
        );

        if ah == 0x4B {
            let outcome = self.eltorito_services(bus, cpu);
            self.finish(bus, cpu, drive, outcome);
            return Disposition::Handled;
        }

        let Some(target) = self.resolve(drive) else {
            if drive < FIRST_HARD_DISK {
                return Disposition::Chain;
            }
            self.finish(bus, cpu, drive, Err(Int13Status::InvalidFunction));
            return Disposition::Handled;
        };

        if ah == 0x01 {
            let status = self.last_status;
            cpu.set_ah(status);
            cpu.set_carry(status != 0);
            return Disposition::Handled;
        }

        let outcome = match ah {
            0x00 | 0x0D => self.reset_drive(bus, &target, drive, ah),
            0x02..=0x04 => self.chs_transfer(bus, cpu, &target, drive, ah),
            0x05 => format_track(&target),
            0x08 => self.drive_parameters(cpu, &target),
            0x09 | 0x11 | 0x14 => Ok(0),
            0x0C => seek(cpu, &target),
            0x10 => self.test_ready(bus, &target, drive, ah),
            0x15 => disk_type(cpu, &target),
            0x16 => change_line(&target),
            0x41 => extensions_present(cpu, &target),
            0x42..=0x44 => self.extended_transfer(bus, cpu, &target, drive, ah),
            0x45 => self.lock_unlock(bus, cpu, &target, drive),
            0x46 => self.eject(bus, &target, drive),
            0x47 => edd::extended_seek(bus, cpu, &target),
            0x48 => edd::extended_parameters(bus, cpu, &target),
            0x49 => Ok(0),
            _ => {
                debug!(ah = format_args!("{ah:#04x}"), "unsupported INT 13h function");
                Err(Int13Status::InvalidFunction)
            }
        };
        self.finish(bus, cpu, drive, outcome);
        Disposition::Handled
    }

    fn finish(
        &mut self,
        bus: &mut dyn BiosBus,
        cpu: &mut RealModeCpu,
        drive: u8,
        outcome: Outcome,
    ) {
        let status = match outcome {
            Ok(ah) => {
                cpu.set_ah(ah);
                cpu.set_carry(false);
                0
            }
            Err(status) => {
                cpu.set_ah(status.code());
                cpu.set_carry(true);
                status.code()
            }
        };
        self.last_status = status;
        if is_fixed_disk(drive) {
            bda::write_last_status(bus, status);
        }
    }

    /// Hard disks visible to the guest, counting an emulated hard disk.
    pub(crate) fn visible_hard_disks(&self) -> u8 {
        let emulated = self
            .emulation
            .filter(|s| s.active && is_fixed_disk(s.drive))
            .is_some();
        self.registry.hard_disk_count() + u8::from(emulated)
    }

    fn reset_drive(
        &mut self,
        bus: &mut dyn BiosBus,
        target: &Target,
        drive: u8,
        ah: u8,
    ) -> Outcome {
        self.with_controller(bus, target, |controller, bus, entry| {
            controller.reset(bus, entry)
        })
        .map(|()| 0)
        .map_err(|err| match driver_status(drive, ah, &err) {
            Int13Status::Timeout => Int13Status::Timeout,
            _ => Int13Status::ResetFailed,
        })
    }

    fn chs_transfer(
        &mut self,
        bus: &mut dyn BiosBus,
        cpu: &mut RealModeCpu,
        target: &Target,
        drive: u8,
        ah: u8,
    ) -> Outcome {
        let count = cpu.al();
        cpu.set_al(0);
        if count == 0 || count > MAX_CHS_SECTORS {
            return Err(Int13Status::InvalidFunction);
        }
        let entry = target.entry();
        let chs = entry.chs.ok_or(Int13Status::InvalidFunction)?;
        let lba = chs
            .to_lba(ChsAddress::from_int13(cpu.cx(), cpu.dh()))
            .ok_or(Int13Status::SectorNotFound)?;
        let buffer = FarPtr::new(cpu.es, cpu.bx()).linear();
        let xfer = match ah {
            0x02 => Transfer::read(lba, u32::from(count), buffer),
            0x03 => Transfer::write(lba, u32::from(count), buffer),
            _ => Transfer::verify(lba, u32::from(count)),
        };
        xfer.check_bounds(entry).map_err(|_| Int13Status::SectorNotFound)?;

        self.with_controller(bus, target, |controller, bus, entry| {
            controller.transfer(bus, entry, &xfer)
        })
        .map_err(|err| driver_status(drive, ah, &err))?;
        cpu.set_al(count);
        Ok(0)
    }

    fn drive_parameters(&self, cpu: &mut RealModeCpu, target: &Target) -> Outcome {
        if let Some(state) = target.emulation().filter(|s| s.profile.is_floppy()) {
            let chs = state.chs.ok_or(Int13Status::InvalidFunction)?;
            let (cx, dh) = chs.int13_limits();
            cpu.set_ax(0);
            cpu.set_bl(state.profile.floppy_cmos_type().unwrap_or(0));
            cpu.set_cx(cx);
            cpu.set_dx((u16::from(dh) << 8) | 0x01);
            cpu.es = 0;
            cpu.set_di(0);
            return Ok(0);
        }
        let chs = target.entry().chs.ok_or(Int13Status::InvalidFunction)?;
        let (cx, dh) = chs.int13_limits();
        cpu.set_al(0);
        cpu.set_cx(cx);
        cpu.set_dx((u16::from(dh) << 8) | u16::from(self.visible_hard_disks()));
        Ok(0)
    }

    fn test_ready(
        &mut self,
        bus: &mut dyn BiosBus,
        target: &Target,
        drive: u8,
        ah: u8,
    ) -> Outcome {
        if !target.entry().cdrom {
            return Ok(0);
        }
        match self.with_controller(bus, target, |controller, bus, entry| {
            controller.media(bus, entry, MediaCommand::TestUnitReady)
        }) {
            Ok(()) | Err(DriverError::Unsupported) => Ok(0),
            Err(err) => Err(driver_status(drive, ah, &err)),
        }
    }
}

fn format_track(target: &Target) -> Outcome {
    let entry = target.entry();
    if entry.cdrom {
        Err(Int13Status::InvalidFunction)
    } else if target.emulation().is_some() {
        Err(Int13Status::WriteProtected)
    } else {
        Ok(0)
    }
}

fn seek(cpu: &RealModeCpu, target: &Target) -> Outcome {
    let chs = target.entry().chs.ok_or(Int13Status::InvalidFunction)?;
    let addr = ChsAddress::from_int13(cpu.cx(), cpu.dh());
    if addr.cylinder >= chs.cylinders || addr.head >= chs.heads {
        return Err(Int13Status::SeekFailure);
    }
    Ok(0)
}

fn disk_type(cpu: &mut RealModeCpu, target: &Target) -> Outcome {
    if let Some(state) = target.emulation().filter(|s| s.profile.is_floppy()) {
        debug!(profile = ?state.profile, "disk type of emulated floppy");
        return Ok(0x02);
    }
    let entry = target.entry();
    if entry.cdrom {
        return Err(Int13Status::InvalidFunction);
    }
    let sectors = entry.sectors.min(u64::from(u32::MAX)) as u32;
    cpu.set_cx((sectors >> 16) as u16);
    cpu.set_dx(sectors as u16);
    Ok(0x03)
}

fn change_line(target: &Target) -> Outcome {
    match target.emulation() {
        Some(state) if state.profile.is_floppy() => Ok(0),
        _ => Err(Int13Status::InvalidFunction),
    }
}

fn extensions_present(cpu: &mut RealModeCpu, target: &Target) -> Outcome {
    if cpu.bx() != 0x55AA || target.emulation().is_some_and(|s| s.profile.is_floppy()) {
        return Err(Int13Status::InvalidFunction);
    }
    cpu.set_bx(0xAA55);
    // Fixed disk access, drive locking/ejecting, EDD.
    cpu.set_cx(0x0007);
    Ok(0x30)
}
