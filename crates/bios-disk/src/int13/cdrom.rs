//! Removable-media locking/eject (AH=45h/46h) and El Torito services (AH=4Bh).

use tracing::{debug, info};

use crate::bios::{DiskBios, Target};
use crate::bus::{BiosBus, FarPtr, MemoryBus};
use crate::controller::MediaCommand;
use crate::cpu::RealModeCpu;
use crate::error::{DriverError, Int13Status};

use super::{driver_status, Outcome};

const LOCK: u8 = 0x00;
const UNLOCK: u8 = 0x01;
const LOCK_STATUS: u8 = 0x02;

impl DiskBios {
    /// AH=4Bh: AL=00h terminates emulation, AL=01h only reports it.
    ///
    /// Both copy the specification packet to DS:SI.
    pub(super) fn eltorito_services(
        &mut self,
        bus: &mut dyn BiosBus,
        cpu: &mut RealModeCpu,
    ) -> Outcome {
        let subfunction = cpu.al();
        if subfunction > 0x01 {
            debug!(al = subfunction, "unsupported El Torito subfunction");
            return Err(Int13Status::InvalidFunction);
        }
        let state = self.emulation.as_mut().ok_or(Int13Status::InvalidFunction)?;
        bus.write_physical(FarPtr::new(cpu.ds, cpu.si()).linear(), &state.spec_packet());
        if subfunction == 0x00 && state.active {
            state.active = false;
            info!(
                drive = format_args!("{:#04x}", state.drive),
                "El Torito emulation terminated"
            );
        }
        Ok(0)
    }

    /// AH=45h. AL returns 1 while the drive holds at least one lock.
    pub(super) fn lock_unlock(
        &mut self,
        bus: &mut dyn BiosBus,
        cpu: &mut RealModeCpu,
        target: &Target,
        drive: u8,
    ) -> Outcome {
        let entry = target.entry();
        if !entry.removable && !entry.cdrom {
            return Err(Int13Status::NotRemovable);
        }
        let held = self.locks.get(&drive).copied().unwrap_or(0);
        let held = match cpu.al() {
            LOCK => {
                let next = held.checked_add(1).ok_or(Int13Status::LockCountExceeded)?;
                if held == 0 {
                    self.media_hint(bus, target, MediaCommand::Lock);
                }
                next
            }
            UNLOCK => {
                let next = held.checked_sub(1).ok_or(Int13Status::NotLocked)?;
                if next == 0 {
                    self.media_hint(bus, target, MediaCommand::Unlock);
                }
                next
            }
            LOCK_STATUS => held,
            _ => return Err(Int13Status::InvalidFunction),
        };
        if held == 0 {
            self.locks.remove(&drive);
        } else {
            self.locks.insert(drive, held);
        }
        cpu.set_al(u8::from(held > 0));
        Ok(0)
    }

    /// AH=46h.
    pub(super) fn eject(&mut self, bus: &mut dyn BiosBus, target: &Target, drive: u8) -> Outcome {
        let entry = target.entry();
        if !entry.removable && !entry.cdrom {
            return Err(Int13Status::NotRemovable);
        }
        if self.locks.get(&drive).is_some_and(|&n| n > 0) {
            return Err(Int13Status::Locked);
        }
        self.with_controller(bus, target, |controller, bus, entry| {
            controller.media(bus, entry, MediaCommand::Eject)
        })
        .map_err(|err| {
            driver_status(drive, 0x46, &err);
            Int13Status::EjectFailed
        })?;
        info!(drive = format_args!("{drive:#04x}"), "medium ejected");
        Ok(0)
    }

    /// Forward a lock state change to drives that support it; the count is authoritative.
    fn media_hint(&mut self, bus: &mut dyn BiosBus, target: &Target, cmd: MediaCommand) {
        let result = self.with_controller(bus, target, |controller, bus, entry| {
            controller.media(bus, entry, cmd)
        });
        match result {
            Ok(()) | Err(DriverError::Unsupported) => {}
            Err(err) => debug!(?cmd, %err, "media lock command failed"),
        }
    }
}
