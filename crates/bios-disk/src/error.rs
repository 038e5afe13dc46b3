use std::fmt;

use thiserror::Error;

use crate::ata::regs::AtaError;

/// Hardware condition a driver was waiting for when its poll budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    /// ATA `BSY` clear.
    NotBusy,
    /// ATA `DRQ` set.
    DataRequest,
    /// ATA `BSY` clear after an SRST pulse.
    ResetComplete,
    /// ATAPI packet phase (`DRQ` with `CoD=1, IO=0`).
    PacketAccepted,
    /// AHCI `PxCMD.CR`/`PxCMD.FR` clear after clearing `ST`/`FRE`.
    PortStop,
    /// AHCI `PxSSTS.DET == 3`.
    LinkUp,
    /// AHCI `PxTFD` `BSY`/`DRQ` clear.
    DeviceReady,
    /// AHCI `PxCI` bit clear.
    CommandComplete,
    /// SCSI adapter not busy.
    AdapterReady,
    /// SCSI adapter offering or requesting a data byte.
    ScsiData,
    /// SCSI adapter `COMPLETE`.
    ScsiCompletion,
}

impl fmt::Display for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            WaitFor::NotBusy => "BSY to clear",
            WaitFor::DataRequest => "DRQ",
            WaitFor::ResetComplete => "reset to complete",
            WaitFor::PacketAccepted => "packet phase",
            WaitFor::PortStop => "AHCI port to stop",
            WaitFor::LinkUp => "SATA link",
            WaitFor::DeviceReady => "AHCI device ready",
            WaitFor::CommandComplete => "AHCI command completion",
            WaitFor::AdapterReady => "SCSI adapter ready",
            WaitFor::ScsiData => "SCSI data phase",
            WaitFor::ScsiCompletion => "SCSI completion",
        };
        f.write_str(what)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("timed out waiting for {0}")]
    Timeout(WaitFor),

    #[error("device error (status {status:#04x}, error {error:#04x})")]
    Device { status: u8, error: u8 },

    #[error("sense key {key:#x} (asc {asc:#04x}, ascq {ascq:#04x})")]
    Sense { key: u8, asc: u8, ascq: u8 },

    #[error("SCSI status {0:#04x}")]
    ScsiStatus(u8),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("no device responded")]
    NotPresent,

    #[error("medium is write protected")]
    WriteProtected,

    #[error("request lies outside the medium")]
    OutOfRange,

    #[error("operation not supported by this device")]
    Unsupported,

    #[error("transfer does not fit the controller's descriptor table")]
    TransferTooLarge,
}

pub(crate) mod sense_key {
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;

    pub const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
    pub const ASC_MEDIUM_NOT_PRESENT: u8 = 0x3A;
}

/// Guest-visible INT 13h status byte (AH on return).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Int13Status {
    Success = 0x00,
    InvalidFunction = 0x01,
    AddressMarkNotFound = 0x02,
    WriteProtected = 0x03,
    SectorNotFound = 0x04,
    ResetFailed = 0x05,
    MediaChanged = 0x06,
    BadSector = 0x0A,
    Uncorrectable = 0x10,
    ControllerFailure = 0x20,
    NoMedia = 0x31,
    SeekFailure = 0x40,
    Timeout = 0x80,
    NotReady = 0xAA,
    NotLocked = 0xB0,
    Locked = 0xB1,
    NotRemovable = 0xB2,
    LockCountExceeded = 0xB4,
    EjectFailed = 0xB5,
    Undefined = 0xBB,
    WriteFault = 0xCC,
    StatusError = 0xE0,
}

impl Int13Status {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<&DriverError> for Int13Status {
    fn from(err: &DriverError) -> Self {
        match *err {
            DriverError::Timeout(_) => Int13Status::Timeout,
            DriverError::Device { status, error } => {
                let error = AtaError::from_bits_truncate(error);
                if error.contains(AtaError::BBK) {
                    Int13Status::BadSector
                } else if error.contains(AtaError::UNC) {
                    Int13Status::Uncorrectable
                } else if error.contains(AtaError::IDNF) {
                    Int13Status::SectorNotFound
                } else if error.contains(AtaError::MC) {
                    Int13Status::MediaChanged
                } else if error.contains(AtaError::AMNF) {
                    Int13Status::AddressMarkNotFound
                } else if error.contains(AtaError::ABRT) {
                    Int13Status::InvalidFunction
                } else if status & 0x20 != 0 {
                    Int13Status::WriteFault
                } else {
                    Int13Status::StatusError
                }
            }
            DriverError::Sense { key, asc, .. } => match key {
                sense_key::NOT_READY if asc == sense_key::ASC_MEDIUM_NOT_PRESENT => {
                    Int13Status::NoMedia
                }
                sense_key::NOT_READY => Int13Status::NotReady,
                sense_key::MEDIUM_ERROR => Int13Status::Uncorrectable,
                sense_key::HARDWARE_ERROR => Int13Status::ControllerFailure,
                sense_key::ILLEGAL_REQUEST if asc == sense_key::ASC_LBA_OUT_OF_RANGE => {
                    Int13Status::SectorNotFound
                }
                sense_key::ILLEGAL_REQUEST => Int13Status::InvalidFunction,
                sense_key::UNIT_ATTENTION => Int13Status::MediaChanged,
                sense_key::DATA_PROTECT => Int13Status::WriteProtected,
                _ => Int13Status::Undefined,
            },
            // BUSY / RESERVATION CONFLICT and friends.
            DriverError::ScsiStatus(_) => Int13Status::NotReady,
            DriverError::Protocol(_) => Int13Status::ControllerFailure,
            DriverError::NotPresent => Int13Status::Timeout,
            DriverError::WriteProtected => Int13Status::WriteProtected,
            DriverError::OutOfRange => Int13Status::SectorNotFound,
            DriverError::Unsupported | DriverError::TransferTooLarge => {
                Int13Status::InvalidFunction
            }
        }
    }
}
