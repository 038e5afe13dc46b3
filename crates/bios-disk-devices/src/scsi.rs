//! Message-register SCSI host adapter model.
//!
//! Four byte registers: command/status, data, detect (echoes the last byte written) and reset.
//! A command is a header byte `target << 5 | cdb_len` followed by the CDB, both written to the
//! command register; data then moves one byte per data-register access.

use tracing::{debug, trace};

use crate::disk::MemDisk;

pub const REG_COMMAND_STATUS: u8 = 0;
pub const REG_DATA: u8 = 1;
pub const REG_DETECT: u8 = 2;
pub const REG_RESET: u8 = 3;

const STATUS_BUSY: u8 = 0x01;
const STATUS_DATA_IN: u8 = 0x02;
const STATUS_DATA_OUT: u8 = 0x04;
const STATUS_COMPLETE: u8 = 0x08;
const STATUS_NO_TARGET: u8 = 0x80;

const SCSI_GOOD: u8 = 0x00;
const SCSI_CHECK_CONDITION: u8 = 0x02;

const KEY_NOT_READY: u8 = 0x02;
const KEY_ILLEGAL_REQUEST: u8 = 0x05;
const ASC_INVALID_OPCODE: u8 = 0x20;
const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;

const BLOCK_SIZE: usize = 512;
/// Status reads that still show BUSY after a reset.
const RESET_BUSY_READS: u8 = 2;

/// A logical unit behind the adapter.
#[derive(Debug, Clone)]
pub struct ScsiTarget {
    pub disk: MemDisk,
    pub peripheral_type: u8,
    pub removable: bool,
    sense: (u8, u8),
}

impl ScsiTarget {
    /// Direct-access disk with 512-byte blocks.
    pub fn disk(blocks: u64) -> Self {
        Self {
            disk: MemDisk::new(blocks, BLOCK_SIZE),
            peripheral_type: 0x00,
            removable: false,
            sense: (0, 0),
        }
    }

    pub fn cdrom(blocks: u64) -> Self {
        Self {
            disk: MemDisk::new(blocks, 2048),
            peripheral_type: 0x05,
            removable: true,
            sense: (0, 0),
        }
    }

    pub fn removable(mut self) -> Self {
        self.removable = true;
        self
    }

    fn inquiry(&self) -> Vec<u8> {
        let mut data = vec![0u8; 36];
        data[0] = self.peripheral_type;
        data[1] = if self.removable { 0x80 } else { 0 };
        data[2] = 0x05;
        data[3] = 0x02;
        data[4] = 31;
        data[8..16].copy_from_slice(b"BIOSDISK");
        data[16..32].copy_from_slice(b"MESSAGE-REG DISK");
        data[32..36].copy_from_slice(b"1.0 ");
        data
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Command {
        target: u8,
        len: usize,
        cdb: Vec<u8>,
    },
    DataIn {
        data: Vec<u8>,
        index: usize,
        status: u8,
    },
    DataOut {
        target: u8,
        lba: u64,
        len: usize,
        data: Vec<u8>,
    },
    Complete { status: u8, no_target: bool },
}

/// What a CDB asks of the data phase.
enum Outcome {
    In(Vec<u8>),
    /// Starting block and byte length of the data-out phase.
    Out(u64, usize),
    Status(u8),
}

#[derive(Debug, Clone)]
pub struct ScsiAdapterModel {
    targets: [Option<ScsiTarget>; 8],
    state: State,
    detect: u8,
    busy_reads: u8,
    stuck_busy: bool,
    data_out_cutoff: Option<usize>,
}

impl Default for ScsiAdapterModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScsiAdapterModel {
    pub fn new() -> Self {
        Self {
            targets: Default::default(),
            state: State::Idle,
            detect: 0,
            busy_reads: 0,
            stuck_busy: false,
            data_out_cutoff: None,
        }
    }

    pub fn attach(&mut self, id: u8, target: ScsiTarget) {
        if let Some(slot) = self.targets.get_mut(usize::from(id)) {
            *slot = Some(target);
        }
    }

    pub fn target(&self, id: u8) -> Option<&ScsiTarget> {
        self.targets.get(usize::from(id))?.as_ref()
    }

    /// Keep BUSY raised forever.
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// End every data-out phase with GOOD status after `n` bytes, dropping what was sent.
    pub fn set_data_out_cutoff(&mut self, n: Option<usize>) {
        self.data_out_cutoff = n;
    }

    fn status(&mut self) -> u8 {
        if self.stuck_busy {
            return STATUS_BUSY;
        }
        if self.busy_reads > 0 {
            self.busy_reads -= 1;
            return STATUS_BUSY;
        }
        match &self.state {
            State::Idle => 0,
            State::Command { .. } => STATUS_BUSY,
            State::DataIn { .. } => STATUS_DATA_IN,
            State::DataOut { .. } => STATUS_DATA_OUT,
            State::Complete { no_target: true, .. } => STATUS_COMPLETE | STATUS_NO_TARGET,
            State::Complete { .. } => STATUS_COMPLETE,
        }
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        match reg {
            REG_COMMAND_STATUS => self.status(),
            REG_DATA => self.read_data(),
            REG_DETECT => self.detect,
            _ => 0,
        }
    }

    pub fn write(&mut self, reg: u8, val: u8) {
        match reg {
            REG_COMMAND_STATUS => self.write_command(val),
            REG_DATA => self.write_data(val),
            REG_DETECT => self.detect = val,
            REG_RESET => {
                trace!("SCSI adapter reset");
                self.state = State::Idle;
                self.busy_reads = RESET_BUSY_READS;
            }
            _ => {}
        }
    }

    fn read_data(&mut self) -> u8 {
        match &mut self.state {
            State::DataIn {
                data,
                index,
                status,
            } => {
                let b = data.get(*index).copied().unwrap_or(0);
                *index += 1;
                if *index >= data.len() {
                    self.state = State::Complete {
                        status: *status,
                        no_target: false,
                    };
                }
                b
            }
            State::Complete { status, .. } => {
                let status = *status;
                self.state = State::Idle;
                status
            }
            _ => 0,
        }
    }

    fn write_data(&mut self, val: u8) {
        let State::DataOut {
            target,
            lba,
            len,
            data,
        } = &mut self.state
        else {
            return;
        };
        data.push(val);
        if self.data_out_cutoff.is_some_and(|n| data.len() >= n) {
            trace!(sent = data.len(), len = *len, "SCSI data-out cut short");
            self.state = State::Complete {
                status: SCSI_GOOD,
                no_target: false,
            };
            return;
        }
        if data.len() < *len {
            return;
        }
        let (target, lba, data) = (*target, *lba, std::mem::take(data));
        let written = self.targets[usize::from(target)]
            .as_mut()
            .is_some_and(|t| t.disk.write(lba, &data));
        self.state = State::Complete {
            status: if written { SCSI_GOOD } else { SCSI_CHECK_CONDITION },
            no_target: false,
        };
    }

    fn write_command(&mut self, val: u8) {
        match &mut self.state {
            State::Command { target, len, cdb } => {
                cdb.push(val);
                if cdb.len() == *len {
                    let (target, cdb) = (*target, std::mem::take(cdb));
                    self.execute(target, &cdb);
                }
            }
            _ => {
                let len = usize::from(val & 0x1F);
                if len == 0 {
                    return;
                }
                self.state = State::Command {
                    target: val >> 5,
                    len,
                    cdb: Vec::with_capacity(len),
                };
            }
        }
    }

    fn execute(&mut self, id: u8, cdb: &[u8]) {
        let Some(target) = self.targets[usize::from(id)].as_mut() else {
            self.state = State::Complete {
                status: SCSI_GOOD,
                no_target: true,
            };
            return;
        };
        let outcome = run_cdb(target, cdb);
        trace!(target = id, opcode = cdb[0], "SCSI command");
        self.state = match outcome {
            Outcome::In(data) if data.is_empty() => State::Complete {
                status: SCSI_GOOD,
                no_target: false,
            },
            Outcome::In(data) => State::DataIn {
                data,
                index: 0,
                status: SCSI_GOOD,
            },
            Outcome::Out(lba, len) => State::DataOut {
                target: id,
                lba,
                len,
                data: Vec::with_capacity(len),
            },
            Outcome::Status(status) => State::Complete {
                status,
                no_target: false,
            },
        };
    }
}

fn check_condition(target: &mut ScsiTarget, key: u8, asc: u8) -> Outcome {
    debug!(key, asc, "SCSI check condition");
    target.sense = (key, asc);
    Outcome::Status(SCSI_CHECK_CONDITION)
}

fn run_cdb(target: &mut ScsiTarget, cdb: &[u8]) -> Outcome {
    let field = |i: usize| cdb.get(i).copied().unwrap_or(0);
    let lba = u64::from(u32::from_be_bytes([field(2), field(3), field(4), field(5)]));
    let blocks = u64::from(u16::from_be_bytes([field(7), field(8)]));
    let in_range = lba + blocks <= target.disk.sectors();
    match field(0) {
        0x00 => Outcome::Status(SCSI_GOOD),
        0x03 => {
            let mut sense = vec![0u8; 18];
            sense[0] = 0x70;
            sense[2] = target.sense.0;
            sense[7] = 10;
            sense[12] = target.sense.1;
            target.sense = (0, 0);
            sense.truncate(usize::from(field(4)));
            Outcome::In(sense)
        }
        0x12 => {
            let mut data = target.inquiry();
            data.truncate(usize::from(field(4)));
            Outcome::In(data)
        }
        0x25 => {
            let last = target.disk.sectors().saturating_sub(1) as u32;
            let mut data = last.to_be_bytes().to_vec();
            data.extend_from_slice(&(target.disk.sector_size() as u32).to_be_bytes());
            Outcome::In(data)
        }
        0x28 if in_range => match target.disk.read(lba, blocks) {
            Some(data) => Outcome::In(data),
            None => check_condition(target, KEY_NOT_READY, 0x04),
        },
        0x2A if in_range && blocks > 0 => {
            Outcome::Out(lba, blocks as usize * target.disk.sector_size())
        }
        0x2A | 0x2F if in_range => Outcome::Status(SCSI_GOOD),
        0x28 | 0x2A | 0x2F => check_condition(target, KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE),
        0x1B | 0x1E => Outcome::Status(SCSI_GOOD),
        _ => check_condition(target, KEY_ILLEGAL_REQUEST, ASC_INVALID_OPCODE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(adapter: &mut ScsiAdapterModel, target: u8, cdb: &[u8]) {
        adapter.write(REG_COMMAND_STATUS, (target << 5) | cdb.len() as u8);
        for &b in cdb {
            adapter.write(REG_COMMAND_STATUS, b);
        }
    }

    fn drain(adapter: &mut ScsiAdapterModel) -> (Vec<u8>, u8) {
        let mut data = Vec::new();
        while adapter.read(REG_COMMAND_STATUS) & STATUS_DATA_IN != 0 {
            data.push(adapter.read(REG_DATA));
        }
        assert_ne!(adapter.read(REG_COMMAND_STATUS) & STATUS_COMPLETE, 0);
        let status = adapter.read(REG_DATA);
        (data, status)
    }

    #[test]
    fn detect_register_echoes_and_reset_goes_idle() {
        let mut adapter = ScsiAdapterModel::new();
        adapter.write(REG_DETECT, 0x55);
        assert_eq!(adapter.read(REG_DETECT), 0x55);
        adapter.write(REG_RESET, 0);
        let busy = (0..4)
            .filter(|_| adapter.read(REG_COMMAND_STATUS) & STATUS_BUSY != 0)
            .count();
        assert_eq!(busy, usize::from(RESET_BUSY_READS));
    }

    #[test]
    fn missing_target_completes_with_no_target() {
        let mut adapter = ScsiAdapterModel::new();
        send(&mut adapter, 2, &[0x12, 0, 0, 0, 36, 0]);
        assert_eq!(
            adapter.read(REG_COMMAND_STATUS),
            STATUS_COMPLETE | STATUS_NO_TARGET
        );
    }

    #[test]
    fn read_capacity_and_write_read_back() {
        let mut adapter = ScsiAdapterModel::new();
        adapter.attach(3, ScsiTarget::disk(2_000_000));
        send(&mut adapter, 3, &[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let (data, status) = drain(&mut adapter);
        assert_eq!(status, SCSI_GOOD);
        assert_eq!(data, [0, 0x1E, 0x84, 0x7F, 0, 0, 2, 0]);

        send(&mut adapter, 3, &[0x2A, 0, 0, 0, 0, 5, 0, 0, 1, 0]);
        for i in 0..512u32 {
            assert_ne!(adapter.read(REG_COMMAND_STATUS) & STATUS_DATA_OUT, 0);
            adapter.write(REG_DATA, i as u8);
        }
        assert_eq!(adapter.read(REG_DATA), SCSI_GOOD);
        send(&mut adapter, 3, &[0x28, 0, 0, 0, 0, 5, 0, 0, 1, 0]);
        let (data, _) = drain(&mut adapter);
        assert_eq!(data[..4], [0, 1, 2, 3]);
    }

    #[test]
    fn out_of_range_read_latches_sense() {
        let mut adapter = ScsiAdapterModel::new();
        adapter.attach(0, ScsiTarget::disk(8));
        send(&mut adapter, 0, &[0x28, 0, 0, 0, 0, 8, 0, 0, 1, 0]);
        assert_eq!(drain(&mut adapter).1, SCSI_CHECK_CONDITION);
        send(&mut adapter, 0, &[0x03, 0, 0, 0, 18, 0]);
        let (sense, _) = drain(&mut adapter);
        assert_eq!((sense[2], sense[12]), (KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE));
    }
}
