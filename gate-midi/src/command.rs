use heapless::Vec;

use crate::status::{data_len, is_channel_status, is_status, NOTE_OFF, NOTE_ON, SYSEX_END, SYSEX_START};
use crate::{MidiError, Status};

/// A complete MIDI command as produced by the assembler.
///
/// `data1` is only meaningful for statuses carrying two data bytes and is zero otherwise.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiCommand {
    status: u8,
    data0: u8,
    data1: u8,
}

impl MidiCommand {
    pub const fn new(status: u8, data0: u8, data1: u8) -> Self {
        Self { status, data0, data1 }
    }

    pub const fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(NOTE_ON | (channel & 0x0F), note, velocity)
    }

    pub const fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(NOTE_OFF | (channel & 0x0F), note, velocity)
    }

    /// Single byte command (real-time, tune request...).
    pub const fn single(status: u8) -> Self {
        Self::new(status, 0, 0)
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn data0(&self) -> u8 {
        self.data0
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    /// Status with the channel nibble stripped.
    pub fn class(&self) -> u8 {
        self.status & 0xF0
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn kind(&self) -> Result<Status, MidiError> {
        Status::from_byte(self.status)
    }

    pub fn is_channel_voice(&self) -> bool {
        is_channel_status(self.status)
    }

    /// Note On or Note Off, regardless of velocity.
    pub fn is_note(&self) -> bool {
        matches!(self.class(), NOTE_ON | NOTE_OFF)
    }

    /// Note On with a non-zero velocity.
    pub fn is_note_on(&self) -> bool {
        self.class() == NOTE_ON && self.data1 > 0
    }

    /// Note Off, or Note On with zero velocity.
    pub fn is_note_off(&self) -> bool {
        self.class() == NOTE_OFF || (self.class() == NOTE_ON && self.data1 == 0)
    }

    pub fn note(&self) -> u8 {
        self.data0
    }

    /// Number of data bytes following the status.
    pub fn data_len(&self) -> u8 {
        data_len(self.status)
    }

    /// Minimal wire form of the command, status first.
    pub fn to_bytes(&self) -> Vec<u8, 3> {
        let mut bytes = Vec::new();
        let _ = bytes.push(self.status);
        if self.data_len() >= 1 {
            let _ = bytes.push(self.data0);
        }
        if self.data_len() == 2 {
            let _ = bytes.push(self.data1);
        }
        bytes
    }

    /// Packed form: `status | data0 << 8 | data1 << 16`.
    pub const fn to_raw(&self) -> u32 {
        self.status as u32 | (self.data0 as u32) << 8 | (self.data1 as u32) << 16
    }

    /// Unpack a 24 bit command, rejecting anything the assembler could not have produced.
    pub fn from_raw(raw: u32) -> Result<Self, MidiError> {
        if raw > 0x00FF_FFFF {
            return Err(MidiError::InvalidPayload(raw));
        }
        let command = Self::new(raw as u8, (raw >> 8) as u8, (raw >> 16) as u8);
        if !is_status(command.status) || command.status == SYSEX_START || command.status == SYSEX_END {
            return Err(MidiError::InvalidStatus(command.status));
        }
        let len = command.data_len();
        if len >= 1 && is_status(command.data0) {
            return Err(MidiError::InvalidDataByte(command.data0));
        }
        if len == 2 && is_status(command.data1) {
            return Err(MidiError::InvalidDataByte(command.data1));
        }
        Ok(command)
    }
}
