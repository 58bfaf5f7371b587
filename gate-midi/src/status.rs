use num_enum::TryFromPrimitive;

use crate::MidiError;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const NOTE_PRESSURE: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;

pub const SYSEX_START: u8 = 0xF0;

pub const TIME_CODE_QUARTER_FRAME: u8 = 0xF1;
pub const SONG_POSITION_POINTER: u8 = 0xF2;
pub const SONG_SELECT: u8 = 0xF3;
/// Undefined by MIDI 1.0. The bus transport sends it to announce that it went away.
pub const RESERVED_F4: u8 = 0xF4;
pub const RESERVED_F5: u8 = 0xF5;
pub const TUNE_REQUEST: u8 = 0xF6;

/// Sysex sequence terminator. NOT a status byte.
pub const SYSEX_END: u8 = 0xF7;

pub const TIMING_CLOCK: u8 = 0xF8;
pub const MEASURE_END: u8 = 0xF9;
pub const START: u8 = 0xFA;
pub const CONTINUE: u8 = 0xFB;
pub const STOP: u8 = 0xFC;
pub const RESERVED_FD: u8 = 0xFD;
pub const ACTIVE_SENSING: u8 = 0xFE;
pub const SYSTEM_RESET: u8 = 0xFF;

pub fn is_status(byte: u8) -> bool {
    byte & 0x80 != 0
}

pub fn is_channel_status(byte: u8) -> bool {
    (NOTE_OFF..SYSEX_START).contains(&byte)
}

pub fn is_realtime(byte: u8) -> bool {
    byte >= TIMING_CLOCK
}

/// Number of data bytes following `status`.
///
/// Anything that is not a channel voice status or one of the three system common
/// messages carrying arguments is a single byte message, including the undefined
/// statuses and the real-time range.
pub const fn data_len(status: u8) -> u8 {
    match status {
        0x80..=0xBF => 2,
        0xC0..=0xDF => 1,
        0xE0..=0xEF => 2,
        TIME_CODE_QUARTER_FRAME | SONG_SELECT => 1,
        SONG_POSITION_POINTER => 2,
        _ => 0,
    }
}

/// Command classes, lower nibble of channel statuses stripped.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    NoteOff = NOTE_OFF,
    NoteOn = NOTE_ON,
    NotePressure = NOTE_PRESSURE,
    ControlChange = CONTROL_CHANGE,
    ProgramChange = PROGRAM_CHANGE,
    ChannelPressure = CHANNEL_PRESSURE,
    PitchBend = PITCH_BEND,

    TimeCodeQuarterFrame = TIME_CODE_QUARTER_FRAME,
    SongPositionPointer = SONG_POSITION_POINTER,
    SongSelect = SONG_SELECT,
    TuneRequest = TUNE_REQUEST,

    TimingClock = TIMING_CLOCK,
    MeasureEnd = MEASURE_END,
    Start = START,
    Continue = CONTINUE,
    Stop = STOP,
    ActiveSensing = ACTIVE_SENSING,
    SystemReset = SYSTEM_RESET,
}

impl Status {
    /// Classify a raw status byte, ignoring the channel nibble of voice commands.
    pub fn from_byte(mut byte: u8) -> Result<Self, MidiError> {
        if is_channel_status(byte) {
            // nuke channel bits
            byte &= 0xF0
        }
        Status::try_from_primitive(byte).map_err(|_| MidiError::InvalidStatus(byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_voice_lengths() {
        for channel in 0..16 {
            assert_eq!(data_len(NOTE_OFF | channel), 2);
            assert_eq!(data_len(NOTE_ON | channel), 2);
            assert_eq!(data_len(NOTE_PRESSURE | channel), 2);
            assert_eq!(data_len(CONTROL_CHANGE | channel), 2);
            assert_eq!(data_len(PROGRAM_CHANGE | channel), 1);
            assert_eq!(data_len(CHANNEL_PRESSURE | channel), 1);
            assert_eq!(data_len(PITCH_BEND | channel), 2);
        }
    }

    #[test]
    fn non_voice_statuses_default_to_zero() {
        assert_eq!(data_len(TIME_CODE_QUARTER_FRAME), 1);
        assert_eq!(data_len(SONG_POSITION_POINTER), 2);
        assert_eq!(data_len(SONG_SELECT), 1);
        for byte in [SYSEX_START, RESERVED_F4, RESERVED_F5, TUNE_REQUEST, SYSEX_END] {
            assert_eq!(data_len(byte), 0, "status {:#04x}", byte);
        }
        for byte in TIMING_CLOCK..=SYSTEM_RESET {
            assert_eq!(data_len(byte), 0, "status {:#04x}", byte);
        }
        // data bytes have no length of their own
        assert_eq!(data_len(0x40), 0);
    }

    #[test]
    fn status_strips_channel() {
        assert_eq!(Status::from_byte(0x93), Ok(Status::NoteOn));
        assert_eq!(Status::from_byte(0xEF), Ok(Status::PitchBend));
        assert_eq!(Status::from_byte(STOP), Ok(Status::Stop));
        assert_eq!(Status::from_byte(RESERVED_F4), Err(MidiError::InvalidStatus(RESERVED_F4)));
        assert_eq!(Status::from_byte(0x40), Err(MidiError::InvalidStatus(0x40)));
    }
}
