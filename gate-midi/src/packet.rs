//! USB-MIDI event packets: one header byte (cable number, code index number) and up to
//! three MIDI bytes. Only the payload matters here, the assembler does the rest.

use num_enum::TryFromPrimitive;

use crate::MidiError;

pub const PACKET_LEN: usize = 4;

#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CodeIndexNumber {
    /// Reserved for future extensions
    MiscFunction = 0x0,
    /// Reserved for future expansion
    CableEvents = 0x1,
    SystemCommonLen2 = 0x2,
    SystemCommonLen3 = 0x3,
    Sysex = 0x4,
    /// Also a lone sysex terminator
    SystemCommonLen1 = 0x5,
    SysexEndsNext2 = 0x6,
    SysexEndsNext3 = 0x7,
    NoteOff = 0x8,
    NoteOn = 0x9,
    NotePressure = 0xA,
    ControlChange = 0xB,
    ProgramChange = 0xC,
    ChannelPressure = 0xD,
    PitchBend = 0xE,
    SingleByte = 0xF,
}

impl CodeIndexNumber {
    pub fn from_header(header: u8) -> Self {
        // every nibble value is assigned
        match Self::try_from_primitive(header & 0x0F) {
            Ok(cin) => cin,
            Err(_) => CodeIndexNumber::MiscFunction,
        }
    }

    /// Count of meaningful MIDI bytes in the packet.
    pub fn payload_len(&self) -> usize {
        match self {
            CodeIndexNumber::MiscFunction | CodeIndexNumber::CableEvents => 0,
            CodeIndexNumber::SystemCommonLen1 | CodeIndexNumber::SingleByte => 1,
            CodeIndexNumber::SystemCommonLen2
            | CodeIndexNumber::SysexEndsNext2
            | CodeIndexNumber::ProgramChange
            | CodeIndexNumber::ChannelPressure => 2,
            CodeIndexNumber::SystemCommonLen3
            | CodeIndexNumber::Sysex
            | CodeIndexNumber::SysexEndsNext3
            | CodeIndexNumber::NoteOff
            | CodeIndexNumber::NoteOn
            | CodeIndexNumber::NotePressure
            | CodeIndexNumber::ControlChange
            | CodeIndexNumber::PitchBend => 3,
        }
    }
}

pub fn cable_number(packet: &[u8]) -> Option<u8> {
    packet.first().map(|header| header >> 4)
}

/// MIDI bytes carried by a single USB-MIDI packet.
pub fn usb_payload(packet: &[u8]) -> Result<&[u8], MidiError> {
    if packet.len() != PACKET_LEN {
        return Err(MidiError::BadPacketLength(packet.len()));
    }
    let cin = CodeIndexNumber::from_header(packet[0]);
    Ok(&packet[1..1 + cin.payload_len()])
}

/// Payload bytes of several packets received back to back.
pub fn usb_payloads(packets: &[u8]) -> impl Iterator<Item = Result<&[u8], MidiError>> {
    packets.chunks(PACKET_LEN).map(usb_payload)
}
