#![cfg_attr(not(test), no_std)]

pub use assembler::{Commands, MidiAssembler};
pub use command::MidiCommand;
pub use packet::{cable_number, usb_payload, usb_payloads, CodeIndexNumber, PACKET_LEN};
pub use status::{data_len, is_channel_status, is_realtime, is_status, Status};

mod assembler;
mod command;
mod packet;
pub mod status;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MidiError {
    InvalidStatus(u8),
    InvalidDataByte(u8),
    /// More than 24 significant bits in a packed command
    InvalidPayload(u32),
    BadPacketLength(usize),
}
