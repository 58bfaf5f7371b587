//! Byte stream to command reassembly.
//!
//! Bytes arrive in arbitrary chunks from a transport. The assembler keeps only the
//! command in flight, so a message may be split across any number of `feed` calls.

use crate::status::{data_len, is_realtime, is_status, SYSEX_END, SYSEX_START};
use crate::MidiCommand;

#[derive(Debug, Default, Clone)]
pub struct MidiAssembler {
    awaiting_sysex_end: bool,
    pending_status: u8,
    remaining: u8,
    offset: u8,
    accumulator: u32,
}

impl MidiAssembler {
    pub const fn new() -> Self {
        Self {
            awaiting_sysex_end: false,
            pending_status: 0,
            remaining: 0,
            offset: 0,
            accumulator: 0,
        }
    }

    /// Forget any partial command and any open sysex.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn in_sysex(&self) -> bool {
        self.awaiting_sysex_end
    }

    /// Consume one byte, returning a command if it completed one.
    pub fn advance(&mut self, byte: u8) -> Option<MidiCommand> {
        if self.awaiting_sysex_end {
            // everything up to the terminator is dropped, real-time included
            if byte == SYSEX_END {
                self.awaiting_sysex_end = false;
            }
            return None;
        }

        match byte {
            SYSEX_START => {
                self.awaiting_sysex_end = true;
                self.clear_pending();
                None
            }
            // terminator without a sysex, nothing to close
            SYSEX_END => None,
            // real-time may sit between any two bytes of another command
            byte if is_realtime(byte) => Some(MidiCommand::single(byte)),
            byte if is_status(byte) => self.start(byte),
            data => self.accumulate(data),
        }
    }

    /// Feed a chunk of bytes, handing every completed command to `sink`.
    pub fn feed(&mut self, bytes: &[u8], mut sink: impl FnMut(MidiCommand)) {
        for &byte in bytes {
            if let Some(command) = self.advance(byte) {
                sink(command);
            }
        }
    }

    /// Lazy form of [`feed`](Self::feed).
    pub fn commands<'a>(&'a mut self, bytes: &'a [u8]) -> Commands<'a> {
        Commands {
            assembler: self,
            bytes: bytes.iter(),
        }
    }

    fn start(&mut self, status: u8) -> Option<MidiCommand> {
        self.pending_status = status;
        self.remaining = data_len(status);
        self.offset = 8;
        self.accumulator = status as u32;
        if self.remaining == 0 {
            self.pending_status = 0;
            return Some(MidiCommand::single(status));
        }
        None
    }

    fn accumulate(&mut self, data: u8) -> Option<MidiCommand> {
        if self.remaining == 0 {
            // no command waiting for data
            return None;
        }

        self.accumulator |= (data as u32) << self.offset;
        self.offset += 8;
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }

        let (status, raw) = (self.pending_status, self.accumulator);
        self.pending_status = 0;
        Some(MidiCommand::new(status, (raw >> 8) as u8, (raw >> 16) as u8))
    }

    fn clear_pending(&mut self) {
        self.pending_status = 0;
        self.remaining = 0;
        self.offset = 0;
        self.accumulator = 0;
    }
}

/// Iterator over the commands completed by a chunk of bytes.
pub struct Commands<'a> {
    assembler: &'a mut MidiAssembler,
    bytes: core::slice::Iter<'a, u8>,
}

impl Iterator for Commands<'_> {
    type Item = MidiCommand;

    fn next(&mut self) -> Option<Self::Item> {
        for &byte in self.bytes.by_ref() {
            if let Some(command) = self.assembler.advance(byte) {
                return Some(command);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use proptest::prelude::*;

    use super::*;

    fn assemble(chunks: &[&[u8]]) -> Vec<MidiCommand> {
        let mut assembler = MidiAssembler::new();
        let mut out = Vec::new();
        for chunk in chunks {
            assembler.feed(chunk, |command| out.push(command));
        }
        out
    }

    #[test]
    fn note_on_in_one_chunk() {
        assert_eq!(assemble(&[&[0x90, 0x40, 0x7F]]), [MidiCommand::new(0x90, 0x40, 0x7F)]);
    }

    #[test]
    fn note_on_split_across_chunks() {
        let expected = [MidiCommand::new(0x90, 0x40, 0x7F)];
        assert_eq!(assemble(&[&[0x90], &[0x40], &[0x7F]]), expected);
        assert_eq!(assemble(&[&[0x90, 0x40], &[0x7F]]), expected);
        assert_eq!(assemble(&[&[], &[0x90], &[0x40, 0x7F], &[]]), expected);
    }

    #[test]
    fn sysex_is_skipped() {
        let commands = assemble(&[&[0xF0, 0x01, 0x02, 0xF7, 0x90, 0x40, 0x7F]]);
        assert_eq!(commands, [MidiCommand::new(0x90, 0x40, 0x7F)]);
    }

    #[test]
    fn realtime_inside_sysex_is_swallowed() {
        let commands = assemble(&[&[0xF0, 0x01, 0xF8, 0x02, 0xF7]]);
        assert!(commands.is_empty());
    }

    #[test]
    fn realtime_interleaves_without_breaking_command() {
        let commands = assemble(&[&[0x90, 0x40, 0xF8, 0x7F]]);
        assert_eq!(commands, [MidiCommand::single(0xF8), MidiCommand::new(0x90, 0x40, 0x7F)]);
    }

    #[test]
    fn single_byte_commands_emit_immediately() {
        let commands = assemble(&[&[0xFA, 0xF6, 0xF4, 0xFC]]);
        assert_eq!(
            commands,
            [
                MidiCommand::single(0xFA),
                MidiCommand::single(0xF6),
                MidiCommand::single(0xF4),
                MidiCommand::single(0xFC)
            ]
        );
    }

    #[test]
    fn one_data_byte_commands() {
        let commands = assemble(&[&[0xC2, 0x05, 0xF3, 0x07, 0xD1, 0x40]]);
        assert_eq!(
            commands,
            [MidiCommand::new(0xC2, 0x05, 0), MidiCommand::new(0xF3, 0x07, 0), MidiCommand::new(0xD1, 0x40, 0)]
        );
    }

    #[test]
    fn data_after_a_complete_command_is_dropped() {
        let commands = assemble(&[&[0x90, 0x40, 0x7F, 0x41, 0x7F]]);
        assert_eq!(commands, [MidiCommand::new(0x90, 0x40, 0x7F)]);
        let commands = assemble(&[&[0xC1, 0x05, 0x06, 0xF3, 0x01, 0x3E, 0x64]]);
        assert_eq!(commands, [MidiCommand::new(0xC1, 0x05, 0), MidiCommand::new(0xF3, 0x01, 0)]);
    }

    #[test]
    fn stray_data_and_terminators_are_dropped() {
        assert!(assemble(&[&[0x01, 0x02, 0xF7, 0x7F]]).is_empty());
    }

    #[test]
    fn new_status_abandons_partial_command() {
        let commands = assemble(&[&[0x90, 0x40, 0xB0, 0x07, 0x64]]);
        assert_eq!(commands, [MidiCommand::new(0xB0, 0x07, 0x64)]);
    }

    #[test]
    fn iterator_matches_feed() {
        let bytes = [0xF8, 0x90, 0x40, 0x7F, 0xF0, 0x10, 0xF7, 0x80, 0x40, 0x00];
        let mut assembler = MidiAssembler::new();
        let lazy: Vec<_> = assembler.commands(&bytes).collect();
        assert_eq!(lazy, assemble(&[&bytes]));
        assert_eq!(lazy.len(), 3);
    }

    #[test]
    fn reset_drops_partial_state() {
        let mut assembler = MidiAssembler::new();
        assert_eq!(assembler.advance(0xF0), None);
        assert!(assembler.in_sysex());
        assembler.reset();
        assert!(!assembler.in_sysex());
        assert_eq!(assembler.advance(0x40), None);
    }

    proptest! {
        #[test]
        fn any_split_yields_the_same_commands(split_a in 0usize..=10, split_b in 0usize..=10) {
            let bytes = [0xF0, 0x01, 0x02, 0xF7, 0x90, 0x40, 0x7F, 0xF8, 0xC1, 0x09];
            let (a, b) = (split_a.min(split_b), split_a.max(split_b));
            let split = assemble(&[&bytes[..a], &bytes[a..b], &bytes[b..]]);
            prop_assert_eq!(split, assemble(&[&bytes]));
        }
    }
}
