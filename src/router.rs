//! Turns accepted commands into output activity for the active mode.

use gate_midi::MidiCommand;

use crate::filter::FilterState;
use crate::io::Outputs;
use crate::mode::OperationMode;

/// What a command did at the outputs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Routed {
    Thru,
    /// New gate level
    Gate(bool),
    Trigger,
    Dropped,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Router {
    keys_held: u8,
}

impl Router {
    pub const fn new() -> Self {
        Self { keys_held: 0 }
    }

    pub fn keys_held(&self) -> u8 {
        self.keys_held
    }

    /// Forget held keys and drop the gate.
    pub fn reset(&mut self, out: &mut impl Outputs) {
        self.keys_held = 0;
        out.gate(false);
    }

    pub fn route(
        &mut self,
        command: &MidiCommand,
        mode: OperationMode,
        filter: &FilterState,
        out: &mut impl Outputs,
    ) -> Routed {
        if mode == OperationMode::Thru {
            out.thru(&command.to_bytes());
            return Routed::Thru;
        }

        if !command.is_note() || !filter.accepts_note(command.note()) {
            return Routed::Dropped;
        }

        let note_on = command.is_note_on();
        if note_on {
            self.keys_held = self.keys_held.saturating_add(1);
        } else {
            self.keys_held = self.keys_held.saturating_sub(1);
        }

        match mode {
            OperationMode::Synth => {
                let gate = self.keys_held > 0;
                out.gate(gate);
                Routed::Gate(gate)
            }
            OperationMode::Trigger if note_on => {
                out.pulse();
                Routed::Trigger
            }
            _ => Routed::Dropped,
        }
    }
}
