//! Output behaviour, chosen once per boot by a hardware strap.

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationMode {
    /// Filtered MIDI passes through to the serial out
    #[default]
    Thru,
    /// Gate held high while any note is down
    Synth,
    /// Pulse on every note on
    Trigger,
}

impl OperationMode {
    /// Decode the strap from two reads, one with the pull-up enabled and one with the pull-down.
    pub fn from_strap(pulled_up: bool, pulled_down: bool) -> Self {
        match (pulled_up, pulled_down) {
            // floating
            (true, false) => OperationMode::Thru,
            // tied to ground
            (false, false) => OperationMode::Synth,
            // tied to supply
            (true, true) => OperationMode::Trigger,
            (false, true) => {
                warn!("impossible strap reading, assuming thru");
                OperationMode::Thru
            }
        }
    }
}

/// The mode jumper.
pub trait ModeStrap {
    fn read_mode(&mut self) -> OperationMode;
}
