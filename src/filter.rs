//! Channel and note range filter, and the rules for learning it from live traffic.

/// Channel mask left by a double-tap clear. Only the low eight channels, unlike the default.
pub const RESET_CHANNEL_MASK: u16 = 0x00FF;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterState {
    pub channel_mask: u16,
    pub note_min: u8,
    pub note_max: u8,
    /// Set once learning went beyond the first event
    pub range_learned: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            channel_mask: 0xFFFF,
            note_min: 0,
            note_max: 255,
            range_learned: false,
        }
    }
}

const fn channel_bit(channel: u8) -> u16 {
    1 << (channel & 0x0F)
}

impl FilterState {
    pub fn accepts_channel(&self, channel: u8) -> bool {
        self.channel_mask & channel_bit(channel) != 0
    }

    pub fn accepts_note(&self, note: u8) -> bool {
        (self.note_min..=self.note_max).contains(&note)
    }

    /// Double-tap clear.
    pub fn reset_wide(&mut self) {
        *self = Self {
            channel_mask: RESET_CHANNEL_MASK,
            note_min: 0,
            note_max: 255,
            range_learned: false,
        };
    }

    /// Nothing passes until learning opens it up again.
    pub fn close(&mut self) {
        *self = Self {
            channel_mask: 0,
            note_min: 0,
            note_max: 255,
            range_learned: false,
        };
    }

    /// First command seen while learning channels: its channel becomes the only one.
    pub fn learn_first_channel(&mut self, channel: u8) {
        self.channel_mask = channel_bit(channel);
    }

    /// First note seen while learning a range: its channel only, that note only.
    pub fn learn_first_note(&mut self, channel: u8, note: u8) {
        self.channel_mask = channel_bit(channel);
        self.note_min = note;
        self.note_max = note;
    }

    /// Add a channel. Returns true if the filter grew.
    pub fn learn_channel(&mut self, channel: u8) -> bool {
        if self.accepts_channel(channel) {
            return false;
        }
        self.channel_mask |= channel_bit(channel);
        self.range_learned = true;
        true
    }

    /// Widen the note range, only for channels already enabled. Returns true if it grew.
    pub fn learn_note(&mut self, channel: u8, note: u8) -> bool {
        if !self.accepts_channel(channel) || self.accepts_note(note) {
            return false;
        }
        self.note_min = self.note_min.min(note);
        self.note_max = self.note_max.max(note);
        self.range_learned = true;
        true
    }

    /// A synth gate on a single key is useless, reopen the full range. Returns true if widened.
    pub fn widen_single_note(&mut self) -> bool {
        if self.note_min != self.note_max {
            return false;
        }
        self.note_min = 0;
        self.note_max = 255;
        true
    }

    /// Same filter as far as persistence is concerned.
    pub fn same_settings(&self, other: &FilterState) -> bool {
        self.channel_mask == other.channel_mask && self.note_min == other.note_min && self.note_max == other.note_max
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_passes_everything() {
        let filter = FilterState::default();
        assert!((0..16).all(|channel| filter.accepts_channel(channel)));
        assert!(filter.accepts_note(0));
        assert!(filter.accepts_note(127));
        assert!(!filter.range_learned);
    }

    #[test]
    fn double_tap_mask_is_byte_wide() {
        let mut filter = FilterState::default();
        filter.reset_wide();
        assert_eq!(filter.channel_mask, 0x00FF);
        assert!(filter.accepts_channel(7));
        assert!(!filter.accepts_channel(8));
        assert_ne!(filter, FilterState::default());
    }

    #[test]
    fn channel_learning() {
        let mut filter = FilterState::default();
        filter.close();
        assert!(!filter.accepts_channel(0));

        filter.learn_first_channel(3);
        assert_eq!(filter.channel_mask, 0b1000);
        assert!(!filter.range_learned);

        assert!(!filter.learn_channel(3));
        assert!(filter.learn_channel(9));
        assert_eq!(filter.channel_mask, 0b10_0000_1000);
        assert!(filter.range_learned);
    }

    #[test]
    fn note_learning_widens_on_enabled_channel_only() {
        let mut filter = FilterState::default();
        filter.close();
        filter.learn_first_note(1, 60);
        assert_eq!((filter.channel_mask, filter.note_min, filter.note_max), (0b10, 60, 60));

        assert!(!filter.learn_note(2, 40));
        assert!(!filter.learn_note(1, 60));
        assert!(filter.learn_note(1, 48));
        assert!(filter.learn_note(1, 72));
        assert!(!filter.learn_note(1, 64));
        assert_eq!((filter.note_min, filter.note_max), (48, 72));
        assert!(filter.range_learned);
    }

    #[test]
    fn single_note_guard() {
        let mut filter = FilterState::default();
        filter.learn_first_note(0, 60);
        assert!(filter.widen_single_note());
        assert_eq!((filter.note_min, filter.note_max), (0, 255));
        assert!(!filter.widen_single_note());
    }

    proptest! {
        #[test]
        fn learned_range_never_narrows(
            first in 0u8..128,
            notes in proptest::collection::vec((0u8..16, 0u8..128), 0..40),
        ) {
            let mut filter = FilterState::default();
            filter.close();
            filter.learn_first_note(0, first);
            for (channel, note) in notes {
                let (min, max) = (filter.note_min, filter.note_max);
                filter.learn_note(channel, note);
                prop_assert!(filter.note_min <= min);
                prop_assert!(filter.note_max >= max);
                prop_assert!(filter.note_min <= filter.note_max);
            }
            prop_assert_eq!(filter.channel_mask, 1);
        }
    }
}
