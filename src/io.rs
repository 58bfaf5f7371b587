//! Everything the state machine drives or reads outside of MIDI: LEDs, outputs, time, and the
//! tick driven models of the blink and debounce timers.

use crate::config::ConfigStore;
use crate::event::Event;
use crate::mode::ModeStrap;

/// Blinker tick period.
pub const BLINK_TICK_MS: u64 = 50;
/// Debounce sampling period.
pub const DEBOUNCE_TICK_MS: u64 = 1;
/// Ticks a button level must hold before it counts.
pub const DEBOUNCE_TICKS: u16 = 100;
/// Trigger output pulse length.
pub const TRIGGER_PULSE_MS: u64 = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    Red,
    Blue,
    /// Red and blue together
    Purple,
}

impl Led {
    pub fn red(&self) -> bool {
        matches!(self, Led::Red | Led::Purple)
    }

    pub fn blue(&self) -> bool {
        matches!(self, Led::Blue | Led::Purple)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Blink {
    /// Single flash instead of endless blinking
    pub once: bool,
    pub fast: bool,
}

impl Blink {
    pub const ONCE_FAST: Blink = Blink { once: true, fast: true };
    pub const SLOW: Blink = Blink { once: false, fast: false };
    pub const FAST: Blink = Blink { once: false, fast: true };
}

pub trait Indicator {
    /// Steady on or off, cancels any blinking.
    fn set_led(&mut self, led: Led, on: bool);

    fn blink_led(&mut self, led: Led, blink: Blink);
}

pub trait Outputs {
    /// Serial thru out, fire and forget.
    fn thru(&mut self, bytes: &[u8]);

    fn gate(&mut self, on: bool);

    /// Start, or restart, the trigger pulse.
    fn pulse(&mut self);
}

pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// All collaborators of the state machine.
pub trait Board: Outputs + Indicator + Clock + ModeStrap + ConfigStore {
    /// Forward raw USB input to the bus.
    fn bridge(&mut self, enabled: bool);
}

#[derive(Clone, Copy, Debug)]
struct Blinking {
    led: Led,
    period: u8,
    countdown: u8,
    /// Toggles until done, `None` for endless
    toggles_left: Option<u8>,
}

/// LED state advanced by a periodic tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blinker {
    lit: Option<Led>,
    blinking: Option<Blinking>,
}

impl Blinker {
    pub const FAST_TICKS: u8 = 1;
    pub const SLOW_TICKS: u8 = 5;

    pub const fn new() -> Self {
        Self {
            lit: None,
            blinking: None,
        }
    }

    pub fn set(&mut self, led: Led, on: bool) {
        self.blinking = None;
        self.lit = if on { Some(led) } else { None };
    }

    pub fn blink(&mut self, led: Led, blink: Blink) {
        let period = if blink.fast { Self::FAST_TICKS } else { Self::SLOW_TICKS };
        self.lit = Some(led);
        self.blinking = Some(Blinking {
            led,
            period,
            countdown: period,
            toggles_left: if blink.once { Some(1) } else { None },
        });
    }

    /// Advance one tick, returning what should be lit.
    pub fn tick(&mut self) -> Option<Led> {
        if let Some(blinking) = self.blinking.as_mut() {
            blinking.countdown = blinking.countdown.saturating_sub(1);
            if blinking.countdown == 0 {
                blinking.countdown = blinking.period;
                self.lit = match self.lit {
                    Some(_) => None,
                    None => Some(blinking.led),
                };
                if let Some(left) = blinking.toggles_left.as_mut() {
                    *left -= 1;
                    if *left == 0 {
                        self.blinking = None;
                    }
                }
            }
        }
        self.lit
    }

    pub fn lit(&self) -> Option<Led> {
        self.lit
    }

    pub fn is_blinking(&self) -> bool {
        self.blinking.is_some()
    }
}

/// Button level filter sampled at a fixed rate.
#[derive(Clone, Copy, Debug)]
pub struct Debouncer {
    threshold: u16,
    pressed: bool,
    count: u16,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_TICKS)
    }
}

impl Debouncer {
    pub const fn new(threshold: u16) -> Self {
        Self {
            threshold,
            pressed: false,
            count: 0,
        }
    }

    /// Feed one sample, returning an edge once the new level held long enough.
    pub fn update(&mut self, pressed: bool) -> Option<Event> {
        if pressed == self.pressed {
            self.count = 0;
            return None;
        }
        self.count += 1;
        if self.count < self.threshold {
            return None;
        }
        self.count = 0;
        self.pressed = pressed;
        Some(if pressed { Event::ButtonDown } else { Event::ButtonUp })
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purple_is_both() {
        assert!(Led::Purple.red() && Led::Purple.blue());
        assert!(Led::Red.red() && !Led::Red.blue());
    }

    #[test]
    fn single_fast_blink() {
        let mut blinker = Blinker::new();
        blinker.blink(Led::Blue, Blink::ONCE_FAST);
        assert_eq!(blinker.lit(), Some(Led::Blue));
        assert_eq!(blinker.tick(), None);
        assert!(!blinker.is_blinking());
        assert_eq!(blinker.tick(), None);
    }

    #[test]
    fn slow_blink_runs_forever() {
        let mut blinker = Blinker::new();
        blinker.blink(Led::Red, Blink::SLOW);
        let lit: usize = (0..100).filter(|_| blinker.tick().is_some()).count();
        assert_eq!(lit, 50);
        assert!(blinker.is_blinking());
    }

    #[test]
    fn set_cancels_blink() {
        let mut blinker = Blinker::new();
        blinker.blink(Led::Red, Blink::FAST);
        blinker.set(Led::Blue, true);
        for _ in 0..10 {
            assert_eq!(blinker.tick(), Some(Led::Blue));
        }
        blinker.set(Led::Blue, false);
        assert_eq!(blinker.tick(), None);
    }

    #[test]
    fn bounces_are_ignored() {
        let mut button = Debouncer::new(5);
        for _ in 0..4 {
            assert_eq!(button.update(true), None);
        }
        // bounce back resets the count
        assert_eq!(button.update(false), None);
        for _ in 0..4 {
            assert_eq!(button.update(true), None);
        }
        assert_eq!(button.update(true), Some(Event::ButtonDown));
        assert!(button.is_pressed());
        assert_eq!(button.update(true), None);
    }

    #[test]
    fn release_edge() {
        let mut button = Debouncer::default();
        assert_eq!((0..DEBOUNCE_TICKS).filter_map(|_| button.update(true)).count(), 1);
        let edges: Option<Event> = (0..DEBOUNCE_TICKS).filter_map(|_| button.update(false)).last();
        assert_eq!(edges, Some(Event::ButtonUp));
    }
}
