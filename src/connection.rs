//! Which transports are present, and what that means for the session.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::event::{Event, EventSink};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Connectivity {
    #[default]
    None,
    /// Exactly one transport present
    Single,
    /// Both present, never allowed to run
    Both,
}

impl Connectivity {
    pub fn from_presence(usb: bool, bus: bool) -> Self {
        match (usb, bus) {
            (false, false) => Connectivity::None,
            (true, true) => Connectivity::Both,
            _ => Connectivity::Single,
        }
    }
}

/// Presence flags, written by the transports and read by the state machine.
#[derive(Debug, Default)]
pub struct ConnectionArbiter {
    usb: AtomicBool,
    bus: AtomicBool,
}

impl ConnectionArbiter {
    pub const fn new() -> Self {
        Self {
            usb: AtomicBool::new(false),
            bus: AtomicBool::new(false),
        }
    }

    /// Returns true if the flag changed.
    pub fn set_usb(&self, present: bool) -> bool {
        replace(&self.usb, present)
    }

    /// Returns true if the flag changed.
    pub fn set_bus(&self, present: bool) -> bool {
        replace(&self.bus, present)
    }

    /// Update USB presence, posting a single change event if it changed.
    pub fn report_usb(&self, present: bool, events: &mut impl EventSink) -> bool {
        let changed = self.set_usb(present);
        if changed {
            info!("usb {}", if present { "connected" } else { "disconnected" });
            events.post(Event::ConnectionChanged);
        }
        changed
    }

    /// Update bus presence, posting a single change event if it changed.
    pub fn report_bus(&self, present: bool, events: &mut impl EventSink) -> bool {
        let changed = self.set_bus(present);
        if changed {
            info!("bus {}", if present { "connected" } else { "disconnected" });
            events.post(Event::ConnectionChanged);
        }
        changed
    }

    pub fn usb_present(&self) -> bool {
        self.usb.load(Ordering::Acquire)
    }

    pub fn bus_present(&self) -> bool {
        self.bus.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Connectivity {
        Connectivity::from_presence(self.usb_present(), self.bus_present())
    }
}

/// USB device state as the stack reports it, reduced to presence.
///
/// A resume is not followed by a new configuration, so the configured flag outlives a suspend.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UsbLinkState {
    configured: bool,
    suspended: bool,
}

impl UsbLinkState {
    pub const fn new() -> Self {
        Self {
            configured: false,
            suspended: false,
        }
    }

    /// Bus reset, returns the new presence.
    pub fn reset(&mut self) -> bool {
        *self = Self::new();
        self.present()
    }

    pub fn configured(&mut self, configured: bool) -> bool {
        self.configured = configured;
        self.present()
    }

    pub fn suspended(&mut self, suspended: bool) -> bool {
        self.suspended = suspended;
        self.present()
    }

    pub fn present(&self) -> bool {
        self.configured && !self.suspended
    }
}

// thumbv6m has no atomic swap
fn replace(flag: &AtomicBool, present: bool) -> bool {
    critical_section::with(|_| {
        let changed = flag.load(Ordering::Acquire) != present;
        flag.store(present, Ordering::Release);
        changed
    })
}
