//! Core of the midi-gate firmware: byte rings, the event queue, connection tracking, the learn
//! filter and the application state machine. Board specifics stay behind the `io` traits.
#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate bitfield;

#[macro_use]
mod fmt;

pub mod app;
pub mod config;
pub mod connection;
pub mod event;
pub mod filter;
pub mod io;
pub mod mode;
pub mod pump;
pub mod ring;
pub mod router;

pub use app::{AppState, Application, DOUBLE_TAP_MS};
pub use config::{ConfigError, ConfigStore, FlashConfigStore};
pub use connection::{ConnectionArbiter, Connectivity, UsbLinkState};
pub use event::{Event, EventError, EventProducer, EventQueue, EventSink, Inbox, SharedProducer, EVENT_QUEUE_SIZE};
pub use filter::FilterState;
pub use io::{Blink, Blinker, Board, Clock, Debouncer, Indicator, Led, Outputs};
pub use mode::{ModeStrap, OperationMode};
pub use pump::{ByteSink, MidiPump, Transport};
pub use ring::{RingBuffer, RING_SIZE};
pub use router::{Routed, Router};

pub use gate_midi::{MidiAssembler, MidiCommand, MidiError};
