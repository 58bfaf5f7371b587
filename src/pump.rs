//! Main loop side of a transport: drains its receive ring, forwards the raw bytes, tracks bus
//! presence from the stream and posts assembled commands as events.

use gate_midi::status::RESERVED_F4;
use gate_midi::MidiAssembler;

use crate::connection::ConnectionArbiter;
use crate::event::{Event, EventSink};
use crate::ring::{Consumer, Producer};

/// Where raw bytes can be copied to. Short writes drop the rest.
pub trait ByteSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> usize;
}

impl<const N: usize> ByteSink for Producer<'_, N> {
    fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.write(bytes)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transport {
    Usb,
    /// Secondary link, present while it talks, gone after a 0xF4
    Bus,
}

pub struct MidiPump {
    transport: Transport,
    assembler: MidiAssembler,
}

impl MidiPump {
    pub const fn new(transport: Transport) -> Self {
        Self {
            transport,
            assembler: MidiAssembler::new(),
        }
    }

    /// Consume everything readable. Returns the number of bytes consumed.
    pub fn drain<const N: usize>(
        &mut self,
        rx: &mut Consumer<'_, N>,
        events: &mut impl EventSink,
        links: &ConnectionArbiter,
        forward: &mut [&mut dyn ByteSink],
    ) -> usize {
        let mut total = 0;
        loop {
            let window = rx.read_window();
            if window.is_empty() {
                break;
            }
            let len = window.len();

            for sink in forward.iter_mut() {
                let written = sink.write_bytes(window);
                if written < len {
                    warn!("{:?} forward overrun, {} bytes dropped", self.transport, len - written);
                }
            }

            for &byte in window {
                if self.transport == Transport::Bus {
                    if byte == RESERVED_F4 {
                        links.report_bus(false, events);
                        self.assembler.reset();
                        continue;
                    }
                    links.report_bus(true, events);
                }
                if let Some(command) = self.assembler.advance(byte) {
                    trace!("{:?} in {:?}", self.transport, command.kind());
                    events.post(Event::Midi(command));
                }
            }

            rx.skip(len);
            total += len;
        }
        total
    }
}
