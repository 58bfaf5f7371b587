//! USB MIDI transport: presence tracking from the device state, the receive loop that unpacks
//! event packets into the ring, and the echo of received packets back to the host.

use embassy_time::{Duration, Timer};
use embassy_usb::class::midi::{Receiver, Sender};
use embassy_usb::driver::{Driver, EndpointError};
use embassy_usb::Handler;

use gate_midi::{usb_payloads, PACKET_LEN};
use midi_gate::ring::{Consumer, Producer};
use midi_gate::{ConnectionArbiter, SharedProducer, UsbLinkState, EVENT_QUEUE_SIZE, RING_SIZE};

pub const MAX_PACKET_SIZE: u16 = 64;

/// Idle poll period of the echo side.
const ECHO_POLL: Duration = Duration::from_millis(1);

/// Reports the USB link as present while the device is configured and awake.
pub struct UsbPresence {
    links: &'static ConnectionArbiter,
    events: &'static SharedProducer<'static, EVENT_QUEUE_SIZE>,
    state: UsbLinkState,
}

impl UsbPresence {
    pub fn new(links: &'static ConnectionArbiter, events: &'static SharedProducer<'static, EVENT_QUEUE_SIZE>) -> Self {
        Self {
            links,
            events,
            state: UsbLinkState::new(),
        }
    }

    fn report(&mut self, present: bool) {
        let mut events = self.events;
        self.links.report_usb(present, &mut events);
    }
}

impl Handler for UsbPresence {
    fn reset(&mut self) {
        let present = self.state.reset();
        self.report(present);
    }

    fn configured(&mut self, configured: bool) {
        let present = self.state.configured(configured);
        self.report(present);
    }

    fn suspended(&mut self, suspended: bool) {
        let present = self.state.suspended(suspended);
        self.report(present);
    }
}

/// Receive until the endpoint goes away. Packets are queued for echo whole or not at all, a host
/// that does not read them back never stalls reception.
pub async fn receive<'d, D: Driver<'d>>(
    rx: &mut Receiver<'d, D>,
    ring: &mut Producer<'_, RING_SIZE>,
    echo: &mut Producer<'_, RING_SIZE>,
) -> Result<(), EndpointError> {
    let mut buf = [0u8; MAX_PACKET_SIZE as usize];
    loop {
        let len = rx.read_packet(&mut buf).await?;
        for payload in usb_payloads(&buf[..len]) {
            match payload {
                Ok(bytes) => {
                    if ring.write(bytes) < bytes.len() {
                        warn!("usb rx overrun");
                    }
                }
                Err(err) => warn!("bad usb midi packet {:?}", err),
            }
        }
        let whole = len - len % PACKET_LEN;
        if !echo.write_whole(&buf[..whole]) {
            debug!("usb echo full, {} bytes dropped", whole);
        }
    }
}

/// Send queued echo packets until the endpoint goes away.
pub async fn echo<'d, D: Driver<'d>>(
    tx: &mut Sender<'d, D>,
    ring: &mut Consumer<'_, RING_SIZE>,
) -> Result<(), EndpointError> {
    loop {
        let window = ring.read_window();
        let len = window.len().min(MAX_PACKET_SIZE as usize);
        let len = len - len % PACKET_LEN;
        if len == 0 {
            Timer::after(ECHO_POLL).await;
            continue;
        }
        tx.write_packet(&window[..len]).await?;
        ring.skip(len);
    }
}
