//! Bus and thru serial ports, moving bytes between buffered UARTs and the rings.

use embassy_stm32::usart::{BasicInstance, BufferedUartRx, BufferedUartTx};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use midi_gate::ring::{Consumer, Producer};
use midi_gate::RING_SIZE;

/// Idle poll period of the transmit side.
const TX_POLL: Duration = Duration::from_millis(1);

pub struct SerialMidiIn<'a, UART: BasicInstance> {
    uart: BufferedUartRx<'a, UART>,
    ring: Producer<'a, RING_SIZE>,
}

impl<'a, UART: BasicInstance> SerialMidiIn<'a, UART> {
    pub fn new(uart: BufferedUartRx<'a, UART>, ring: Producer<'a, RING_SIZE>) -> Self {
        Self { uart, ring }
    }

    pub async fn run(&mut self) -> ! {
        let mut buf = [0u8; 16];
        loop {
            match self.uart.read(&mut buf).await {
                Ok(len) => {
                    let written = self.ring.write(&buf[..len]);
                    if written < len {
                        warn!("serial rx overrun, {} bytes dropped", len - written);
                    }
                }
                Err(err) => warn!("serial rx error {:?}", err),
            }
        }
    }
}

pub struct SerialMidiOut<'a, UART: BasicInstance> {
    uart: BufferedUartTx<'a, UART>,
    ring: Consumer<'a, RING_SIZE>,
}

impl<'a, UART: BasicInstance> SerialMidiOut<'a, UART> {
    pub fn new(uart: BufferedUartTx<'a, UART>, ring: Consumer<'a, RING_SIZE>) -> Self {
        Self { uart, ring }
    }

    pub async fn run(&mut self) -> ! {
        loop {
            let window = self.ring.read_window();
            if window.is_empty() {
                Timer::after(TX_POLL).await;
                continue;
            }
            let len = window.len();
            if let Err(err) = self.uart.write_all(window).await {
                warn!("serial tx error {:?}", err);
            }
            self.ring.skip(len);
        }
    }
}
