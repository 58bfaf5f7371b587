#![no_std]
#![no_main]

#[macro_use]
extern crate defmt;

use core::pin::pin;
use core::sync::atomic::{AtomicBool, Ordering};

use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::gpio::{Flex, Input, Level, Output, Pull, Speed};
use embassy_stm32::peripherals::{PA4, PA5, PB0, PB1, PB8, USART1, USART2};
use embassy_stm32::time::mhz;
use embassy_stm32::usart::{BufferedUart, BufferedUartRx, BufferedUartTx};
use embassy_stm32::usb::Driver;
use embassy_stm32::{bind_interrupts, peripherals, usart, usb};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, Timer};
use embassy_usb::class::midi::{MidiClass, Receiver, Sender};
use embassy_usb::UsbDevice;
use futures::future::{select, Either};
use panic_probe as _;
use static_cell::StaticCell;

use midi_gate::io::{BLINK_TICK_MS, DEBOUNCE_TICK_MS, TRIGGER_PULSE_MS};
use midi_gate::ring::{Consumer, Producer};
use midi_gate::{
    Application, Blink, Blinker, Board, Clock, ConfigStore, ConnectionArbiter, Debouncer, EventQueue, FilterState,
    FlashConfigStore, Indicator, Led, MidiPump, ModeStrap, OperationMode, Outputs, RingBuffer, SharedProducer,
    Transport, EVENT_QUEUE_SIZE, RING_SIZE,
};

use crate::port::midi_usb::{self, UsbPresence, MAX_PACKET_SIZE};
use crate::port::serial::{SerialMidiIn, SerialMidiOut};

mod port;

/// Config page, last 1K of the 32K part.
const CONFIG_OFFSET: u32 = 0x7C00;
const MIDI_BAUD: u32 = 31250;
const MAIN_LOOP_PERIOD: Duration = Duration::from_millis(1);

bind_interrupts!(struct Irqs {
    USB => usb::InterruptHandler<peripherals::USB>;
    USART1 => usart::BufferedInterruptHandler<peripherals::USART1>;
    USART2 => usart::BufferedInterruptHandler<peripherals::USART2>;
});

type UsbDriver = Driver<'static, peripherals::USB>;

static LINKS: ConnectionArbiter = ConnectionArbiter::new();
static EVENTS: SharedProducer<'static, EVENT_QUEUE_SIZE> = SharedProducer::new();
static BRIDGE: AtomicBool = AtomicBool::new(false);

static LED_COMMANDS: Channel<ThreadModeRawMutex, LedCommand, 4> = Channel::new();
static OUT_COMMANDS: Channel<ThreadModeRawMutex, OutCommand, 4> = Channel::new();

static QUEUE: StaticCell<EventQueue<EVENT_QUEUE_SIZE>> = StaticCell::new();
static USB_RING: StaticCell<RingBuffer<RING_SIZE>> = StaticCell::new();
static ECHO_RING: StaticCell<RingBuffer<RING_SIZE>> = StaticCell::new();
static BUS_RING: StaticCell<RingBuffer<RING_SIZE>> = StaticCell::new();
static BRIDGE_RING: StaticCell<RingBuffer<RING_SIZE>> = StaticCell::new();
static THRU_RING: StaticCell<RingBuffer<RING_SIZE>> = StaticCell::new();

#[derive(Clone, Copy)]
enum LedCommand {
    Set(Led, bool),
    Blink(Led, Blink),
}

#[derive(Clone, Copy)]
enum OutCommand {
    Gate(bool),
    Pulse,
}

struct GateBoard {
    thru: Producer<'static, RING_SIZE>,
    strap: Flex<'static, PA5>,
    config: FlashConfigStore<Flash<'static, Blocking>>,
}

impl Outputs for GateBoard {
    fn thru(&mut self, bytes: &[u8]) {
        if self.thru.write(bytes) < bytes.len() {
            warn!("thru overrun");
        }
    }

    fn gate(&mut self, on: bool) {
        send_out(OutCommand::Gate(on));
    }

    fn pulse(&mut self) {
        send_out(OutCommand::Pulse);
    }
}

impl Indicator for GateBoard {
    fn set_led(&mut self, led: Led, on: bool) {
        send_led(LedCommand::Set(led, on));
    }

    fn blink_led(&mut self, led: Led, blink: Blink) {
        send_led(LedCommand::Blink(led, blink));
    }
}

impl Clock for GateBoard {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

impl ModeStrap for GateBoard {
    fn read_mode(&mut self) -> OperationMode {
        self.strap.set_as_input(Pull::Up);
        cortex_m::asm::delay(1000);
        let pulled_up = self.strap.is_high();
        self.strap.set_as_input(Pull::Down);
        cortex_m::asm::delay(1000);
        let pulled_down = self.strap.is_high();
        self.strap.set_as_input(Pull::None);
        OperationMode::from_strap(pulled_up, pulled_down)
    }
}

impl ConfigStore for GateBoard {
    fn load(&mut self) -> Option<FilterState> {
        self.config.load()
    }

    fn store(&mut self, filter: &FilterState) {
        self.config.store(filter)
    }
}

impl Board for GateBoard {
    fn bridge(&mut self, enabled: bool) {
        info!("bridging {}", enabled);
        BRIDGE.store(enabled, Ordering::Release);
    }
}

fn send_led(command: LedCommand) {
    if LED_COMMANDS.try_send(command).is_err() {
        warn!("led command dropped");
    }
}

fn send_out(command: OutCommand) {
    if OUT_COMMANDS.try_send(command).is_err() {
        warn!("output command dropped");
    }
}

#[embassy_executor::task]
async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

#[embassy_executor::task]
async fn usb_midi_in(
    mut rx: Receiver<'static, UsbDriver>,
    mut ring: Producer<'static, RING_SIZE>,
    mut echo: Producer<'static, RING_SIZE>,
) -> ! {
    loop {
        rx.wait_connection().await;
        info!("usb midi up");
        if let Err(err) = midi_usb::receive(&mut rx, &mut ring, &mut echo).await {
            info!("usb midi down {:?}", err);
        }
    }
}

#[embassy_executor::task]
async fn usb_midi_echo(mut tx: Sender<'static, UsbDriver>, mut ring: Consumer<'static, RING_SIZE>) -> ! {
    loop {
        tx.wait_connection().await;
        if let Err(err) = midi_usb::echo(&mut tx, &mut ring).await {
            debug!("usb echo down {:?}", err);
        }
    }
}

#[embassy_executor::task]
async fn bus_in(mut port: SerialMidiIn<'static, USART1>) -> ! {
    port.run().await
}

#[embassy_executor::task]
async fn bus_out(mut port: SerialMidiOut<'static, USART1>) -> ! {
    port.run().await
}

#[embassy_executor::task]
async fn thru_out(mut port: SerialMidiOut<'static, USART2>) -> ! {
    port.run().await
}

#[embassy_executor::task]
async fn button(input: Input<'static, PB8>) -> ! {
    let mut debouncer = Debouncer::default();
    let mut ticker = Ticker::every(Duration::from_millis(DEBOUNCE_TICK_MS));
    loop {
        ticker.next().await;
        if let Some(edge) = debouncer.update(input.is_high()) {
            EVENTS.post(edge);
        }
    }
}

#[embassy_executor::task]
async fn blink(mut red: Output<'static, PB1>, mut blue: Output<'static, PB0>) -> ! {
    let mut blinker = Blinker::new();
    let mut ticker = Ticker::every(Duration::from_millis(BLINK_TICK_MS));
    loop {
        ticker.next().await;
        blinker.tick();
        while let Ok(command) = LED_COMMANDS.try_receive() {
            match command {
                LedCommand::Set(led, on) => blinker.set(led, on),
                LedCommand::Blink(led, blink) => blinker.blink(led, blink),
            }
        }
        let lit = blinker.lit();
        red.set_level(Level::from(lit.map_or(false, |led| led.red())));
        blue.set_level(Level::from(lit.map_or(false, |led| led.blue())));
    }
}

/// Gate level and trigger pulse. A pulse arriving during a pulse restarts it.
#[embassy_executor::task]
async fn gate_out(mut pin: Output<'static, PA4>) -> ! {
    loop {
        let mut command = OUT_COMMANDS.receive().await;
        loop {
            match command {
                OutCommand::Gate(on) => {
                    pin.set_level(Level::from(on));
                    break;
                }
                OutCommand::Pulse => {
                    pin.set_high();
                    let timeout = pin!(Timer::after(Duration::from_millis(TRIGGER_PULSE_MS)));
                    let next = pin!(OUT_COMMANDS.receive());
                    match select(timeout, next).await {
                        Either::Left(_) => {
                            pin.set_low();
                            break;
                        }
                        Either::Right((retrigger, _)) => command = retrigger,
                    }
                }
            }
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = embassy_stm32::Config::default();
    config.rcc.hsi48 = true;
    config.rcc.sys_ck = Some(mhz(48));
    let p = embassy_stm32::init(config);

    info!("Boot seq");

    let (events, inbox) = QUEUE.init(EventQueue::new()).split();
    EVENTS.install(events);

    let (usb_tx, mut usb_rx) = USB_RING.init(RingBuffer::new()).split();
    let (echo_tx, echo_rx) = ECHO_RING.init(RingBuffer::new()).split();
    let (bus_tx, mut bus_rx) = BUS_RING.init(RingBuffer::new()).split();
    let (mut bridge_tx, bridge_rx) = BRIDGE_RING.init(RingBuffer::new()).split();
    let (thru_tx, thru_rx) = THRU_RING.init(RingBuffer::new()).split();

    // usb
    {
        static DEVICE_DESCRIPTOR: StaticCell<[u8; 32]> = StaticCell::new();
        static CONFIG_DESCRIPTOR: StaticCell<[u8; 128]> = StaticCell::new();
        static BOS_DESCRIPTOR: StaticCell<[u8; 16]> = StaticCell::new();
        static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
        static PRESENCE: StaticCell<UsbPresence> = StaticCell::new();

        let driver = Driver::new(p.USB, Irqs, p.PA12, p.PA11);

        let mut usb_cfg = embassy_usb::Config::new(0xc0de, 0xcafe);
        usb_cfg.manufacturer = Some("M'Roto");
        usb_cfg.product = Some("MIDI Gate");
        usb_cfg.serial_number = Some("000001");
        usb_cfg.max_power = 100;
        usb_cfg.max_packet_size_0 = 64;

        // Required for Windows support.
        usb_cfg.composite_with_iads = true;
        usb_cfg.device_class = 0xEF;
        usb_cfg.device_sub_class = 0x02;
        usb_cfg.device_protocol = 0x01;

        let mut usb_builder = embassy_usb::Builder::new(
            driver,
            usb_cfg,
            &mut DEVICE_DESCRIPTOR.init([0; 32])[..],
            &mut CONFIG_DESCRIPTOR.init([0; 128])[..],
            &mut BOS_DESCRIPTOR.init([0; 16])[..],
            &mut [],
            &mut CONTROL_BUF.init([0; 64])[..],
        );
        usb_builder.handler(PRESENCE.init(UsbPresence::new(&LINKS, &EVENTS)));

        let (midi_out, midi_in) = MidiClass::new(&mut usb_builder, 1, 1, MAX_PACKET_SIZE).split();
        let usb_device = usb_builder.build();

        unwrap!(spawner.spawn(usb_task(usb_device)));
        unwrap!(spawner.spawn(usb_midi_in(midi_in, usb_tx, echo_tx)));
        unwrap!(spawner.spawn(usb_midi_echo(midi_out, echo_rx)));
    }

    // bus, both directions
    {
        static RX_BUF: StaticCell<[u8; 64]> = StaticCell::new();
        static TX_BUF: StaticCell<[u8; 64]> = StaticCell::new();

        let mut config = usart::Config::default();
        config.baudrate = MIDI_BAUD;
        let uart = unwrap!(BufferedUart::new(
            p.USART1,
            Irqs,
            p.PA10,
            p.PA9,
            &mut TX_BUF.init([0; 64])[..],
            &mut RX_BUF.init([0; 64])[..],
            config
        ));
        let (tx, rx): (BufferedUartTx<'static, USART1>, BufferedUartRx<'static, USART1>) = uart.split();
        unwrap!(spawner.spawn(bus_in(SerialMidiIn::new(rx, bus_tx))));
        unwrap!(spawner.spawn(bus_out(SerialMidiOut::new(tx, bridge_rx))));
    }

    // thru out, the rx half is unused
    {
        static RX_BUF: StaticCell<[u8; 16]> = StaticCell::new();
        static TX_BUF: StaticCell<[u8; 64]> = StaticCell::new();

        let mut config = usart::Config::default();
        config.baudrate = MIDI_BAUD;
        let uart = unwrap!(BufferedUart::new(
            p.USART2,
            Irqs,
            p.PA3,
            p.PA2,
            &mut TX_BUF.init([0; 64])[..],
            &mut RX_BUF.init([0; 16])[..],
            config
        ));
        let (tx, _rx) = uart.split();
        unwrap!(spawner.spawn(thru_out(SerialMidiOut::new(tx, thru_rx))));
    }

    let red = Output::new(p.PB1, Level::Low, Speed::Low);
    let blue = Output::new(p.PB0, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(blink(red, blue)));
    unwrap!(spawner.spawn(gate_out(Output::new(p.PA4, Level::Low, Speed::Medium))));
    unwrap!(spawner.spawn(button(Input::new(p.PB8, Pull::Down))));

    let board = GateBoard {
        thru: thru_tx,
        strap: Flex::new(p.PA5),
        config: FlashConfigStore::new(Flash::new_blocking(p.FLASH), CONFIG_OFFSET),
    };
    let mut app = Application::new(board, inbox, &LINKS);
    app.start();

    let mut usb_pump = MidiPump::new(Transport::Usb);
    let mut bus_pump = MidiPump::new(Transport::Bus);
    let mut events = &EVENTS;
    loop {
        if BRIDGE.load(Ordering::Acquire) {
            usb_pump.drain(&mut usb_rx, &mut events, &LINKS, &mut [&mut bridge_tx]);
        } else {
            usb_pump.drain(&mut usb_rx, &mut events, &LINKS, &mut []);
        }
        bus_pump.drain(&mut bus_rx, &mut events, &LINKS, &mut []);
        app.process_pending();
        Timer::after(MAIN_LOOP_PERIOD).await;
    }
}

