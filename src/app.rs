//! The application state machine.
//!
//! Events are popped one at a time and handled by the current state. A handler either stays,
//! switches state, or translates: the event is pushed back and handled again by the next
//! state. Entering a state runs its entry actions, which may chain straight into another state.

use gate_midi::MidiCommand;

use crate::connection::{ConnectionArbiter, Connectivity};
use crate::event::{Event, Inbox};
use crate::filter::FilterState;
use crate::io::{Blink, Board, Led};
use crate::mode::OperationMode;
use crate::router::{Routed, Router};

/// Two learn-clear entries closer than this reset the filter.
pub const DOUBLE_TAP_MS: u64 = 1000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppState {
    #[default]
    Startup,
    /// No transport
    Idle,
    /// Both transports at once
    Error,
    Connected,
    Normal,
    LearnClear,
    Learn,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Transition {
    Stay,
    Switch(AppState),
    /// Deliver the same event again to the new state
    Translate(AppState),
}

/// Everything the states share.
#[derive(Clone, Debug, Default)]
struct ApplicationContext {
    state: AppState,
    mode: OperationMode,
    filter: FilterState,
    connectivity: Connectivity,
    router: Router,
    last_learn_clear: Option<u64>,
}

pub struct Application<'a, B: Board, const N: usize> {
    board: B,
    inbox: Inbox<'a, N>,
    links: &'a ConnectionArbiter,
    ctx: ApplicationContext,
}

impl<'a, B: Board, const N: usize> Application<'a, B, N> {
    pub fn new(board: B, inbox: Inbox<'a, N>, links: &'a ConnectionArbiter) -> Self {
        Self {
            board,
            inbox,
            links,
            ctx: ApplicationContext::default(),
        }
    }

    /// Run startup, leaving the machine idle and waiting for a connection.
    pub fn start(&mut self) {
        self.switch(AppState::Startup);
    }

    /// Handle one event if there is one.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.inbox.pop() else {
            return false;
        };
        trace!("{:?} in {:?}", event, self.ctx.state);
        match self.handle(&event) {
            Transition::Stay => {}
            Transition::Switch(next) => self.switch(next),
            Transition::Translate(next) => {
                if let Err(err) = self.inbox.push_back(event) {
                    error!("could not translate {:?}: {:?}", event, err);
                }
                self.switch(next);
            }
        }
        true
    }

    /// Handle everything queued so far, returning how many events were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while self.step() {
            handled += 1;
        }
        handled
    }

    /// Main loop for boards without an executor.
    pub fn run(&mut self) -> ! {
        loop {
            if !self.step() {
                core::hint::spin_loop();
            }
        }
    }

    pub fn state(&self) -> AppState {
        self.ctx.state
    }

    pub fn mode(&self) -> OperationMode {
        self.ctx.mode
    }

    pub fn filter(&self) -> &FilterState {
        &self.ctx.filter
    }

    pub fn connectivity(&self) -> Connectivity {
        self.ctx.connectivity
    }

    pub fn keys_held(&self) -> u8 {
        self.ctx.router.keys_held()
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    fn switch(&mut self, mut next: AppState) {
        loop {
            debug!("{:?} -> {:?}", self.ctx.state, next);
            self.ctx.state = next;
            match self.enter(next) {
                Some(follow) => next = follow,
                None => break,
            }
        }
    }

    /// Entry actions, returning the state to chain into, if any.
    fn enter(&mut self, state: AppState) -> Option<AppState> {
        match state {
            AppState::Startup => {
                self.ctx.mode = self.board.read_mode();
                self.ctx.filter = self.board.load().unwrap_or_default();
                info!("mode {:?}, filter {:?}", self.ctx.mode, self.ctx.filter);
                Some(AppState::Idle)
            }
            AppState::Idle => {
                self.silence();
                self.board.bridge(false);
                self.board.blink_led(Led::Red, Blink::SLOW);
                None
            }
            AppState::Error => {
                warn!("both transports connected");
                self.silence();
                self.board.bridge(false);
                self.board.blink_led(Led::Red, Blink::FAST);
                None
            }
            AppState::Connected => {
                let usb_only = self.links.usb_present() && !self.links.bus_present();
                self.board.bridge(usb_only);
                Some(AppState::Normal)
            }
            AppState::Normal => {
                self.silence();
                self.board.blink_led(Led::Blue, Blink::ONCE_FAST);
                None
            }
            AppState::LearnClear => {
                let now = self.board.now_ms();
                if let Some(previous) = self.ctx.last_learn_clear {
                    if now.saturating_sub(previous) < DOUBLE_TAP_MS {
                        info!("double tap, filter reset");
                        self.ctx.filter.reset_wide();
                    }
                }
                self.ctx.last_learn_clear = Some(now);
                self.silence();
                self.board.set_led(Led::Red, true);
                None
            }
            AppState::Learn => {
                self.board.set_led(Led::Blue, true);
                None
            }
        }
    }

    fn handle(&mut self, event: &Event) -> Transition {
        match event {
            Event::ConnectionChanged => self.on_connection(),
            Event::ButtonDown => self.on_button(),
            Event::Midi(command) => self.on_midi(command),
            Event::ButtonUp | Event::None => Transition::Stay,
        }
    }

    fn on_connection(&mut self) -> Transition {
        let outcome = self.links.outcome();
        if outcome == self.ctx.connectivity {
            return Transition::Stay;
        }
        self.ctx.connectivity = outcome;
        match outcome {
            Connectivity::Single => Transition::Switch(AppState::Connected),
            Connectivity::None => Transition::Switch(AppState::Idle),
            Connectivity::Both => Transition::Switch(AppState::Error),
        }
    }

    fn on_button(&mut self) -> Transition {
        match self.ctx.state {
            AppState::Normal => Transition::Switch(AppState::LearnClear),
            AppState::LearnClear => {
                self.commit();
                Transition::Switch(AppState::Normal)
            }
            AppState::Learn => {
                if self.ctx.mode == OperationMode::Synth && self.ctx.filter.widen_single_note() {
                    debug!("single note range widened");
                }
                self.commit();
                Transition::Switch(AppState::Normal)
            }
            _ => Transition::Stay,
        }
    }

    fn on_midi(&mut self, command: &MidiCommand) -> Transition {
        match self.ctx.state {
            AppState::Normal => {
                let routed = self.forward(command);
                if command.is_note_on() && routed != Routed::Dropped {
                    self.board.blink_led(Led::Blue, Blink::ONCE_FAST);
                }
                Transition::Stay
            }
            AppState::LearnClear => {
                if !self.learnable(command) {
                    return Transition::Stay;
                }
                let filter = &mut self.ctx.filter;
                filter.close();
                match self.ctx.mode {
                    OperationMode::Thru => filter.learn_first_channel(command.channel()),
                    _ => filter.learn_first_note(command.channel(), command.note()),
                }
                Transition::Translate(AppState::Learn)
            }
            AppState::Learn => {
                if self.learnable(command) {
                    let filter = &mut self.ctx.filter;
                    let widened = match self.ctx.mode {
                        OperationMode::Thru => filter.learn_channel(command.channel()),
                        _ => filter.learn_note(command.channel(), command.note()),
                    };
                    if widened {
                        self.board.set_led(Led::Purple, true);
                    }
                }
                self.forward(command);
                Transition::Stay
            }
            _ => Transition::Stay,
        }
    }

    /// Commands that teach the filter something in the current mode.
    fn learnable(&self, command: &MidiCommand) -> bool {
        match self.ctx.mode {
            OperationMode::Thru => command.is_channel_voice(),
            OperationMode::Synth | OperationMode::Trigger => command.is_note(),
        }
    }

    /// Filter by channel, then hand to the router.
    fn forward(&mut self, command: &MidiCommand) -> Routed {
        let ctx = &mut self.ctx;
        let pass = if command.is_channel_voice() {
            ctx.filter.accepts_channel(command.channel())
        } else {
            ctx.mode == OperationMode::Thru
        };
        if !pass {
            return Routed::Dropped;
        }
        ctx.router.route(command, ctx.mode, &ctx.filter, &mut self.board)
    }

    fn commit(&mut self) {
        self.board.store(&self.ctx.filter);
    }

    fn silence(&mut self) {
        self.ctx.router.reset(&mut self.board);
    }
}
