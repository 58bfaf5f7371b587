//! Events flowing from the transports, the button and the connection tracker into the state
//! machine, packed as `kind << 24 | payload` in a fixed size SPSC queue.

use core::cell::RefCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use critical_section::Mutex;
use gate_midi::{MidiCommand, MidiError};
use heapless::spsc::{Consumer, Producer, Queue};
use num_enum::TryFromPrimitive;

/// Slots in the event queue, one of which stays empty.
pub const EVENT_QUEUE_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    None,
    Midi(MidiCommand),
    ConnectionChanged,
    ButtonDown,
    ButtonUp,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
enum EventKind {
    ButtonUp = 0x01,
    ButtonDown = 0x02,
    ConnectionChanged = 0x03,
    Midi = 0x04,
    None = 0x80,
}

impl Event {
    pub fn to_raw(&self) -> u32 {
        let (kind, payload) = match self {
            Event::None => (EventKind::None, 0),
            Event::Midi(command) => (EventKind::Midi, command.to_raw()),
            Event::ConnectionChanged => (EventKind::ConnectionChanged, 0),
            Event::ButtonDown => (EventKind::ButtonDown, 0),
            Event::ButtonUp => (EventKind::ButtonUp, 0),
        };
        (kind as u32) << 24 | payload
    }

    pub fn from_raw(raw: u32) -> Result<Self, EventError> {
        let tag = (raw >> 24) as u8;
        let kind = EventKind::try_from_primitive(tag).map_err(|_| EventError::UnknownKind(tag))?;
        Ok(match kind {
            EventKind::None => Event::None,
            EventKind::Midi => Event::Midi(MidiCommand::from_raw(raw & 0x00FF_FFFF)?),
            EventKind::ConnectionChanged => Event::ConnectionChanged,
            EventKind::ButtonDown => Event::ButtonDown,
            EventKind::ButtonUp => Event::ButtonUp,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventError {
    /// Queue was full, event not delivered
    Full(Event),
    UnknownKind(u8),
    BadPayload(MidiError),
    /// An event was already pushed back and not popped again yet
    PushBackOccupied,
}

impl From<MidiError> for EventError {
    fn from(err: MidiError) -> Self {
        EventError::BadPayload(err)
    }
}

/// Anything events can be posted to. Posting never blocks, a full queue drops the event.
pub trait EventSink {
    /// Returns false if the event was dropped.
    fn post(&mut self, event: Event) -> bool;
}

pub struct EventQueue<const N: usize> {
    queue: Queue<u32, N>,
    dropped: AtomicUsize,
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn split(&mut self) -> (EventProducer<'_, N>, Inbox<'_, N>) {
        let (producer, consumer) = self.queue.split();
        (
            EventProducer {
                queue: producer,
                dropped: &self.dropped,
            },
            Inbox {
                queue: consumer,
                lookahead: None,
                can_push_back: false,
            },
        )
    }
}

pub struct EventProducer<'a, const N: usize> {
    queue: Producer<'a, u32, N>,
    dropped: &'a AtomicUsize,
}

impl<const N: usize> EventProducer<'_, N> {
    pub fn push(&mut self, event: Event) -> Result<(), EventError> {
        self.queue.enqueue(event.to_raw()).map_err(|_| EventError::Full(event))
    }

    /// Events lost to a full queue since boot.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> EventSink for EventProducer<'_, N> {
    fn post(&mut self, event: Event) -> bool {
        match self.push(event) {
            Ok(()) => true,
            Err(_) => {
                let dropped = critical_section::with(|_| {
                    let dropped = self.dropped.load(Ordering::Relaxed) + 1;
                    self.dropped.store(dropped, Ordering::Relaxed);
                    dropped
                });
                warn!("event queue full, dropped {:?} ({} total)", event, dropped);
                false
            }
        }
    }
}

/// Producer shared between several interrupt sources or tasks.
///
/// They never post concurrently, the critical section only makes that explicit.
pub struct SharedProducer<'a, const N: usize> {
    inner: Mutex<RefCell<Option<EventProducer<'a, N>>>>,
}

impl<'a, const N: usize> Default for SharedProducer<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> SharedProducer<'a, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    pub fn install(&self, producer: EventProducer<'a, N>) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).replace(producer);
        });
    }

    pub fn post(&self, event: Event) -> bool {
        critical_section::with(|cs| match self.inner.borrow_ref_mut(cs).as_mut() {
            Some(producer) => producer.post(event),
            None => {
                warn!("event {:?} posted before queue was installed", event);
                false
            }
        })
    }
}

impl<const N: usize> EventSink for &SharedProducer<'_, N> {
    fn post(&mut self, event: Event) -> bool {
        SharedProducer::post(*self, event)
    }
}

/// Consuming end of the queue, with room to push back the last popped event.
pub struct Inbox<'a, const N: usize> {
    queue: Consumer<'a, u32, N>,
    lookahead: Option<Event>,
    can_push_back: bool,
}

impl<const N: usize> Inbox<'_, N> {
    /// Next deliverable event. `None` events and undecodable entries are skipped.
    pub fn pop(&mut self) -> Option<Event> {
        if let Some(event) = self.lookahead.take() {
            // an event is re-delivered at most once
            self.can_push_back = false;
            return Some(event);
        }
        while let Some(raw) = self.queue.dequeue() {
            match Event::from_raw(raw) {
                Ok(Event::None) => continue,
                Ok(event) => {
                    self.can_push_back = true;
                    return Some(event);
                }
                Err(err) => warn!("dropping undecodable event {:?}", err),
            }
        }
        None
    }

    /// Have the event just popped delivered again by the next `pop`.
    pub fn push_back(&mut self, event: Event) -> Result<(), EventError> {
        if self.lookahead.is_some() || !self.can_push_back {
            debug_assert!(false, "event pushed back twice");
            return Err(EventError::PushBackOccupied);
        }
        self.can_push_back = false;
        self.lookahead = Some(event);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.queue.len() + self.lookahead.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn clear(&mut self) {
        self.lookahead = None;
        self.can_push_back = false;
        while self.queue.dequeue().is_some() {}
    }
}
