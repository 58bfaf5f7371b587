//! Single producer, single consumer byte FIFO.
//!
//! One side lives in a transport interrupt (or task), the other in the main loop. There is no
//! lock, the split handles enforce the one writer / one reader contract and the positions are
//! published with acquire / release ordering. One slot is always left empty so that
//! `read_pos == write_pos` unambiguously means empty.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::slice;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Size of each transport's receive ring.
pub const RING_SIZE: usize = 64;

pub struct RingBuffer<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    /// Set while the producer holds positions it has not published yet.
    write_lock: AtomicBool,
}

// SAFETY: the producer only writes to the free region and the consumer only reads from the
// filled region, the split handles guarantee there is at most one of each.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; N]),
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            write_lock: AtomicBool::new(false),
        }
    }

    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring = &*self;
        (Producer { ring }, Consumer { ring })
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn to_read(&self) -> usize {
        filled::<N>(self.read_pos.load(Ordering::Acquire), self.write_pos.load(Ordering::Acquire))
    }

    pub fn to_write(&self) -> usize {
        N - 1 - self.to_read()
    }

    fn base(&self) -> *mut u8 {
        self.buf.get() as *mut u8
    }
}

const fn filled<const N: usize>(read: usize, write: usize) -> usize {
    if write >= read {
        write - read
    } else {
        N - read + write
    }
}

/// Writing half, owned by the transport receive side.
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    /// Copy as many bytes as fit, returning the count actually written.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let ring = self.ring;
        let write = self.lock();
        let read = ring.read_pos.load(Ordering::Acquire);
        let count = bytes.len().min(N - 1 - filled::<N>(read, write));

        let base = ring.base();
        for (i, byte) in bytes[..count].iter().enumerate() {
            // SAFETY: [write, write + count) is outside the readable region
            unsafe { base.add((write + i) % N).write(*byte) };
        }

        ring.write_pos.store((write + count) % N, Ordering::Release);
        ring.write_lock.store(false, Ordering::Release);
        count
    }

    /// Write all of `bytes` or nothing, keeping fixed size records aligned.
    pub fn write_whole(&mut self, bytes: &[u8]) -> bool {
        // only this side shrinks the free space
        if self.to_write() < bytes.len() {
            return false;
        }
        self.write(bytes) == bytes.len()
    }

    /// Longest contiguous free run, filled in place then published by [`WriteGrant::commit`].
    ///
    /// Dropping the grant without committing publishes nothing.
    pub fn write_window(&mut self) -> WriteGrant<'_, 'a, N> {
        let write = self.lock();
        let read = self.ring.read_pos.load(Ordering::Acquire);
        let len = if read > write {
            read - 1 - write
        } else if read == 0 {
            N - 1 - write
        } else {
            N - write
        };
        WriteGrant {
            producer: self,
            start: write,
            len,
        }
    }

    pub fn to_write(&self) -> usize {
        self.ring.to_write()
    }

    fn lock(&self) -> usize {
        let ring = self.ring;
        critical_section::with(|_| {
            ring.write_lock.store(true, Ordering::Relaxed);
            ring.write_pos.load(Ordering::Relaxed)
        })
    }
}

pub struct WriteGrant<'p, 'a, const N: usize> {
    producer: &'p mut Producer<'a, N>,
    start: usize,
    len: usize,
}

impl<const N: usize> WriteGrant<'_, '_, N> {
    /// Publish the first `count` bytes of the window.
    pub fn commit(self, count: usize) -> usize {
        let count = count.min(self.len);
        self.producer
            .ring
            .write_pos
            .store((self.start + count) % N, Ordering::Release);
        count
    }
}

impl<const N: usize> Deref for WriteGrant<'_, '_, N> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the window lies in the free region, which only this grant may touch
        unsafe { slice::from_raw_parts(self.producer.ring.base().add(self.start), self.len) }
    }
}

impl<const N: usize> DerefMut for WriteGrant<'_, '_, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see Deref
        unsafe { slice::from_raw_parts_mut(self.producer.ring.base().add(self.start), self.len) }
    }
}

impl<const N: usize> Drop for WriteGrant<'_, '_, N> {
    fn drop(&mut self) {
        self.producer.ring.write_lock.store(false, Ordering::Release);
    }
}

/// Reading half, owned by the main loop.
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Consumer<'_, N> {
    pub fn to_read(&self) -> usize {
        self.ring.to_read()
    }

    /// Copy readable bytes without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let ring = self.ring;
        let read = ring.read_pos.load(Ordering::Relaxed);
        let write = ring.write_pos.load(Ordering::Acquire);
        let count = out.len().min(filled::<N>(read, write));
        let base = ring.base();
        for (i, slot) in out[..count].iter_mut().enumerate() {
            // SAFETY: [read, read + count) was published by the producer
            *slot = unsafe { base.add((read + i) % N).read() };
        }
        count
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = self.peek(out);
        self.skip(count)
    }

    /// Longest contiguous readable run. Consume it with [`skip`](Self::skip).
    pub fn read_window(&self) -> &[u8] {
        let ring = self.ring;
        let read = ring.read_pos.load(Ordering::Relaxed);
        let write = ring.write_pos.load(Ordering::Acquire);
        let len = if write >= read { write - read } else { N - read };
        // SAFETY: the producer never writes into the readable region
        unsafe { slice::from_raw_parts(ring.base().add(read), len) }
    }

    /// Drop up to `count` bytes, returning how many were dropped.
    pub fn skip(&mut self, count: usize) -> usize {
        let ring = self.ring;
        let read = ring.read_pos.load(Ordering::Relaxed);
        let write = ring.write_pos.load(Ordering::Acquire);
        let count = count.min(filled::<N>(read, write));
        ring.read_pos.store((read + count) % N, Ordering::Release);

        critical_section::with(|_| {
            if !ring.write_lock.load(Ordering::Acquire)
                && ring.read_pos.load(Ordering::Relaxed) == ring.write_pos.load(Ordering::Acquire)
            {
                // rewind so the next window is as large as possible
                ring.read_pos.store(0, Ordering::Release);
                ring.write_pos.store(0, Ordering::Release);
            }
        });
        count
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn write_then_read() {
        let mut ring = RingBuffer::<8>::new();
        let (mut tx, mut rx) = ring.split();
        assert_eq!(tx.write(&[1, 2, 3]), 3);
        let mut out = [0; 8];
        assert_eq!(rx.peek(&mut out[..2]), 2);
        assert_eq!(&out[..2], &[1, 2]);
        assert_eq!(rx.read(&mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(rx.to_read(), 0);
    }

    #[test]
    fn one_slot_is_sacrificed() {
        let mut ring = RingBuffer::<8>::new();
        let (mut tx, rx) = ring.split();
        assert_eq!(tx.write(&[0xAA; 10]), 7);
        assert_eq!(tx.write(&[0xBB]), 0);
        assert_eq!(rx.to_read(), 7);
        assert_eq!(tx.to_write(), 0);
    }

    #[test]
    fn whole_writes_drop_instead_of_splitting() {
        let mut ring = RingBuffer::<16>::new();
        let (mut tx, mut rx) = ring.split();
        for packet in 0..3u8 {
            assert!(tx.write_whole(&[0x09, 0x90, packet, 0x7F]));
        }
        // 3 bytes left, a 4 byte record does not fit and nothing is written
        assert!(!tx.write_whole(&[0x09, 0x90, 0x03, 0x7F]));
        assert_eq!(rx.to_read(), 12);

        let mut out = [0; 4];
        assert_eq!(rx.read(&mut out), 4);
        assert_eq!(out, [0x09, 0x90, 0x00, 0x7F]);
        assert!(tx.write_whole(&[0x09, 0x90, 0x04, 0x7F]));
        assert_eq!(rx.to_read(), 12);
    }

    #[test]
    fn reading_everything_rewinds() {
        let mut ring = RingBuffer::<8>::new();
        {
            let (mut tx, mut rx) = ring.split();
            tx.write(&[1, 2, 3, 4, 5]);
            rx.skip(5);
        }
        assert_eq!(ring.read_pos.load(Ordering::Relaxed), 0);
        assert_eq!(ring.write_pos.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn open_window_blocks_rewind() {
        let mut ring = RingBuffer::<8>::new();
        let (mut tx, mut rx) = ring.split();
        tx.write(&[1, 2, 3]);
        let grant = tx.write_window();
        assert_eq!(rx.skip(3), 3);
        drop(grant);
        assert_eq!(rx.read_window(), &[] as &[u8]);
        // positions were left alone while the window was open
        assert_eq!(tx.write_window().len(), 5);
    }

    #[test]
    fn wrapped_bytes_come_out_in_order() {
        let mut ring = RingBuffer::<8>::new();
        let (mut tx, mut rx) = ring.split();
        let mut out = [0; 8];
        tx.write(&[0, 1, 2, 3, 4, 5]);
        // keep one byte so the positions are not rewound
        assert_eq!(rx.read(&mut out[..5]), 5);
        assert_eq!(tx.write(&[6, 7, 8, 9, 10, 11]), 6);
        assert_eq!(rx.read(&mut out), 7);
        assert_eq!(&out[..7], &[5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn read_window_stops_at_wrap() {
        let mut ring = RingBuffer::<8>::new();
        let (mut tx, mut rx) = ring.split();
        tx.write(&[0, 1, 2, 3, 4, 5]);
        rx.skip(5);
        tx.write(&[6, 7, 8]);
        assert_eq!(rx.read_window(), &[5, 6, 7]);
        rx.skip(3);
        assert_eq!(rx.read_window(), &[8]);
    }

    #[test]
    fn write_window_commit() {
        let mut ring = RingBuffer::<8>::new();
        let (mut tx, mut rx) = ring.split();
        let mut grant = tx.write_window();
        assert_eq!(grant.len(), 7);
        grant[..3].copy_from_slice(&[9, 8, 7]);
        assert_eq!(grant.commit(3), 3);
        assert_eq!(rx.read_window(), &[9, 8, 7]);

        let grant = tx.write_window();
        assert_eq!(grant.len(), 4);
        drop(grant);
        assert_eq!(rx.to_read(), 3);
    }

    #[test]
    fn threaded_transfer_keeps_order() {
        let mut ring = RingBuffer::<16>::new();
        let (mut tx, mut rx) = ring.split();
        let expected: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();

        std::thread::scope(|scope| {
            let source = &expected;
            scope.spawn(move || {
                let mut sent = 0;
                while sent < source.len() {
                    let end = (sent + 5).min(source.len());
                    sent += tx.write(&source[sent..end]);
                    std::thread::yield_now();
                }
            });

            let mut received = Vec::new();
            let mut out = [0; 3];
            while received.len() < expected.len() {
                let count = rx.read(&mut out);
                received.extend_from_slice(&out[..count]);
                std::thread::yield_now();
            }
            assert_eq!(received, expected);
        });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(Vec<u8>),
        Read(usize),
        Window(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::collection::vec(any::<u8>(), 0..12).prop_map(Op::Write),
            (0usize..12).prop_map(Op::Read),
            (0usize..12).prop_map(Op::Window),
        ]
    }

    proptest! {
        #[test]
        fn capacity_holds_and_fifo_order(ops in proptest::collection::vec(op(), 0..64)) {
            let mut ring = RingBuffer::<10>::new();
            let (mut tx, mut rx) = ring.split();
            let mut model = std::collections::VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(bytes) => {
                        let count = tx.write(&bytes);
                        model.extend(&bytes[..count]);
                    }
                    Op::Read(count) => {
                        let mut out = [0u8; 12];
                        let read = rx.read(&mut out[..count]);
                        let want: Vec<u8> = model.drain(..read).collect();
                        prop_assert_eq!(&out[..read], &want[..]);
                    }
                    Op::Window(count) => {
                        let mut grant = tx.write_window();
                        let count = count.min(grant.len());
                        for (i, slot) in grant[..count].iter_mut().enumerate() {
                            *slot = i as u8;
                        }
                        let committed = grant.commit(count);
                        model.extend((0..committed).map(|i| i as u8));
                    }
                }
                prop_assert_eq!(rx.to_read() + tx.to_write(), 9);
                prop_assert_eq!(rx.to_read(), model.len());
            }
        }
    }
}
