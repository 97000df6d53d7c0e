//! Lock-free latest-value sample cell.
//!
//! A [`SampleCell`] holds the most recent value written to it. It never
//! queues: a write that nobody reads is overwritten by the next one. Writers
//! never wait for readers and readers never observe a partially written value.
//!
//! # Protocol
//!
//! The cell owns a small pool of slots (`readers + 2`, at least three) and an
//! atomic `current` index naming the most recently completed slot. Each slot
//! carries a pin counter and the generation of the value it holds.
//!
//! ```text
//!            current ──────────────┐
//!                                  ▼
//!   ┌──────────────┬──────────────┬──────────────┐
//!   │ slot 0       │ slot 1       │ slot 2       │
//!   │ pins: 0      │ pins: 0      │ pins: 1      │  ◄── reader copying gen 6
//!   │ gen:  7 ◄─ writer fills     │ gen:  6      │
//!   └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! - **Write**: pick a slot that is neither current nor pinned, fill it, stamp
//!   its generation, then publish it with a single store to `current`.
//! - **Read**: load `current`, pin that slot, load `current` again. If it moved
//!   the pin is dropped and the read retries; otherwise the slot cannot be
//!   chosen by the writer until it is unpinned, so it is copied out safely.
//!
//! Pin increments and `current` loads/stores are `SeqCst`: a writer that sees
//! a slot unpinned is ordered before the reader's re-check, which then sees
//! that `current` moved and backs off.
//!
//! # Read classification
//!
//! Every reader owns a [`ReadCursor`] holding the last generation it consumed:
//!
//! | Slot generation      | Result                 | Sample copied            |
//! |----------------------|------------------------|--------------------------|
//! | never written (0)    | [`FlowStatus::NoData`]  | no                       |
//! | newer than cursor    | [`FlowStatus::NewData`] | yes, cursor advances     |
//! | equal to cursor      | [`FlowStatus::OldData`] | only with `copy_old_data`|

use crate::element::FlowStatus;
use crate::error::{Error, Result};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Generation of a slot that only holds the construction value.
const UNWRITTEN: u64 = 0;

struct Slot<M> {
    pins: AtomicU32,
    generation: AtomicU64,
    value: UnsafeCell<M>,
}

/// Unpins a slot when the read finishes, even if `Clone` panics.
struct PinGuard<'a>(&'a AtomicU32);

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-reader record of the last generation consumed.
#[derive(Debug, Default)]
pub struct ReadCursor {
    last_seen: AtomicU64,
}

impl ReadCursor {
    /// A cursor that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last generation this cursor consumed (0 if none).
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Acquire)
    }

    /// Classify `generation` and advance the cursor if it is fresh.
    ///
    /// The advance is a single `fetch_max`, so two threads sharing a cursor
    /// cannot both claim the same generation as new.
    fn claim(&self, generation: u64) -> FlowStatus {
        if generation == UNWRITTEN {
            return FlowStatus::NoData;
        }
        if self.last_seen.fetch_max(generation, Ordering::AcqRel) < generation {
            FlowStatus::NewData
        } else {
            FlowStatus::OldData
        }
    }
}

/// Lock-free single-value store with overwrite-on-write semantics.
pub struct SampleCell<M> {
    slots: Box<[CachePadded<Slot<M>>]>,
    current: CachePadded<AtomicUsize>,
    writing: AtomicBool,
    generation: AtomicU64,
}

// SAFETY: slot values are only mutated by the single writer that holds
// `writing`, and only in slots that are neither current nor pinned. Readers
// only take shared references to a pinned current slot. `M: Sync` covers the
// concurrent `&M` clones, `M: Send` covers values moved in by any thread.
unsafe impl<M: Send + Sync> Sync for SampleCell<M> {}

impl<M: Clone> SampleCell<M> {
    /// Create a cell sized for a single concurrent reader.
    pub fn new(initial: M) -> Self {
        Self::with_readers(initial, 1)
    }

    /// Create a cell sized for `readers` concurrent reads.
    ///
    /// `initial` is what every slot starts with; it is never reported as data.
    pub fn with_readers(initial: M, readers: usize) -> Self {
        let count = readers.max(1) + 2;
        let slots = (0..count)
            .map(|_| {
                CachePadded::new(Slot {
                    pins: AtomicU32::new(0),
                    generation: AtomicU64::new(UNWRITTEN),
                    value: UnsafeCell::new(initial.clone()),
                })
            })
            .collect();

        Self {
            slots,
            current: CachePadded::new(AtomicUsize::new(0)),
            writing: AtomicBool::new(false),
            generation: AtomicU64::new(UNWRITTEN),
        }
    }

    /// Number of slots in the pool.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Store `value` as the new current sample.
    ///
    /// Returns the generation assigned to the value. Never waits on readers;
    /// concurrent writers are serialized by a short spin. Fails with
    /// [`Error::CellContended`] only when more readers than the cell was sized
    /// for have pinned every spare slot.
    pub fn write(&self, value: M) -> Result<u64> {
        while self
            .writing
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let result = self.publish(value);
        self.writing.store(false, Ordering::Release);
        result
    }

    /// Publish a value as if written, so a reader that has seen nothing yet
    /// immediately gets it as [`FlowStatus::NewData`].
    pub fn seed(&self, value: M) -> Result<u64> {
        self.write(value)
    }

    fn publish(&self, value: M) -> Result<u64> {
        let current = self.current.load(Ordering::SeqCst);
        let count = self.slots.len();

        for offset in 1..count {
            let index = (current + offset) % count;
            let slot = &self.slots[index];
            if slot.pins.load(Ordering::SeqCst) != 0 {
                continue;
            }

            let generation = self.generation.load(Ordering::Relaxed) + 1;
            // SAFETY: we hold `writing`, the slot is not current and no reader
            // has it pinned; a reader that pins it from now on re-checks
            // `current`, finds another index and unpins without dereferencing.
            unsafe {
                *slot.value.get() = value;
            }
            slot.generation.store(generation, Ordering::Release);
            self.generation.store(generation, Ordering::Relaxed);
            self.current.store(index, Ordering::SeqCst);
            return Ok(generation);
        }

        Err(Error::CellContended)
    }

    /// Read the current sample into `out`, classified against `cursor`.
    ///
    /// `out` is only written for [`FlowStatus::NewData`], or for
    /// [`FlowStatus::OldData`] when `copy_old_data` is set.
    pub fn read(&self, cursor: &ReadCursor, out: &mut M, copy_old_data: bool) -> FlowStatus {
        loop {
            let index = self.current.load(Ordering::SeqCst);
            let slot = &self.slots[index];
            slot.pins.fetch_add(1, Ordering::SeqCst);
            let _pin = PinGuard(&slot.pins);

            if self.current.load(Ordering::SeqCst) != index {
                std::hint::spin_loop();
                continue;
            }

            let generation = slot.generation.load(Ordering::Acquire);
            let status = cursor.claim(generation);
            let copy = match status {
                FlowStatus::NewData => true,
                FlowStatus::OldData => copy_old_data,
                FlowStatus::NoData => false,
            };
            if copy {
                // SAFETY: the slot is pinned and was current after pinning, so
                // the writer will not touch it until the guard drops.
                out.clone_from(unsafe { &*slot.value.get() });
            }
            return status;
        }
    }

    /// Whether `cursor` has a sample it has not consumed yet.
    pub fn has_new(&self, cursor: &ReadCursor) -> bool {
        let generation = self.latest_generation();
        generation != UNWRITTEN && generation > cursor.last_seen()
    }

    /// Generation of the most recently published value (0 if never written).
    pub fn latest_generation(&self) -> u64 {
        let index = self.current.load(Ordering::SeqCst);
        self.slots[index].generation.load(Ordering::Acquire)
    }

    /// Whether anything was ever written.
    pub fn is_written(&self) -> bool {
        self.latest_generation() != UNWRITTEN
    }

    /// Snapshot the latest value, if any was written.
    pub fn latest(&self) -> Option<M> {
        let cursor = ReadCursor::new();
        loop {
            let index = self.current.load(Ordering::SeqCst);
            let slot = &self.slots[index];
            slot.pins.fetch_add(1, Ordering::SeqCst);
            let _pin = PinGuard(&slot.pins);
            if self.current.load(Ordering::SeqCst) != index {
                continue;
            }
            if cursor.claim(slot.generation.load(Ordering::Acquire)) != FlowStatus::NewData {
                return None;
            }
            // SAFETY: pinned and current, see `read`.
            return Some(unsafe { &*slot.value.get() }.clone());
        }
    }

    /// A reader with its own cursor.
    pub fn reader(&self) -> CellReader<'_, M> {
        CellReader {
            cell: self,
            cursor: ReadCursor::new(),
        }
    }
}

impl<M> fmt::Debug for SampleCell<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleCell")
            .field("slots", &self.slots.len())
            .field("current", &self.current.load(Ordering::Relaxed))
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

/// A [`SampleCell`] reader carrying its own [`ReadCursor`].
pub struct CellReader<'a, M> {
    cell: &'a SampleCell<M>,
    cursor: ReadCursor,
}

impl<M: Clone> CellReader<'_, M> {
    /// See [`SampleCell::read`].
    pub fn read(&self, out: &mut M, copy_old_data: bool) -> FlowStatus {
        self.cell.read(&self.cursor, out, copy_old_data)
    }

    /// Whether a sample newer than the last one read is available.
    pub fn is_ready(&self) -> bool {
        self.cell.has_new(&self.cursor)
    }

    /// Last generation this reader consumed.
    pub fn last_seen(&self) -> u64 {
        self.cursor.last_seen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_unwritten_cell_reports_no_data() {
        let cell = SampleCell::new(5u32);
        let reader = cell.reader();
        let mut out = 0;

        assert_eq!(reader.read(&mut out, false), FlowStatus::NoData);
        assert_eq!(reader.read(&mut out, true), FlowStatus::NoData);
        assert_eq!(out, 0);
        assert!(!reader.is_ready());
        assert!(cell.latest().is_none());
    }

    #[test]
    fn test_new_then_old_until_next_write() {
        let cell = SampleCell::new(0u32);
        let reader = cell.reader();
        let mut out = 0;

        for value in 1..=5 {
            cell.write(value).unwrap();
            assert!(reader.is_ready());
            assert_eq!(reader.read(&mut out, false), FlowStatus::NewData);
            assert_eq!(out, value);
            for _ in 0..3 {
                assert_eq!(reader.read(&mut out, false), FlowStatus::OldData);
            }
            assert!(!reader.is_ready());
        }
    }

    #[test]
    fn test_copy_old_data() {
        let cell = SampleCell::new(String::new());
        let reader = cell.reader();
        let mut out = String::new();

        cell.write("first".to_string()).unwrap();
        assert_eq!(reader.read(&mut out, false), FlowStatus::NewData);

        out.clear();
        assert_eq!(reader.read(&mut out, false), FlowStatus::OldData);
        assert!(out.is_empty());

        assert_eq!(reader.read(&mut out, true), FlowStatus::OldData);
        assert_eq!(out, "first");
    }

    #[test]
    fn test_unread_writes_are_coalesced() {
        let cell = SampleCell::new(0u64);
        let reader = cell.reader();
        let mut out = 0;

        cell.write(1).unwrap();
        cell.write(2).unwrap();
        cell.write(3).unwrap();

        assert_eq!(reader.read(&mut out, false), FlowStatus::NewData);
        assert_eq!(out, 3);
        assert_eq!(reader.read(&mut out, false), FlowStatus::OldData);
    }

    #[test]
    fn test_readers_are_classified_independently() {
        let cell = SampleCell::with_readers(0u32, 2);
        let a = cell.reader();
        let b = cell.reader();
        let mut out = 0;

        cell.write(10).unwrap();
        assert_eq!(a.read(&mut out, false), FlowStatus::NewData);
        assert_eq!(a.read(&mut out, false), FlowStatus::OldData);
        assert_eq!(b.read(&mut out, false), FlowStatus::NewData);
        assert_eq!(out, 10);
    }

    #[test]
    fn test_seed_is_delivered_as_new() {
        let cell = SampleCell::new(0u8);
        cell.seed(42).unwrap();
        let reader = cell.reader();
        let mut out = 0;
        assert_eq!(reader.read(&mut out, false), FlowStatus::NewData);
        assert_eq!(out, 42);
        assert_eq!(cell.latest(), Some(42));
    }

    #[test]
    fn test_generations_increase() {
        let cell = SampleCell::new(());
        let g1 = cell.write(()).unwrap();
        let g2 = cell.write(()).unwrap();
        assert!(g2 > g1);
        assert_eq!(cell.latest_generation(), g2);
    }

    #[test]
    fn test_write_fails_when_every_spare_slot_is_pinned() {
        let cell = SampleCell::new(0u32);
        assert_eq!(cell.slot_count(), 3);
        cell.write(1).unwrap();

        let current = cell.current.load(Ordering::SeqCst);
        for (index, slot) in cell.slots.iter().enumerate() {
            if index != current {
                slot.pins.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert!(matches!(cell.write(2), Err(Error::CellContended)));

        for (index, slot) in cell.slots.iter().enumerate() {
            if index != current {
                slot.pins.fetch_sub(1, Ordering::SeqCst);
            }
        }
        assert_eq!(cell.write(3).unwrap(), 2);
    }

    #[test]
    fn test_writes_do_not_wait_for_readers() {
        let cell = Arc::new(SampleCell::with_readers(0u64, 2));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let cursor = ReadCursor::new();
                    let mut out = 0;
                    while !stop.load(Ordering::Relaxed) {
                        cell.read(&cursor, &mut out, true);
                    }
                })
            })
            .collect();

        let start = Instant::now();
        let mut written = 0;
        for i in 1..=100_000u64 {
            if cell.write(i).is_ok() {
                written += 1;
            }
        }
        let elapsed = start.elapsed();

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(written, 100_000);
        assert_eq!(cell.latest(), Some(100_000));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[test]
    fn test_concurrent_reads_are_never_torn() {
        let cell = Arc::new(SampleCell::with_readers(vec![0u64; 32], 3));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let cursor = ReadCursor::new();
                    let mut out = Vec::new();
                    let mut last = 0;
                    let mut fresh = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        if cell.read(&cursor, &mut out, false) == FlowStatus::NewData {
                            let first = out[0];
                            assert!(out.iter().all(|&v| v == first), "torn read: {out:?}");
                            assert!(first > last, "went backwards: {first} after {last}");
                            last = first;
                            fresh += 1;
                        }
                    }
                    fresh
                })
            })
            .collect();

        for i in 1..=20_000u64 {
            cell.write(vec![i; 32]).unwrap();
        }
        thread::sleep(Duration::from_millis(10));
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }
}
