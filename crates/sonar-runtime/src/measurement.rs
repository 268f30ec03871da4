//! Single-slot measurement hand-off from capture context to reporter.
//!
//! The capture callback runs asynchronously to the reporter and may fire in
//! the middle of a read. The slot is a seqlock over atomics:
//!
//! - The writer bumps the sequence to odd, stores the fields, then bumps it
//!   to even. It never waits.
//! - Readers retry until they see the same even sequence before and after
//!   loading the fields, so a returned value always comes from exactly one
//!   publish.
//!
//! There is exactly one [`MeasurementPublisher`] (not `Clone`, publishing
//! takes `&mut self`), which makes the single-writer requirement a type
//! property rather than a convention. Readers are freely cloneable.
//!
//! ```text
//! seq:  0        1          2        3          4
//!       empty -> writing -> W1    -> writing -> W2 ...
//! ```

use crossbeam_utils::CachePadded;
use sonar_common::{Instant, PulseWidth, Ticks};
use static_assertions::{assert_impl_all, assert_not_impl_any};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// One complete reading, as written by a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Echo pulse width in capture timer ticks.
    pub width: PulseWidth,
    /// When the echo pulse ended.
    pub captured_at: Instant,
    /// Publish count; 1 for the first capture.
    pub sequence: u64,
}

#[derive(Debug)]
struct Slot {
    sequence: CachePadded<AtomicU64>,
    width: AtomicU32,
    captured_at: AtomicU64,
}

/// Create an empty slot, returning its only writer and a first reader.
#[must_use]
pub fn measurement_slot() -> (MeasurementPublisher, MeasurementReader) {
    let slot = Arc::new(Slot {
        sequence: CachePadded::new(AtomicU64::new(0)),
        width: AtomicU32::new(0),
        captured_at: AtomicU64::new(0),
    });
    (
        MeasurementPublisher {
            slot: Arc::clone(&slot),
        },
        MeasurementReader { slot },
    )
}

/// Write side of the slot.
#[derive(Debug)]
pub struct MeasurementPublisher {
    slot: Arc<Slot>,
}

impl MeasurementPublisher {
    /// Overwrite the slot with a new reading. Wait-free.
    #[inline]
    pub fn publish(&mut self, width: PulseWidth, captured_at: Instant) {
        let slot = &*self.slot;
        let seq = slot.sequence.load(Ordering::Relaxed);

        slot.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        slot.width.store(width.0, Ordering::Relaxed);
        slot.captured_at.store(captured_at.as_micros(), Ordering::Relaxed);

        slot.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Reader attached to this slot.
    #[must_use]
    pub fn reader(&self) -> MeasurementReader {
        MeasurementReader {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Read side of the slot.
#[derive(Debug, Clone)]
pub struct MeasurementReader {
    slot: Arc<Slot>,
}

impl MeasurementReader {
    /// Latest complete reading, or `None` before the first capture.
    #[must_use]
    pub fn latest(&self) -> Option<Measurement> {
        let slot = &*self.slot;
        loop {
            let seq1 = slot.sequence.load(Ordering::Acquire);
            if seq1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            if seq1 == 0 {
                return None;
            }

            let width = slot.width.load(Ordering::Relaxed);
            let captured_at = slot.captured_at.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            let seq2 = slot.sequence.load(Ordering::Relaxed);
            if seq1 == seq2 {
                return Some(Measurement {
                    width: Ticks(width),
                    captured_at: Instant::from_micros(captured_at),
                    sequence: seq1 / 2,
                });
            }
        }
    }

    /// Number of publishes so far.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.slot.sequence.load(Ordering::Acquire) / 2
    }
}

assert_impl_all!(MeasurementPublisher: Send);
assert_not_impl_any!(MeasurementPublisher: Clone);
assert_impl_all!(MeasurementReader: Send, Sync, Clone);
