//! Shared frame store.
//!
//! The store is the handoff point between the encoder workers and the
//! upload driver: a bounded ring of compressed frames keyed by upload
//! position. Workers `set` finished frames; the uploader waits for the
//! exact next position, reads it, uploads it, and `free`s it.
//!
//! Positions start at 1 and are dense within a session. Because the
//! uploader never trails the newest assigned position by more than the
//! server's stop tolerance plus the encoder pool depth, only a small
//! recent window of positions is ever live; the ring capacity covers that
//! window with headroom.
//!
//! Position reuse is only valid after an explicit `free` (or a session
//! `reset`); `set` into an occupied ring slot is a caller bug and is
//! reported as an error rather than silently overwriting.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

/// Ring capacity: stop tolerance (50) + encoder pool depth + headroom,
/// rounded up to a power of two.
pub const STORE_CAPACITY: usize = 128;

/// Read view of one stored frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFrame {
    pub data: Vec<u8>,
    pub timestamp_ms: i64,
}

enum Entry {
    Empty,
    Ready {
        position: u64,
        timestamp_ms: i64,
        data: Vec<u8>,
    },
}

impl Entry {
    fn holds(&self, wanted: u64) -> bool {
        matches!(self, Entry::Ready { position, .. } if *position == wanted)
    }
}

pub struct FrameStore {
    entries: Mutex<Vec<Entry>>,
    ready: Condvar,
    capacity: usize,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::with_capacity(STORE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0);
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || Entry::Empty);
        Self {
            entries: Mutex::new(entries),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, position: u64) -> usize {
        (position % self.capacity as u64) as usize
    }

    /// Install a compressed frame at `position`.
    ///
    /// The ring slot must be empty: either never used, or explicitly freed
    /// since its last use. Anything else is a contract violation by the
    /// caller.
    pub fn set(&self, position: u64, timestamp_ms: i64, data: Vec<u8>) -> Result<()> {
        if position == 0 {
            bail!("store position 0 is reserved");
        }
        let slot = self.slot(position);
        let mut entries = self.entries.lock().unwrap();
        if let Entry::Ready { position: held, .. } = &entries[slot] {
            bail!(
                "store slot for position {} still holds position {} (missing free)",
                position,
                held
            );
        }
        entries[slot] = Entry::Ready {
            position,
            timestamp_ms,
            data,
        };
        self.ready.notify_all();
        Ok(())
    }

    /// Whether `position` currently holds a frame.
    pub fn have_data(&self, position: u64) -> bool {
        let entries = self.entries.lock().unwrap();
        entries[self.slot(position)].holds(position)
    }

    /// Block until `position` holds a frame, or the timeout elapses.
    /// Returns `true` when the frame is present.
    pub fn wait_for(&self, position: u64, timeout: Duration) -> bool {
        let slot = self.slot(position);
        let mut entries = self.entries.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !entries[slot].holds(position) {
            let remaining = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(remaining) => remaining,
                None => return false,
            };
            let (guard, result) = self.ready.wait_timeout(entries, remaining).unwrap();
            entries = guard;
            if result.timed_out() && !entries[slot].holds(position) {
                return false;
            }
        }
        true
    }

    /// Read the frame at `position` without removing it.
    pub fn get(&self, position: u64) -> Option<StoredFrame> {
        let entries = self.entries.lock().unwrap();
        match &entries[self.slot(position)] {
            Entry::Ready {
                position: held,
                timestamp_ms,
                data,
            } if *held == position => Some(StoredFrame {
                data: data.clone(),
                timestamp_ms: *timestamp_ms,
            }),
            _ => None,
        }
    }

    /// Release the frame at `position`, making its ring slot reusable.
    pub fn free(&self, position: u64) -> Result<()> {
        let slot = self.slot(position);
        let mut entries = self.entries.lock().unwrap();
        if !entries[slot].holds(position) {
            bail!("free of position {} that is not held", position);
        }
        entries[slot] = Entry::Empty;
        Ok(())
    }

    /// Discard every stored frame. Called once per session start.
    pub fn reset(&self) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            *entry = Entry::Empty;
        }
    }

    /// Wake any thread blocked in `wait_for` so it can re-check shutdown.
    pub fn notify_all(&self) {
        let _entries = self.entries.lock().unwrap();
        self.ready.notify_all();
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_get_free_round_trip() -> Result<()> {
        let store = FrameStore::new();
        store.set(5, 1234, vec![1, 2, 3])?;

        assert!(store.have_data(5));
        let frame = store.get(5).unwrap();
        assert_eq!(frame.data, vec![1, 2, 3]);
        assert_eq!(frame.timestamp_ms, 1234);

        store.free(5)?;
        assert!(!store.have_data(5));
        assert!(store.get(5).is_none());
        Ok(())
    }

    #[test]
    fn position_is_checked_not_just_the_slot() -> Result<()> {
        let store = FrameStore::with_capacity(8);
        store.set(3, 0, vec![9])?;
        // Position 11 maps to the same ring slot but is a different frame.
        assert!(!store.have_data(11));
        assert!(store.get(11).is_none());
        Ok(())
    }

    #[test]
    fn double_set_without_free_is_rejected() {
        let store = FrameStore::with_capacity(8);
        store.set(3, 0, vec![1]).unwrap();
        // Same position, and a colliding later position: both are misuse.
        assert!(store.set(3, 0, vec![2]).is_err());
        assert!(store.set(11, 0, vec![2]).is_err());
    }

    #[test]
    fn free_of_empty_position_is_rejected() {
        let store = FrameStore::new();
        assert!(store.free(4).is_err());
    }

    #[test]
    fn reset_clears_every_position() -> Result<()> {
        let store = FrameStore::new();
        for position in 1..=100u64 {
            store.set(position, position as i64, vec![0u8; 4])?;
        }
        store.reset();
        for position in 1..=100u64 {
            assert!(!store.have_data(position));
        }
        Ok(())
    }

    #[test]
    fn wait_for_sees_a_frame_set_from_another_thread() {
        let store = Arc::new(FrameStore::new());
        let writer = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            writer.set(1, 7, vec![42]).unwrap();
        });
        assert!(store.wait_for(1, Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_times_out_when_nothing_arrives() {
        let store = FrameStore::new();
        assert!(!store.wait_for(1, Duration::from_millis(20)));
    }
}
