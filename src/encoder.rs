//! Encoder worker pool.
//!
//! A fixed set of worker threads absorbs raw frames from the capture
//! callback without blocking it. Each worker owns one slot: a private raw
//! buffer sized to the profile's capture frame plus the pending-work state
//! for that buffer. The capture path claims a free slot (bounded
//! round-robin scan, fails fast when the pool is saturated), copies the
//! hardware bytes in, and marks the slot pending; the worker picks the
//! frame up, runs geometry + JPEG compression off the hot path, publishes
//! the result to the frame store, and returns its slot to the free state.
//!
//! Slot locks are held only for state changes and the producer-side byte
//! copy, never across compression or store I/O.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::SensorProfile;
use crate::jpeg;
use crate::session::SessionState;
use crate::store::FrameStore;
use crate::transform;

/// Worker count, tuned to the sensor frame rate and compression latency.
pub const ENCODER_POOL_SIZE: usize = 8;

/// How often an idle worker re-checks the shutdown flag while parked.
const IDLE_RECHECK: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug)]
enum SlotState {
    Free,
    /// Granted to the capture path, bytes not yet copied in.
    Claimed,
    /// Holds a raw frame awaiting encode.
    Pending {
        position: u64,
        timestamp_ms: i64,
        len: usize,
    },
}

struct SlotInner {
    state: SlotState,
    /// Private raw buffer, reused across frames. Only the producer writes
    /// it (while Claimed) and only the owning worker reads it (while
    /// Pending).
    raw: Vec<u8>,
}

struct Slot {
    inner: Mutex<SlotInner>,
    work: Condvar,
}

impl Slot {
    fn new(raw_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Free,
                raw: vec![0; raw_capacity],
            }),
            work: Condvar::new(),
        }
    }
}

/// The slot table shared between the capture path and the workers.
///
/// Kept separate from the worker threads so slot assignment is testable
/// on its own.
pub struct SlotTable {
    slots: Vec<Arc<Slot>>,
    /// Index of the last slot granted; scans start just after it.
    cursor: Mutex<usize>,
}

impl SlotTable {
    pub fn new(count: usize, raw_capacity: usize) -> Self {
        assert!(count > 0);
        Self {
            slots: (0..count).map(|_| Arc::new(Slot::new(raw_capacity))).collect(),
            cursor: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Claim a free slot, scanning round-robin from the slot after the
    /// last grant. Returns `None` when every slot is busy; the caller
    /// must drop the frame.
    pub fn acquire_free_slot(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock().unwrap();
        for step in 1..=self.slots.len() {
            let index = (*cursor + step) % self.slots.len();
            let mut inner = self.slots[index].inner.lock().unwrap();
            if matches!(inner.state, SlotState::Free) {
                inner.state = SlotState::Claimed;
                *cursor = index;
                return Some(index);
            }
        }
        None
    }

    /// Hand a raw frame to a claimed slot and wake its worker.
    ///
    /// The byte copy happens here, before the caller releases the
    /// hardware buffer back to its pool. On error the slot is returned to
    /// the free state.
    pub fn submit(
        &self,
        slot_index: usize,
        bytes: &[u8],
        timestamp_ms: i64,
        position: u64,
    ) -> Result<()> {
        let slot = &self.slots[slot_index];
        let mut inner = slot.inner.lock().unwrap();
        if !matches!(inner.state, SlotState::Claimed) {
            bail!(
                "submit to slot {} in state {:?} (not claimed)",
                slot_index,
                inner.state
            );
        }
        if bytes.len() > inner.raw.len() {
            inner.state = SlotState::Free;
            bail!(
                "raw frame of {} bytes exceeds slot buffer of {}",
                bytes.len(),
                inner.raw.len()
            );
        }
        inner.raw[..bytes.len()].copy_from_slice(bytes);
        inner.state = SlotState::Pending {
            position,
            timestamp_ms,
            len: bytes.len(),
        };
        slot.work.notify_one();
        Ok(())
    }

    /// Return a slot to the free state. Workers call this after encoding;
    /// it also releases a claimed slot whose frame was abandoned.
    pub fn complete(&self, slot_index: usize) {
        let mut inner = self.slots[slot_index].inner.lock().unwrap();
        inner.state = SlotState::Free;
    }

    /// Wake every parked worker so it can observe shutdown.
    pub fn notify_all(&self) {
        for slot in &self.slots {
            let _inner = slot.inner.lock().unwrap();
            slot.work.notify_all();
        }
    }
}

/// The worker pool: a `SlotTable` plus one encode thread per slot.
pub struct EncoderPool {
    table: Arc<SlotTable>,
    workers: Vec<JoinHandle<()>>,
}

impl EncoderPool {
    /// Spawn `ENCODER_POOL_SIZE` workers for the given profile. The pool
    /// size is fixed for the life of the process.
    pub fn start(
        profile: SensorProfile,
        store: Arc<FrameStore>,
        state: Arc<SessionState>,
    ) -> Self {
        let raw_capacity = (profile.capture_width * profile.capture_height) as usize;
        let table = Arc::new(SlotTable::new(ENCODER_POOL_SIZE, raw_capacity));
        log::debug!(
            "starting {} encoder workers, {} byte raw buffers",
            ENCODER_POOL_SIZE,
            raw_capacity
        );

        let workers = (0..ENCODER_POOL_SIZE)
            .map(|id| {
                let slot = Arc::clone(&table.slots[id]);
                let profile = profile.clone();
                let store = Arc::clone(&store);
                let state = Arc::clone(&state);
                std::thread::Builder::new()
                    .name(format!("encoder-{}", id))
                    .spawn(move || worker_loop(id, slot, profile, store, state))
                    .expect("spawn encoder worker")
            })
            .collect();

        Self { table, workers }
    }

    pub fn table(&self) -> &Arc<SlotTable> {
        &self.table
    }

    /// Join the workers. The shared running flag must already be cleared.
    pub fn shutdown(self) {
        self.table.notify_all();
        for worker in self.workers {
            if worker.join().is_err() {
                log::error!("encoder worker panicked");
            }
        }
    }
}

fn worker_loop(
    id: usize,
    slot: Arc<Slot>,
    profile: SensorProfile,
    store: Arc<FrameStore>,
    state: Arc<SessionState>,
) {
    loop {
        // Park until this slot holds a pending frame, then steal the raw
        // buffer so compression runs outside the lock.
        let (position, timestamp_ms, len, raw) = {
            let mut inner = slot.inner.lock().unwrap();
            loop {
                if let SlotState::Pending {
                    position,
                    timestamp_ms,
                    len,
                } = inner.state
                {
                    break (position, timestamp_ms, len, std::mem::take(&mut inner.raw));
                }
                if !state.running() {
                    return;
                }
                let (guard, _) = slot.work.wait_timeout(inner, IDLE_RECHECK).unwrap();
                inner = guard;
            }
        };

        let published = encode_frame(&raw[..len], &profile)
            .and_then(|jpeg| store.set(position, timestamp_ms, jpeg));
        if let Err(e) = published {
            // The frame is lost but the slot must come back, or the pool
            // shrinks by one worker forever.
            log::warn!("encoder {}: frame {} lost: {:#}", id, position, e);
        }

        let mut inner = slot.inner.lock().unwrap();
        inner.raw = raw;
        inner.state = SlotState::Free;
    }
}

fn encode_frame(raw: &[u8], profile: &SensorProfile) -> Result<Vec<u8>> {
    let fitted = transform::fit_frame(
        raw,
        profile.capture_width,
        profile.capture_height,
        profile.crop,
        profile.rotation,
        profile.output_width,
        profile.output_height,
    )?;
    jpeg::compress_gray(&fitted, profile.output_width, profile.output_height)
}
