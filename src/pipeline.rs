//! Per-frame capture path.
//!
//! `Pipeline::ingest_frame` is the code that runs in the capture
//! collaborator's callback context, once per raw frame:
//!
//! 1. timestamp correction (inline, allocation-free)
//! 2. frame-acceptance gate (server-driven)
//! 3. non-blocking encoder slot assignment
//! 4. byte copy out of the hardware buffer, handoff to the worker
//!
//! It must return promptly so the hardware buffer can go back to the
//! driver's pool; it never waits on encoders, the store, or the network.
//! When the encoder pool is saturated the frame is dropped and counted —
//! an accepted degradation under sustained load, not an error.
//!
//! A position is claimed only after a slot is granted, so a dropped frame
//! never consumes a position and the store stays dense for the uploader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::encoder::SlotTable;
use crate::session::SessionState;
use crate::timing::JitterCorrector;

pub struct Pipeline {
    state: Arc<SessionState>,
    table: Arc<SlotTable>,
    corrector: Mutex<JitterCorrector>,
    /// Expected raw frame size; anything else is rejected before a
    /// position is assigned.
    frame_len: usize,
    dropped: AtomicU64,
}

impl Pipeline {
    pub fn new(state: Arc<SessionState>, table: Arc<SlotTable>, frame_len: usize) -> Self {
        Self {
            state,
            table,
            corrector: Mutex::new(JitterCorrector::new()),
            frame_len,
            dropped: AtomicU64::new(0),
        }
    }

    /// Frames dropped because every encoder slot was busy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Dropped-frame gaps detected in the sensor's pts stream.
    pub fn sensor_drops(&self) -> u64 {
        self.corrector.lock().unwrap().drop_count()
    }

    /// Feed one raw frame from the capture callback. `bytes` is only
    /// valid for the duration of this call; it is copied out before
    /// returning.
    pub fn ingest_frame(&self, bytes: &[u8], pts_us: i64) {
        let arrival_ns = wall_clock_ns();
        let corrected = self
            .corrector
            .lock()
            .unwrap()
            .correct(arrival_ns, pts_us);
        let Some(timestamp_ms) = corrected else {
            // Still warming up the arrival ring.
            return;
        };

        if !self.state.post_frames() {
            return;
        }

        if bytes.len() != self.frame_len {
            log::warn!(
                "raw frame of {} bytes does not match configured {} bytes, dropping",
                bytes.len(),
                self.frame_len
            );
            return;
        }

        let Some(slot) = self.table.acquire_free_slot() else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("encoder pool exhausted, frame dropped (total {})", dropped);
            return;
        };

        let position = self.state.next_position();
        if let Err(e) = self.table.submit(slot, bytes, timestamp_ms, position) {
            // Cannot happen with the length checked above; the position is
            // burned if it does, so make it loud.
            log::error!("frame {} handoff failed: {:#}", position, e);
        }
    }
}

fn wall_clock_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
