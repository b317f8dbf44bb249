//! Frame timestamp correction.
//!
//! Hardware arrival times jitter by several milliseconds around the true
//! sensor period. `JitterCorrector` turns the noisy arrival clock into a
//! smoothed, monotonically advancing presentation timestamp and detects
//! dropped frames from gaps in the hardware pts stream.
//!
//! The corrector runs inline in the capture callback context:
//! - O(ring size) per frame, no allocation
//! - never blocks
//!
//! Until the arrival ring has filled once (200 frames), no corrected
//! timestamp is produced; callers must treat those frames as warm-up and
//! not submit them downstream.

/// Number of arrival timestamps averaged to estimate the frame period.
pub const ARRIVAL_RING_SIZE: usize = 200;

/// Smoothing divisor: the output clock moves toward the arrival clock by
/// one frame period plus/minus period/SMOOTHING_DIV per frame.
const SMOOTHING_DIV: i64 = 15;

pub struct JitterCorrector {
    /// Wall-clock arrival times in nanoseconds, most recent first.
    arrivals: [i64; ARRIVAL_RING_SIZE],
    /// Last corrected timestamp in nanoseconds (0 = none yet).
    last_corrected_ns: i64,
    /// Hardware pts of the previous frame in microseconds.
    last_pts_us: i64,
    drops: u64,
}

impl JitterCorrector {
    pub fn new() -> Self {
        Self {
            arrivals: [0; ARRIVAL_RING_SIZE],
            last_corrected_ns: 0,
            last_pts_us: 0,
            drops: 0,
        }
    }

    /// Number of dropped-frame gaps detected so far.
    pub fn drop_count(&self) -> u64 {
        self.drops
    }

    /// Feed one frame arrival and produce its corrected timestamp in
    /// milliseconds, or `None` while the arrival ring is still warming up.
    ///
    /// `arrival_ns` is the wall-clock arrival time in nanoseconds;
    /// `pts_us` is the hardware presentation timestamp in microseconds.
    pub fn correct(&mut self, arrival_ns: i64, pts_us: i64) -> Option<i64> {
        self.arrivals.copy_within(0..ARRIVAL_RING_SIZE - 1, 1);
        self.arrivals[0] = arrival_ns;

        let Some(avg_frame_ns) = self.average_frame_duration() else {
            // Ring not full yet: bookkeeping only, no output.
            self.last_pts_us = pts_us;
            return None;
        };

        if self.last_corrected_ns == 0 {
            self.last_corrected_ns = arrival_ns;
        }

        // Nudge the output clock toward the arrival clock by a fraction of
        // one frame period, so raw jitter is not tracked 1:1.
        let step = avg_frame_ns / SMOOTHING_DIV;
        let mut corrected = if arrival_ns - self.last_corrected_ns > avg_frame_ns {
            self.last_corrected_ns + avg_frame_ns + step
        } else {
            self.last_corrected_ns + avg_frame_ns - step
        };

        // A hardware pts gap of more than 1.5 frame periods means the sensor
        // skipped a frame; advance the output clock past the missing slot.
        if pts_us - self.last_pts_us > (avg_frame_ns + avg_frame_ns / 2) / 1000 {
            self.drops += 1;
            log::warn!("frame dropped by sensor (total {})", self.drops);
            corrected += avg_frame_ns;
        }

        self.last_corrected_ns = corrected;
        self.last_pts_us = pts_us;

        Some(corrected / 1_000_000)
    }

    /// Mean of consecutive arrival differences across the ring, or `None`
    /// until every slot has been written.
    fn average_frame_duration(&self) -> Option<i64> {
        let mut sum = 0i64;
        for i in 0..ARRIVAL_RING_SIZE - 1 {
            if self.arrivals[i + 1] == 0 {
                return None;
            }
            sum += self.arrivals[i] - self.arrivals[i + 1];
        }
        Some(sum / (ARRIVAL_RING_SIZE as i64 - 1))
    }
}

impl Default for JitterCorrector {
    fn default() -> Self {
        Self::new()
    }
}
