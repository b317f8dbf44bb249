//! Capture seam.
//!
//! The hardware camera driver is an external collaborator: it owns the
//! raw buffer pool and delivers `(bytes, pts)` through a callback at the
//! configured frame rate. Integrations call `Pipeline::ingest_frame`
//! from that callback; the buffer must stay valid until the call returns
//! (the pipeline copies it out) and should go back to the driver's pool
//! immediately afterwards.
//!
//! `SyntheticSource` stands in for the hardware when none is attached
//! (demo runs and tests): it generates grayscale frames at the profile's
//! frame rate with a hardware-style microsecond pts.

use std::time::{Duration, Instant};

use crate::config::SensorProfile;
use crate::pipeline::Pipeline;
use crate::session::SessionState;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    period: Duration,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(profile: &SensorProfile) -> Self {
        let fps = profile.frame_rate.max(1);
        Self {
            width: profile.capture_width,
            height: profile.capture_height,
            period: Duration::from_micros(1_000_000 / fps as u64),
            frame_count: 0,
            scene_state: 0,
        }
    }

    /// Generate frames into the pipeline until shutdown. Blocks the
    /// calling thread, pacing itself to the configured frame rate.
    pub fn run(&mut self, pipeline: &Pipeline, state: &SessionState) {
        log::info!(
            "synthetic capture running at {}x{}, period {:?}",
            self.width,
            self.height,
            self.period
        );
        let started = Instant::now();
        let mut next_frame = started;
        while state.running() {
            let now = Instant::now();
            if now < next_frame {
                std::thread::sleep(next_frame - now);
            }
            next_frame += self.period;

            let pixels = self.generate_pixels();
            let pts_us = started.elapsed().as_micros() as i64;
            pipeline.ingest_frame(&pixels, pts_us);
        }
        log::info!("synthetic capture stopped after {} frames", self.frame_count);
    }

    /// Simple moving pattern so consecutive frames differ and compress to
    /// different sizes.
    fn generate_pixels(&mut self) -> Vec<u8> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; (self.width * self.height) as usize];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_capture_dimensions_and_vary() {
        let profile = SensorProfile::test_profile(8, 4);
        let mut source = SyntheticSource::new(&profile);

        let first = source.generate_pixels();
        let second = source.generate_pixels();
        assert_eq!(first.len(), 32);
        assert_eq!(second.len(), 32);
        assert_ne!(first, second);
    }
}
