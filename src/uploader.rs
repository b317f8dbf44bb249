//! Upload session driver.
//!
//! One long-lived thread drives a stop-and-go request/response protocol
//! against the base station:
//!
//! - **AwaitStart**: reset the store and position counter, keep posting a
//!   start request until the server answers `START`.
//! - **Streaming**: upload frames strictly in position order, never
//!   skipping; a `STOP` answer pauses capture upstream and ends the
//!   session once the uploader has drained to within the lag tolerance.
//! - **Draining**: capture stays paused for a grace period so in-flight
//!   encoder work settles, then the next session begins.
//!
//! Transport failures abort the session; the driver retries forever. A
//! slow or dead base station stalls this thread only, never the capture
//! path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::session::SessionState;
use crate::store::FrameStore;

/// How far the uploader may trail the newest assigned position before a
/// server `STOP` ends the session.
pub const STOP_LAG_TOLERANCE: u64 = 50;

const START_RETRY_DELAY: Duration = Duration::from_millis(100);
const DRAIN_GRACE: Duration = Duration::from_secs(1);
/// Upper bound on one wait for the next frame; bounds shutdown latency.
const STORE_WAIT: Duration = Duration::from_millis(250);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Base URL of the base station endpoint.
    pub base_url: String,
    /// Camera identifier reported with every request.
    pub identifier: String,
}

pub struct UploadDriver {
    cfg: UploadConfig,
    agent: ureq::Agent,
    state: Arc<SessionState>,
    store: Arc<FrameStore>,
}

/// Why a streaming phase ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    ServerStopped,
    TransportFailed,
    ShuttingDown,
}

impl UploadDriver {
    pub fn new(cfg: UploadConfig, state: Arc<SessionState>, store: Arc<FrameStore>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
        Self {
            cfg,
            agent,
            state,
            store,
        }
    }

    /// Drive sessions until shutdown.
    pub fn run(&self) {
        while self.state.running() {
            self.run_session();
        }
        log::info!("upload driver stopped");
    }

    fn run_session(&self) {
        // Session boundary: no positions may be assigned while the store
        // and counter are being reset.
        self.state.set_post_frames(false);
        self.store.reset();
        self.state.reset_positions();

        if !self.await_start() {
            return;
        }

        self.state.set_post_frames(true);
        let (uploaded, end) = self.stream_frames();
        self.state.set_post_frames(false);
        log::info!("session ended after {} frames: {:?}", uploaded, end);

        // Grace period for encoder workers still holding frames of the
        // session that just ended.
        let mut waited = Duration::ZERO;
        while waited < DRAIN_GRACE && self.state.running() {
            std::thread::sleep(Duration::from_millis(100));
            waited += Duration::from_millis(100);
        }
    }

    /// Post start requests until the server answers `START`.
    /// Returns false when shutdown interrupted the wait.
    fn await_start(&self) -> bool {
        let url = format!(
            "{}?action=startcamera&cam={}",
            self.cfg.base_url, self.cfg.identifier
        );
        while self.state.running() {
            match self.post(&url, &[]) {
                Ok(answer) if answer.trim() == "START" => {
                    log::info!("session started for {}", self.cfg.identifier);
                    return true;
                }
                Ok(answer) => {
                    log::debug!("start request answered {:?}, retrying", answer.trim());
                }
                Err(e) => {
                    log::debug!("start request failed: {:#}", e);
                }
            }
            std::thread::sleep(START_RETRY_DELAY);
        }
        false
    }

    fn stream_frames(&self) -> (u64, SessionEnd) {
        let mut expected: u64 = 1;
        let mut uploaded: u64 = 0;

        loop {
            if !self.state.running() {
                return (uploaded, SessionEnd::ShuttingDown);
            }
            // Strict ordering: block until exactly this position exists.
            if !self.store.wait_for(expected, STORE_WAIT) {
                continue;
            }
            let Some(frame) = self.store.get(expected) else {
                continue;
            };

            let url = format!(
                "{}?action=uploadframe&cam={}&position={}&timestamp={}",
                self.cfg.base_url, self.cfg.identifier, expected, frame.timestamp_ms
            );
            let answer = match self.post(&url, &frame.data) {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("upload of frame {} failed: {:#}", expected, e);
                    return (uploaded, SessionEnd::TransportFailed);
                }
            };
            uploaded += 1;

            if answer.trim() == "STOP" {
                // The server wants capture paused either way; whether the
                // session ends now depends on how far behind we are.
                self.state.set_post_frames(false);
                let latest = self.state.latest_position();
                if within_stop_tolerance(expected, latest) {
                    return (uploaded, SessionEnd::ServerStopped);
                }
                log::info!(
                    "server stopped at frame {}, draining backlog to {}",
                    expected,
                    latest
                );
            }

            if let Err(e) = self.store.free(expected) {
                log::error!("store free failed: {:#}", e);
            }
            expected += 1;
        }
    }

    /// One POST exchange. `Err` means transport failure; a response with
    /// any HTTP status yields its body, which callers match on.
    fn post(&self, url: &str, body: &[u8]) -> Result<String> {
        match self.agent.post(url).send_bytes(body) {
            Ok(response) => response.into_string().context("read response body"),
            Err(ureq::Error::Status(_, response)) => Ok(response.into_string().unwrap_or_default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A `STOP` ends the session once the just-uploaded position is within
/// the lag tolerance of the newest assigned position.
fn within_stop_tolerance(uploaded: u64, latest: u64) -> bool {
    uploaded > latest.saturating_sub(STOP_LAG_TOLERANCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_tolerance_matches_lag_window() {
        // Caught up: uploaded 11 of 11 assigned.
        assert!(within_stop_tolerance(11, 11));
        // Far behind: 11 of 200, keep draining.
        assert!(!within_stop_tolerance(11, 200));
        // Boundary: ends once uploaded passes latest - tolerance.
        assert!(!within_stop_tolerance(150, 200));
        assert!(within_stop_tolerance(151, 200));
        // Early session, fewer than `tolerance` frames assigned.
        assert!(within_stop_tolerance(1, 30));
    }
}
