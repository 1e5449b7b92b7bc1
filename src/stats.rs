use log::info;
use std::time::Instant;

use crate::protocol::FrameStatus;

/// Receive-side counters for one link.
#[derive(Debug, Clone)]
pub struct Stats {
    pub frames: u64,
    /// CRC or length failures.
    pub bad: u64,
    /// Frames with a valid CRC that could not be turned into a packet.
    pub dropped: u64,
    /// Bytes discarded while hunting for a sentinel.
    pub noise: u64,
    pub bytes: u64,
    t0: Instant,
    last: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            frames: 0,
            bad: 0,
            dropped: 0,
            noise: 0,
            bytes: 0,
            t0: Instant::now(),
            last: Instant::now(),
        }
    }

    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
    }

    /// Accounts for one decode step that consumed `consumed` bytes.
    pub fn record(&mut self, status: FrameStatus, consumed: usize) {
        match status {
            FrameStatus::Valid => self.frames += 1,
            FrameStatus::NoFrame | FrameStatus::Incomplete => self.noise += consumed as u64,
            FrameStatus::BadCrc | FrameStatus::BadLength(_) => {
                self.bad += 1;
                self.noise += consumed as u64;
            }
            FrameStatus::UnknownType(_) | FrameStatus::BadPayload(_) => self.dropped += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "frames={} bad={} dropped={} noise={}B bytes={}",
            self.frames, self.bad, self.dropped, self.noise, self.bytes
        )
    }

    /// Logs throughput every `interval_s` seconds and restarts the rate window.
    pub fn maybe_log(&mut self, interval_s: f64) {
        if self.last.elapsed().as_secs_f64() < interval_s {
            return;
        }
        let dur = self.t0.elapsed().as_secs_f64().max(1e-3);
        info!(
            "[rx] {} over {:.1}s => {:.1}kB/s",
            self.summary(),
            dur,
            self.bytes as f64 / dur / 1000.0
        );
        self.last = Instant::now();
        self.t0 = Instant::now();
        self.bytes = 0;
    }
}
