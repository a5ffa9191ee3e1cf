//! Frame pacer.
//!
//! Driven by a display-rate tick and self-throttled to a minimum interval
//! between forwarded frames. Only the most recent frame is ever taken from the
//! source; nothing is buffered between ticks.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::camera::{EncodedFrame, FrameSource};
use crate::transport::TransportClient;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(40);

/// Where paced frames go. Fire-and-forget.
pub trait FrameSink {
    /// Returns whether the frame was handed on.
    fn send_frame(&mut self, frame: &EncodedFrame) -> bool;
}

impl FrameSink for TransportClient {
    fn send_frame(&mut self, frame: &EncodedFrame) -> bool {
        TransportClient::send_frame(self, frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    Stopped,
    /// 送信間隔が経過する前のtick
    Throttled,
    /// フレーム未到着。次の枠で再試行
    NotReady,
    Sent,
    /// 送信先が拒否（リンク未接続）
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub ticks: u64,
    pub throttled: u64,
    pub not_ready: u64,
    pub sent: u64,
    pub dropped: u64,
}

pub struct FramePacer {
    interval: Duration,
    last_slot: Option<Instant>,
    running: bool,
    stats: PacerStats,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_slot: None,
            running: false,
            stats: PacerStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    pub fn start(&mut self) {
        self.running = true;
        self.last_slot = None;
        self.stats = PacerStats::default();
        info!(interval_ms = self.interval.as_millis() as u64, "frame pacer started");
    }

    pub fn stop(&mut self) {
        if self.running {
            info!(
                sent = self.stats.sent,
                dropped = self.stats.dropped,
                "frame pacer stopped"
            );
        }
        self.running = false;
    }

    /// One display tick. A slot opens once `interval` has passed since the last
    /// one; a frame that is not ready still consumes its slot.
    pub fn on_tick(
        &mut self,
        now: Instant,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> PaceOutcome {
        if !self.running {
            return PaceOutcome::Stopped;
        }
        self.stats.ticks += 1;

        if let Some(last) = self.last_slot {
            if now.saturating_duration_since(last) < self.interval {
                self.stats.throttled += 1;
                return PaceOutcome::Throttled;
            }
        }
        self.last_slot = Some(now);

        let frame = match source.grab() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stats.not_ready += 1;
                return PaceOutcome::NotReady;
            }
            Err(e) => {
                debug!(error = %e, "frame grab failed, retrying next slot");
                self.stats.not_ready += 1;
                return PaceOutcome::NotReady;
            }
        };

        if sink.send_frame(&frame) {
            self.stats.sent += 1;
            PaceOutcome::Sent
        } else {
            self.stats.dropped += 1;
            PaceOutcome::Dropped
        }
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}
