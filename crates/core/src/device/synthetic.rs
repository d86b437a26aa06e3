//! Synthetic capture backend
//!
//! Deterministic stand-in for camera hardware: a moving color test pattern
//! and a sweeping disparity ramp at a fixed frame rate. Used by the default
//! pipeline when no hardware stack is linked in, and by tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::config::DeviceConfig;
use crate::data::StreamKind;
use crate::device::pipeline::{CaptureBackend, RawFrame};
use crate::error::Result;

/// Frame interval of the synthetic source (roughly 30 fps).
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

pub struct SyntheticBackend {
    width: u32,
    height: u32,
    max_disparity: u16,
    serve_color: bool,
    serve_depth: bool,
    ticker: Interval,
    frame_index: u64,
    pending: Option<RawFrame>,
}

impl SyntheticBackend {
    pub fn new(config: &DeviceConfig) -> Self {
        let mut ticker = interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            width: config.width,
            height: config.height,
            max_disparity: config.max_disparity() as u16,
            serve_color: config.serves(StreamKind::Color),
            serve_depth: config.serves(StreamKind::Depth),
            ticker,
            frame_index: 0,
            pending: None,
        }
    }

    fn render_color(&self) -> RawFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![0u8; w * h * 3];
        let bar = (self.frame_index as usize * 4) % w.max(1);
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                data[i] = (x * 255 / w.max(1)) as u8;
                data[i + 1] = (y * 255 / h.max(1)) as u8;
                data[i + 2] = if x == bar { 255 } else { 32 };
            }
        }
        RawFrame::Color {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn render_disparity(&self) -> RawFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let max = self.max_disparity as usize;
        let shift = (self.frame_index as usize * 2) % w.max(1);
        let mut values = vec![0u16; w * h];
        for y in 0..h {
            for x in 0..w {
                let ramp = (x + shift) % w.max(1);
                values[y * w + x] = (ramp * max / w.max(1)) as u16;
            }
        }
        RawFrame::Disparity {
            width: self.width,
            height: self.height,
            values,
        }
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    async fn next_frame(&mut self) -> Result<RawFrame> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.ticker.tick().await;
        self.frame_index += 1;
        // Emit color first, queue the matching disparity map for the next
        // call so both streams advance in lockstep.
        match (self.serve_color, self.serve_depth) {
            (true, true) => {
                self.pending = Some(self.render_disparity());
                Ok(self.render_color())
            }
            (true, false) => Ok(self.render_color()),
            (false, _) => Ok(self.render_disparity()),
        }
    }
}
