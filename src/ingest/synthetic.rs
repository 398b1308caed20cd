//! Synthetic capture source for `stub://` URIs.
//!
//! Produces an RGB8 diagonal gradient with a bright square sliding across it,
//! so every built-in filter has edges and color to work on.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{CaptureSource, SourceConfig, SourceStats};
use crate::frame::{FrameBuffer, FrameShape, PixelLayout};

pub struct SyntheticSource {
    config: SourceConfig,
    shape: FrameShape,
    frame_count: u64,
    phase: u8,
    next_deadline: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-empty frame size, got {}x{}",
                config.width,
                config.height
            ));
        }
        let shape = FrameShape::new(config.width, config.height, PixelLayout::RGB8);
        Ok(Self {
            config,
            shape,
            frame_count: 0,
            phase: rand::random::<u8>(),
            next_deadline: None,
        })
    }

    /// Start the pattern at a fixed phase, for reproducible output.
    pub fn with_phase(mut self, phase: u8) -> Self {
        self.phase = phase;
        self
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        let now = Instant::now();
        if let Some(deadline) = self.next_deadline {
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        self.next_deadline = Some(self.next_deadline.unwrap_or(now).max(now) + interval);
    }

    fn render(&self) -> Result<FrameBuffer> {
        let mut frame = FrameBuffer::new(self.shape)?;
        let width = self.shape.width;
        let height = self.shape.height;
        let t = self.frame_count.wrapping_add(self.phase as u64);

        let square = (height / 4).max(1);
        let travel = width.saturating_sub(square).max(1) as u64;
        let square_x = (t * 4 % travel) as u32;
        let square_y = (height - square.min(height)) / 2;

        for y in 0..height {
            let row = frame.row_mut(y);
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let x = x as u32;
                let inside = x >= square_x
                    && x < square_x + square
                    && y >= square_y
                    && y < square_y + square;
                if inside {
                    px.copy_from_slice(&[250, 250, 240]);
                } else {
                    px[0] = ((x as u64 * 255 / width as u64 + t) % 256) as u8;
                    px[1] = ((y as u64 * 255 / height as u64) % 256) as u8;
                    px[2] = 96;
                }
            }
        }
        Ok(frame)
    }
}

impl CaptureSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}, {} fps)",
            self.config.uri,
            self.shape,
            self.config.target_fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pace();
        let frame = self.render()?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }
}
