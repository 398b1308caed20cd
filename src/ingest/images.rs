//! Still-image sequence source.
//!
//! Replays every PNG/JPEG in a directory, sorted by file name, decoded to
//! RGB8. Each image becomes one frame; the stream ends after the last file.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{CaptureSource, SourceConfig, SourceStats};
use crate::frame::{FrameBuffer, FrameShape, PixelLayout};

pub struct ImageSequenceSource {
    config: SourceConfig,
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    frames_captured: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    pub fn new(config: SourceConfig, dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            config,
            dir: dir.into(),
            files: Vec::new(),
            next_index: 0,
            frames_captured: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn decode(path: &Path) -> Result<FrameBuffer> {
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        let shape = FrameShape::new(image.width(), image.height(), PixelLayout::RGB8);
        Ok(FrameBuffer::from_pixels(shape, image.into_raw())?)
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

impl CaptureSource for ImageSequenceSource {
    fn connect(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("open image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no PNG or JPEG files in {}", self.dir.display()));
        }
        log::info!(
            "ImageSequenceSource: {} frames from {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.next_index = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        let limit_reached = self
            .config
            .frame_limit
            .is_some_and(|limit| self.frames_captured >= limit);
        let Some(path) = self.files.get(self.next_index).cloned() else {
            return Ok(None);
        };
        if limit_reached {
            return Ok(None);
        }
        self.pace();
        match Self::decode(&path) {
            Ok(frame) => {
                self.next_index += 1;
                self.frames_captured += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(Some(frame))
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            uri: self.config.uri.clone(),
        }
    }
}
