//! Capture sources.
//!
//! - Synthetic `stub://` source (moving test pattern, optionally paced)
//! - Scripted source (fixed frame queue, for tests and replay)
//! - Still-image sequence (feature: image-io)
//!
//! A source yields `Ok(None)` at end of stream and `Err` on device failure;
//! the pipeline treats both as a fatal capture failure.

#[cfg(feature = "image-io")]
pub mod images;
pub mod scripted;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::FrameBuffer;

#[cfg(feature = "image-io")]
pub use images::ImageSequenceSource;
pub use scripted::ScriptedSource;
pub use synthetic::SyntheticSource;

/// Configuration shared by all capture sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://<name>` for the synthetic pattern, `images://<dir>` for a
    /// still-image sequence.
    pub uri: String,
    /// Frame width for generated frames.
    pub width: u32,
    /// Frame height for generated frames.
    pub height: u32,
    /// Target frame rate; 0 runs unpaced.
    pub target_fps: u32,
    /// End of stream after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            target_fps: 60,
            frame_limit: None,
        }
    }
}

/// Statistics for a capture source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// A live frame producer.
pub trait CaptureSource: Send {
    /// Open the device or stream.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Block until the next frame is available. `Ok(None)` is end of stream.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Build the source named by `config.uri`.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn CaptureSource>> {
    if config.uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)?));
    }
    if let Some(dir) = config.uri.strip_prefix("images://") {
        #[cfg(feature = "image-io")]
        {
            let dir = dir.to_string();
            return Ok(Box::new(ImageSequenceSource::new(config, dir)?));
        }
        #[cfg(not(feature = "image-io"))]
        {
            return Err(anyhow!(
                "image sequence source {} requires the image-io feature",
                dir
            ));
        }
    }
    Err(anyhow!("unsupported capture source uri '{}'", config.uri))
}
