use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use super::{CaptureSource, SourceStats};
use crate::frame::FrameBuffer;

/// Replays a prepared queue of frames, then reports end of stream.
///
/// A scripted device error can be queued in place of a frame.
pub struct ScriptedSource {
    script: VecDeque<Step>,
    frames_captured: u64,
    uri: String,
}

enum Step {
    Frame(FrameBuffer),
    Fail(String),
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = FrameBuffer>) -> Self {
        Self {
            script: frames.into_iter().map(Step::Frame).collect(),
            frames_captured: 0,
            uri: "scripted://".to_string(),
        }
    }

    /// `count` copies of `frame`.
    pub fn repeating(frame: FrameBuffer, count: usize) -> Self {
        Self::new(std::iter::repeat(frame).take(count))
    }

    pub fn push(&mut self, frame: FrameBuffer) {
        self.script.push_back(Step::Frame(frame));
    }

    /// Queue a device error; the capture after it fails with `message`.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.script.push_back(Step::Fail(message.into()));
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl CaptureSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        match self.script.pop_front() {
            Some(Step::Frame(frame)) => {
                self.frames_captured += 1;
                Ok(Some(frame))
            }
            Some(Step::Fail(message)) => Err(anyhow!(message)),
            None => Ok(None),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            uri: self.uri.clone(),
        }
    }
}
