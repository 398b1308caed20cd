//! Error taxonomy.
//!
//! - `CaptureFailure` is fatal: the pipeline stops and reports it once.
//! - `ComputeError` is scoped to one filter for one cycle.
//! - `ReconfigurationConflict` rejects a single intent without changing state.

use thiserror::Error;

use crate::filter::FilterKind;
use crate::frame::FrameShape;

/// Buffer construction and copy failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shape {0} has no pixels")]
    EmptyShape(FrameShape),
    #[error("frame shape {0} exceeds addressable memory")]
    Overflow(FrameShape),
    #[error("pixel length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("frame shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        expected: FrameShape,
        actual: FrameShape,
    },
    #[error("slice at column {x} with width {width} exceeds destination width {dest_width}")]
    SliceOutOfBounds { x: u32, width: u32, dest_width: u32 },
}

/// Failure of one filter's compute function. Recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("buffer '{name}' has shape {actual}, expected {expected}")]
    RegionMismatch {
        name: &'static str,
        expected: FrameShape,
        actual: FrameShape,
    },
    #[error("expected {expected} buffers, got {actual}")]
    BufferCount { expected: usize, actual: usize },
    #[error("processing failed: {0}")]
    Processing(String),
}

/// An intent that cannot be applied in the current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconfigurationConflict {
    #[error("{0} is not active and cannot join the composite")]
    NotActive(FilterKind),
    #[error("{0} cannot be activated before the first frame is captured")]
    NoFrameYet(FilterKind),
    #[error("buffer allocation failed: {0}")]
    Allocation(#[from] FrameError),
}

/// Errors that end or interrupt a pipeline cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture failure: {0:#}")]
    CaptureFailure(anyhow::Error),
    #[error("pipeline is stopped")]
    Stopped,
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("buffer allocation failed: {0}")]
    Allocation(#[from] FrameError),
}
