use std::sync::{Mutex, MutexGuard};

use crate::error::{FrameError, PipelineError};
use crate::filter::{ComputeFn, FilterKind};
use crate::frame::{FrameBuffer, FrameShape};

/// Per-kind filter state: enabled flag, output buffer and compute function.
///
/// `output` holds a buffer exactly when the slot is enabled. Enabling and
/// disabling take `&mut self`; compute tasks only ever see `&self`.
pub struct FilterSlot {
    kind: FilterKind,
    enabled: bool,
    output: Mutex<Option<FrameBuffer>>,
    compute: ComputeFn,
}

impl FilterSlot {
    pub fn new(kind: FilterKind, compute: ComputeFn) -> Self {
        Self {
            kind,
            enabled: false,
            output: Mutex::new(None),
            compute,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn compute(&self) -> &ComputeFn {
        &self.compute
    }

    /// Allocate the output for `shape` and mark the slot enabled.
    /// Returns `false` if it was already enabled.
    pub fn enable(&mut self, shape: FrameShape) -> Result<bool, FrameError> {
        if self.enabled {
            return Ok(false);
        }
        self.output = Mutex::new(Some(FrameBuffer::new(shape)?));
        self.enabled = true;
        Ok(true)
    }

    /// Free the output and mark the slot disabled.
    /// Returns `false` if it was already disabled.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.output = Mutex::new(None);
        self.enabled = false;
        true
    }

    /// Replace the output with a fresh buffer of `shape`. No-op while disabled.
    ///
    /// Also clears any poison left by a panicking compute task.
    pub fn reallocate(&mut self, shape: FrameShape) -> Result<(), FrameError> {
        if self.enabled {
            self.output = Mutex::new(Some(FrameBuffer::new(shape)?));
        }
        Ok(())
    }

    pub fn lock_output(&self) -> Result<MutexGuard<'_, Option<FrameBuffer>>, PipelineError> {
        self.output
            .lock()
            .map_err(|_| PipelineError::LockPoisoned("filter output"))
    }

    /// Whether an output buffer is currently allocated.
    pub fn has_output(&self) -> bool {
        self.lock_output().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn output_shape(&self) -> Option<FrameShape> {
        self.lock_output()
            .ok()
            .and_then(|guard| guard.as_ref().map(FrameBuffer::shape))
    }
}
