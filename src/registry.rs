use std::sync::{Mutex, MutexGuard};

use crate::error::{FrameError, PipelineError};
use crate::filter::{FilterKind, ResourceSpec};
use crate::frame::{FrameBuffer, FrameShape};

/// One named working buffer guarded by its own lock.
///
/// The `Option` is `None` only while a compute task has moved the buffer out
/// under the lock; it is always restored before the guard drops.
pub struct Resource {
    spec: &'static ResourceSpec,
    buffer: Mutex<Option<FrameBuffer>>,
}

impl Resource {
    fn allocate(spec: &'static ResourceSpec, input: FrameShape) -> Result<Self, FrameError> {
        Ok(Self {
            spec,
            buffer: Mutex::new(Some(FrameBuffer::new(spec.shape_for(input))?)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Option<FrameBuffer>>, PipelineError> {
        self.buffer
            .lock()
            .map_err(|_| PipelineError::LockPoisoned("resource"))
    }

    /// Shape of the buffer, read under the lock.
    pub fn shape(&self) -> Option<FrameShape> {
        self.lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(FrameBuffer::shape))
    }
}

/// Working buffers for every filter kind, in a fixed table indexed by kind.
///
/// Membership (which entries exist) only changes through `&mut self`, so it
/// can never change while compute tasks hold `&self`. Buffer contents are
/// guarded per entry.
pub struct ResourceRegistry {
    slots: [Vec<Resource>; FilterKind::COUNT],
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
        }
    }

    /// Create every working buffer `kind` declares, sized for `input`.
    /// Existing entries for the kind are replaced.
    pub fn allocate(&mut self, kind: FilterKind, input: FrameShape) -> Result<(), FrameError> {
        let entries = kind
            .resources()
            .iter()
            .map(|spec| Resource::allocate(spec, input))
            .collect::<Result<Vec<_>, _>>()?;
        self.slots[kind.index()] = entries;
        Ok(())
    }

    /// Free every working buffer of `kind`. Returns how many were freed.
    pub fn release(&mut self, kind: FilterKind) -> usize {
        std::mem::take(&mut self.slots[kind.index()]).len()
    }

    pub fn entries(&self, kind: FilterKind) -> &[Resource] {
        &self.slots[kind.index()]
    }

    pub fn has_entries(&self, kind: FilterKind) -> bool {
        !self.slots[kind.index()].is_empty()
    }

    /// Lock every entry of `kind` in declared order.
    pub fn lock_all(
        &self,
        kind: FilterKind,
    ) -> Result<Vec<MutexGuard<'_, Option<FrameBuffer>>>, PipelineError> {
        self.slots[kind.index()].iter().map(Resource::lock).collect()
    }

    /// Total bytes held across all kinds.
    pub fn memory_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter_map(|resource| resource.shape().and_then(|s| s.byte_len()))
            .sum()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
