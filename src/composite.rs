//! Side-by-side composite of selected filter outputs.
//!
//! The composite is `count` raw-frame-sized tiles wide and one tile high.
//! Tiles are placed in `FilterKind` declaration order, never activation order.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{FrameError, PipelineError};
use crate::filter::FilterKind;
use crate::frame::{FrameBuffer, FrameShape};

/// Which kinds are tiled into the composite, and whether compositing is on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositeSelection {
    enabled: bool,
    members: [bool; FilterKind::COUNT],
}

impl CompositeSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the global flag. Returns whether it changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        changed
    }

    pub fn contains(&self, kind: FilterKind) -> bool {
        self.members[kind.index()]
    }

    /// Add or remove `kind`. Returns whether membership changed.
    pub fn set_member(&mut self, kind: FilterKind, included: bool) -> bool {
        let slot = &mut self.members[kind.index()];
        let changed = *slot != included;
        *slot = included;
        changed
    }

    /// Number of selected kinds.
    pub fn count(&self) -> usize {
        self.members.iter().filter(|m| **m).count()
    }

    /// Selected kinds in declaration order.
    pub fn members(&self) -> impl Iterator<Item = FilterKind> + '_ {
        FilterKind::ALL
            .into_iter()
            .filter(move |kind| self.members[kind.index()])
    }

    /// True when a composite buffer should exist.
    pub fn is_active(&self) -> bool {
        self.enabled && self.count() > 0
    }

    /// Composite geometry for a raw frame of `raw`, or `None` when inactive.
    pub fn composite_shape(&self, raw: FrameShape) -> Option<FrameShape> {
        if !self.is_active() {
            return None;
        }
        raw.tiled(self.count())
    }
}

/// Outcome of `Compositor::resize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged,
    Allocated(FrameShape),
    Freed,
}

/// What one `compose` call placed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComposeReport {
    pub placed: usize,
    pub skipped: usize,
}

/// Owner of the composite buffer.
pub struct Compositor {
    buffer: Mutex<Option<FrameBuffer>>,
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(None),
        }
    }

    /// Bring the buffer in line with `selection` for a raw frame of `raw`.
    ///
    /// Allocates when the target shape differs from the current one, frees
    /// when compositing is inactive or no frame has been captured yet.
    pub fn resize(
        &mut self,
        selection: &CompositeSelection,
        raw: Option<FrameShape>,
    ) -> Result<ResizeOutcome, FrameError> {
        let target = match raw {
            Some(raw) if selection.is_active() => Some(
                selection
                    .composite_shape(raw)
                    .ok_or(FrameError::Overflow(raw))?,
            ),
            _ => None,
        };
        let current = self
            .buffer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(FrameBuffer::shape);
        if current == target {
            return Ok(ResizeOutcome::Unchanged);
        }
        let Some(shape) = target else {
            self.free();
            return Ok(ResizeOutcome::Freed);
        };
        // A fresh lock also drops any poison from an earlier panic.
        self.buffer = Mutex::new(Some(FrameBuffer::new(shape)?));
        Ok(ResizeOutcome::Allocated(shape))
    }

    /// Drop the composite buffer. Returns whether one was held.
    pub fn free(&mut self) -> bool {
        let held = self.exists();
        self.buffer = Mutex::new(None);
        held
    }

    /// Tile the selected outputs into the composite buffer.
    ///
    /// `sources` is indexed by `FilterKind::index`. A selected kind with no
    /// source, or a source whose shape does not fit a tile, is skipped and the
    /// next kind takes its tile. Tiles left unused are cleared.
    pub fn compose(
        &self,
        selection: &CompositeSelection,
        sources: &[Option<&FrameBuffer>; FilterKind::COUNT],
    ) -> Result<ComposeReport, PipelineError> {
        let mut guard = self.lock()?;
        let Some(composite) = guard.as_mut() else {
            return Ok(ComposeReport::default());
        };
        let count = selection.count().max(1) as u32;
        let tile_width = composite.width() / count;

        let mut report = ComposeReport::default();
        for kind in selection.members() {
            let Some(source) = sources[kind.index()] else {
                report.skipped += 1;
                continue;
            };
            if source.width() != tile_width {
                report.skipped += 1;
                continue;
            }
            let x = report.placed as u32 * tile_width;
            match composite.blit_columns(source, x) {
                Ok(()) => report.placed += 1,
                Err(e) => {
                    log::debug!("composite tile for {} skipped: {}", kind, e);
                    report.skipped += 1;
                }
            }
        }
        let used = report.placed as u32 * tile_width;
        composite.clear_columns(used, composite.width() - used);
        Ok(report)
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Option<FrameBuffer>>, PipelineError> {
        self.buffer
            .lock()
            .map_err(|_| PipelineError::LockPoisoned("composite"))
    }

    pub fn shape(&self) -> Option<FrameShape> {
        self.lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(FrameBuffer::shape))
    }

    pub fn exists(&self) -> bool {
        self.shape().is_some()
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;

    fn raw() -> FrameShape {
        FrameShape::new(4, 2, PixelLayout::RGB8)
    }

    fn solid(value: u8) -> FrameBuffer {
        let mut buf = FrameBuffer::new(raw()).unwrap();
        buf.fill(value);
        buf
    }

    #[test]
    fn selection_count_tracks_members() {
        let mut sel = CompositeSelection::new();
        assert!(sel.set_member(FilterKind::EdgeGradient, true));
        assert!(!sel.set_member(FilterKind::EdgeGradient, true));
        assert!(sel.set_member(FilterKind::Identity, true));
        assert_eq!(sel.count(), 2);
        assert_eq!(
            sel.members().collect::<Vec<_>>(),
            vec![FilterKind::Identity, FilterKind::EdgeGradient]
        );
        assert!(!sel.is_active());
        sel.set_enabled(true);
        assert!(sel.is_active());
        assert_eq!(
            sel.composite_shape(raw()),
            Some(FrameShape::new(8, 2, PixelLayout::RGB8))
        );
    }

    #[test]
    fn resize_follows_selection() {
        let mut sel = CompositeSelection::new();
        let mut compositor = Compositor::new();

        sel.set_enabled(true);
        assert_eq!(
            compositor.resize(&sel, Some(raw())).unwrap(),
            ResizeOutcome::Unchanged
        );
        assert!(!compositor.exists());

        sel.set_member(FilterKind::Grayscale, true);
        assert_eq!(
            compositor.resize(&sel, Some(raw())).unwrap(),
            ResizeOutcome::Allocated(raw())
        );
        assert_eq!(
            compositor.resize(&sel, Some(raw())).unwrap(),
            ResizeOutcome::Unchanged
        );

        sel.set_enabled(false);
        assert_eq!(
            compositor.resize(&sel, Some(raw())).unwrap(),
            ResizeOutcome::Freed
        );
        assert!(!compositor.exists());
    }

    #[test]
    fn free_drops_the_buffer_whatever_the_selection() {
        let mut sel = CompositeSelection::new();
        let mut compositor = Compositor::new();
        sel.set_enabled(true);
        sel.set_member(FilterKind::Identity, true);
        compositor.resize(&sel, Some(raw())).unwrap();
        assert!(compositor.exists());

        assert!(compositor.free());
        assert!(!compositor.exists());
        assert!(!compositor.free());
    }

    #[test]
    fn compose_places_tiles_in_declaration_order() {
        let mut sel = CompositeSelection::new();
        sel.set_enabled(true);
        sel.set_member(FilterKind::EdgeGradient, true);
        sel.set_member(FilterKind::Grayscale, true);
        let mut compositor = Compositor::new();
        compositor.resize(&sel, Some(raw())).unwrap();

        let gray = solid(1);
        let edge = solid(2);
        let sources = [None, Some(&gray), Some(&edge)];
        let report = compositor.compose(&sel, &sources).unwrap();
        assert_eq!(report, ComposeReport { placed: 2, skipped: 0 });

        let guard = compositor.lock().unwrap();
        let composite = guard.as_ref().unwrap();
        for y in 0..2 {
            let row = composite.row(y);
            assert!(row[..12].iter().all(|&p| p == 1));
            assert!(row[12..].iter().all(|&p| p == 2));
        }
    }

    #[test]
    fn missing_source_shifts_later_tiles_and_clears_tail() {
        let mut sel = CompositeSelection::new();
        sel.set_enabled(true);
        sel.set_member(FilterKind::Identity, true);
        sel.set_member(FilterKind::Grayscale, true);
        let mut compositor = Compositor::new();
        compositor.resize(&sel, Some(raw())).unwrap();

        let first = solid(9);
        let second = solid(5);
        compositor
            .compose(&sel, &[Some(&first), Some(&second), None])
            .unwrap();

        let report = compositor.compose(&sel, &[None, Some(&second), None]).unwrap();
        assert_eq!(report, ComposeReport { placed: 1, skipped: 1 });

        let guard = compositor.lock().unwrap();
        let row = guard.as_ref().unwrap().row(0);
        assert!(row[..12].iter().all(|&p| p == 5));
        assert!(row[12..].iter().all(|&p| p == 0));
    }
}
