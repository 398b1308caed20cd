//! Read-only view of the pipeline's latest outputs.
//!
//! The pipeline builds a new `Snapshot` each cycle and swaps it in whole.
//! Readers clone an `Arc` and never hold a lock while they render, so a slow
//! reader cannot stall the capture loop.

use std::sync::{Arc, PoisonError, RwLock};

use crate::filter::FilterKind;
use crate::frame::FrameBuffer;
use crate::pipeline::PipelineStats;

/// Outputs published at the end of one cycle.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub(crate) cycle: u64,
    pub(crate) outputs: [Option<Arc<FrameBuffer>>; FilterKind::COUNT],
    pub(crate) composite: Option<Arc<FrameBuffer>>,
    pub(crate) composite_members: Vec<FilterKind>,
    pub(crate) active_count: usize,
    pub(crate) stats: PipelineStats,
    pub(crate) source_healthy: bool,
    pub(crate) frames_captured: u64,
}

impl Snapshot {
    /// Cycle that produced this snapshot; 0 before the first publish.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Latest output of `kind`, if it is active and has produced one.
    pub fn output(&self, kind: FilterKind) -> Option<&Arc<FrameBuffer>> {
        self.outputs[kind.index()].as_ref()
    }

    pub fn composite(&self) -> Option<&Arc<FrameBuffer>> {
        self.composite.as_ref()
    }

    /// Kinds tiled into the composite, in tile order. Empty while
    /// compositing is off.
    pub fn composite_members(&self) -> &[FilterKind] {
        &self.composite_members
    }

    /// Number of active filters when the snapshot was taken.
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Controller totals as of this cycle.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn source_healthy(&self) -> bool {
        self.source_healthy
    }

    /// Frames the capture source has delivered so far.
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

/// Consumer handle; clone freely across threads.
#[derive(Clone, Debug)]
pub struct SnapshotReader {
    latest: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotReader {
    /// The most recently published snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Producer side, owned by the pipeline.
pub(crate) struct SnapshotPublisher {
    latest: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotPublisher {
    pub(crate) fn new() -> Self {
        Self {
            latest: Arc::new(RwLock::new(Arc::new(Snapshot::default()))),
        }
    }

    pub(crate) fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            latest: self.latest.clone(),
        }
    }

    /// Swap in `snapshot`. Readers see either the old or the new one whole.
    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>) {
        *self
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameShape, PixelLayout};

    #[test]
    fn readers_keep_their_copy_across_publishes() {
        let publisher = SnapshotPublisher::new();
        let reader = publisher.reader();
        assert_eq!(reader.latest().cycle(), 0);

        let buffer = Arc::new(
            FrameBuffer::new(FrameShape::new(2, 2, PixelLayout::RGB8)).unwrap(),
        );
        let mut first = Snapshot {
            cycle: 1,
            active_count: 1,
            ..Snapshot::default()
        };
        first.outputs[FilterKind::Grayscale.index()] = Some(buffer);
        publisher.publish(Arc::new(first));

        let held = reader.latest();
        publisher.publish(Arc::new(Snapshot {
            cycle: 2,
            ..Snapshot::default()
        }));

        assert_eq!(held.cycle(), 1);
        assert!(held.output(FilterKind::Grayscale).is_some());
        assert_eq!(reader.latest().cycle(), 2);
        assert!(reader.latest().output(FilterKind::Grayscale).is_none());
    }
}
