//! Capture cycle state machine.
//!
//! One cycle is capture, reconfigure, run filters, composite, publish.
//! Structural changes (which buffers exist) need `&mut self`; filter tasks
//! run on scoped threads that only borrow the slots and the registry, so
//! the borrow checker rules out freeing a buffer while a task still uses it.
//!
//! Lock order within a cycle: raw-frame staging (read) -> working resources
//! in declared order -> filter output. The composite lock is only taken after
//! every filter task has been joined.

use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::composite::{ComposeReport, CompositeSelection, Compositor, ResizeOutcome};
use crate::error::{ComputeError, FrameError, PipelineError, ReconfigurationConflict};
use crate::filter::{FilterKind, FilterTable};
use crate::frame::{FrameBuffer, FrameShape};
use crate::ingest::{CaptureSource, SourceStats};
use crate::reconfig::{Intent, IntentSender, ReconfigurationQueue};
use crate::registry::ResourceRegistry;
use crate::slot::FilterSlot;
use crate::snapshot::{Snapshot, SnapshotPublisher, SnapshotReader};

/// Where the controller is within its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    CapturingFrame,
    ApplyingReconfiguration,
    RunningFilters,
    Compositing,
    PublishingSnapshot,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Flip each captured frame horizontally before filters see it.
    pub mirror: bool,
    /// Upper bound on filter tasks running at once.
    pub max_parallel_filters: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            mirror: true,
            max_parallel_filters: FilterKind::COUNT,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub intents_applied: usize,
    pub intents_rejected: usize,
    pub filters_run: usize,
    pub filters_failed: usize,
    /// Present when the composite was assembled this cycle.
    pub composite: Option<ComposeReport>,
}

impl CycleReport {
    pub fn composited(&self) -> bool {
        self.composite.is_some()
    }
}

/// Running totals since the controller was created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub intents_applied: u64,
    pub intents_rejected: u64,
    pub filter_runs: u64,
    pub filter_failures: u64,
    pub composites: u64,
    pub reshapes: u64,
}

impl PipelineStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.intents_applied += report.intents_applied as u64;
        self.intents_rejected += report.intents_rejected as u64;
        self.filter_runs += report.filters_run as u64;
        self.filter_failures += report.filters_failed as u64;
        if report.composited() {
            self.composites += 1;
        }
    }
}

/// Result of one filter task.
enum TaskOutcome {
    Updated,
    Failed(ComputeError),
    /// The task left its buffers unusable (panic, poisoned or missing
    /// buffer). The slot is reallocated before the cycle continues.
    Broken(String),
}

pub struct PipelineController<S: CaptureSource = Box<dyn CaptureSource>> {
    source: S,
    settings: PipelineSettings,
    state: CycleState,
    connected: bool,
    failure_reported: bool,
    frame: Option<FrameBuffer>,
    staging: RwLock<Option<FrameBuffer>>,
    slots: [FilterSlot; FilterKind::COUNT],
    registry: ResourceRegistry,
    selection: CompositeSelection,
    compositor: Compositor,
    outputs: [Option<Arc<FrameBuffer>>; FilterKind::COUNT],
    queue: ReconfigurationQueue,
    publisher: SnapshotPublisher,
    cycle: u64,
    stats: PipelineStats,
}

impl<S: CaptureSource> PipelineController<S> {
    pub fn new(source: S, table: FilterTable, settings: PipelineSettings) -> Self {
        let slots = FilterKind::ALL.map(|kind| FilterSlot::new(kind, table.get(kind)));
        Self {
            source,
            settings,
            state: CycleState::Idle,
            connected: false,
            failure_reported: false,
            frame: None,
            staging: RwLock::new(None),
            slots,
            registry: ResourceRegistry::new(),
            selection: CompositeSelection::new(),
            compositor: Compositor::new(),
            outputs: Default::default(),
            queue: ReconfigurationQueue::new(),
            publisher: SnapshotPublisher::new(),
            cycle: 0,
            stats: PipelineStats::default(),
        }
    }

    /// Connect the source and capture a first frame, so filters can be
    /// activated before the first cycle.
    pub fn open(&mut self) -> Result<(), PipelineError> {
        self.ensure_running()?;
        self.capture()?;
        self.state = CycleState::Idle;
        Ok(())
    }

    /// Producer handle for controller threads.
    pub fn intents(&self) -> IntentSender {
        self.queue.sender()
    }

    /// Reader handle for the published snapshot.
    pub fn snapshots(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn source_healthy(&self) -> bool {
        self.source.is_healthy()
    }

    pub fn selection(&self) -> &CompositeSelection {
        &self.selection
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn slot(&self, kind: FilterKind) -> &FilterSlot {
        &self.slots[kind.index()]
    }

    pub fn is_active(&self, kind: FilterKind) -> bool {
        self.slot(kind).is_enabled()
    }

    pub fn has_output(&self, kind: FilterKind) -> bool {
        self.slot(kind).has_output()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_enabled()).count()
    }

    /// Shape of the most recently captured frame.
    pub fn raw_shape(&self) -> Option<FrameShape> {
        self.frame.as_ref().map(FrameBuffer::shape)
    }

    /// Shape of the shared buffer filters read from; `None` while no filter
    /// is active.
    pub fn staging_shape(&self) -> Option<FrameShape> {
        self.staging
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(FrameBuffer::shape)
    }

    pub fn composite_shape(&self) -> Option<FrameShape> {
        self.compositor.shape()
    }

    pub fn composite_exists(&self) -> bool {
        self.compositor.exists()
    }

    /// Bytes held by staging, filter outputs, working buffers and composite.
    pub fn memory_bytes(&self) -> usize {
        let shapes = self
            .slots
            .iter()
            .filter_map(FilterSlot::output_shape)
            .chain(self.staging_shape())
            .chain(self.composite_shape());
        shapes.filter_map(|s| s.byte_len()).sum::<usize>() + self.registry.memory_bytes()
    }

    /// Enable `kind`, allocating its output and working buffers for the
    /// current raw frame. Returns `false` if it was already active.
    pub fn activate(&mut self, kind: FilterKind) -> Result<bool, ReconfigurationConflict> {
        if self.is_active(kind) {
            return Ok(false);
        }
        let raw = self
            .raw_shape()
            .ok_or(ReconfigurationConflict::NoFrameYet(kind))?;
        let first = self.active_count() == 0;
        if first {
            self.stage_frame()?;
        }
        let allocated = self
            .registry
            .allocate(kind, raw)
            .and_then(|()| self.slots[kind.index()].enable(raw));
        if let Err(e) = allocated {
            self.registry.release(kind);
            if first {
                self.free_staging();
            }
            return Err(e.into());
        }
        log::info!(
            "activated {} ({}, {} working buffers)",
            kind,
            raw,
            self.registry.entries(kind).len()
        );
        Ok(true)
    }

    /// Disable `kind`, freeing its buffers and removing it from the
    /// composite. Returns `false` if it was already inactive.
    pub fn deactivate(&mut self, kind: FilterKind) -> bool {
        if !self.slots[kind.index()].disable() {
            return false;
        }
        let freed = self.registry.release(kind);
        self.outputs[kind.index()] = None;
        if self.selection.set_member(kind, false) {
            self.resize_composite_or_free();
        }
        if self.active_count() == 0 {
            self.free_staging();
        }
        log::info!("deactivated {} (freed output and {} working buffers)", kind, freed);
        true
    }

    /// Turn compositing on or off. Returns whether the flag changed.
    pub fn set_compositing_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<bool, ReconfigurationConflict> {
        if !self.selection.set_enabled(enabled) {
            return Ok(false);
        }
        if let Err(e) = self.resize_composite() {
            self.selection.set_enabled(!enabled);
            self.resize_composite_or_free();
            return Err(e.into());
        }
        Ok(true)
    }

    /// Add `kind` to or remove it from the composite. Only active filters
    /// can be added. Returns whether membership changed.
    pub fn set_included_in_composite(
        &mut self,
        kind: FilterKind,
        included: bool,
    ) -> Result<bool, ReconfigurationConflict> {
        if included && !self.is_active(kind) {
            return Err(ReconfigurationConflict::NotActive(kind));
        }
        if !self.selection.set_member(kind, included) {
            return Ok(false);
        }
        if let Err(e) = self.resize_composite() {
            self.selection.set_member(kind, !included);
            self.resize_composite_or_free();
            return Err(e.into());
        }
        Ok(true)
    }

    pub fn apply_intent(&mut self, intent: Intent) -> Result<bool, ReconfigurationConflict> {
        match intent {
            Intent::ActivateFilter { kind, active: true } => self.activate(kind),
            Intent::ActivateFilter {
                kind,
                active: false,
            } => Ok(self.deactivate(kind)),
            Intent::SetCompositingEnabled(enabled) => self.set_compositing_enabled(enabled),
            Intent::SetCompositeMembership { kind, included } => {
                self.set_included_in_composite(kind, included)
            }
        }
    }

    /// Run one full cycle.
    pub fn run_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        self.ensure_running()?;
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..CycleReport::default()
        };

        self.capture()?;

        self.state = CycleState::ApplyingReconfiguration;
        for intent in self.queue.drain() {
            match self.apply_intent(intent) {
                Ok(_) => report.intents_applied += 1,
                Err(e) => {
                    log::warn!("rejected intent '{}': {}", intent, e);
                    report.intents_rejected += 1;
                }
            }
        }

        self.state = CycleState::RunningFilters;
        let outcomes = {
            let staging = self
                .staging
                .read()
                .map_err(|_| PipelineError::LockPoisoned("raw frame"))?;
            match staging.as_ref() {
                Some(input) => run_filters(
                    &self.slots,
                    &self.registry,
                    input,
                    self.settings.max_parallel_filters,
                ),
                None => Vec::new(),
            }
        };
        report.filters_run = outcomes.len();
        for (kind, outcome) in outcomes {
            match outcome {
                TaskOutcome::Updated => {
                    self.outputs[kind.index()] = self
                        .slot(kind)
                        .lock_output()
                        .ok()
                        .and_then(|guard| guard.as_ref().cloned())
                        .map(Arc::new);
                }
                TaskOutcome::Failed(e) => {
                    report.filters_failed += 1;
                    log::warn!("filter {} failed in cycle {}: {}", kind, self.cycle, e);
                }
                TaskOutcome::Broken(reason) => {
                    report.filters_failed += 1;
                    log::error!(
                        "filter {} broke in cycle {}: {}; reallocating its buffers",
                        kind,
                        self.cycle,
                        reason
                    );
                    self.repair(kind)?;
                }
            }
        }

        self.state = CycleState::Compositing;
        if self.selection.is_active() {
            let sources: [Option<&FrameBuffer>; FilterKind::COUNT] =
                std::array::from_fn(|i| self.outputs[i].as_deref());
            report.composite = Some(self.compositor.compose(&self.selection, &sources)?);
        }

        self.state = CycleState::PublishingSnapshot;
        self.stats.record(&report);
        self.publish();

        Ok(report)
    }

    /// Run cycles until `shutdown` is set or the pipeline fails, then free
    /// every buffer.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), PipelineError> {
        let result = loop {
            if shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }
            match self.run_cycle() {
                Ok(report) => log::debug!(
                    "cycle {}: {} filters, {} failed, composite={}",
                    report.cycle,
                    report.filters_run,
                    report.filters_failed,
                    report.composited()
                ),
                Err(e) => break Err(e),
            }
        };
        self.shutdown();
        result
    }

    /// Deactivate every filter, free all buffers and stop.
    pub fn shutdown(&mut self) {
        for kind in FilterKind::ALL {
            self.deactivate(kind);
        }
        self.selection.set_enabled(false);
        self.resize_composite_or_free();
        self.free_staging();
        self.frame = None;
        if self.state != CycleState::Stopped {
            log::info!(
                "pipeline stopped after {} cycles ({} filter runs, {} failures)",
                self.stats.cycles,
                self.stats.filter_runs,
                self.stats.filter_failures
            );
        }
        self.state = CycleState::Stopped;
    }

    fn ensure_running(&mut self) -> Result<(), PipelineError> {
        if self.state == CycleState::Stopped {
            return Err(PipelineError::Stopped);
        }
        if !self.connected {
            if let Err(e) = self.source.connect() {
                return Err(self.fail(e));
            }
            self.connected = true;
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<(), PipelineError> {
        self.state = CycleState::CapturingFrame;
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(self.fail(anyhow!("capture source reached end of stream"))),
            Err(e) => return Err(self.fail(e)),
        };
        let previous = self.raw_shape();
        self.frame = Some(frame);
        if previous.is_some() && previous != self.raw_shape() {
            self.reshape()?;
        }
        if self.active_count() > 0 {
            self.stage_frame()?;
        }
        Ok(())
    }

    fn fail(&mut self, error: anyhow::Error) -> PipelineError {
        self.state = CycleState::Stopped;
        if !self.failure_reported {
            log::error!("capture failure, stopping pipeline: {:#}", error);
            self.failure_reported = true;
        }
        PipelineError::CaptureFailure(error)
    }

    /// Copy the held frame into the staging buffer, reallocating it if the
    /// shape changed.
    fn stage_frame(&mut self) -> Result<(), FrameError> {
        let Some(frame) = self.frame.as_ref() else {
            return Ok(());
        };
        let staging = self
            .staging
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if staging.as_ref().map(FrameBuffer::shape) != Some(frame.shape()) {
            *staging = Some(FrameBuffer::new(frame.shape())?);
        }
        if let Some(buffer) = staging.as_mut() {
            if self.settings.mirror {
                buffer.copy_mirrored_from(frame)?;
            } else {
                buffer.copy_from(frame)?;
            }
        }
        Ok(())
    }

    fn free_staging(&mut self) {
        *self
            .staging
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Reallocate every dimension-bound buffer for a new capture shape.
    fn reshape(&mut self) -> Result<(), PipelineError> {
        let Some(raw) = self.raw_shape() else {
            return Ok(());
        };
        log::info!("capture shape changed to {}, reallocating buffers", raw);
        for kind in FilterKind::ALL {
            if self.is_active(kind) {
                self.slots[kind.index()].reallocate(raw)?;
                self.registry.allocate(kind, raw)?;
            }
        }
        self.outputs = Default::default();
        self.resize_composite()?;
        self.stats.reshapes += 1;
        Ok(())
    }

    /// Give `kind` fresh buffers after a broken task.
    fn repair(&mut self, kind: FilterKind) -> Result<(), PipelineError> {
        if let Some(raw) = self.raw_shape() {
            self.slots[kind.index()].reallocate(raw)?;
            self.registry.allocate(kind, raw)?;
        }
        Ok(())
    }

    fn resize_composite(&mut self) -> Result<(), FrameError> {
        match self.compositor.resize(&self.selection, self.raw_shape())? {
            ResizeOutcome::Allocated(shape) => log::info!(
                "composite resized to {} ({} tiles)",
                shape,
                self.selection.count()
            ),
            ResizeOutcome::Freed => log::info!("composite freed"),
            ResizeOutcome::Unchanged => {}
        }
        Ok(())
    }

    /// Resize, falling back to freeing the composite if allocation fails.
    fn resize_composite_or_free(&mut self) {
        if let Err(e) = self.resize_composite() {
            log::error!("composite resize failed: {}; disabling compositing", e);
            self.selection.set_enabled(false);
            self.compositor.free();
        }
    }

    fn publish(&mut self) {
        let composite = self
            .compositor
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned())
            .map(Arc::new);
        let snapshot = Snapshot {
            cycle: self.cycle,
            outputs: self.outputs.clone(),
            composite,
            composite_members: if self.selection.is_active() {
                self.selection.members().collect()
            } else {
                Vec::new()
            },
            active_count: self.active_count(),
            stats: self.stats.clone(),
            source_healthy: self.source_healthy(),
            frames_captured: self.source_stats().frames_captured,
        };
        self.publisher.publish(Arc::new(snapshot));
    }
}

/// Run every enabled slot against `input`, at most `max_parallel` at a time.
fn run_filters(
    slots: &[FilterSlot; FilterKind::COUNT],
    registry: &ResourceRegistry,
    input: &FrameBuffer,
    max_parallel: usize,
) -> Vec<(FilterKind, TaskOutcome)> {
    let active: Vec<&FilterSlot> = slots.iter().filter(|slot| slot.is_enabled()).collect();
    let mut outcomes = Vec::with_capacity(active.len());
    for batch in active.chunks(max_parallel.max(1)) {
        std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|&slot| (slot.kind(), scope.spawn(move || run_slot(slot, registry, input))))
                .collect();
            for (kind, handle) in handles {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| TaskOutcome::Broken("compute panicked".to_string()));
                outcomes.push((kind, outcome));
            }
        });
    }
    outcomes
}

/// One filter task: lock the kind's resources then its output, hand the
/// buffers to the compute function, and put them back.
fn run_slot(slot: &FilterSlot, registry: &ResourceRegistry, input: &FrameBuffer) -> TaskOutcome {
    let kind = slot.kind();
    let mut resources = match registry.lock_all(kind) {
        Ok(guards) => guards,
        Err(e) => return TaskOutcome::Broken(e.to_string()),
    };
    let mut output = match slot.lock_output() {
        Ok(guard) => guard,
        Err(e) => return TaskOutcome::Broken(e.to_string()),
    };
    if output.is_none() || resources.iter().any(|guard| guard.is_none()) {
        return TaskOutcome::Broken("buffer missing".to_string());
    }

    let names: Vec<&'static str> = registry
        .entries(kind)
        .iter()
        .map(|resource| resource.name())
        .chain(std::iter::once("output"))
        .collect();
    let mut buffers: Vec<FrameBuffer> = resources
        .iter_mut()
        .filter_map(|guard| guard.take())
        .chain(output.take())
        .collect();
    let shapes: Vec<FrameShape> = buffers.iter().map(FrameBuffer::shape).collect();

    let result = (slot.compute())(input, &mut buffers);

    // A compute function may replace a buffer; never store one of the wrong shape.
    let mut mismatch = None;
    for ((buffer, &expected), &name) in buffers.iter_mut().zip(&shapes).zip(&names) {
        if buffer.shape() != expected {
            if mismatch.is_none() {
                mismatch = Some(ComputeError::RegionMismatch {
                    name,
                    expected,
                    actual: buffer.shape(),
                });
            }
            match FrameBuffer::new(expected) {
                Ok(fresh) => *buffer = fresh,
                Err(e) => return TaskOutcome::Broken(e.to_string()),
            }
        }
    }

    *output = buffers.pop();
    for (guard, buffer) in resources.iter_mut().zip(buffers) {
        **guard = Some(buffer);
    }

    match (result, mismatch) {
        (Err(e), _) | (Ok(()), Some(e)) => TaskOutcome::Failed(e),
        (Ok(()), None) => TaskOutcome::Updated,
    }
}
