//! Concurrent webcam filter pipeline
//!
//! A dedicated capture loop pulls frames from a live source and, each cycle,
//! fans the latest frame out to every active filter in parallel, then tiles a
//! selected subset of the filter outputs into one composite view. A
//! controller (UI, stdin, tests) switches filters and the composite on and
//! off at any time through a thread-safe intent queue; readers poll a
//! published snapshot and never block the loop.
//!
//! # Architecture
//!
//! The pipeline keeps three guarantees by construction:
//!
//! 1. **Buffers follow activation**: a filter's output and working buffers
//!    exist exactly while the filter is active; the composite exists exactly
//!    while compositing is on and at least one filter is selected.
//! 2. **No structural change during compute**: reconfiguration needs
//!    `&mut PipelineController`, filter tasks borrow it shared inside a
//!    thread scope, so nothing is freed while a task can still reach it.
//! 3. **One lock order**: raw frame, then working resources in declared
//!    order, then filter output; the composite lock is taken only after all
//!    filter tasks are joined.
//!
//! # Module Structure
//!
//! - `frame`: pixel buffers (FrameBuffer, FrameShape, PixelLayout)
//! - `filter`: filter kinds, their working buffers, compute functions
//! - `slot` / `registry`: per-kind output and working-buffer storage
//! - `composite`: composite selection and the compositor
//! - `reconfig`: controller intents and the reconfiguration queue
//! - `pipeline`: the capture cycle state machine
//! - `snapshot`: published read-only outputs
//! - `ingest`: capture sources (synthetic, scripted, image sequence)
//! - `config`: `filterd` daemon configuration

pub mod composite;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod reconfig;
pub mod registry;
pub mod slot;
pub mod snapshot;

pub use composite::{ComposeReport, CompositeSelection, Compositor, ResizeOutcome};
pub use error::{ComputeError, FrameError, PipelineError, ReconfigurationConflict};
pub use filter::{ComputeFn, FilterKind, FilterTable, ResourceLayout, ResourceSpec};
pub use frame::{FrameBuffer, FrameShape, PixelLayout};
pub use ingest::{
    open_source, CaptureSource, ScriptedSource, SourceConfig, SourceStats, SyntheticSource,
};
pub use pipeline::{CycleReport, CycleState, PipelineController, PipelineSettings, PipelineStats};
pub use reconfig::{Intent, IntentSender, ReconfigurationQueue};
pub use registry::{Resource, ResourceRegistry};
pub use slot::FilterSlot;
pub use snapshot::{Snapshot, SnapshotReader};

#[cfg(feature = "image-io")]
pub use ingest::ImageSequenceSource;
