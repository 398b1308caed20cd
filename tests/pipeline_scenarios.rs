use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Duration;

use capture_filters::{
    ComputeError, FilterKind, FilterTable, FrameBuffer, FrameShape, Intent, PipelineController,
    PipelineSettings, PixelLayout, ReconfigurationConflict, ScriptedSource,
};

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;

fn raw_shape() -> FrameShape {
    FrameShape::new(WIDTH, HEIGHT, PixelLayout::RGB8)
}

/// A horizontal ramp whose slope depends on `seed`, so consecutive frames
/// differ in every filter's output without saturating the edge gradient.
fn frame(seed: u8) -> FrameBuffer {
    let mut frame = FrameBuffer::new(raw_shape()).unwrap();
    let slope = (seed as u32 % 16 + 1) * 3;
    for y in 0..HEIGHT {
        for (i, px) in frame.row_mut(y).iter_mut().enumerate() {
            let x = i as u32 / 3;
            let c = i as u32 % 3;
            *px = (x * slope + y * 5 + c * 7) as u8;
        }
    }
    frame
}

fn source(frames: usize) -> ScriptedSource {
    ScriptedSource::new((0..frames).map(|i| frame(i as u8)))
}

fn opened(frames: usize, table: FilterTable) -> PipelineController<ScriptedSource> {
    let mut pipeline = PipelineController::new(source(frames), table, PipelineSettings::default());
    pipeline.open().unwrap();
    pipeline
}

fn assert_invariants(pipeline: &PipelineController<ScriptedSource>) {
    for kind in FilterKind::ALL {
        let active = pipeline.is_active(kind);
        assert_eq!(pipeline.has_output(kind), active, "output of {}", kind);
        assert_eq!(
            pipeline.registry().entries(kind).len(),
            if active { kind.resources().len() } else { 0 },
            "resources of {}",
            kind
        );
        if pipeline.selection().contains(kind) {
            assert!(active, "{} selected while inactive", kind);
        }
    }
    let selection = pipeline.selection();
    assert_eq!(
        pipeline.composite_exists(),
        selection.is_enabled() && selection.count() > 0
    );
    if let Some(shape) = pipeline.composite_shape() {
        assert_eq!(shape.width, WIDTH * selection.count() as u32);
        assert_eq!(shape.height, HEIGHT);
    }
    assert_eq!(
        pipeline.staging_shape().is_some(),
        pipeline.active_count() > 0
    );
}

#[test]
fn random_reconfiguration_keeps_buffers_in_step() {
    let mut pipeline = opened(1, FilterTable::builtin());
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..500 {
        let kind = FilterKind::ALL[rng.gen_range(0..FilterKind::COUNT)];
        let flag = rng.gen_bool(0.5);
        let intent = match rng.gen_range(0..3) {
            0 => Intent::ActivateFilter { kind, active: flag },
            1 => Intent::SetCompositingEnabled(flag),
            _ => Intent::SetCompositeMembership {
                kind,
                included: flag,
            },
        };
        let was_active = pipeline.is_active(kind);
        let result = pipeline.apply_intent(intent);
        if let Err(e) = result {
            assert_eq!(e, ReconfigurationConflict::NotActive(kind));
            assert!(!was_active);
        }
        assert_invariants(&pipeline);
    }
}

#[test]
fn deactivating_a_member_shrinks_the_composite_by_one() {
    let mut pipeline = opened(1, FilterTable::builtin());
    for kind in FilterKind::ALL {
        pipeline.activate(kind).unwrap();
        pipeline.set_included_in_composite(kind, true).unwrap();
    }
    pipeline.set_compositing_enabled(true).unwrap();
    assert_eq!(pipeline.composite_shape().unwrap().width, 3 * WIDTH);

    assert!(pipeline.deactivate(FilterKind::Grayscale));
    assert!(!pipeline.selection().contains(FilterKind::Grayscale));
    assert_eq!(pipeline.selection().count(), 2);
    assert_eq!(pipeline.composite_shape().unwrap().width, 2 * WIDTH);
    assert_invariants(&pipeline);
}

#[test]
fn repeated_activation_changes_nothing() {
    let mut pipeline = opened(1, FilterTable::builtin());
    assert!(pipeline.activate(FilterKind::EdgeGradient).unwrap());
    pipeline.set_compositing_enabled(true).unwrap();
    pipeline
        .set_included_in_composite(FilterKind::EdgeGradient, true)
        .unwrap();
    let bytes = pipeline.memory_bytes();
    let selection = pipeline.selection().clone();

    assert!(!pipeline.activate(FilterKind::EdgeGradient).unwrap());
    assert!(!pipeline.deactivate(FilterKind::Grayscale));
    assert!(!pipeline.set_compositing_enabled(true).unwrap());
    assert!(!pipeline
        .set_included_in_composite(FilterKind::EdgeGradient, true)
        .unwrap());

    assert_eq!(pipeline.memory_bytes(), bytes);
    assert_eq!(pipeline.selection(), &selection);
    assert_invariants(&pipeline);
}

#[test]
fn grayscale_only_publishes_no_composite() {
    let mut pipeline = PipelineController::new(
        source(2),
        FilterTable::builtin(),
        PipelineSettings::default(),
    );
    let reader = pipeline.snapshots();
    pipeline.intents().activate(FilterKind::Grayscale).unwrap();

    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.filters_run, 1);
    assert!(!report.composited());

    let snapshot = reader.latest();
    assert!(snapshot.output(FilterKind::Grayscale).is_some());
    assert!(snapshot.output(FilterKind::EdgeGradient).is_none());
    assert!(snapshot.composite().is_none());
    assert_eq!(snapshot.active_count(), 1);
}

#[test]
fn composite_tiles_follow_declaration_order() {
    let mut pipeline = PipelineController::new(
        source(2),
        FilterTable::builtin(),
        PipelineSettings::default(),
    );
    let reader = pipeline.snapshots();
    let intents = pipeline.intents();
    // Selection order is deliberately the reverse of declaration order.
    intents.activate(FilterKind::EdgeGradient).unwrap();
    intents.activate(FilterKind::Grayscale).unwrap();
    intents.set_compositing(true).unwrap();
    intents.include(FilterKind::EdgeGradient).unwrap();
    intents.include(FilterKind::Grayscale).unwrap();

    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.intents_applied, 5);
    assert_eq!(
        report.composite.map(|c| c.placed),
        Some(2),
        "both tiles placed"
    );

    let snapshot = reader.latest();
    let composite = snapshot.composite().unwrap();
    assert_eq!(composite.width(), 2 * WIDTH);
    assert_eq!(composite.height(), HEIGHT);
    assert_eq!(
        snapshot.composite_members(),
        &[FilterKind::Grayscale, FilterKind::EdgeGradient]
    );

    let gray = snapshot.output(FilterKind::Grayscale).unwrap();
    let edge = snapshot.output(FilterKind::EdgeGradient).unwrap();
    let stride = gray.stride();
    for y in 0..HEIGHT {
        let row = composite.row(y);
        assert_eq!(&row[..stride], gray.row(y), "slice 0, row {}", y);
        assert_eq!(&row[stride..], edge.row(y), "slice 1, row {}", y);
    }
}

#[test]
fn failed_compute_keeps_previous_output() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let table = FilterTable::builtin().with_compute(FilterKind::Grayscale, move |input, outputs| {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(ComputeError::Processing("sensor glitch".to_string()));
        }
        capture_filters::filter::grayscale(input, outputs)
    });
    let mut pipeline = PipelineController::new(source(3), table, PipelineSettings::default());
    let reader = pipeline.snapshots();
    let intents = pipeline.intents();
    intents.activate(FilterKind::Grayscale).unwrap();
    intents.activate(FilterKind::EdgeGradient).unwrap();
    intents.set_compositing(true).unwrap();
    intents.include(FilterKind::Grayscale).unwrap();
    intents.include(FilterKind::EdgeGradient).unwrap();

    pipeline.run_cycle().unwrap();
    let first = reader.latest();

    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.filters_failed, 1);
    let second = reader.latest();

    let gray_before = first.output(FilterKind::Grayscale).unwrap();
    let gray_after = second.output(FilterKind::Grayscale).unwrap();
    assert_eq!(gray_before, gray_after);

    let edge_before = first.output(FilterKind::EdgeGradient).unwrap();
    let edge_after = second.output(FilterKind::EdgeGradient).unwrap();
    assert_ne!(edge_before.digest(), edge_after.digest());

    let composite = second.composite().unwrap();
    assert_ne!(composite.digest(), first.composite().unwrap().digest());
    let stride = gray_after.stride();
    for y in 0..HEIGHT {
        assert_eq!(&composite.row(y)[..stride], gray_after.row(y));
        assert_eq!(&composite.row(y)[stride..], edge_after.row(y));
    }

    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.filters_failed, 0);
    assert_ne!(
        reader.latest().output(FilterKind::Grayscale).unwrap().digest(),
        gray_after.digest()
    );
}

#[test]
fn deactivating_sole_member_frees_composite() {
    let mut pipeline = opened(2, FilterTable::builtin());
    pipeline.activate(FilterKind::Identity).unwrap();
    pipeline.set_compositing_enabled(true).unwrap();
    pipeline
        .set_included_in_composite(FilterKind::Identity, true)
        .unwrap();
    assert!(pipeline.composite_exists());

    pipeline.deactivate(FilterKind::Identity);
    assert!(!pipeline.composite_exists());
    assert_eq!(pipeline.selection().count(), 0);
    assert!(pipeline.selection().is_enabled());
    assert_eq!(pipeline.staging_shape(), None);

    let report = pipeline.run_cycle().unwrap();
    assert!(!report.composited());
    assert!(pipeline.snapshots().latest().composite().is_none());
}

#[test]
fn inactive_filter_cannot_join_composite() {
    let mut pipeline = PipelineController::new(
        source(2),
        FilterTable::builtin(),
        PipelineSettings::default(),
    );
    let intents = pipeline.intents();
    intents.set_compositing(true).unwrap();
    intents.include(FilterKind::EdgeGradient).unwrap();

    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.intents_applied, 1);
    assert_eq!(report.intents_rejected, 1);
    assert!(!pipeline.selection().contains(FilterKind::EdgeGradient));
    assert!(!pipeline.composite_exists());
    assert_eq!(pipeline.stats().intents_rejected, 1);
}

#[test]
fn single_worker_runs_filters_one_at_a_time() {
    let settings = PipelineSettings {
        mirror: false,
        max_parallel_filters: 1,
    };
    let mut pipeline = PipelineController::new(source(2), FilterTable::builtin(), settings);
    let reader = pipeline.snapshots();
    for kind in FilterKind::ALL {
        pipeline.intents().activate(kind).unwrap();
    }
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.filters_run, 3);
    assert_eq!(report.filters_failed, 0);

    let snapshot = reader.latest();
    let identity = snapshot.output(FilterKind::Identity).unwrap();
    assert_eq!(**identity, frame(0));
}

/// Builtin table with `gate` run before every compute function.
fn gated_table<G>(gate: G) -> FilterTable
where
    G: Fn() + Send + Sync + 'static,
{
    let gate = Arc::new(gate);
    let builtin = FilterTable::builtin();
    FilterKind::ALL
        .into_iter()
        .fold(FilterTable::builtin(), |table, kind| {
            let compute = builtin.get(kind);
            let gate = gate.clone();
            table.with_compute(kind, move |input, outputs| {
                gate();
                compute(input, outputs)
            })
        })
}

#[test]
fn default_settings_run_every_filter_at_once() {
    // Each compute waits until all of them have started; a serialized run
    // never gets past the first.
    let barrier = Arc::new(Barrier::new(FilterKind::COUNT));
    let table = gated_table(move || {
        barrier.wait();
    });
    let mut pipeline = PipelineController::new(source(2), table, PipelineSettings::default());
    for kind in FilterKind::ALL {
        pipeline.intents().activate(kind).unwrap();
    }

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let report = pipeline.run_cycle().map(|report| report.filters_run);
        let _ = tx.send(report);
    });
    let filters_run = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("cycle with all filters in parallel finished")
        .unwrap();
    assert_eq!(filters_run, FilterKind::COUNT);
}

#[test]
fn parallel_limit_caps_filters_in_flight() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let table = {
        let running = running.clone();
        let peak = peak.clone();
        gated_table(move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
        })
    };
    let settings = PipelineSettings {
        mirror: true,
        max_parallel_filters: 2,
    };
    let mut pipeline = PipelineController::new(source(4), table, settings);
    for kind in FilterKind::ALL {
        pipeline.intents().activate(kind).unwrap();
    }

    for _ in 0..3 {
        let report = pipeline.run_cycle().unwrap();
        assert_eq!(report.filters_run, FilterKind::COUNT);
        assert_eq!(report.filters_failed, 0);
    }
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "{} filters ran at once", peak);
    assert!(peak >= 1);
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[test]
fn members_are_published_only_while_compositing() {
    let mut pipeline = opened(3, FilterTable::builtin());
    let reader = pipeline.snapshots();
    let intents = pipeline.intents();
    intents.activate(FilterKind::Grayscale).unwrap();
    intents.include(FilterKind::Grayscale).unwrap();

    pipeline.run_cycle().unwrap();
    let snapshot = reader.latest();
    assert!(snapshot.composite().is_none());
    assert!(snapshot.composite_members().is_empty());

    intents.set_compositing(true).unwrap();
    pipeline.run_cycle().unwrap();
    let snapshot = reader.latest();
    assert_eq!(snapshot.composite_members(), &[FilterKind::Grayscale]);
    assert_eq!(
        snapshot.composite().map(|c| c.width()),
        Some(WIDTH * snapshot.composite_members().len() as u32)
    );
}

#[test]
fn snapshot_reports_source_health() {
    let mut pipeline = opened(3, FilterTable::builtin());
    let reader = pipeline.snapshots();
    assert!(!reader.latest().source_healthy());

    pipeline.run_cycle().unwrap();
    pipeline.run_cycle().unwrap();
    let snapshot = reader.latest();
    assert!(snapshot.source_healthy());
    // One frame at open, one per cycle.
    assert_eq!(snapshot.frames_captured(), 3);
    assert_eq!(pipeline.source_stats().frames_captured, 3);
    assert!(pipeline.source_healthy());
}

#[test]
fn readers_and_controllers_run_alongside_the_loop() {
    let mut pipeline = PipelineController::new(
        source(200),
        FilterTable::builtin(),
        PipelineSettings::default(),
    );
    let reader = pipeline.snapshots();
    let intents = pipeline.intents();
    let done = Arc::new(AtomicBool::new(false));

    let controller = {
        let done = done.clone();
        std::thread::spawn(move || {
            let script = [
                "activate gray",
                "activate sobel",
                "composite on",
                "include gray",
                "include sobel",
                "deactivate gray",
                "activate identity",
                "include identity",
                "composite off",
            ];
            let mut i = 0;
            while !done.load(Ordering::SeqCst) {
                let intent: Intent = script[i % script.len()].parse().unwrap();
                if intents.send(intent).is_err() {
                    break;
                }
                i += 1;
                std::thread::yield_now();
            }
        })
    };

    let observer = {
        let done = done.clone();
        std::thread::spawn(move || {
            let mut seen = 0u64;
            while !done.load(Ordering::SeqCst) {
                let snapshot = reader.latest();
                match snapshot.composite() {
                    Some(composite) => {
                        assert_eq!(
                            composite.width(),
                            WIDTH * snapshot.composite_members().len() as u32
                        );
                        assert_eq!(composite.height(), HEIGHT);
                    }
                    None => assert!(snapshot.composite_members().is_empty()),
                }
                seen = seen.max(snapshot.cycle());
                std::thread::yield_now();
            }
            seen
        })
    };

    let stop = AtomicBool::new(false);
    let result = pipeline.run(&stop);
    done.store(true, Ordering::SeqCst);

    assert!(result.is_err(), "scripted source ends with a capture failure");
    controller.join().unwrap();
    assert!(observer.join().unwrap() <= 200);
    assert_eq!(pipeline.stats().cycles, 200);
    assert_eq!(pipeline.memory_bytes(), 0);
}
