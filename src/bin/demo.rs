//! demo - scripted end-to-end run of the filter pipeline
//!
//! Drives a synthetic source through the usual controller sequence:
//! grayscale alone, then grayscale + edge gradient tiled into a composite,
//! then tearing both down. Prints a digest per output so runs can be
//! compared, and optionally injects a compute failure into the edge filter.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use capture_filters::{
    ComputeError, CycleReport, FilterKind, FilterTable, PipelineController, PipelineSettings,
    Snapshot, SourceConfig, SyntheticSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Cycles to run with the composite enabled.
    #[arg(long, default_value_t = 5)]
    cycles: u64,
    /// Synthetic frame width.
    #[arg(long, default_value_t = 160)]
    width: u32,
    /// Synthetic frame height.
    #[arg(long, default_value_t = 90)]
    height: u32,
    /// Make the edge-gradient filter fail on its Nth run.
    #[arg(long, value_name = "N")]
    fail_edge_at: Option<u64>,
    /// Disable horizontal mirroring of captured frames.
    #[arg(long)]
    no_mirror: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    /// Write the final outputs and composite as PNG files into DIR.
    #[cfg(feature = "image-io")]
    #[arg(long, value_name = "DIR")]
    out: Option<String>,
}

type DemoPipeline = PipelineController<SyntheticSource>;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.cycles == 0 {
        return Err(anyhow!("cycles must be >= 1"));
    }
    let ui = ui::Ui::from_args(
        Some(&args.ui),
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal() || log::log_enabled!(log::Level::Info),
    );

    let mut pipeline = {
        let mut stage = ui.stage("Open synthetic source");
        let source = SyntheticSource::new(SourceConfig {
            uri: "stub://demo".to_string(),
            width: args.width,
            height: args.height,
            target_fps: 0,
            frame_limit: None,
        })?
        .with_phase(0);
        let settings = PipelineSettings {
            mirror: !args.no_mirror,
            ..PipelineSettings::default()
        };
        let mut pipeline = PipelineController::new(source, filter_table(args.fail_edge_at), settings);
        pipeline.open()?;
        stage.detail(format!("{}x{}", args.width, args.height));
        pipeline
    };
    let intents = pipeline.intents();
    let snapshots = pipeline.snapshots();

    {
        let _stage = ui.stage("Grayscale only");
        intents.activate(FilterKind::Grayscale)?;
        let report = pipeline.run_cycle()?;
        print_cycle(&report, &snapshots.latest());
    }

    {
        let mut stage = ui.stage("Grayscale + edge gradient composite");
        intents.activate(FilterKind::EdgeGradient)?;
        intents.set_compositing(true)?;
        intents.include(FilterKind::Grayscale)?;
        intents.include(FilterKind::EdgeGradient)?;
        let mut failures = 0;
        for _ in 0..args.cycles {
            let report = pipeline.run_cycle()?;
            failures += report.filters_failed;
            print_cycle(&report, &snapshots.latest());
        }
        stage.detail(format!("{} cycles, {} filter failures", args.cycles, failures));
    }

    export_pngs(&args, &ui, &snapshots.latest())?;

    {
        let _stage = ui.stage("Tear down");
        teardown(&mut pipeline)?;
    }

    pipeline.shutdown();
    Ok(())
}

/// Built-in filters, with the edge gradient optionally failing once.
fn filter_table(fail_edge_at: Option<u64>) -> FilterTable {
    let table = FilterTable::builtin();
    let Some(fail_at) = fail_edge_at else {
        return table;
    };
    let runs = Arc::new(AtomicU64::new(0));
    table.with_compute(FilterKind::EdgeGradient, move |input, outputs| {
        let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
        if run == fail_at {
            return Err(ComputeError::Processing(format!(
                "injected failure on run {}",
                run
            )));
        }
        capture_filters::filter::edge_gradient(input, outputs)
    })
}

fn teardown(pipeline: &mut DemoPipeline) -> Result<()> {
    pipeline.deactivate(FilterKind::EdgeGradient);
    println!(
        "after deactivating {}: composite={}",
        FilterKind::EdgeGradient,
        describe_shape(pipeline.composite_shape())
    );
    pipeline.deactivate(FilterKind::Grayscale);
    println!(
        "after deactivating {}: composite={} staging={} bytes_held={}",
        FilterKind::Grayscale,
        describe_shape(pipeline.composite_shape()),
        describe_shape(pipeline.staging_shape()),
        pipeline.memory_bytes()
    );
    if pipeline.composite_exists() {
        return Err(anyhow!("composite still allocated with no active filters"));
    }
    Ok(())
}

fn print_cycle(report: &CycleReport, snapshot: &Snapshot) {
    let outputs: Vec<String> = FilterKind::ALL
        .into_iter()
        .filter_map(|kind| {
            snapshot
                .output(kind)
                .map(|buffer| format!("{}={}", kind, short_digest(&buffer.digest())))
        })
        .collect();
    let composite = snapshot
        .composite()
        .map(|buffer| {
            format!(
                "{}x{}:{}",
                buffer.width(),
                buffer.height(),
                short_digest(&buffer.digest())
            )
        })
        .unwrap_or_else(|| "none".to_string());
    println!(
        "cycle {} failed={} {} composite={}",
        report.cycle,
        report.filters_failed,
        outputs.join(" "),
        composite
    );
}

fn short_digest(digest: &[u8; 32]) -> String {
    hex::encode(&digest[..8])
}

fn describe_shape(shape: Option<capture_filters::FrameShape>) -> String {
    shape
        .map(|s| format!("{}x{}", s.width, s.height))
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(feature = "image-io")]
fn export_pngs(args: &Args, ui: &ui::Ui, snapshot: &Snapshot) -> Result<()> {
    let Some(dir) = args.out.as_deref() else {
        return Ok(());
    };
    let mut stage = ui.stage("Write PNG outputs");
    let written = write_outputs(std::path::Path::new(dir), snapshot)?;
    stage.detail(format!("{} files in {}", written, dir));
    Ok(())
}

#[cfg(not(feature = "image-io"))]
fn export_pngs(_args: &Args, _ui: &ui::Ui, _snapshot: &Snapshot) -> Result<()> {
    Ok(())
}

#[cfg(feature = "image-io")]
fn write_outputs(dir: &std::path::Path, snapshot: &Snapshot) -> Result<usize> {
    use capture_filters::FrameBuffer;

    fn save(path: &std::path::Path, buffer: &FrameBuffer) -> Result<()> {
        let color = match buffer.layout().channels {
            1 => image::ColorType::L8,
            3 => image::ColorType::Rgb8,
            4 => image::ColorType::Rgba8,
            other => return Err(anyhow!("cannot encode {} channel frame", other)),
        };
        image::save_buffer(path, buffer.pixels(), buffer.width(), buffer.height(), color)?;
        Ok(())
    }

    std::fs::create_dir_all(dir)?;
    let mut written = 0;
    for kind in FilterKind::ALL {
        if let Some(buffer) = snapshot.output(kind) {
            save(&dir.join(format!("{}.png", kind)), buffer)?;
            written += 1;
        }
    }
    if let Some(buffer) = snapshot.composite() {
        save(&dir.join("composite.png"), buffer)?;
        written += 1;
    }
    Ok(written)
}
