//! filterd - webcam filter pipeline daemon
//!
//! This daemon:
//! 1. Loads its configuration (FILTERD_CONFIG file + FILTERD_* env overrides)
//! 2. Opens the capture source and queues the startup filter set
//! 3. Runs the capture/filter/composite cycle on a dedicated thread
//! 4. Accepts controller commands on stdin, one per line
//!    (`activate gray`, `composite on`, `include sobel`, `quit`, ...)
//! 5. Logs a health line from the published snapshot at a fixed interval

use anyhow::{anyhow, Result};
use std::io::{BufRead, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_filters::config::FilterdConfig;
use capture_filters::{
    open_source, FilterTable, Intent, IntentSender, PipelineController, SnapshotReader,
};

#[path = "../ui.rs"]
mod ui;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let ui = ui::Ui::from_args(
        None,
        std::io::stderr().is_terminal(),
        log::log_enabled!(log::Level::Info),
    );

    let cfg = {
        let mut stage = ui.stage("Load config");
        let cfg = FilterdConfig::load()?;
        stage.detail(format!(
            "{} {}x{} @ {} fps",
            cfg.source.uri, cfg.source.width, cfg.source.height, cfg.source.target_fps
        ));
        cfg
    };

    let mut pipeline = {
        let _stage = ui.stage("Open capture source");
        let source = open_source(cfg.source_config())?;
        let mut pipeline =
            PipelineController::new(source, FilterTable::builtin(), cfg.pipeline.clone());
        pipeline.open()?;
        pipeline
    };

    let intents = pipeline.intents();
    for intent in cfg.startup_intents() {
        intents.send(intent)?;
    }
    let snapshots = pipeline.snapshots();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    spawn_controller(intents, shutdown.clone())?;

    let flag = shutdown.clone();
    let worker = std::thread::Builder::new()
        .name("pipeline".to_string())
        .spawn(move || {
            let result = pipeline.run(&flag);
            flag.store(true, Ordering::SeqCst);
            result
        })?;

    log::info!(
        "filterd running: source={} mirror={} max_parallel={}",
        cfg.source.uri,
        cfg.pipeline.mirror,
        cfg.pipeline.max_parallel_filters
    );

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
        if last_health_log.elapsed() >= cfg.health_interval {
            log_health(&snapshots);
            last_health_log = Instant::now();
        }
    }

    match worker.join() {
        Ok(Ok(())) => {
            log::info!("filterd stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(anyhow!("pipeline thread panicked")),
    }
}

/// Read controller commands from stdin until EOF. `quit` stops the daemon.
fn spawn_controller(intents: IntentSender, shutdown: Arc<AtomicBool>) -> Result<()> {
    std::thread::Builder::new()
        .name("controller".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let command = line.trim();
                if command.is_empty() || command.starts_with('#') {
                    continue;
                }
                if matches!(command, "quit" | "exit" | "stop") {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                match command.parse::<Intent>() {
                    Ok(intent) => {
                        if intents.send(intent).is_err() {
                            break;
                        }
                        log::debug!("queued '{}'", intent);
                    }
                    Err(e) => log::warn!("ignored command '{}': {}", command, e),
                }
            }
            log::debug!("controller input closed");
        })?;
    Ok(())
}

fn log_health(snapshots: &SnapshotReader) {
    let snapshot = snapshots.latest();
    let stats = snapshot.stats();
    let composite = snapshot
        .composite()
        .map(|buffer| format!("{}x{}", buffer.width(), buffer.height()))
        .unwrap_or_else(|| "off".to_string());
    log::info!(
        "health source_healthy={} frames={} cycle={} active={} composite={} filter_runs={} failures={} rejected_intents={}",
        snapshot.source_healthy(),
        snapshot.frames_captured(),
        snapshot.cycle(),
        snapshot.active_count(),
        composite,
        stats.filter_runs,
        stats.filter_failures,
        stats.intents_rejected
    );
}
