use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::filter::FilterKind;
use crate::ingest::SourceConfig;
use crate::pipeline::PipelineSettings;
use crate::reconfig::Intent;

const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 60;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct FilterdConfigFile {
    source: Option<SourceConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    startup: Option<StartupConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    mirror: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    max_parallel_filters: Option<usize>,
    health_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StartupConfigFile {
    filters: Option<Vec<String>>,
    compositing: Option<bool>,
    composite_members: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct FilterdConfig {
    pub source: SourceSettings,
    pub pipeline: PipelineSettings,
    pub health_interval: Duration,
    pub startup: StartupSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub mirror: bool,
}

/// Filters and composite state requested before the first cycle.
#[derive(Debug, Clone, Default)]
pub struct StartupSettings {
    pub filters: Vec<FilterKind>,
    pub compositing: bool,
    pub composite_members: Vec<FilterKind>,
}

impl FilterdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FILTERD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FilterdConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            width: source.width.unwrap_or(DEFAULT_WIDTH),
            height: source.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: source.target_fps.unwrap_or(DEFAULT_FPS),
            mirror: source.mirror.unwrap_or(true),
        };
        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            mirror: source.mirror,
            max_parallel_filters: pipeline_file
                .max_parallel_filters
                .unwrap_or(FilterKind::COUNT),
        };
        let health_interval = Duration::from_secs(
            pipeline_file
                .health_interval_secs
                .unwrap_or(DEFAULT_HEALTH_INTERVAL_SECS),
        );
        let startup = file.startup.unwrap_or_default();
        let startup = StartupSettings {
            filters: parse_kinds(&startup.filters.unwrap_or_default())?,
            compositing: startup.compositing.unwrap_or(false),
            composite_members: parse_kinds(&startup.composite_members.unwrap_or_default())?,
        };
        Ok(Self {
            source,
            pipeline,
            health_interval,
            startup,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("FILTERD_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(width) = std::env::var("FILTERD_WIDTH") {
            self.source.width = width
                .trim()
                .parse()
                .map_err(|_| anyhow!("FILTERD_WIDTH must be an integer pixel count"))?;
        }
        if let Ok(height) = std::env::var("FILTERD_HEIGHT") {
            self.source.height = height
                .trim()
                .parse()
                .map_err(|_| anyhow!("FILTERD_HEIGHT must be an integer pixel count"))?;
        }
        if let Ok(fps) = std::env::var("FILTERD_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("FILTERD_FPS must be an integer frame rate"))?;
        }
        if let Ok(mirror) = std::env::var("FILTERD_MIRROR") {
            self.source.mirror = parse_bool("FILTERD_MIRROR", &mirror)?;
            self.pipeline.mirror = self.source.mirror;
        }
        if let Ok(parallel) = std::env::var("FILTERD_MAX_PARALLEL") {
            self.pipeline.max_parallel_filters = parallel
                .trim()
                .parse()
                .map_err(|_| anyhow!("FILTERD_MAX_PARALLEL must be an integer"))?;
        }
        if let Ok(filters) = std::env::var("FILTERD_FILTERS") {
            self.startup.filters = parse_kinds(&split_csv(&filters))?;
        }
        if let Ok(composite) = std::env::var("FILTERD_COMPOSITE") {
            self.startup.compositing = parse_bool("FILTERD_COMPOSITE", &composite)?;
        }
        if let Ok(members) = std::env::var("FILTERD_COMPOSITE_MEMBERS") {
            self.startup.composite_members = parse_kinds(&split_csv(&members))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source size must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }
        if self.pipeline.max_parallel_filters == 0 {
            return Err(anyhow!("max_parallel_filters must be greater than zero"));
        }
        if self.health_interval.as_secs() == 0 {
            return Err(anyhow!("health_interval_secs must be greater than zero"));
        }
        for member in &self.startup.composite_members {
            if !self.startup.filters.contains(member) {
                return Err(anyhow!(
                    "composite member {} is not in the startup filter list",
                    member
                ));
            }
        }
        Ok(())
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            uri: self.source.uri.clone(),
            width: self.source.width,
            height: self.source.height,
            target_fps: self.source.target_fps,
            frame_limit: None,
        }
    }

    /// Intents that bring a fresh pipeline to the configured startup state.
    pub fn startup_intents(&self) -> Vec<Intent> {
        let activations = self
            .startup
            .filters
            .iter()
            .map(|&kind| Intent::ActivateFilter { kind, active: true });
        let members = self
            .startup
            .composite_members
            .iter()
            .map(|&kind| Intent::SetCompositeMembership {
                kind,
                included: true,
            });
        let compositing = self
            .startup
            .compositing
            .then_some(Intent::SetCompositingEnabled(true));
        activations.chain(members).chain(compositing).collect()
    }
}

fn read_config_file(path: &Path) -> Result<FilterdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse filter names, keeping the first occurrence of each kind.
fn parse_kinds(names: &[String]) -> Result<Vec<FilterKind>> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind: FilterKind = name.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
