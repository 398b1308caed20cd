//! Filter kinds and their working-buffer declarations.
//!
//! The set of kinds is closed. Each kind declares the intermediate buffers its
//! compute function needs, in the order they are locked and handed to it.

mod compute;
mod table;

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::frame::{FrameShape, PixelLayout};

pub use compute::{edge_gradient, grayscale, identity};
pub use table::{ComputeFn, FilterTable};

/// One supported image transformation.
///
/// Declaration order is the composite order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    #[serde(alias = "none")]
    Identity,
    #[serde(alias = "gray")]
    Grayscale,
    #[serde(alias = "sobel")]
    EdgeGradient,
}

impl FilterKind {
    pub const COUNT: usize = 3;

    /// Every kind, in declaration order.
    pub const ALL: [FilterKind; FilterKind::COUNT] = [
        FilterKind::Identity,
        FilterKind::Grayscale,
        FilterKind::EdgeGradient,
    ];

    /// Position in `ALL`; used to index per-kind tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Identity => "identity",
            FilterKind::Grayscale => "grayscale",
            FilterKind::EdgeGradient => "edge-gradient",
        }
    }

    /// Working buffers this kind owns while active, in lock order.
    pub fn resources(self) -> &'static [ResourceSpec] {
        match self {
            FilterKind::Identity => &[],
            FilterKind::Grayscale => &GRAYSCALE_RESOURCES,
            FilterKind::EdgeGradient => &EDGE_GRADIENT_RESOURCES,
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(FilterKind::Identity),
            "grayscale" | "gray" => Ok(FilterKind::Grayscale),
            "edge-gradient" | "edge_gradient" | "sobel" => Ok(FilterKind::EdgeGradient),
            other => Err(anyhow::anyhow!("unknown filter kind '{}'", other)),
        }
    }
}

/// Pixel layout of a working buffer relative to the filter input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceLayout {
    MatchInput,
    SingleChannel,
}

/// A named working buffer owned by one filter kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: &'static str,
    pub layout: ResourceLayout,
}

impl ResourceSpec {
    pub fn shape_for(&self, input: FrameShape) -> FrameShape {
        match self.layout {
            ResourceLayout::MatchInput => input,
            ResourceLayout::SingleChannel => input.with_layout(PixelLayout {
                channels: 1,
                bytes_per_channel: input.layout.bytes_per_channel,
            }),
        }
    }
}

const GRAYSCALE_RESOURCES: [ResourceSpec; 1] = [ResourceSpec {
    name: "gray",
    layout: ResourceLayout::SingleChannel,
}];

const EDGE_GRADIENT_RESOURCES: [ResourceSpec; 2] = [
    ResourceSpec {
        name: "gradient-x",
        layout: ResourceLayout::MatchInput,
    },
    ResourceSpec {
        name: "gradient-y",
        layout: ResourceLayout::MatchInput,
    },
];
