//! Reconfiguration inbox between a controller (UI) and the pipeline.
//!
//! Producers push `Intent`s through cloned `IntentSender`s; the pipeline
//! drains whatever is queued once per cycle and never waits for more.

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::str::FromStr;

use crate::filter::FilterKind;

/// A requested change to the active filter set or the composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    ActivateFilter { kind: FilterKind, active: bool },
    SetCompositingEnabled(bool),
    SetCompositeMembership { kind: FilterKind, included: bool },
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::ActivateFilter { kind, active: true } => write!(f, "activate {}", kind),
            Intent::ActivateFilter { kind, active: false } => write!(f, "deactivate {}", kind),
            Intent::SetCompositingEnabled(true) => f.write_str("composite on"),
            Intent::SetCompositingEnabled(false) => f.write_str("composite off"),
            Intent::SetCompositeMembership {
                kind,
                included: true,
            } => write!(f, "include {}", kind),
            Intent::SetCompositeMembership {
                kind,
                included: false,
            } => write!(f, "exclude {}", kind),
        }
    }
}

/// Parses controller commands: `activate <kind>`, `deactivate <kind>`,
/// `composite on|off`, `include <kind>`, `exclude <kind>`.
impl FromStr for Intent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let arg = words.next();
        if let Some(extra) = words.next() {
            return Err(anyhow!("unexpected argument '{}'", extra));
        }
        let kind = || -> Result<FilterKind> {
            arg.ok_or_else(|| anyhow!("'{}' needs a filter kind", verb))?
                .parse()
        };
        match verb.as_str() {
            "activate" => Ok(Intent::ActivateFilter {
                kind: kind()?,
                active: true,
            }),
            "deactivate" => Ok(Intent::ActivateFilter {
                kind: kind()?,
                active: false,
            }),
            "include" => Ok(Intent::SetCompositeMembership {
                kind: kind()?,
                included: true,
            }),
            "exclude" => Ok(Intent::SetCompositeMembership {
                kind: kind()?,
                included: false,
            }),
            "composite" => match arg.map(str::to_ascii_lowercase).as_deref() {
                Some("on") => Ok(Intent::SetCompositingEnabled(true)),
                Some("off") => Ok(Intent::SetCompositingEnabled(false)),
                _ => Err(anyhow!("'composite' expects 'on' or 'off'")),
            },
            other => Err(anyhow!("unknown command '{}'", other)),
        }
    }
}

/// Producer handle. Cheap to clone, one per controller thread.
#[derive(Clone, Debug)]
pub struct IntentSender {
    tx: Sender<Intent>,
}

impl IntentSender {
    pub fn send(&self, intent: Intent) -> Result<()> {
        self.tx
            .send(intent)
            .map_err(|_| anyhow!("pipeline is no longer accepting intents"))
    }

    pub fn activate(&self, kind: FilterKind) -> Result<()> {
        self.send(Intent::ActivateFilter { kind, active: true })
    }

    pub fn deactivate(&self, kind: FilterKind) -> Result<()> {
        self.send(Intent::ActivateFilter {
            kind,
            active: false,
        })
    }

    pub fn set_compositing(&self, enabled: bool) -> Result<()> {
        self.send(Intent::SetCompositingEnabled(enabled))
    }

    pub fn include(&self, kind: FilterKind) -> Result<()> {
        self.send(Intent::SetCompositeMembership {
            kind,
            included: true,
        })
    }

    pub fn exclude(&self, kind: FilterKind) -> Result<()> {
        self.send(Intent::SetCompositeMembership {
            kind,
            included: false,
        })
    }
}

/// Multi-producer, single-consumer intent inbox.
pub struct ReconfigurationQueue {
    tx: Sender<Intent>,
    rx: Receiver<Intent>,
}

impl ReconfigurationQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> IntentSender {
        IntentSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every intent queued at the time of the call, without blocking.
    ///
    /// Intents pushed while draining wait for the next cycle, so a busy
    /// producer cannot hold the pipeline in this step.
    pub fn drain(&self) -> Vec<Intent> {
        let pending = self.rx.len();
        self.rx.try_iter().take(pending).collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for ReconfigurationQueue {
    fn default() -> Self {
        Self::new()
    }
}
