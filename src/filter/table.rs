use std::fmt;
use std::sync::Arc;

use crate::error::ComputeError;
use crate::frame::FrameBuffer;

use super::{compute, FilterKind};

/// Compute function for one filter kind.
///
/// `outputs` holds the kind's working buffers in declared order followed by
/// the filter output. Implementations must treat `input` as read-only and
/// must not keep references past the call.
pub type ComputeFn =
    Arc<dyn Fn(&FrameBuffer, &mut [FrameBuffer]) -> Result<(), ComputeError> + Send + Sync>;

/// Fixed table of compute functions, one per `FilterKind`.
#[derive(Clone)]
pub struct FilterTable {
    functions: [ComputeFn; FilterKind::COUNT],
}

impl FilterTable {
    /// Table with the built-in implementations.
    pub fn builtin() -> Self {
        Self {
            functions: [
                Arc::new(compute::identity),
                Arc::new(compute::grayscale),
                Arc::new(compute::edge_gradient),
            ],
        }
    }

    /// Replace the compute function for `kind`.
    pub fn with_compute<F>(mut self, kind: FilterKind, compute: F) -> Self
    where
        F: Fn(&FrameBuffer, &mut [FrameBuffer]) -> Result<(), ComputeError>
            + Send
            + Sync
            + 'static,
    {
        self.functions[kind.index()] = Arc::new(compute);
        self
    }

    pub fn get(&self, kind: FilterKind) -> ComputeFn {
        self.functions[kind.index()].clone()
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for FilterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(FilterKind::ALL.iter().map(|kind| kind.name()))
            .finish()
    }
}
