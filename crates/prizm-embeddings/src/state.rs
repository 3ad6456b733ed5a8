//! Lifecycle state of the embedding model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single embedding model instance.
///
/// ```text
/// idle -> loading -> ready -> disposing -> idle
///            |                   ^
///            v                   |
///          error -> loading      |
/// loading | error  --------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No model loaded
    #[default]
    Idle,
    /// Load in flight
    Loading,
    /// Model loaded and warmed up
    Ready,
    /// Last load failed
    Error,
    /// Dispose in progress
    Disposing,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Error => "error",
            LifecycleState::Disposing => "disposing",
        }
    }

    /// Whether moving from `self` to `next` is a valid transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Ready)
                | (Loading, Error)
                | (Error, Loading)
                | (Ready, Disposing)
                | (Loading, Disposing)
                | (Error, Disposing)
                | (Disposing, Idle)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
