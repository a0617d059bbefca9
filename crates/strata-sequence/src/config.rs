//! Sequence configuration

use serde::{Deserialize, Serialize};

/// Composited sequence configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Maximum number of generations a single cascade may reach
    pub max_cascade_depth: usize,
    /// Name attached to log events
    pub label: Option<String>,
}

impl SequenceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With maximum cascade depth
    #[inline]
    #[must_use]
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// With log label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 256,
            label: None,
        }
    }
}
