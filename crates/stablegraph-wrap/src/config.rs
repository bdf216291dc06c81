//! Context configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a wrapper finds its backing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Hold the backing handle captured at wrap time.
    ///
    /// Only safe when the store never replaces its instance while the
    /// context is open.
    Direct,
    /// Keep only the id and look the entity up in the current store on every
    /// access. Survives failover at the cost of one lookup per operation.
    #[default]
    Lookup,
}

/// Configuration for a [`GraphContext`](crate::GraphContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub resolution: Resolution,
    /// Label used in log output
    pub name: Option<String>,
    /// How long a lookup that hit a retired store instance waits for its
    /// replacement to be installed before giving up.
    pub replacement_grace_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            name: None,
            replacement_grace_ms: 100,
        }
    }
}

impl ContextConfig {
    pub fn with_resolution(resolution: Resolution) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn replacement_grace(&self) -> Duration {
        Duration::from_millis(self.replacement_grace_ms)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
