//! Tool settings

use std::path::Path;

use anyhow::Context;
use ptt_engine::EngineConfig;
use ptt_sim::LinkConfig;
use serde::{Deserialize, Serialize};

/// Contents of the optional JSON settings file
///
/// Both sections may be left out or given partially; missing fields keep
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Configuration shared by both simulated devices
    pub engine: EngineConfig,
    /// Radio conditions between them
    pub link: LinkConfig,
}

impl Settings {
    /// Load settings from `path`, or the defaults if no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing settings in {}", path.display()))
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
