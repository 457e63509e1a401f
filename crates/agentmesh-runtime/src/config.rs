//! Runtime configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup, falls
//! back to defaults if no config file exists.

use agentmesh_core::Limits;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model used when an agent file names none.
    pub default_model: String,
    /// Provider API key; usually injected from the environment.
    pub api_key: Option<String>,
    /// Search provider key for the web_search tool.
    pub search_api_key: Option<String>,

    pub limits: LimitsConfig,
    pub workflow: WorkflowConfig,
    pub autonomous: AutonomousRunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_depth: u32,
    pub max_fanout: usize,
    pub max_concurrency: usize,
    pub token_budget: usize,
    pub max_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Upper bound on steps dispatched per batch.
    pub max_parallel_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomousRunConfig {
    /// Default cycle cap when the agent file names none.
    pub max_cycles: u32,
    /// Fraction of wrap-up indicators that ends the mission early.
    /// A placeholder heuristic — tune per deployment, don't lean on it.
    pub wrap_up_threshold: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-20250514".into(),
            api_key: None,
            search_api_key: None,
            limits: LimitsConfig::default(),
            workflow: WorkflowConfig::default(),
            autonomous: AutonomousRunConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_depth: limits.max_depth,
            max_fanout: limits.max_fanout,
            max_concurrency: limits.max_concurrency,
            token_budget: limits.token_budget,
            max_turns: limits.max_turns,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 2,
        }
    }
}

impl Default for AutonomousRunConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            wrap_up_threshold: 0.8,
        }
    }
}

impl RuntimeConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn kernel_limits(&self) -> Limits {
        Limits {
            max_depth: self.limits.max_depth,
            max_fanout: self.limits.max_fanout,
            max_concurrency: self.limits.max_concurrency,
            token_budget: self.limits.token_budget,
            max_turns: self.limits.max_turns,
        }
    }
}
