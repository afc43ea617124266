//! Unified configuration for the popeye pipeline.
//!
//! Reads `.popeye/popeye.toml` when present; every section has defaults so
//! a bare project runs without any configuration file.
//!
//! ```toml
//! [pipeline]
//! max_recovery_iterations = 5
//! active_roles = ["ARCHITECT", "DB_EXPERT", "BACKEND_PROGRAMMER"]
//!
//! [consensus]
//! threshold = 0.95
//! quorum = 2
//! min_reviewers = 2
//! arbitration = true
//! timeout_secs = 120
//!
//! [[consensus.reviewers]]
//! id = "reviewer-1"
//! provider = "anthropic"
//! model = "claude-sonnet-4-5"
//! temperature = 0.2
//!
//! [checks]
//! timeout_secs = 300
//! start_timeout_secs = 15
//!
//! [checks.overrides]
//! test = "make check"
//!
//! [provider]
//! command = "claude"
//! args = ["--print"]
//! timeout_secs = 300
//! ```

use crate::consensus::ConsensusRules;
use crate::roles::Role;
use crate::snapshot::CommandOverrides;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Config file path relative to the project directory.
pub const CONFIG_PATH: &str = ".popeye/popeye.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_recovery_iterations: u32,
    pub active_roles: Vec<Role>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_recovery_iterations: 5,
            active_roles: vec![
                Role::Architect,
                Role::DbExpert,
                Role::BackendProgrammer,
                Role::FrontendProgrammer,
                Role::QaTester,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewerConfig {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            id: "reviewer".to_string(),
            provider: "anthropic".to_string(),
            model: "default".to_string(),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub threshold: f64,
    pub quorum: usize,
    pub min_reviewers: usize,
    pub arbitration: bool,
    pub timeout_secs: u64,
    pub reviewers: Vec<ReviewerConfig>,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            quorum: 2,
            min_reviewers: 2,
            arbitration: false,
            timeout_secs: 120,
            reviewers: vec![
                ReviewerConfig {
                    id: "reviewer-1".to_string(),
                    ..Default::default()
                },
                ReviewerConfig {
                    id: "reviewer-2".to_string(),
                    ..Default::default()
                },
            ],
        }
    }
}

impl ConsensusSettings {
    pub fn rules(&self) -> ConsensusRules {
        ConsensusRules {
            threshold: self.threshold,
            quorum: self.quorum,
            min_reviewers: self.min_reviewers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    pub timeout_secs: u64,
    pub start_timeout_secs: u64,
    pub overrides: CommandOverrides,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            start_timeout_secs: 15,
            overrides: CommandOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--print".to_string()],
            timeout_secs: 300,
        }
    }
}

/// The complete configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopeyeConfig {
    pub pipeline: PipelineSettings,
    pub consensus: ConsensusSettings,
    pub checks: CheckSettings,
    pub provider: ProviderSettings,
}

impl PopeyeConfig {
    /// Load from `.popeye/popeye.toml`, falling back to defaults when the
    /// file does not exist. A present-but-invalid file is an error: silent
    /// fallback would mask typos in thresholds.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_PATH);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}
