//! Configuration types.
//!
//! Command presets say how to launch an agent in a worktree; the
//! autopilot section tunes the guidance pipeline. Both load from a single
//! TOML file, and every field has a default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AgentKind, AppError, AppResult, ConfigErrorReason};

/// Environment variable selecting multi-project mode.
pub const MULTI_PROJECT_ROOT_ENV: &str = "CCMANAGER_MULTI_PROJECT_ROOT";

/// Default preset id.
pub const DEFAULT_PRESET_ID: &str = "claude";

// ============================================================================
// Command Presets
// ============================================================================

/// How to launch an agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreset {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments to retry with when launching with `args` fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_args: Option<Vec<String>>,
    #[serde(default)]
    pub detection_strategy: AgentKind,
}

impl CommandPreset {
    /// Creates a preset with no arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            fallback_args: None,
            detection_strategy: AgentKind::default(),
        }
    }
}

/// The set of presets and which one is the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresetConfig {
    pub presets: Vec<CommandPreset>,
    pub default_preset_id: String,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            presets: vec![CommandPreset::new(DEFAULT_PRESET_ID, "Main", "claude")],
            default_preset_id: DEFAULT_PRESET_ID.to_string(),
        }
    }
}

impl PresetConfig {
    pub fn preset(&self, id: &str) -> Option<&CommandPreset> {
        self.presets.iter().find(|p| p.id == id)
    }

    /// Returns the default preset, or the first preset if the default id
    /// is dangling.
    pub fn default_preset(&self) -> Option<&CommandPreset> {
        self.preset(&self.default_preset_id)
            .or_else(|| self.presets.first())
    }

    fn validate(&self, config_path: &str) -> AppResult<()> {
        let mut seen = HashSet::new();
        for preset in &self.presets {
            if preset.id.trim().is_empty() {
                return Err(AppError::config(
                    config_path,
                    ConfigErrorReason::Validation,
                    "preset id must not be empty",
                ));
            }
            if preset.command.trim().is_empty() {
                return Err(AppError::config(
                    config_path,
                    ConfigErrorReason::Validation,
                    format!("preset '{}' has an empty command", preset.id),
                ));
            }
            if !seen.insert(preset.id.as_str()) {
                return Err(AppError::config(
                    config_path,
                    ConfigErrorReason::Validation,
                    format!("duplicate preset id '{}'", preset.id),
                ));
            }
        }
        if self.preset(&self.default_preset_id).is_none() {
            return Err(AppError::config(
                config_path,
                ConfigErrorReason::Validation,
                format!("default preset '{}' does not exist", self.default_preset_id),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Autopilot
// ============================================================================

/// Configuration snapshot handed to guidance sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutopilotConfig {
    pub enabled: bool,
    /// Analysis provider name (e.g. "anthropic", "openai")
    pub provider: String,
    pub model: String,
    /// Minimum confidence required before acting on a decision
    pub intervention_threshold: f64,
    /// Per-session budget of interventions in any rolling hour
    pub max_guidances_per_hour: u32,
    /// Shared cap on simultaneous analyzer calls
    pub max_concurrency: usize,
    /// Deadline for one analyzer call; `None` or `0` waits forever
    pub analysis_timeout_secs: Option<u64>,
    /// External analyzer program and arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer_command: Option<Vec<String>>,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4".to_string(),
            intervention_threshold: 0.7,
            max_guidances_per_hour: 3,
            max_concurrency: 3,
            analysis_timeout_secs: Some(60),
            analyzer_command: None,
        }
    }
}

impl AutopilotConfig {
    /// The per-call analyzer deadline, if any.
    pub fn analysis_timeout(&self) -> Option<std::time::Duration> {
        self.analysis_timeout_secs
            .filter(|secs| *secs > 0)
            .map(std::time::Duration::from_secs)
    }

    fn validate(&self, config_path: &str) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.intervention_threshold) {
            return Err(AppError::config(
                config_path,
                ConfigErrorReason::Validation,
                format!(
                    "interventionThreshold must be within 0..=1, got {}",
                    self.intervention_threshold
                ),
            ));
        }
        if self.max_concurrency < 1 {
            return Err(AppError::config(
                config_path,
                ConfigErrorReason::Validation,
                "maxConcurrency must be at least 1",
            ));
        }
        if self
            .analyzer_command
            .as_ref()
            .is_some_and(|cmd| cmd.first().map_or(true, |p| p.trim().is_empty()))
        {
            return Err(AppError::config(
                config_path,
                ConfigErrorReason::Validation,
                "analyzerCommand must name a program",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Config File
// ============================================================================

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[serde(flatten)]
    pub presets: PresetConfig,
    pub autopilot: AutopilotConfig,
}

impl Config {
    /// Default location: `<config_dir>/ccmanager/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ccmanager").join("config.toml"))
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// `AppError::Config` with reason `Missing`, `Parse` or `Validation`.
    pub fn load(path: &Path) -> AppResult<Self> {
        let config_path = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                ConfigErrorReason::Missing
            } else {
                ConfigErrorReason::Parse
            };
            AppError::config(&config_path, reason, e.to_string())
        })?;

        let config = Self::parse(&contents, &config_path)?;
        debug!(path = %config_path, presets = config.presets.presets.len(), "Loaded config");
        Ok(config)
    }

    /// Loads the file at the default path, or defaults if it does not exist.
    pub fn load_or_default() -> AppResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses and validates configuration text.
    pub fn parse(contents: &str, config_path: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            AppError::config(config_path, ConfigErrorReason::Parse, e.to_string())
        })?;
        config.presets.validate(config_path)?;
        config.autopilot.validate(config_path)?;
        Ok(config)
    }
}
