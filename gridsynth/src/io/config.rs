//! Configuration read from `gridsynth.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gridsynth.toml";

/// Synthesis configuration (TOML).
///
/// Every section is optional; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthConfig {
    pub generation: GenerationConfig,
    pub attempts: AttemptConfig,
    pub sandbox: SandboxConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_instruction: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    /// Minimum delay between consecutive generation calls.
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "openai/gpt-oss-20b".to_string(),
            temperature: 0.2,
            max_tokens: 8000,
            system_instruction:
                "You are a Python code golf expert specializing in grid transformations."
                    .to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            min_interval_ms: 1000,
            request_timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AttemptConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// When false, every task gets exactly one attempt.
    pub retry_on_failure: bool,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_on_failure: true,
        }
    }
}

impl AttemptConfig {
    /// Total generation attempts allowed per task.
    pub fn max_attempts(&self) -> u32 {
        if self.retry_on_failure {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter used to check and run candidates.
    pub python: String,
    pub entry_point: String,
    /// Per-child wall-clock limit.
    pub timeout_ms: u64,
    pub output_limit_bytes: usize,
    pub max_source_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            entry_point: "p".to_string(),
            timeout_ms: 5000,
            output_limit_bytes: 1_000_000,
            max_source_bytes: 10_000,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Global ceiling on generation calls for one batch.
    pub max_api_calls: u64,
    /// Pacing delay between processed tasks.
    pub task_delay_ms: u64,
    pub eval_examples_in_prompt: usize,
    pub save_failed_attempts: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_api_calls: 100,
            task_delay_ms: 2000,
            eval_examples_in_prompt: 3,
            save_failed_attempts: true,
        }
    }
}

impl RunConfig {
    pub fn task_delay(&self) -> Duration {
        Duration::from_millis(self.task_delay_ms)
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.endpoint.trim().is_empty() {
            return Err(anyhow!("generation.endpoint must not be empty"));
        }
        if generation.model.trim().is_empty() {
            return Err(anyhow!("generation.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(anyhow!(
                "generation.temperature must be within [0, 2], got {}",
                generation.temperature
            ));
        }
        if generation.max_tokens == 0 {
            return Err(anyhow!("generation.max_tokens must be > 0"));
        }
        if generation.request_timeout_secs == 0 {
            return Err(anyhow!("generation.request_timeout_secs must be > 0"));
        }
        if self.sandbox.python.trim().is_empty() {
            return Err(anyhow!("sandbox.python must not be empty"));
        }
        if !is_identifier(&self.sandbox.entry_point) {
            return Err(anyhow!(
                "sandbox.entry_point must be a Python identifier, got {:?}",
                self.sandbox.entry_point
            ));
        }
        if self.sandbox.timeout_ms == 0 {
            return Err(anyhow!("sandbox.timeout_ms must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.max_source_bytes == 0 {
            return Err(anyhow!("sandbox.max_source_bytes must be > 0"));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SynthConfig::default()`.
pub fn load_config(path: &Path) -> Result<SynthConfig> {
    if !path.exists() {
        let cfg = SynthConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SynthConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
