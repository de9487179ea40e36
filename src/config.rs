use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini" or "openai"
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_jitter")]
    pub jitter_seconds: u64,
    #[serde(default = "default_pacing")]
    pub pacing_seconds: u64,
    /// Upper bound on one HTTP request; a stalled call fails as a retryable timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_max_attempts() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_jitter() -> u64 {
    2
}
fn default_pacing() -> u64 {
    2
}
fn default_request_timeout() -> u64 {
    120
}

fn key_or_env(key: &str, var: &str) -> Option<String> {
    if !key.trim().is_empty() {
        return Some(key.trim().to_string());
    }
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl GeminiConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        key_or_env(&self.api_key, "GEMINI_API_KEY")
    }
}

impl OpenAIConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        key_or_env(&self.api_key, "OPENAI_API_KEY")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            unattended: false,
            llm: LlmConfig {
                provider: "gemini".to_string(),
                max_attempts: default_max_attempts(),
                retry_delay_seconds: default_retry_delay(),
                jitter_seconds: default_jitter(),
                pacing_seconds: default_pacing(),
                request_timeout_seconds: default_request_timeout(),
                gemini: Some(GeminiConfig {
                    api_key: String::new(),
                    model: String::new(),
                }),
                openai: None,
            },
        }
    }
}

impl LlmConfig {
    pub fn max_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    /// Model name for the active provider, if one is configured.
    pub fn model(&self) -> Option<&str> {
        let model = match self.provider.as_str() {
            "gemini" => self.gemini.as_ref().map(|g| g.model.as_str()),
            "openai" => self.openai.as_ref().map(|o| o.model.as_str()),
            _ => None,
        };
        model.filter(|m| !m.trim().is_empty())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_retry_defaults() {
        let yaml = r#"
llm:
  provider: gemini
  gemini:
    api_key: abc
    model: gemini-1.5-flash
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(config.output_folder, "output");
        assert!(!config.unattended);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.llm.retry_delay_seconds, 5);
        assert_eq!(config.llm.jitter_seconds, 2);
        assert_eq!(config.llm.pacing(), Duration::from_secs(2));
        assert_eq!(config.llm.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.llm.model(), Some("gemini-1.5-flash"));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let mut config = Config::default();
        config.llm.max_attempts = 0;
        assert_eq!(config.llm.max_attempts(), 1);
    }

    #[test]
    fn test_request_timeout_default_and_floor() {
        let mut config = Config::default();
        assert_eq!(config.llm.request_timeout_seconds, 120);

        config.llm.request_timeout_seconds = 0;
        assert_eq!(config.llm.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_blank_model_counts_as_unset() {
        let config = Config::default();
        assert_eq!(config.llm.model(), None);
    }

    #[test]
    fn test_explicit_key_wins_over_env() {
        let cfg = GeminiConfig {
            api_key: " from-file ".to_string(),
            model: String::new(),
        };
        assert_eq!(cfg.resolved_api_key().as_deref(), Some("from-file"));
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.llm.pacing_seconds = 4;
        config.save(&path)?;

        let loaded = Config::load(&path)?;
        assert_eq!(loaded.llm.pacing_seconds, 4);
        assert_eq!(loaded.llm.provider, "gemini");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
