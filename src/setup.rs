use crate::config::Config;
use crate::llm::{create_llm, LlmClient};
use anyhow::{anyhow, Context, Result};
use inquire::Select;
use log::info;
use std::path::Path;

pub fn default_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o-mini",
        _ => "gemini-1.5-flash",
    }
}

fn set_model(config: &mut Config, model: &str) -> Result<()> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_mut().context("Gemini config missing")?;
            cfg.model = model.trim_start_matches("models/").to_string();
        }
        "openai" => {
            let cfg = config.llm.openai.as_mut().context("OpenAI config missing")?;
            cfg.model = model.to_string();
        }
        other => return Err(anyhow!("Unknown LLM provider: {}", other)),
    }
    Ok(())
}

/// Lists models as a cheap way to prove the key works; returns how many were visible.
pub async fn check_key(llm: &dyn LlmClient) -> Result<usize> {
    let models = llm.list_models().await?;
    Ok(models.len())
}

/// Makes sure a model is configured, asking interactively unless running unattended.
pub async fn run_setup(config: &mut Config, config_path: &Path) -> Result<()> {
    if config.llm.model().is_some() {
        return Ok(());
    }

    let provider = config.llm.provider.clone();
    let chosen = if config.unattended {
        default_model(&provider).to_string()
    } else {
        println!("Fetching available models...");
        let llm = create_llm(config, Some(default_model(&provider)))?;
        let models = llm.list_models().await?;
        if models.is_empty() {
            return Err(anyhow!("No models available for provider: {}", provider));
        }
        Select::new("Select Model:", models).prompt()?
    };

    info!("Using model {}", chosen);
    set_model(config, &chosen)?;
    config.save(config_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenAIConfig;
    use crate::llm::ModelInput;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct ListingLlm(Result<Vec<String>, String>);

    #[async_trait]
    impl LlmClient for ListingLlm {
        async fn generate(&self, _input: &ModelInput) -> Result<String> {
            Err(anyhow!("not used"))
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    #[tokio::test]
    async fn test_check_key_counts_models() {
        let ok = ListingLlm(Ok(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(check_key(&ok).await.unwrap(), 2);

        let bad = ListingLlm(Err("API key not valid".to_string()));
        let err = check_key(&bad).await.unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
    }

    #[test]
    fn test_set_model_strips_gemini_prefix() {
        let mut config = Config::default();
        set_model(&mut config, "models/gemini-1.5-pro").unwrap();
        assert_eq!(config.llm.model(), Some("gemini-1.5-pro"));
    }

    #[test]
    fn test_set_model_for_openai() {
        let mut config = Config::default();
        config.llm.provider = "openai".to_string();
        config.llm.openai = Some(OpenAIConfig {
            api_key: "k".to_string(),
            model: String::new(),
            base_url: None,
        });
        set_model(&mut config, "gpt-4o").unwrap();
        assert_eq!(config.llm.model(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_unattended_setup_saves_default_model() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.unattended = true;

        run_setup(&mut config, &path).await?;

        assert_eq!(config.llm.model(), Some("gemini-1.5-flash"));
        assert_eq!(Config::load(&path)?.llm.model(), Some("gemini-1.5-flash"));
        Ok(())
    }
}
