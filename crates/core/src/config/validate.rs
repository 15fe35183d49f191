use super::{types::Config, ConfigError, LlmProvider};

/// Validate configuration
/// Currently validates:
/// - LLM section exists (enforced by serde)
/// - Groq provider has an API key
/// - Server port is not 0
/// - Orchestrator concurrency and timeouts are sane
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // LLM validation
    if config.llm.provider == LlmProvider::Groq {
        match &config.llm.groq {
            Some(groq) if !groq.api_key.is_empty() => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "llm.groq.api_key is required when llm.provider is \"groq\"".to_string(),
                ));
            }
        }
    }

    // Orchestrator validation
    let orch = &config.orchestrator;
    if orch.max_concurrent_runs == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_concurrent_runs cannot be 0".to_string(),
        ));
    }
    if orch.retry.hard_timeout_secs <= orch.retry.soft_timeout_secs {
        return Err(ConfigError::ValidationError(
            "orchestrator.retry.hard_timeout_secs must be greater than soft_timeout_secs"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config_from_str, GroqConfig};

    fn ollama_config() -> Config {
        load_config_from_str(
            r#"
[llm]
provider = "ollama"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        let config = ollama_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = ollama_config();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_groq_without_api_key_fails() {
        let mut config = ollama_config();
        config.llm.provider = LlmProvider::Groq;
        config.llm.groq = None;
        assert!(validate_config(&config).is_err());

        config.llm.groq = Some(GroqConfig {
            api_key: String::new(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_base: None,
            timeout_secs: 60,
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_groq_with_api_key_passes() {
        let mut config = ollama_config();
        config.llm.provider = LlmProvider::Groq;
        config.llm.groq = Some(GroqConfig {
            api_key: "gsk-test".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_base: None,
            timeout_secs: 60,
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = ollama_config();
        config.orchestrator.max_concurrent_runs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_hard_timeout_not_above_soft_fails() {
        let mut config = ollama_config();
        config.orchestrator.retry.soft_timeout_secs = 360;
        config.orchestrator.retry.hard_timeout_secs = 360;
        assert!(validate_config(&config).is_err());
    }
}
