use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::images::ImagesConfig;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Server configuration (health + metrics listener)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn default_port() -> u16 {
    9090
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tally.db")
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Which provider backs extraction and fraud analysis
    pub provider: LlmProvider,
    /// Groq-specific configuration (required when provider = "groq")
    #[serde(default)]
    pub groq: Option<GroqConfig>,
    /// Ollama-specific configuration (used when provider = "ollama")
    #[serde(default)]
    pub ollama: Option<OllamaConfig>,
}

/// Available LLM providers
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Groq,
    Ollama,
}

/// Groq provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroqConfig {
    /// Groq API key
    pub api_key: String,
    /// Model name (default: "llama-3.3-70b-versatile")
    #[serde(default = "default_groq_model")]
    pub model: String,
    /// Override the API base URL (e.g. for a proxy)
    #[serde(default)]
    pub api_base: Option<String>,
    /// Request timeout in seconds (default: 60)
    #[serde(default = "default_groq_timeout")]
    pub timeout_secs: u32,
}

fn default_groq_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_groq_timeout() -> u32 {
    60
}

/// Ollama provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    /// Ollama server URL (default: "http://localhost:11434")
    #[serde(default = "default_ollama_url")]
    pub url: String,
    /// Model name (default: "llama3.2-vision")
    #[serde(default = "default_ollama_model")]
    pub model: String,
    /// Request timeout in seconds (default: 120, local inference is slow)
    #[serde(default = "default_ollama_timeout")]
    pub timeout_secs: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
            timeout_secs: default_ollama_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2-vision".to_string()
}

fn default_ollama_timeout() -> u32 {
    120
}
