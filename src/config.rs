//! Carga y gestión de configuración de la aplicación (servidor, almacenamiento y LLM).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Modelo usado cuando la configuración persistida no indica ninguno.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub data_dir: PathBuf,
    pub patterns_file: PathBuf,
    pub ai_config_file: PathBuf,

    pub ai_proxy_url: Url,
    pub ai_timeout: Duration,
    pub ai_max_concurrency: usize,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    /// Credencial del servidor que se ofrece a los clientes sin clave propia.
    pub openai_api_key: Option<String>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función (útil en tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_addr = get("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("commesse-router"))
                .unwrap_or_else(|| PathBuf::from("data"))
        });
        let patterns_file = get("PATTERNS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("learned_patterns.json"));
        let ai_config_file = get("AI_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("ai_config.json"));

        let proxy_raw = get("AI_PROXY_URL").unwrap_or_else(|| format!("http://{server_addr}/"));
        let ai_proxy_url = Url::parse(&proxy_raw)
            .with_context(|| format!("AI_PROXY_URL inválida: {proxy_raw}"))?;

        let ai_timeout_secs: u64 = match get("AI_TIMEOUT_SECS") {
            Some(v) => v
                .parse()
                .map_err(|_| anyhow!("AI_TIMEOUT_SECS debe ser un entero: {v}"))?,
            None => 20,
        };
        let ai_max_concurrency: usize = match get("AI_MAX_CONCURRENCY") {
            Some(v) => v
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow!("AI_MAX_CONCURRENCY debe ser un entero positivo: {v}"))?,
            None => 3,
        };

        let llm_provider_str = get("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model = get("LLM_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let openai_api_key = get("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());

        Ok(Self {
            server_addr,
            data_dir,
            patterns_file,
            ai_config_file,
            ai_proxy_url: with_trailing_slash(ai_proxy_url),
            ai_timeout: Duration::from_secs(ai_timeout_secs),
            ai_max_concurrency,
            llm_provider,
            llm_chat_model,
            openai_api_key,
        })
    }
}

// `Url::join` descarta el último segmento si no termina en '/'.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = cfg(&[("DATA_DIR", "/tmp/router")]).unwrap();
        assert_eq!(c.server_addr, "127.0.0.1:3322");
        assert_eq!(c.patterns_file, PathBuf::from("/tmp/router/learned_patterns.json"));
        assert_eq!(c.ai_config_file, PathBuf::from("/tmp/router/ai_config.json"));
        assert_eq!(c.ai_proxy_url.as_str(), "http://127.0.0.1:3322/");
        assert_eq!(c.ai_timeout, Duration::from_secs(20));
        assert_eq!(c.ai_max_concurrency, 3);
        assert_eq!(c.llm_provider, LlmProvider::OpenAI);
        assert_eq!(c.llm_chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(c.openai_api_key, None);
    }

    #[test]
    fn test_proxy_url_keeps_its_path_prefix() {
        let c = cfg(&[("AI_PROXY_URL", "https://gestionale.example.com/backend")]).unwrap();
        assert_eq!(
            c.ai_proxy_url.join("api/ai/classify").unwrap().as_str(),
            "https://gestionale.example.com/backend/api/ai/classify"
        );
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(cfg(&[("AI_TIMEOUT_SECS", "presto")]).is_err());
        assert!(cfg(&[("AI_MAX_CONCURRENCY", "0")]).is_err());
        assert!(cfg(&[("AI_PROXY_URL", "non è un url")]).is_err());
        assert!(cfg(&[("LLM_PROVIDER", "skynet")]).is_err());
    }
}
