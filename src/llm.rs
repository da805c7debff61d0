//! Abstracción sobre Rig para los endpoints del proxy IA.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.

use crate::config::{AppConfig, LlmProvider};
use anyhow::{anyhow, Result};
use rig::completion::Prompt;

const CLASSIFIER_PREAMBLE: &str = r#"
Sei un assistente che archivia i documenti di uno studio di ingegneria.
Rispondi esclusivamente con l'oggetto JSON richiesto, senza testo aggiuntivo.
"#;

/// Gestor de LLMs usado por el proxy de clasificación.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    fn model_or_default<'a>(&'a self, model: &'a str) -> &'a str {
        if model.trim().is_empty() {
            self.chat_model.as_str()
        } else {
            model
        }
    }

    /// Envía el prompt con la clave del llamador y devuelve el texto crudo.
    pub async fn complete(&self, api_key: &str, model: &str, prompt: &str) -> Result<String> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("API key mancante"));
        }
        match self.provider {
            LlmProvider::OpenAI => {
                self.complete_with_openai(api_key, self.model_or_default(model), prompt)
                    .await
            }
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para clasificación",
                other
            )),
        }
    }

    async fn complete_with_openai(&self, api_key: &str, model: &str, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::new(api_key);
        let agent = client.agent(model).preamble(CLASSIFIER_PREAMBLE).build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    /// Sonda mínima para validar una credencial antes de guardarla.
    pub async fn probe(&self, api_key: &str, model: &str) -> Result<()> {
        let answer = self
            .complete(api_key, model, "Rispondi solo con la parola: ok")
            .await?;
        if answer.trim().is_empty() {
            return Err(anyhow!("Respuesta vacía del proveedor"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(provider: LlmProvider) -> LlmManager {
        LlmManager {
            provider,
            chat_model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn test_empty_model_uses_configured_default() {
        let m = manager(LlmProvider::OpenAI);
        assert_eq!(m.model_or_default(""), "gpt-4o-mini");
        assert_eq!(m.model_or_default("gpt-4o"), "gpt-4o");
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected_before_any_call() {
        let err = manager(LlmProvider::OpenAI)
            .complete("  ", "gpt-4o", "ciao")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[tokio::test]
    async fn test_unimplemented_provider() {
        let err = manager(LlmProvider::Ollama)
            .complete("sk-x", "", "ciao")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no implementado"));
    }
}
