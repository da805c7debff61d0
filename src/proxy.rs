//! Cliente del proxy de clasificación IA.
//!
//! El proxy habla con el proveedor real y devuelve el texto crudo de la
//! respuesta; el parseo y la validación se hacen aquí, en el núcleo.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, RouterError};

#[async_trait]
pub trait AiProxy: Send + Sync {
    /// Una petición, sin streaming. Devuelve el contenido textual del modelo.
    async fn classify(&self, prompt: &str, api_key: &str, model: &str) -> Result<String>;

    /// Credencial del servidor/entorno. Cualquier fallo equivale a `None`.
    async fn environment_api_key(&self) -> Option<String>;

    /// Prueba ligera de conectividad con una credencial.
    async fn test(&self, api_key: &str, model: &str) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub api_key: String,
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvKeyResponse {
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct HttpAiProxy {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAiProxy {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RouterError::Proxy(format!("URL del proxy inválida: {e}")))
    }

    async fn post_credentials(&self, path: &str, body: &ClassifyRequest) -> Result<reqwest::Response> {
        let response = self.client.post(self.endpoint(path)?).json(body).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        Err(RouterError::Proxy(message))
    }
}

#[async_trait]
impl AiProxy for HttpAiProxy {
    async fn classify(&self, prompt: &str, api_key: &str, model: &str) -> Result<String> {
        let body = ClassifyRequest {
            api_key: api_key.to_string(),
            prompt: prompt.to_string(),
            model: model.to_string(),
        };
        let response = self.post_credentials("api/ai/classify", &body).await?;
        let parsed: ClassifyResponse = response.json().await?;
        Ok(parsed.content)
    }

    async fn environment_api_key(&self) -> Option<String> {
        let url = self.endpoint("api/ai/env-key").ok()?;
        let response = match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("El proxy no ofrece credencial de entorno (HTTP {})", r.status());
                return None;
            }
            Err(e) => {
                warn!("No se pudo consultar la credencial de entorno: {}", e);
                return None;
            }
        };
        response
            .json::<EnvKeyResponse>()
            .await
            .ok()
            .and_then(|b| b.api_key)
            .filter(|k| !k.trim().is_empty())
    }

    async fn test(&self, api_key: &str, model: &str) -> bool {
        let body = ClassifyRequest {
            api_key: api_key.to_string(),
            prompt: String::new(),
            model: model.to_string(),
        };
        match self.post_credentials("api/ai/test", &body).await {
            Ok(response) => response
                .json::<TestResponse>()
                .await
                .map(|b| b.ok)
                .unwrap_or(false),
            Err(e) => {
                debug!("Prueba de conexión IA fallida: {}", e);
                false
            }
        }
    }
}
