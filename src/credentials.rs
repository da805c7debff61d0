//! Carga de la credencial IA persistida.
//!
//! El blob ha tenido varias codificaciones a lo largo del tiempo:
//! JSON plano, JSON en base64 y, dentro de cualquiera de los dos, un campo
//! `apiKey` a su vez en base64. Se prueban decodificadores en orden fijo y
//! cualquier fallo termina en "sin credencial", nunca en error.

use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::AiConfiguration;

/// Prefijo de una clave `sk-...` codificada en base64.
const ENCODED_KEY_PREFIX: &str = "c2st";

/// Origen del blob de configuración.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Option<String>;
}

pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(
                    "No se pudo leer la configuración IA de {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Blob fijo en memoria.
#[cfg(test)]
pub struct StaticConfigSource(pub Option<String>);

#[cfg(test)]
impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAiConfig {
    api_key: Option<String>,
    model: Option<String>,
}

/// Un paso de la cadena: devuelve `None` si no aplica o si falla.
trait BlobDecoder {
    fn name(&self) -> &'static str;
    fn decode(&self, blob: &str) -> Option<StoredAiConfig>;
}

struct RawJsonDecoder;

impl BlobDecoder for RawJsonDecoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, blob: &str) -> Option<StoredAiConfig> {
        if !blob.starts_with('{') {
            return None;
        }
        serde_json::from_str(blob).ok()
    }
}

struct Base64JsonDecoder;

impl BlobDecoder for Base64JsonDecoder {
    fn name(&self) -> &'static str {
        "base64+json"
    }

    fn decode(&self, blob: &str) -> Option<StoredAiConfig> {
        let bytes = STANDARD.decode(blob).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        RawJsonDecoder.decode(text.trim())
    }
}

/// Si la clave viene en base64 (`c2st...` = `sk-...`), la decodifica.
fn unwrap_encoded_key(key: String) -> Option<String> {
    if !key.starts_with(ENCODED_KEY_PREFIX) {
        return Some(key);
    }
    let decoded = STANDARD
        .decode(&key)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    if decoded.is_none() {
        warn!("apiKey con prefijo base64 pero no decodificable; se ignora");
    }
    decoded
}

pub struct AiConfigLoader {
    source: Box<dyn ConfigSource>,
    default_model: String,
}

impl AiConfigLoader {
    pub fn new(source: Box<dyn ConfigSource>, default_model: impl Into<String>) -> Self {
        Self {
            source,
            default_model: default_model.into(),
        }
    }

    pub fn load(&self) -> AiConfiguration {
        let Some(blob) = self.source.load() else {
            debug!("Sin configuración IA persistida");
            return AiConfiguration::without_credential(self.default_model.clone());
        };
        let blob = blob.trim();

        let decoders: [&dyn BlobDecoder; 2] = [&RawJsonDecoder, &Base64JsonDecoder];
        let stored = decoders.iter().find_map(|decoder| {
            let decoded = decoder.decode(blob);
            if decoded.is_some() {
                debug!("Configuración IA decodificada como {}", decoder.name());
            }
            decoded
        });

        let Some(stored) = stored else {
            warn!("Configuración IA ilegible; se continúa sin credencial");
            return AiConfiguration::without_credential(self.default_model.clone());
        };

        let api_key = stored
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .and_then(unwrap_encoded_key);
        let model = stored
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());

        AiConfiguration { api_key, model }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "gpt-4o-mini";

    fn load(blob: Option<&str>) -> AiConfiguration {
        AiConfigLoader::new(Box::new(StaticConfigSource(blob.map(str::to_string))), MODEL).load()
    }

    #[test]
    fn test_plain_json_blob() {
        let cfg = load(Some(r#"{"apiKey":"sk-abc123","model":"gpt-4o"}"#));
        assert_eq!(cfg.api_key.as_deref(), Some("sk-abc123"));
        assert_eq!(cfg.model, "gpt-4o");
    }

    #[test]
    fn test_base64_wrapped_json_blob() {
        let blob = STANDARD.encode(r#"{"apiKey":"sk-abc123"}"#);
        let cfg = load(Some(&blob));
        assert_eq!(cfg.api_key.as_deref(), Some("sk-abc123"));
        assert_eq!(cfg.model, MODEL);
    }

    #[test]
    fn test_base64_wrapped_key_field() {
        let inner = STANDARD.encode("sk-segreta");
        assert!(inner.starts_with(ENCODED_KEY_PREFIX));
        let cfg = load(Some(&format!(r#"{{"apiKey":"{inner}","model":"gpt-4o"}}"#)));
        assert_eq!(cfg.api_key.as_deref(), Some("sk-segreta"));

        // ambas capas a la vez
        let outer = STANDARD.encode(format!(r#"{{"apiKey":"{inner}"}}"#));
        assert_eq!(load(Some(&outer)).api_key.as_deref(), Some("sk-segreta"));
    }

    #[test]
    fn test_missing_or_garbage_blob_means_no_credential() {
        for blob in [None, Some(""), Some("%%%non-base64%%%"), Some("{rotto"), Some("bm90IGpzb24=")] {
            let cfg = load(blob);
            assert_eq!(cfg.api_key, None, "blob: {blob:?}");
            assert_eq!(cfg.model, MODEL);
        }
    }

    #[test]
    fn test_empty_key_and_model_fall_back() {
        let cfg = load(Some(r#"{"apiKey":"  ","model":""}"#));
        assert_eq!(cfg, AiConfiguration::without_credential(MODEL));
    }

    #[test]
    fn test_undecodable_inner_key_is_dropped() {
        let cfg = load(Some(r#"{"apiKey":"c2st!!!"}"#));
        assert_eq!(cfg.api_key, None);
    }

    #[test]
    fn test_file_source_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = FileConfigSource::new(dir.path().join("ai_config.json"));
        assert!(source.load().is_none());
    }
}
