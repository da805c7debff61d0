//! Modelos de dominio (ficheros a enrutar, firmas y sugerencias de carpeta).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Contenido disponible de un fichero candidato.
///
/// Los ficheros subidos por HTTP llegan en memoria; los de un directorio local
/// se leen bajo demanda desde disco (sólo hasta el límite de previsualización).
#[derive(Debug, Clone, Default)]
pub enum FileContent {
    #[default]
    None,
    InMemory(Vec<u8>),
    OnDisk(PathBuf),
}

/// Un fichero que el usuario quiere colocar en una plantilla de commessa.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    /// Tipo MIME declarado por el cliente (puede venir vacío).
    pub mime_type: String,
    pub size_bytes: u64,
    pub content: FileContent,
}

impl FileUpload {
    /// Fichero sin contenido: basta para aprender correcciones o aplicar reglas.
    pub fn named(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: String::new(),
            size_bytes: 0,
            content: FileContent::None,
        }
    }

    pub fn in_memory(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            content: FileContent::InMemory(bytes),
        }
    }
}

/// Firma estructural derivada de un fichero. Efímera, nunca se persiste.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSignature {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Extensión en minúsculas, sin punto.
    pub extension: String,
    pub content_preview: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMethod {
    Learned,
    Ai,
    Rules,
}

impl std::fmt::Display for RoutingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RoutingMethod::Learned => "learned",
            RoutingMethod::Ai => "ai",
            RoutingMethod::Rules => "rules",
        };
        f.write_str(label)
    }
}

/// Resultado de una decisión de enrutamiento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSuggestion {
    /// Siempre termina en `/` y pertenece a la plantilla activa.
    pub suggested_path: String,
    pub confidence: f64,
    pub reasoning: String,
    pub method: RoutingMethod,
    pub alternatives: Vec<String>,
}

/// Credencial IA resuelta desde la configuración persistida.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiConfiguration {
    pub api_key: Option<String>,
    pub model: String,
}

impl AiConfiguration {
    pub fn without_credential(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
        }
    }
}
