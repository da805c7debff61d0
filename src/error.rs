//! Errores del núcleo de enrutamiento.
//!
//! Sólo `UnknownTemplate` llega al llamador de `DocumentRouter::route`; el resto
//! se absorbe en los niveles inferiores (reglas, valores por defecto).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Plantilla de carpetas desconocida: {0}")]
    UnknownTemplate(String),

    #[error("Ruta de corrección inválida: '{0}'")]
    InvalidCorrection(String),

    #[error("Error de almacenamiento: {0}")]
    Storage(String),

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Error del proxy IA: {0}")]
    Proxy(String),

    #[error("Tiempo de espera agotado tras {0} s llamando al proxy IA")]
    Timeout(u64),

    #[error("No hay credencial IA disponible")]
    NoCredential,
}

impl From<reqwest::Error> for RouterError {
    fn from(err: reqwest::Error) -> Self {
        RouterError::Proxy(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
