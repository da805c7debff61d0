//! Patrones aprendidos: firma de fichero → carpeta confirmada por el usuario.
//!
//! El almacén se apoya en un `PatternRepository` inyectado (fichero JSON en
//! producción, memoria en tests). Se relee en cada consulta y se escribe en
//! cada corrección; la última corrección sobre una misma clave gana.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::analyzer;
use crate::error::{Result, RouterError};
use crate::models::{FileSignature, FileUpload, RoutingMethod, RoutingSuggestion};

pub const LEARNED_CONFIDENCE: f64 = 0.95;
const MAX_KEYWORDS: usize = 3;
const MIN_KEYWORD_LEN: usize = 3;

/// Persistencia de los patrones como un único mapa clave→valor.
///
/// `load` debe tolerar blobs ausentes o corruptos devolviendo un mapa vacío.
pub trait PatternRepository: Send + Sync {
    fn load(&self) -> HashMap<String, String>;
    fn save(&self, patterns: &HashMap<String, String>) -> Result<()>;
}

/// Repositorio en un fichero JSON. Escritura atómica (tmp + rename).
pub struct JsonFilePatternRepository {
    path: PathBuf,
}

impl JsonFilePatternRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PatternRepository for JsonFilePatternRepository {
    fn load(&self) -> HashMap<String, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!("No se pudieron leer los patrones de {}: {}", self.path.display(), e);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Fichero de patrones corrupto ({}): {}. Se ignora.",
                    self.path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    fn save(&self, patterns: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(patterns)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            RouterError::Storage(format!(
                "No se pudo reemplazar {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

/// Repositorio en memoria para tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryPatternRepository {
    patterns: Mutex<HashMap<String, String>>,
    simulate_write_error: Mutex<bool>,
}

#[cfg(test)]
impl MemoryPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_simulate_write_error(&self, simulate: bool) {
        *self.simulate_write_error.lock().unwrap_or_else(|e| e.into_inner()) = simulate;
    }
}

#[cfg(test)]
impl PatternRepository for MemoryPatternRepository {
    fn load(&self) -> HashMap<String, String> {
        self.patterns.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, patterns: &HashMap<String, String>) -> Result<()> {
        if *self.simulate_write_error.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(RouterError::Storage("Error de escritura simulado".to_string()));
        }
        *self.patterns.lock().unwrap_or_else(|e| e.into_inner()) = patterns.clone();
        Ok(())
    }
}

pub struct PatternStore {
    repo: Arc<dyn PatternRepository>,
    // Serializa el ciclo leer-modificar-escribir de las correcciones.
    write_lock: Mutex<()>,
}

impl PatternStore {
    pub fn new(repo: Arc<dyn PatternRepository>) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// Clave determinista: `ext:tok1,tok2,tok3`.
    ///
    /// Los tokens salen del nombre sin extensión, en minúsculas, partidos por
    /// cualquier carácter no alfanumérico y con más de 3 caracteres. Dos
    /// ficheros con la misma extensión y las mismas palabras iniciales
    /// comparten clave a propósito.
    pub fn extract_pattern(signature: &FileSignature) -> String {
        let stem = Path::new(&signature.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let keywords: Vec<String> = stem
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() > MIN_KEYWORD_LEN)
            .take(MAX_KEYWORDS)
            .map(str::to_string)
            .collect();

        format!("{}:{}", signature.extension, keywords.join(","))
    }

    /// Busca la carpeta aprendida para esta firma.
    pub fn lookup(&self, signature: &FileSignature) -> Option<RoutingSuggestion> {
        let key = Self::extract_pattern(signature);
        let patterns = self.repo.load();
        let path = patterns.get(&key)?;
        debug!("Patrón aprendido encontrado: {} → {}", key, path);

        Some(RoutingSuggestion {
            suggested_path: path.clone(),
            confidence: LEARNED_CONFIDENCE,
            reasoning: format!(
                "Percorso appreso da una correzione precedente per file simili ({key})"
            ),
            method: RoutingMethod::Learned,
            alternatives: Vec::new(),
        })
    }

    /// Guarda (o sobrescribe) la carpeta confirmada para el fichero.
    pub fn record_correction(&self, file: &FileUpload, confirmed_path: &str) -> Result<String> {
        let signature = analyzer::analyze(&FileUpload::named(file.file_name.clone()));
        let key = Self::extract_pattern(&signature);

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut patterns = self.repo.load();
        if patterns.get(&key).map(String::as_str) == Some(confirmed_path) {
            debug!("Corrección ya registrada para {}", key);
            return Ok(key);
        }
        patterns.insert(key.clone(), confirmed_path.to_string());
        self.repo.save(&patterns)?;

        info!("Corrección aprendida: {} → {}", key, confirmed_path);
        Ok(key)
    }

    pub fn len(&self) -> usize {
        self.repo.load().len()
    }
}
