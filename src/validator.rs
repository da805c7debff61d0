//! Validación de la respuesta del modelo contra las carpetas de la plantilla.
//!
//! La respuesta es texto no confiable: se extrae el primer objeto `{...}`
//! equilibrado, se parsea y la ruta sugerida se reconduce siempre a una
//! carpeta real de la plantilla.

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{RoutingMethod, RoutingSuggestion};
use crate::templates::TemplateName;

pub const PARSE_FAILURE_CONFIDENCE: f64 = 0.5;
pub const CORRECTION_PENALTY: f64 = 0.8;
const MAX_ALTERNATIVES: usize = 3;
const MIN_TOKEN_LEN: usize = 2;

/// Forma exigida al modelo. También genera el JSON Schema del prompt.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AiRoutingAnswer {
    /// Una delle cartelle dell'elenco, con la barra finale.
    pub suggested_path: String,
    /// Certezza tra 0.0 e 1.0.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Motivazione breve in italiano.
    #[serde(default)]
    pub reasoning: String,
    /// Fino a tre cartelle alternative dello stesso elenco.
    #[serde(default)]
    pub alternatives: Vec<String>,
}

fn default_confidence() -> f64 {
    PARSE_FAILURE_CONFIDENCE
}

/// Primer objeto JSON equilibrado del texto, respetando cadenas y escapes.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normaliza separadores y garantiza exactamente una `/` final.
pub fn normalize_path(path: &str) -> String {
    let cleaned = path.trim().replace('\\', "/");
    let cleaned = cleaned.trim_matches('/');
    if cleaned.is_empty() {
        String::new()
    } else {
        format!("{cleaned}/")
    }
}

/// Carpeta más parecida a `suggested` dentro de `folders`.
///
/// Orden de preferencia: coincidencia exacta sin distinguir mayúsculas; mayor
/// número de tokens (`_` o `/`, más de 2 caracteres) contenidos en la carpeta;
/// a igualdad, la que comparte el índice numérico de primer nivel (`9_...`);
/// y a igualdad, la primera en el orden aplanado.
pub fn closest_folder<'a>(suggested: &str, folders: &'a [String]) -> Option<&'a str> {
    let upper = suggested.to_uppercase();
    if let Some(exact) = folders.iter().find(|f| f.to_uppercase() == upper) {
        return Some(exact.as_str());
    }

    let tokens: Vec<&str> = upper
        .split(['_', '/'])
        .filter(|t| t.chars().count() > MIN_TOKEN_LEN)
        .collect();
    let index = top_level_index(&upper);

    let mut best: Option<(&'a str, (usize, bool))> = None;
    for folder in folders {
        let folder_upper = folder.to_uppercase();
        let hits = tokens.iter().filter(|t| folder_upper.contains(*t)).count();
        let same_index = index.is_some() && top_level_index(&folder_upper) == index;
        let score = (hits, same_index);
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((folder.as_str(), score));
        }
    }
    best.map(|(folder, _)| folder)
}

fn top_level_index(path: &str) -> Option<&str> {
    let (prefix, _) = path.split_once('_')?;
    if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
        Some(prefix)
    } else {
        None
    }
}

fn parse_failure(template: TemplateName, detail: &str) -> RoutingSuggestion {
    warn!("Respuesta IA no interpretable ({}); se usa la carpeta por defecto", detail);
    RoutingSuggestion {
        suggested_path: template.safe_default().to_string(),
        confidence: PARSE_FAILURE_CONFIDENCE,
        reasoning: format!(
            "Risposta AI non interpretabile ({detail}): proposta la cartella predefinita {}",
            template.safe_default()
        ),
        method: RoutingMethod::Ai,
        alternatives: Vec::new(),
    }
}

/// Convierte la respuesta cruda del modelo en una sugerencia válida.
pub fn validate_ai_response(raw: &str, template: TemplateName) -> RoutingSuggestion {
    let Some(json) = extract_json_object(raw) else {
        return parse_failure(template, "nessun oggetto JSON");
    };
    let answer: AiRoutingAnswer = match serde_json::from_str(json) {
        Ok(answer) => answer,
        Err(e) => return parse_failure(template, &e.to_string()),
    };

    let folders = template.folders();
    let suggested = normalize_path(&answer.suggested_path);
    let confidence = if answer.confidence.is_finite() {
        answer.confidence.clamp(0.0, 1.0)
    } else {
        PARSE_FAILURE_CONFIDENCE
    };

    let (suggested_path, confidence, reasoning) = if template.contains(&suggested) {
        (suggested, confidence, answer.reasoning)
    } else {
        let corrected = closest_folder(&suggested, folders).unwrap_or(template.safe_default());
        let corrected = normalize_path(corrected);
        debug!("Ruta IA '{}' fuera de la plantilla; corregida a '{}'", suggested, corrected);
        let reasoning = format!(
            "{} [Percorso corretto: '{}' non esiste nel modello {}, sostituito con '{}']",
            answer.reasoning, answer.suggested_path, template, corrected
        );
        (corrected, confidence * CORRECTION_PENALTY, reasoning.trim().to_string())
    };

    let mut alternatives: Vec<String> = Vec::new();
    for alt in answer.alternatives.iter().map(|a| normalize_path(a)) {
        if template.contains(&alt) && alt != suggested_path && !alternatives.contains(&alt) {
            alternatives.push(alt);
        }
        if alternatives.len() == MAX_ALTERNATIVES {
            break;
        }
    }

    RoutingSuggestion {
        suggested_path,
        confidence,
        reasoning,
        method: RoutingMethod::Ai,
        alternatives,
    }
}
