//! Motor de decisión de enrutamiento.
//!
//! Flujo por fichero, estrictamente secuencial:
//!   1. Firma del fichero (análisis local).
//!   2. Patrón aprendido: si existe con confianza > 0.9, gana siempre.
//!   3. IA vía proxy, si hay credencial (local o del entorno).
//!   4. Reglas por extensión y palabras clave, que nunca fallan.
//!
//! Sin credencial, o si la IA falla o agota el tiempo, se baja a reglas.
//! Sólo una plantilla desconocida se devuelve como error.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analyzer;
use crate::credentials::AiConfigLoader;
use crate::error::{Result, RouterError};
use crate::models::{AiConfiguration, FileSignature, FileUpload, RoutingSuggestion};
use crate::patterns::PatternStore;
use crate::proxy::AiProxy;
use crate::rules;
use crate::templates::TemplateName;
use crate::validator::{self, AiRoutingAnswer};

pub const LEARNED_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Learned,
    Ai,
}

const PRIORITY_TIERS: [Tier; 2] = [Tier::Learned, Tier::Ai];

pub struct DocumentRouter {
    patterns: PatternStore,
    config_loader: AiConfigLoader,
    ai_config: RwLock<Option<AiConfiguration>>,
    proxy: Arc<dyn AiProxy>,
    ai_permits: Semaphore,
    ai_timeout: Duration,
}

impl DocumentRouter {
    pub fn new(
        patterns: PatternStore,
        config_loader: AiConfigLoader,
        proxy: Arc<dyn AiProxy>,
        ai_timeout: Duration,
        ai_max_concurrency: usize,
    ) -> Self {
        Self {
            patterns,
            config_loader,
            ai_config: RwLock::new(None),
            proxy,
            ai_permits: Semaphore::new(ai_max_concurrency.max(1)),
            ai_timeout,
        }
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    /// Configuración IA activa; se carga la primera vez que se necesita.
    pub fn ai_configuration(&self) -> AiConfiguration {
        if let Some(cfg) = self.ai_config.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return cfg.clone();
        }
        self.reload_configuration()
    }

    /// Vuelve a leer el blob de configuración persistido.
    pub fn reload_configuration(&self) -> AiConfiguration {
        let cfg = self.config_loader.load();
        info!(
            "Configuración IA cargada (modelo: {}, credencial local: {})",
            cfg.model,
            cfg.api_key.is_some()
        );
        *self.ai_config.write().unwrap_or_else(|e| e.into_inner()) = Some(cfg.clone());
        cfg
    }

    /// Enruta un fichero dentro de la plantilla indicada por nombre.
    pub async fn route(&self, file: &FileUpload, template: &str) -> Result<RoutingSuggestion> {
        let template: TemplateName = template.parse()?;
        Ok(self.route_in(file, template).await)
    }

    /// Enruta varios ficheros conservando el orden de entrada.
    pub async fn route_many(
        &self,
        files: &[FileUpload],
        template: &str,
    ) -> Result<Vec<RoutingSuggestion>> {
        let template: TemplateName = template.parse()?;
        let concurrency = self.ai_permits.available_permits().max(1);
        // Futuros ya en caja: el closure de `map` no es `Send` para axum.
        let pending: Vec<_> = files
            .iter()
            .map(|file| self.route_in(file, template).boxed())
            .collect();
        let results = stream::iter(pending)
            .buffered(concurrency)
            .collect()
            .await;
        Ok(results)
    }

    pub async fn route_in(&self, file: &FileUpload, template: TemplateName) -> RoutingSuggestion {
        let span = info_span!(
            "route",
            request_id = %Uuid::new_v4(),
            file = %file.file_name,
            template = %template
        );
        async move {
            let signature = analyzer::analyze(file);

            for tier in PRIORITY_TIERS {
                let outcome = match tier {
                    Tier::Learned => self.try_learned(&signature, template),
                    Tier::Ai => self.try_ai(&signature, template).await,
                };
                if let Some(suggestion) = outcome {
                    info!(
                        "Destino {} ({}, confianza {:.2})",
                        suggestion.suggested_path, suggestion.method, suggestion.confidence
                    );
                    return suggestion;
                }
            }

            let suggestion = rules::classify(&signature, template);
            info!(
                "Destino {} (rules, confianza {:.2})",
                suggestion.suggested_path, suggestion.confidence
            );
            suggestion
        }
        .instrument(span)
        .await
    }

    /// Registra la carpeta correcta para este tipo de fichero.
    pub fn learn_from_correction(&self, file: &FileUpload, actual_path: &str) -> Result<String> {
        let path = validator::normalize_path(actual_path);
        if path.is_empty() {
            return Err(RouterError::InvalidCorrection(actual_path.to_string()));
        }
        self.patterns.record_correction(file, &path)
    }

    fn try_learned(&self, signature: &FileSignature, template: TemplateName) -> Option<RoutingSuggestion> {
        let learned = self.patterns.lookup(signature)?;
        if learned.confidence <= LEARNED_THRESHOLD {
            return None;
        }
        if !template.contains(&learned.suggested_path) {
            debug!(
                "Patrón aprendido '{}' no pertenece a {}; se ignora",
                learned.suggested_path, template
            );
            return None;
        }
        Some(learned)
    }

    /// Prueba la credencial activa contra el proxy sin clasificar nada.
    pub async fn test_ai_connection(&self) -> bool {
        match self.resolve_credential().await {
            Ok((api_key, model)) => self.proxy.test(&api_key, &model).await,
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }

    async fn resolve_credential(&self) -> Result<(String, String)> {
        let cfg = self.ai_configuration();
        if let Some(key) = cfg.api_key {
            return Ok((key, cfg.model));
        }
        let key = self
            .proxy
            .environment_api_key()
            .await
            .ok_or(RouterError::NoCredential)?;
        debug!("Usando credencial IA del entorno del servidor");
        Ok((key, cfg.model))
    }

    async fn try_ai(&self, signature: &FileSignature, template: TemplateName) -> Option<RoutingSuggestion> {
        let (api_key, model) = match self.resolve_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                debug!("{}; se pasa a reglas", e);
                return None;
            }
        };

        match self.call_ai(signature, template, &api_key, &model).await {
            Ok(raw) => Some(validator::validate_ai_response(&raw, template)),
            Err(e) => {
                warn!("Clasificación IA fallida, se usan reglas: {}", e);
                None
            }
        }
    }

    async fn call_ai(
        &self,
        signature: &FileSignature,
        template: TemplateName,
        api_key: &str,
        model: &str,
    ) -> Result<String> {
        let prompt = build_prompt(signature, template);
        let _permit = self
            .ai_permits
            .acquire()
            .await
            .map_err(|e| RouterError::Proxy(e.to_string()))?;

        tokio::time::timeout(self.ai_timeout, self.proxy.classify(&prompt, api_key, model))
            .await
            .map_err(|_| RouterError::Timeout(self.ai_timeout.as_secs()))?
    }
}

/// Prompt de clasificación: firma, estructura, lista exacta y formato de salida.
pub fn build_prompt(signature: &FileSignature, template: TemplateName) -> String {
    let folders = template
        .folders()
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(AiRoutingAnswer))
        .unwrap_or_default();
    let preview = signature
        .content_preview
        .as_deref()
        .map(|p| format!("\nAnteprima del contenuto:\n\"\"\"\n{p}\n\"\"\"\n"))
        .unwrap_or_default();

    format!(
        "Devi archiviare un file nella cartella corretta di una commessa (modello {template}).

File:
- Nome: {name}
- Tipo MIME: {mime}
- Estensione: {ext}
- Dimensione: {size} byte
{preview}
{structure}
Cartelle valide (usa SOLO uno di questi percorsi, scritto esattamente così):
{folders}

Rispondi con un unico oggetto JSON conforme a questo schema, senza altro testo:
{schema}

Regole:
- \"suggestedPath\" deve essere uno dei percorsi elencati, con la barra finale.
- \"confidence\" è un numero tra 0.0 e 1.0.
- \"reasoning\" è una frase breve in italiano.
- \"alternatives\" contiene al massimo 3 percorsi dello stesso elenco.",
        name = signature.file_name,
        mime = if signature.mime_type.is_empty() { "sconosciuto" } else { signature.mime_type.as_str() },
        ext = if signature.extension.is_empty() { "nessuna" } else { signature.extension.as_str() },
        size = signature.size_bytes,
        structure = template.structure_text(),
    )
}
