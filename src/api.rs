use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path as UrlPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    analyzer::PREVIEW_SIZE_CEILING,
    app_state::AppState,
    error::RouterError,
    models::{FileContent, FileUpload, RoutingSuggestion},
    proxy::{ClassifyRequest, ClassifyResponse, EnvKeyResponse, TestResponse},
    templates::{self, TemplateName},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnPayload {
    file_name: String,
    actual_path: String,
}

#[derive(Deserialize)]
pub struct RouteDirectoryPayload {
    path: String,
    template: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedFile {
    file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    relative_path: Option<String>,
    suggestion: RoutingSuggestion,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    learned_patterns: usize,
    local_credential: bool,
    model: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/templates/:name/folders", get(folders_handler))
        .route("/api/templates/:name/structure", get(structure_handler))
        // Sólo se conserva la cabecera de cada fichero; el tamaño no se limita.
        .route(
            "/api/route",
            post(route_handler).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/route/batch",
            post(route_batch_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/route/directory", post(route_directory_handler))
        .route("/api/route/learn", post(learn_handler))
        .route("/api/ai/config/reload", post(reload_config_handler))
        .route("/api/ai/config/test", post(config_test_handler))
        // Proxy IA: el propio servidor habla con el proveedor.
        .route("/api/ai/classify", post(classify_handler))
        .route("/api/ai/env-key", get(env_key_handler))
        .route("/api/ai/test", post(test_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

fn router_error(err: RouterError) -> ApiError {
    let status = match err {
        RouterError::UnknownTemplate(_) | RouterError::InvalidCorrection(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!("Error interno de enrutamiento: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}

fn join_error(err: tokio::task::JoinError) -> ApiError {
    error!("Tarea bloqueante abortada: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Tarea interna abortada" })),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() })))
}

// --- Handlers de plantillas ---

#[axum::debug_handler]
async fn folders_handler(UrlPath(name): UrlPath<String>) -> Result<Json<Vec<String>>, ApiError> {
    templates::available_folders(&name)
        .map(Json)
        .map_err(router_error)
}

#[axum::debug_handler]
async fn structure_handler(
    UrlPath(name): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let structure = templates::template_structure_text(&name).map_err(router_error)?;
    Ok(Json(json!({
        "template": name.to_uppercase(),
        "structure": structure,
    })))
}

// --- Handlers de enrutamiento ---

/// Lee un formulario multipart con un campo `template` y una o más partes `file`.
///
/// De cada fichero se guardan como mucho `PREVIEW_SIZE_CEILING` bytes; el resto
/// sólo se cuenta para `size_bytes`.
async fn read_upload_form(mut multipart: Multipart) -> Result<(String, Vec<FileUpload>), ApiError> {
    let mut template = None;
    let mut files = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Formulario multipart inválido: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("template") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Campo 'template' ilegible: {e}")))?;
                template = Some(value);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("senza_nome").to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let mut head = Vec::new();
                let mut size_bytes: u64 = 0;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| bad_request(format!("No se pudo leer '{file_name}': {e}")))?
                {
                    size_bytes += chunk.len() as u64;
                    let room = (PREVIEW_SIZE_CEILING as usize).saturating_sub(head.len());
                    head.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                files.push(FileUpload {
                    size_bytes,
                    ..FileUpload::in_memory(file_name, mime_type, head)
                });
            }
            _ => {}
        }
    }

    let template = template.ok_or_else(|| bad_request("Falta el campo 'template'."))?;
    if files.is_empty() {
        return Err(bad_request("No se ha enviado ningún fichero."));
    }
    Ok((template, files))
}

#[axum::debug_handler]
async fn route_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<RoutingSuggestion>, ApiError> {
    let (template, files) = read_upload_form(multipart).await?;
    if files.len() > 1 {
        return Err(bad_request("Use /api/route/batch para varios ficheros."));
    }
    let suggestion = state
        .router
        .route(&files[0], &template)
        .await
        .map_err(router_error)?;
    Ok(Json(suggestion))
}

#[axum::debug_handler]
async fn route_batch_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Vec<RoutedFile>>, ApiError> {
    let (template, files) = read_upload_form(multipart).await?;
    let suggestions = state
        .router
        .route_many(&files, &template)
        .await
        .map_err(router_error)?;

    let routed = files
        .into_iter()
        .zip(suggestions)
        .map(|(file, suggestion)| RoutedFile {
            file_name: file.file_name,
            relative_path: None,
            suggestion,
        })
        .collect();
    Ok(Json(routed))
}

/// Propone destino para cada fichero de un directorio local (p. ej. una consegna).
#[axum::debug_handler]
async fn route_directory_handler(
    State(state): State<AppState>,
    Json(payload): Json<RouteDirectoryPayload>,
) -> Result<Json<Vec<RoutedFile>>, ApiError> {
    let root = PathBuf::from(&payload.path);
    if !root.is_dir() {
        return Err(bad_request("La ruta proporcionada no es un directorio válido."));
    }
    // Falla antes de recorrer nada si la plantilla no existe.
    let template: TemplateName = payload.template.parse().map_err(router_error)?;

    let walk_root = root.clone();
    let (uploads, relative_paths) =
        tokio::task::spawn_blocking(move || collect_directory(&walk_root))
            .await
            .map_err(join_error)?;
    info!(
        "Enrutando {} ficheros de {} con la plantilla {}",
        uploads.len(),
        root.display(),
        template
    );

    let suggestions = state
        .router
        .route_many(&uploads, template.as_str())
        .await
        .map_err(router_error)?;

    let routed = uploads
        .into_iter()
        .zip(relative_paths)
        .zip(suggestions)
        .map(|((file, relative), suggestion)| RoutedFile {
            file_name: file.file_name,
            relative_path: Some(relative),
            suggestion,
        })
        .collect();
    Ok(Json(routed))
}

fn collect_directory(root: &Path) -> (Vec<FileUpload>, Vec<String>) {
    let mut uploads = Vec::new();
    let mut relative_paths = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Saltando {}: {}", path.display(), e);
                continue;
            }
        };
        let file_name = entry.file_name().to_string_lossy().to_string();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        uploads.push(FileUpload {
            file_name,
            mime_type: String::new(),
            size_bytes,
            content: FileContent::OnDisk(path.to_path_buf()),
        });
        relative_paths.push(relative);
    }
    (uploads, relative_paths)
}

#[axum::debug_handler]
async fn learn_handler(
    State(state): State<AppState>,
    Json(payload): Json<LearnPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let router = Arc::clone(&state.router);
    // Lee y reescribe el fichero de patrones.
    let pattern = tokio::task::spawn_blocking(move || {
        let file = FileUpload::named(payload.file_name);
        router.learn_from_correction(&file, &payload.actual_path)
    })
    .await
    .map_err(join_error)?
    .map_err(router_error)?;
    Ok((StatusCode::OK, Json(json!({ "pattern": pattern }))))
}

#[axum::debug_handler]
async fn reload_config_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cfg = state.router.reload_configuration();
    Json(json!({ "model": cfg.model, "hasApiKey": cfg.api_key.is_some() }))
}

/// Comprueba la credencial activa (local o del entorno) contra el proxy IA.
#[axum::debug_handler]
async fn config_test_handler(State(state): State<AppState>) -> Json<TestResponse> {
    Json(TestResponse {
        ok: state.router.test_ai_connection().await,
    })
}

// --- Handlers del proxy IA ---

#[axum::debug_handler]
async fn classify_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    match state
        .llm_manager
        .complete(&payload.api_key, &payload.model, &payload.prompt)
        .await
    {
        Ok(content) => Ok(Json(ClassifyResponse { content })),
        Err(e) => {
            error!("Error del proveedor LLM: {}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "message": e.to_string() })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn env_key_handler(State(state): State<AppState>) -> Json<EnvKeyResponse> {
    Json(EnvKeyResponse {
        api_key: state.config.openai_api_key.clone(),
    })
}

#[axum::debug_handler]
async fn test_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClassifyRequest>,
) -> Json<TestResponse> {
    let ok = match state.llm_manager.probe(&payload.api_key, &payload.model).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Prueba de credencial IA fallida: {}", e);
            false
        }
    };
    Json(TestResponse { ok })
}

// --- Estado y Apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let cfg = state.router.ai_configuration();
    Json(StatusResponse {
        learned_patterns: state.router.patterns().len(),
        local_credential: cfg.api_key.is_some(),
        model: cfg.model,
    })
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::credentials::{AiConfigLoader, StaticConfigSource};
    use crate::error::Result as RouterResult;
    use crate::llm::LlmManager;
    use crate::patterns::{MemoryPatternRepository, PatternStore};
    use crate::proxy::AiProxy;
    use crate::router::DocumentRouter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Sin red: ninguna credencial y clasificación siempre fallida.
    struct OfflineProxy;

    #[async_trait]
    impl AiProxy for OfflineProxy {
        async fn classify(&self, _: &str, _: &str, _: &str) -> RouterResult<String> {
            Err(RouterError::Proxy("sin red".to_string()))
        }
        async fn environment_api_key(&self) -> Option<String> {
            None
        }
        async fn test(&self, _: &str, _: &str) -> bool {
            false
        }
    }

    async fn spawn_app(env_key: Option<&str>) -> (String, oneshot::Receiver<()>) {
        let mut vars = HashMap::new();
        vars.insert("DATA_DIR", "/tmp/commesse-router-test".to_string());
        if let Some(key) = env_key {
            vars.insert("OPENAI_API_KEY", key.to_string());
        }
        let config = AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        let router = DocumentRouter::new(
            PatternStore::new(Arc::new(MemoryPatternRepository::new())),
            AiConfigLoader::new(Box::new(StaticConfigSource(None)), "gpt-4o-mini"),
            Arc::new(OfflineProxy),
            Duration::from_secs(1),
            2,
        );
        let (tx, rx) = oneshot::channel();
        let state = AppState {
            llm_manager: LlmManager::from_config(&config).unwrap(),
            config,
            router: Arc::new(router),
            shutdown_sender: Arc::new(Mutex::new(Some(tx))),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn test_folders_endpoint() {
        let (base, _rx) = spawn_app(None).await;
        let client = reqwest::Client::new();

        let folders: Vec<String> = client
            .get(format!("{base}/api/templates/BREVE/folders"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(folders, TemplateName::Breve.folders());

        let resp = client
            .get(format!("{base}/api/templates/INVALID/folders"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let structure: serde_json::Value = client
            .get(format!("{base}/api/templates/lungo/structure"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(structure["template"], "LUNGO");
        assert!(structure["structure"].as_str().unwrap().contains("9_PARCELLA"));
    }

    #[tokio::test]
    async fn test_route_then_learn_then_route_again() {
        let (base, _rx) = spawn_app(None).await;
        let client = reqwest::Client::new();

        let form = || {
            let part = reqwest::multipart::Part::bytes(vec![0u8; 64])
                .file_name("pianta_piano_terra.dwg")
                .mime_str("application/acad")
                .unwrap();
            reqwest::multipart::Form::new()
                .text("template", "LUNGO")
                .part("file", part)
        };

        let first: serde_json::Value = client
            .post(format!("{base}/api/route"))
            .multipart(form())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(first["method"], "rules");
        assert_eq!(first["suggestedPath"], "3_PROGETTO/ARC/");
        assert_eq!(first["confidence"], 0.8);

        let learned: serde_json::Value = client
            .post(format!("{base}/api/route/learn"))
            .json(&json!({ "fileName": "pianta_piano_terra.dwg", "actualPath": "3_PROGETTO/STR/" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(learned["pattern"], "dwg:pianta,piano,terra");

        let second: serde_json::Value = client
            .post(format!("{base}/api/route"))
            .multipart(form())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second["method"], "learned");
        assert_eq!(second["suggestedPath"], "3_PROGETTO/STR/");
        assert_eq!(second["confidence"], 0.95);
    }

    #[tokio::test]
    async fn test_route_without_template_field_is_rejected() {
        let (base, _rx) = spawn_app(None).await;
        let part = reqwest::multipart::Part::bytes(b"ciao".to_vec()).file_name("nota.txt");
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/route"))
            .multipart(reqwest::multipart::Form::new().part("file", part))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_route_batch_keeps_upload_order() {
        let (base, _rx) = spawn_app(None).await;
        let names = ["pianta_piano_terra.dwg", "fattura_cliente.pdf", "computo_metrico.xlsx"];
        let form = names.iter().fold(
            reqwest::multipart::Form::new().text("template", "LUNGO"),
            |form, name| {
                let part = reqwest::multipart::Part::bytes(vec![1u8; 32]).file_name(name.to_string());
                form.part("file", part)
            },
        );

        let routed: Vec<serde_json::Value> = reqwest::Client::new()
            .post(format!("{base}/api/route/batch"))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let returned: Vec<&str> = routed.iter().map(|r| r["fileName"].as_str().unwrap()).collect();
        assert_eq!(returned, names);
        let paths: Vec<&str> = routed
            .iter()
            .map(|r| r["suggestion"]["suggestedPath"].as_str().unwrap())
            .collect();
        assert_eq!(
            paths,
            ["3_PROGETTO/ARC/", "9_PARCELLA/", "5_COMPUTI/COMPUTO_METRICO/"]
        );
        for path in paths {
            assert!(TemplateName::Lungo.contains(path));
        }
    }

    #[tokio::test]
    async fn test_route_accepts_uploads_larger_than_axum_default_limit() {
        let (base, _rx) = spawn_app(None).await;
        let part = reqwest::multipart::Part::bytes(vec![0u8; 3 * 1024 * 1024])
            .file_name("pianta_piano_terra.dwg")
            .mime_str("application/acad")
            .unwrap();
        let form = reqwest::multipart::Form::new()
            .text("template", "LUNGO")
            .part("file", part);

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/route"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["method"], "rules");
        assert_eq!(body["suggestedPath"], "3_PROGETTO/ARC/");
        assert_eq!(body["confidence"], 0.8);
    }

    #[tokio::test]
    async fn test_config_test_endpoint_without_credential() {
        let (base, _rx) = spawn_app(None).await;
        let body: serde_json::Value = reqwest::Client::new()
            .post(format!("{base}/api/ai/config/test"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_route_directory_walks_local_folder() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("consegna")).unwrap();
        std::fs::write(dir.path().join("consegna").join("visura_catastale.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("IMG_0001.jpg"), [0xFFu8, 0xD8]).unwrap();

        let (base, _rx) = spawn_app(None).await;
        let routed: Vec<serde_json::Value> = reqwest::Client::new()
            .post(format!("{base}/api/route/directory"))
            .json(&json!({ "path": dir.path(), "template": "BREVE" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(routed.len(), 2);
        assert_eq!(routed[0]["relativePath"], "IMG_0001.jpg");
        assert_eq!(routed[0]["suggestion"]["suggestedPath"], "1_DOCUMENTI/FOTO/");
        assert_eq!(routed[1]["relativePath"], "consegna/visura_catastale.pdf");
        assert_eq!(routed[1]["suggestion"]["suggestedPath"], "1_DOCUMENTI/CATASTALI/");
    }

    #[tokio::test]
    async fn test_env_key_endpoint_and_shutdown() {
        let (base, rx) = spawn_app(Some("sk-server")).await;
        let client = reqwest::Client::new();

        let body: serde_json::Value = client
            .get(format!("{base}/api/ai/env-key"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["apiKey"], "sk-server");

        let resp = client.post(format!("{base}/api/shutdown")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_classify_endpoint_reports_message_on_failure() {
        let (base, _rx) = spawn_app(None).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/ai/classify"))
            .json(&json!({ "apiKey": "", "prompt": "ciao", "model": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("API key"));
    }
}
