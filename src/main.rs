// Módulos de la aplicación
mod analyzer;
mod api;
mod app_state;
mod config;
mod credentials;
mod error;
mod llm;
mod models;
mod patterns;
mod proxy;
mod router;
mod rules;
mod templates;
mod validator;

use crate::app_state::AppState;
use anyhow::Context;
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    info!("Datos de la aplicación en {}", cfg.data_dir.display());

    // 3. Montar el núcleo de enrutamiento
    let patterns = patterns::PatternStore::new(Arc::new(
        patterns::JsonFilePatternRepository::new(&cfg.patterns_file),
    ));
    info!("{} patrones aprendidos cargados.", patterns.len());

    let config_loader = credentials::AiConfigLoader::new(
        Box::new(credentials::FileConfigSource::new(&cfg.ai_config_file)),
        cfg.llm_chat_model.clone(),
    );
    let ai_proxy = proxy::HttpAiProxy::new(cfg.ai_proxy_url.clone(), cfg.ai_timeout)
        .context("Error creando el cliente del proxy IA")?;

    let document_router = router::DocumentRouter::new(
        patterns,
        config_loader,
        Arc::new(ai_proxy),
        cfg.ai_timeout,
        cfg.ai_max_concurrency,
    );

    // 4. Inicializar gestor de LLMs (lado servidor del proxy IA)
    let llm_manager =
        llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        router: Arc::new(document_router),
        llm_manager,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error sirviendo la API")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
