use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, llm::LlmManager, router::DocumentRouter};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub router: Arc<DocumentRouter>,
    pub llm_manager: LlmManager,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
