use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    ai::AiClient,
    analysis::AnalysisService,
    config::AppConfig,
    documents::{DocumentError, DocumentGenerator},
    llm::CompletionBackend,
    repository::FilingRepository,
    session_store::SessionStore,
    storage::ObjectStore,
    uploads::UploadManager,
    wizard::WizardService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repository: Arc<dyn FilingRepository>,
    pub uploads: UploadManager,
    pub ai: AiClient,
    pub analysis: AnalysisService,
    pub wizard: Arc<WizardService>,
    pub documents: Arc<DocumentGenerator>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub message: String,
    /// "neo4j" o "memory".
    pub repository: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neo4j_browser_url: Option<String>,
}

/// Dependencias externas con las que se construye el estado.
pub struct Backends {
    pub repository: Arc<dyn FilingRepository>,
    pub objects: Arc<dyn ObjectStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub completion: Arc<dyn CompletionBackend>,
}

impl AppState {
    /// Cablea los servicios. Devuelve también el receptor de la señal de apagado.
    pub fn new(
        config: AppConfig,
        backends: Backends,
        status: Status,
    ) -> Result<(Self, oneshot::Receiver<()>), DocumentError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let ai = AiClient::new(backends.completion, config.llm.timeout);
        let uploads = UploadManager::new(backends.repository.clone(), backends.objects);
        let analysis = AnalysisService::new(backends.repository.clone(), uploads.clone(), ai.clone());
        let wizard = WizardService::new(backends.sessions, backends.repository.clone());

        let state = Self {
            config,
            repository: backends.repository,
            uploads,
            ai,
            analysis,
            wizard: Arc::new(wizard),
            documents: Arc::new(DocumentGenerator::new()?),
            status: Arc::new(Mutex::new(status)),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        Ok((state, shutdown_rx))
    }
}
