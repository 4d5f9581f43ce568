use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ip_filing_webapp::{
    api,
    app_state::{AppState, Backends, Status},
    config, llm, neo4j_client,
    repository::{FilingRepository, MemoryFilingRepository},
    session_store::FileSessionStore,
    storage::LocalObjectStore,
};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn run() -> Result<()> {
    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Repositorio de solicitudes: Neo4j si está configurado, si no en memoria
    let (repository, repository_kind, neo4j_browser_url) = match &cfg.neo4j {
        Some(neo4j) => {
            let repo = neo4j_client::connect_repository(neo4j).await?;
            let repo: Arc<dyn FilingRepository> = Arc::new(repo);
            (repo, "neo4j", Some(neo4j_client::browser_url(neo4j)))
        }
        None => {
            warn!("NEO4J_URI no configurado: las solicitudes se guardan sólo en memoria.");
            let repo: Arc<dyn FilingRepository> = Arc::new(MemoryFilingRepository::new());
            (repo, "memory", None)
        }
    };

    // 4. Almacenamiento de ficheros, sesiones y backend de IA
    tokio::fs::create_dir_all(&cfg.storage_dir)
        .await
        .with_context(|| format!("No se pudo crear {}", cfg.storage_dir.display()))?;
    let completion = llm::backend_from_config(&cfg.llm);
    info!(
        "Proveedor LLM: {:?} (modelo {})",
        cfg.llm.provider,
        completion.model()
    );

    let backends = Backends {
        repository,
        objects: Arc::new(LocalObjectStore::new(&cfg.storage_dir)),
        sessions: Arc::new(FileSessionStore::new(&cfg.session_dir)),
        completion,
    };
    let status = Status {
        message: "Servidor listo.".to_string(),
        repository: repository_kind.to_string(),
        model: cfg.llm.chat_model.clone(),
        neo4j_browser_url,
    };

    // 5. Crear estado compartido de la aplicación
    let (app_state, shutdown_rx) = AppState::new(cfg.clone(), backends, status)?;

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
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
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
