use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Json, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{
    ai::ProxyEnvelope,
    analysis::{ApprovalEstimate, ComplianceReport, PriorArtReport, SubmissionAnalysis, TimelineEstimate},
    app_state::{AppState, Status},
    documents::{export_file_name, GeneratedDocuments},
    error::ApiError,
    llm::PromptKind,
    models::{FieldSet, FieldValue, FileCategory, Filing, FilingType, SupportingFile, MAX_FILE_SIZE_BYTES},
    uploads::UploadRequest,
    validation::{describe_steps, StepView},
    wizard::WizardSession,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct PromptPayload {
    prompt: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StartSessionPayload {
    session_id: Option<String>,
    owner: Option<String>,
}

/// Cambios de campos: un valor lo asigna, `null` lo borra.
pub type FieldsPayload = BTreeMap<String, Option<FieldValue>>;

#[derive(Deserialize)]
pub struct JumpPayload {
    step: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsQuery {
    session_id: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    // Margen sobre el límite de fichero para que el rechazo lo dé la validación.
    let upload_limit = (MAX_FILE_SIZE_BYTES as usize) * 2;

    Router::new()
        // Proxy de IA
        .route("/api/claude", post(proxy_handler))
        .route("/api/analyze", post(proxy_handler))
        // Asistente
        .route("/api/wizard/:filing_type/steps", get(steps_handler))
        .route("/api/wizard/:filing_type/sessions", post(start_session_handler))
        .route("/api/wizard/sessions/:session_id", get(get_session_handler))
        .route("/api/wizard/sessions/:session_id/fields", put(set_fields_handler))
        .route("/api/wizard/sessions/:session_id/next", post(next_handler))
        .route("/api/wizard/sessions/:session_id/previous", post(previous_handler))
        .route("/api/wizard/sessions/:session_id/jump", post(jump_handler))
        .route("/api/wizard/sessions/:session_id/submit", post(submit_handler))
        .route("/api/wizard/sessions/:session_id/documents", get(session_documents_handler))
        // Solicitudes y documentos
        .route("/api/filings/:id", get(get_filing_handler))
        .route("/api/filings/:id/documents", get(filing_documents_handler))
        .route("/api/filings/:id/documents/:name/export", get(export_document_handler))
        // Ficheros de soporte
        .route(
            "/api/filings/:id/files",
            post(upload_handler)
                .get(list_files_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/filings/:id/files/:file_id", delete(delete_file_handler))
        .route("/api/filings/:id/storage/sweep", post(sweep_orphans_handler))
        // Análisis
        .route("/api/filings/:id/compliance", post(compliance_handler))
        .route("/api/filings/:id/approval-chance", post(approval_handler))
        .route("/api/filings/:id/timeline", post(timeline_handler))
        .route("/api/filings/:id/prior-art", post(prior_art_handler))
        .route("/api/filings/:id/analysis", post(submission_analysis_handler))
        // Utilidades
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn parse_filing_type(raw: &str) -> Result<FilingType, ApiError> {
    FilingType::from_str(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

// --- Proxy de IA ---

#[axum::debug_handler]
async fn proxy_handler(
    State(state): State<AppState>,
    Json(payload): Json<PromptPayload>,
) -> ApiResult<ProxyEnvelope> {
    if payload.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("Prompt is required"));
    }
    let envelope = state
        .ai
        .proxy(PromptKind::Freeform, &payload.prompt)
        .await
        .map_err(ApiError::proxy)?;
    Ok(Json(envelope))
}

// --- Asistente ---

#[axum::debug_handler]
async fn steps_handler(
    State(state): State<AppState>,
    Path(filing_type): Path<String>,
    Query(query): Query<StepsQuery>,
) -> ApiResult<Vec<StepView>> {
    let filing_type = parse_filing_type(&filing_type)?;
    // Con sesión, los requisitos condicionales se evalúan con sus campos.
    let fields = match query.session_id {
        Some(session_id) => state.wizard.get(&session_id).await?.fields,
        None => FieldSet::new(),
    };
    Ok(Json(describe_steps(filing_type, &fields)))
}

#[axum::debug_handler]
async fn start_session_handler(
    State(state): State<AppState>,
    Path(filing_type): Path<String>,
    Json(payload): Json<StartSessionPayload>,
) -> Result<(StatusCode, Json<WizardSession>), ApiError> {
    let filing_type = parse_filing_type(&filing_type)?;
    let session = state
        .wizard
        .start(filing_type, payload.session_id, payload.owner)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[axum::debug_handler]
async fn get_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<WizardSession> {
    Ok(Json(state.wizard.get(&session_id).await?))
}

#[axum::debug_handler]
async fn set_fields_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<FieldsPayload>, JsonRejection>,
) -> ApiResult<WizardSession> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(format!("Invalid field values: {}", e.body_text())))?;

    // `null` borra el campo.
    let mut fields = FieldSet::new();
    let mut unset = Vec::new();
    for (name, value) in payload {
        match value {
            Some(value) => fields.set(name, value),
            None => unset.push(name),
        }
    }
    Ok(Json(state.wizard.update_fields(&session_id, fields, &unset).await?))
}

#[axum::debug_handler]
async fn next_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<WizardSession> {
    Ok(Json(state.wizard.next(&session_id).await?))
}

#[axum::debug_handler]
async fn previous_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<WizardSession> {
    Ok(Json(state.wizard.previous(&session_id).await?))
}

#[axum::debug_handler]
async fn jump_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<JumpPayload>,
) -> ApiResult<WizardSession> {
    Ok(Json(state.wizard.jump_to(&session_id, payload.step).await?))
}

#[axum::debug_handler]
async fn submit_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Filing> {
    Ok(Json(state.wizard.submit(&session_id).await?))
}

#[axum::debug_handler]
async fn session_documents_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<GeneratedDocuments> {
    Ok(Json(state.wizard.documents(&session_id, &state.documents).await?))
}

// --- Solicitudes y documentos ---

#[axum::debug_handler]
async fn get_filing_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Filing> {
    Ok(Json(state.repository.get(id).await?))
}

#[axum::debug_handler]
async fn filing_documents_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<GeneratedDocuments> {
    let filing = state.repository.get(id).await?;
    Ok(Json(state.documents.generate(&filing)?))
}

#[axum::debug_handler]
async fn export_document_handler(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let filing = state.repository.get(id).await?;
    let text = state.documents.generate_one(&filing, &name)?;
    let html = state.documents.export_html(&name, &text)?;

    let headers = [
        (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export_file_name(&name)),
        ),
    ];
    Ok((headers, html))
}

// --- Ficheros de soporte ---

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SupportingFile>), ApiError> {
    let mut category: Option<FileCategory> = None;
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("category") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                if !raw.trim().is_empty() {
                    category = Some(FileCategory::from_str(&raw).map_err(ApiError::bad_request)?);
                }
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| ApiError::bad_request("A file is required"))?;
    let stored = state
        .uploads
        .upload(
            id,
            UploadRequest {
                category,
                file_name,
                content_type,
                bytes,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

#[axum::debug_handler]
async fn list_files_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<SupportingFile>> {
    Ok(Json(state.uploads.list(id).await?))
}

#[axum::debug_handler]
async fn delete_file_handler(
    State(state): State<AppState>,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state.uploads.delete(id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct SweepResult {
    removed: Vec<String>,
}

#[axum::debug_handler]
async fn sweep_orphans_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SweepResult> {
    let removed = state.uploads.sweep_orphans(id).await?;
    Ok(Json(SweepResult { removed }))
}

// --- Análisis ---

#[axum::debug_handler]
async fn compliance_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ComplianceReport> {
    Ok(Json(state.analysis.check_compliance(id).await?))
}

#[axum::debug_handler]
async fn approval_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApprovalEstimate> {
    Ok(Json(state.analysis.approval_chance(id).await?))
}

#[axum::debug_handler]
async fn timeline_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<TimelineEstimate> {
    Ok(Json(state.analysis.filing_timeline(id).await?))
}

#[axum::debug_handler]
async fn prior_art_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<PriorArtReport> {
    Ok(Json(state.analysis.prior_art_search(id).await?))
}

#[axum::debug_handler]
async fn submission_analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SubmissionAnalysis> {
    // La solicitud debe existir; el resto de fallos se informa por llamada.
    state.repository.get(id).await?;
    Ok(Json(state.analysis.submission_analysis(id).await))
}

// --- Estado y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let status = match state.status.lock() {
        Ok(status) => status.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    Json(status)
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut sender) = state.shutdown_sender.lock() {
        if let Some(sender) = sender.take() {
            let _ = sender.send(());
        }
    }
    (StatusCode::OK, Json(json!({ "message": "Shutting down" })))
}
