//! Traducción de los errores de dominio a respuestas HTTP `{ "error": ... }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::analysis::AnalysisError;
use crate::documents::DocumentError;
use crate::llm::AiError;
use crate::repository::RepositoryError;
use crate::session_store::SessionStoreError;
use crate::storage::StorageError;
use crate::uploads::UploadError;
use crate::validation::ValidationErrors;
use crate::wizard::WizardError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub field_errors: Option<ValidationErrors>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field_errors: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("Error interno: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Fallo del proveedor en la ruta de proxy directa (siempre 500).
    pub fn proxy(e: AiError) -> Self {
        error!("Error del proxy de IA: {}", e.detail());
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.field_errors {
            Some(field_errors) => json!({ "error": self.message, "fieldErrors": field_errors }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(_) | RepositoryError::FileNotFound(_) => {
                Self::not_found(e.to_string())
            }
            RepositoryError::FilingLocked(_) | RepositoryError::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            RepositoryError::Database(_) | RepositoryError::Serialization(_) => {
                Self::internal(e.to_string())
            }
        }
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(e: SessionStoreError) -> Self {
        match e {
            SessionStoreError::InvalidKey(_) => Self::bad_request(e.to_string()),
            SessionStoreError::Io(_) | SessionStoreError::Serialization(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => Self::not_found(e.to_string()),
            StorageError::InvalidPath(_) | StorageError::Io(_) => Self::internal(e.to_string()),
        }
    }
}

/// En los orquestadores cualquier fallo de IA es un 502.
impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        error!("Error de IA: {}", e.detail());
        let status = match e {
            AiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AiError::Upstream(_) | AiError::InvalidFormat(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Ai(ai) => ai.into(),
            AnalysisError::InvalidComplianceFormat(ref detail) => {
                error!("Análisis de cumplimiento inválido: {}", detail);
                Self::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
            AnalysisError::PatentOnly => Self::bad_request(e.to_string()),
            AnalysisError::Repository(repo) => repo.into(),
        }
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::UnknownDocument(_) => Self::not_found(e.to_string()),
            DocumentError::Template(_) | DocumentError::Render(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::TooLarge { .. } => Self::new(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
            UploadError::Repository(repo) => repo.into(),
            UploadError::Storage(storage) => storage.into(),
            _ => Self::bad_request(e.to_string()),
        }
    }
}

impl From<WizardError> for ApiError {
    fn from(e: WizardError) -> Self {
        match e {
            WizardError::Validation(errors) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: "Please correct the highlighted fields before continuing".to_string(),
                field_errors: Some(errors),
            },
            WizardError::SessionNotFound(_) => Self::not_found(e.to_string()),
            WizardError::TypeMismatch { .. } | WizardError::NotAtTerminalStep => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            WizardError::StepOutOfRange(_) | WizardError::CannotSkipAhead { .. } => {
                Self::bad_request(e.to_string())
            }
            WizardError::Store(store) => store.into(),
            WizardError::Repository(repo) => repo.into(),
            WizardError::Documents(docs) => docs.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        assert_eq!(ApiError::from(RepositoryError::NotFound(Uuid::nil())).status, StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(UploadError::TooLarge { size: 11 << 20 }).status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::from(UploadError::MissingCategory).status, StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(AnalysisError::InvalidComplianceFormat("x".into())).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::from(AiError::Upstream("x".into())).message, "API error");
        assert_eq!(
            ApiError::proxy(AiError::Upstream("x".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::from(WizardError::NotAtTerminalStep).status, StatusCode::CONFLICT);
    }

    #[test]
    fn validation_errors_carry_field_map() {
        let err = ApiError::from(WizardError::Validation(ValidationErrors::default()));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.field_errors.is_some());
    }
}
