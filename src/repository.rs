//! Persistencia de solicitudes y metadatos de ficheros de soporte.
//!
//! `FilingRepository` es la costura hacia la base de datos. La implementación
//! Neo4j vive en `neo4j_client`; aquí está la implementación en memoria que se
//! usa cuando no hay base de datos configurada y en los tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{FieldSet, Filing, FilingStatus, SupportingFile};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Filing not found: {0}")]
    NotFound(Uuid),
    #[error("Supporting file not found: {0}")]
    FileNotFound(Uuid),
    #[error("Filing {0} has already been submitted")]
    FilingLocked(Uuid),
    #[error("Filing already exists: {0}")]
    AlreadyExists(Uuid),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait FilingRepository: Send + Sync {
    async fn create(&self, filing: &Filing) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Filing, RepositoryError>;

    /// Sustituye el conjunto de campos de un borrador.
    /// Falla con `FilingLocked` si la solicitud ya se presentó.
    async fn update_fields(&self, id: Uuid, fields: &FieldSet) -> Result<Filing, RepositoryError>;

    /// Guarda los campos finales y marca la solicitud como presentada.
    async fn mark_submitted(&self, id: Uuid, fields: &FieldSet) -> Result<Filing, RepositoryError>;

    async fn add_file(&self, file: &SupportingFile) -> Result<(), RepositoryError>;

    async fn list_files(&self, filing_id: Uuid) -> Result<Vec<SupportingFile>, RepositoryError>;

    async fn get_file(&self, filing_id: Uuid, file_id: Uuid) -> Result<SupportingFile, RepositoryError>;

    async fn delete_file(&self, filing_id: Uuid, file_id: Uuid) -> Result<(), RepositoryError>;
}

#[derive(Default)]
pub struct MemoryFilingRepository {
    filings: RwLock<HashMap<Uuid, Filing>>,
    files: RwLock<HashMap<Uuid, SupportingFile>>,
}

impl MemoryFilingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FilingRepository for MemoryFilingRepository {
    async fn create(&self, filing: &Filing) -> Result<(), RepositoryError> {
        let mut filings = self.filings.write().await;
        if filings.contains_key(&filing.id) {
            return Err(RepositoryError::AlreadyExists(filing.id));
        }
        filings.insert(filing.id, filing.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Filing, RepositoryError> {
        self.filings
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn update_fields(&self, id: Uuid, fields: &FieldSet) -> Result<Filing, RepositoryError> {
        let mut filings = self.filings.write().await;
        let filing = filings.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if filing.is_submitted() {
            return Err(RepositoryError::FilingLocked(id));
        }
        filing.fields = fields.clone();
        filing.updated_at = Utc::now();
        Ok(filing.clone())
    }

    async fn mark_submitted(&self, id: Uuid, fields: &FieldSet) -> Result<Filing, RepositoryError> {
        let mut filings = self.filings.write().await;
        let filing = filings.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if filing.is_submitted() {
            return Err(RepositoryError::FilingLocked(id));
        }
        let now = Utc::now();
        filing.fields = fields.clone();
        filing.status = FilingStatus::Submitted;
        filing.updated_at = now;
        filing.submitted_at = Some(now);
        Ok(filing.clone())
    }

    async fn add_file(&self, file: &SupportingFile) -> Result<(), RepositoryError> {
        if !self.filings.read().await.contains_key(&file.filing_id) {
            return Err(RepositoryError::NotFound(file.filing_id));
        }
        self.files.write().await.insert(file.id, file.clone());
        Ok(())
    }

    async fn list_files(&self, filing_id: Uuid) -> Result<Vec<SupportingFile>, RepositoryError> {
        let mut files: Vec<SupportingFile> = self
            .files
            .read()
            .await
            .values()
            .filter(|file| file.filing_id == filing_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.file_name.cmp(&b.file_name)));
        Ok(files)
    }

    async fn get_file(&self, filing_id: Uuid, file_id: Uuid) -> Result<SupportingFile, RepositoryError> {
        self.files
            .read()
            .await
            .get(&file_id)
            .filter(|file| file.filing_id == filing_id)
            .cloned()
            .ok_or(RepositoryError::FileNotFound(file_id))
    }

    async fn delete_file(&self, filing_id: Uuid, file_id: Uuid) -> Result<(), RepositoryError> {
        let mut files = self.files.write().await;
        match files.get(&file_id) {
            Some(file) if file.filing_id == filing_id => {
                files.remove(&file_id);
                Ok(())
            }
            _ => Err(RepositoryError::FileNotFound(file_id)),
        }
    }
}
