//! Gestión de ficheros de soporte: categorías, validación (tipo MIME y tamaño),
//! almacenamiento del binario y registro de metadatos por solicitud.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use mime_guess::MimeGuess;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{FileCategory, FilingType, SupportingFile, MAX_FILE_SIZE_BYTES};
use crate::repository::{FilingRepository, RepositoryError};
use crate::storage::{ObjectStore, StorageError};
use crate::validation::{DEPOSIT_TYPES, DOCUMENT_TYPES, IMAGE_OR_PDF_TYPES, IMAGE_TYPES};

const OTHER_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Please select a category for this file")]
    MissingCategory,
    #[error("Category '{category}' is not available for {filing_type} filings")]
    CategoryNotAllowed {
        category: FileCategory,
        filing_type: FilingType,
    },
    #[error("File type {mime_type} is not allowed for {category}. Allowed types: {allowed}")]
    MimeNotAllowed {
        mime_type: String,
        category: FileCategory,
        allowed: String,
    },
    #[error("File size exceeds the 10MB limit")]
    TooLarge { size: u64 },
    #[error("File is empty")]
    Empty,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Categorías disponibles por tipo de solicitud.
pub fn categories_for(filing_type: FilingType) -> &'static [FileCategory] {
    use FileCategory::*;
    match filing_type {
        FilingType::Trademark => &[Specimen, Drawing, Declaration, Other],
        FilingType::Patent => &[Drawings, Specification, Declaration, PriorArt, Other],
        FilingType::Copyright => &[Deposit, Declaration, Other],
    }
}

pub fn allowed_mime_types(category: FileCategory) -> &'static [&'static str] {
    match category {
        FileCategory::Specimen | FileCategory::Drawings => IMAGE_OR_PDF_TYPES,
        FileCategory::Drawing => IMAGE_TYPES,
        FileCategory::Specification | FileCategory::Declaration | FileCategory::PriorArt => {
            DOCUMENT_TYPES
        }
        FileCategory::Deposit => DEPOSIT_TYPES,
        FileCategory::Other => OTHER_TYPES,
    }
}

/// Tipo MIME efectivo: el declarado por el cliente (sin parámetros) o, si no
/// hay uno útil, el deducido de la extensión.
pub fn resolve_mime_type(file_name: &str, content_type: Option<&str>) -> String {
    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    declared.unwrap_or_else(|| {
        MimeGuess::from_path(file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    })
}

/// Validación pura de una subida. Devuelve la categoría aceptada.
pub fn validate_upload(
    filing_type: FilingType,
    category: Option<FileCategory>,
    mime_type: &str,
    size: u64,
) -> Result<FileCategory, UploadError> {
    let category = category.ok_or(UploadError::MissingCategory)?;
    if !categories_for(filing_type).contains(&category) {
        return Err(UploadError::CategoryNotAllowed {
            category,
            filing_type,
        });
    }
    let allowed = allowed_mime_types(category);
    if !allowed.contains(&mime_type) {
        return Err(UploadError::MimeNotAllowed {
            mime_type: mime_type.to_string(),
            category,
            allowed: allowed.join(", "),
        });
    }
    if size == 0 {
        return Err(UploadError::Empty);
    }
    if size > MAX_FILE_SIZE_BYTES {
        return Err(UploadError::TooLarge { size });
    }
    Ok(category)
}

/// Nombre de fichero seguro para la ruta de almacenamiento.
fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub category: Option<FileCategory>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct UploadManager {
    repository: Arc<dyn FilingRepository>,
    store: Arc<dyn ObjectStore>,
}

impl UploadManager {
    pub fn new(repository: Arc<dyn FilingRepository>, store: Arc<dyn ObjectStore>) -> Self {
        Self { repository, store }
    }

    /// Valida y guarda un fichero: primero el binario, después los metadatos.
    pub async fn upload(&self, filing_id: Uuid, request: UploadRequest) -> Result<SupportingFile, UploadError> {
        let filing = self.repository.get(filing_id).await?;
        let mime_type = resolve_mime_type(&request.file_name, request.content_type.as_deref());
        let size = request.bytes.len() as u64;
        let category = validate_upload(filing.filing_type, request.category, &mime_type, size)?;

        let id = Uuid::new_v4();
        let storage_path = format!(
            "{filing_id}/{category}/{id}-{}",
            sanitize_file_name(&request.file_name)
        );
        self.store.put(&storage_path, &request.bytes).await?;

        let file = SupportingFile {
            id,
            filing_id,
            category,
            file_name: request.file_name,
            storage_path,
            size,
            mime_type,
            uploaded_at: Utc::now(),
        };

        if let Err(e) = self.repository.add_file(&file).await {
            // Sin metadatos el objeto queda huérfano; se intenta limpiar.
            if let Err(cleanup) = self.store.delete(&file.storage_path).await {
                warn!("No se pudo limpiar el objeto huérfano {}: {}", file.storage_path, cleanup);
            }
            return Err(e.into());
        }

        info!(
            "Fichero '{}' ({} bytes, {}) subido a la solicitud {} como {}",
            file.file_name, file.size, file.mime_type, filing_id, file.category
        );
        Ok(file)
    }

    pub async fn list(&self, filing_id: Uuid) -> Result<Vec<SupportingFile>, UploadError> {
        Ok(self.repository.list_files(filing_id).await?)
    }

    /// Borra el objeto y después el registro. No es transaccional: si falla el
    /// segundo paso, el registro queda apuntando a un objeto inexistente.
    pub async fn delete(&self, filing_id: Uuid, file_id: Uuid) -> Result<(), UploadError> {
        let file = self.repository.get_file(filing_id, file_id).await?;

        match self.store.delete(&file.storage_path).await {
            Ok(()) => {}
            Err(StorageError::NotFound(path)) => {
                warn!("El objeto {} ya no existía en el almacenamiento", path);
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.repository.delete_file(filing_id, file_id).await {
            error!(
                "Objeto {} borrado pero el registro {} sigue en la base de datos: {}",
                file.storage_path, file_id, e
            );
            return Err(e.into());
        }

        info!("Fichero {} eliminado de la solicitud {}", file_id, filing_id);
        Ok(())
    }

    /// Borra los objetos de la solicitud que no tienen registro de metadatos,
    /// restos de subidas o borrados interrumpidos. Una subida en curso sobre la
    /// misma solicitud puede perder su objeto, así que es una tarea de
    /// mantenimiento y no parte del flujo normal.
    pub async fn sweep_orphans(&self, filing_id: Uuid) -> Result<Vec<String>, UploadError> {
        self.repository.get(filing_id).await?;
        let known: HashSet<String> = self
            .repository
            .list_files(filing_id)
            .await?
            .into_iter()
            .map(|file| file.storage_path)
            .collect();

        let mut removed = Vec::new();
        for path in self.store.list(&filing_id.to_string()).await? {
            if known.contains(&path) {
                continue;
            }
            match self.store.delete(&path).await {
                Ok(()) | Err(StorageError::NotFound(_)) => removed.push(path),
                Err(e) => return Err(e.into()),
            }
        }

        if !removed.is_empty() {
            info!("{} objetos huérfanos eliminados de la solicitud {}", removed.len(), filing_id);
        }
        Ok(removed)
    }

    /// Extracto de texto de un fichero PDF o de texto plano, para los prompts.
    pub async fn text_excerpt(&self, file: &SupportingFile, max_chars: usize) -> Option<String> {
        let bytes = match self.store.get(&file.storage_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("No se pudo leer {}: {}", file.storage_path, e);
                return None;
            }
        };

        let text = match file.mime_type.as_str() {
            "text/plain" => String::from_utf8_lossy(&bytes).into_owned(),
            "application/pdf" => {
                let extracted =
                    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes)).await;
                match extracted {
                    Ok(Ok(text)) => text,
                    Ok(Err(e)) => {
                        warn!("No se pudo extraer texto del PDF {}: {}", file.file_name, e);
                        return None;
                    }
                    Err(e) => {
                        warn!("La extracción de texto de {} falló: {}", file.file_name, e);
                        return None;
                    }
                }
            }
            _ => return None,
        };

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return None;
        }
        Some(normalized.chars().take(max_chars).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Filing;
    use crate::repository::MemoryFilingRepository;
    use crate::storage::MemoryObjectStore;

    async fn manager_with_filing(filing_type: FilingType) -> (UploadManager, Arc<MemoryObjectStore>, Uuid) {
        let repository = Arc::new(MemoryFilingRepository::new());
        let store = Arc::new(MemoryObjectStore::new());
        let filing = Filing::new_draft(filing_type, None);
        repository.create(&filing).await.unwrap();
        (UploadManager::new(repository, store.clone()), store, filing.id)
    }

    fn request(category: Option<FileCategory>, name: &str, content_type: Option<&str>, size: usize) -> UploadRequest {
        UploadRequest {
            category,
            file_name: name.to_string(),
            content_type: content_type.map(str::to_string),
            bytes: vec![7u8; size],
        }
    }

    #[test]
    fn mime_type_falls_back_to_extension() {
        assert_eq!(resolve_mime_type("label.png", None), "image/png");
        assert_eq!(resolve_mime_type("label.png", Some("application/octet-stream")), "image/png");
        assert_eq!(resolve_mime_type("x", Some("Application/PDF; charset=binary")), "application/pdf");
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("../../etc/pass wd"), "pass_wd");
        assert_eq!(sanitize_file_name("C:\\docs\\spec.pdf"), "spec.pdf");
        assert_eq!(sanitize_file_name(".."), "file");
    }

    #[tokio::test]
    async fn upload_stores_object_under_filing_and_category() {
        let (manager, store, filing_id) = manager_with_filing(FilingType::Trademark).await;
        let file = manager
            .upload(filing_id, request(Some(FileCategory::Specimen), "label.png", Some("image/png"), 128))
            .await
            .unwrap();

        assert!(file.storage_path.starts_with(&format!("{filing_id}/specimen/")));
        assert_eq!(store.list(&filing_id.to_string()).await.unwrap(), vec![file.storage_path.clone()]);
        assert_eq!(manager.list(filing_id).await.unwrap(), vec![file]);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_not_listed() {
        let (manager, store, filing_id) = manager_with_filing(FilingType::Trademark).await;
        let size = MAX_FILE_SIZE_BYTES as usize + 1;
        let err = manager
            .upload(filing_id, request(Some(FileCategory::Specimen), "big.png", Some("image/png"), size))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert_eq!(err.to_string(), "File size exceeds the 10MB limit");
        assert!(manager.list(filing_id).await.unwrap().is_empty());
        assert!(store.list(&filing_id.to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mime_outside_category_allow_list_is_rejected() {
        let (manager, _, filing_id) = manager_with_filing(FilingType::Trademark).await;
        let err = manager
            .upload(filing_id, request(Some(FileCategory::Drawing), "drawing.pdf", Some("application/pdf"), 10))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MimeNotAllowed { .. }));
        assert!(manager.list(filing_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_or_foreign_category_is_rejected() {
        let (manager, _, filing_id) = manager_with_filing(FilingType::Patent).await;
        let err = manager
            .upload(filing_id, request(None, "a.pdf", None, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingCategory));

        let err = manager
            .upload(filing_id, request(Some(FileCategory::Specimen), "a.pdf", None, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::CategoryNotAllowed { .. }));
    }

    #[tokio::test]
    async fn delete_removes_object_and_metadata() {
        let (manager, store, filing_id) = manager_with_filing(FilingType::Copyright).await;
        let file = manager
            .upload(filing_id, request(Some(FileCategory::Deposit), "poem.txt", None, 32))
            .await
            .unwrap();

        manager.delete(filing_id, file.id).await.unwrap();
        assert!(manager.list(filing_id).await.unwrap().is_empty());
        assert!(store.list(&filing_id.to_string()).await.unwrap().is_empty());
        assert!(manager.delete(filing_id, file.id).await.is_err());
    }

    #[tokio::test]
    async fn sweep_removes_objects_without_metadata() {
        let (manager, store, filing_id) = manager_with_filing(FilingType::Trademark).await;
        let kept = manager
            .upload(filing_id, request(Some(FileCategory::Specimen), "label.png", Some("image/png"), 16))
            .await
            .unwrap();
        let stray = format!("{filing_id}/specimen/{}-stray.png", Uuid::new_v4());
        store.put(&stray, b"left behind").await.unwrap();

        let removed = manager.sweep_orphans(filing_id).await.unwrap();
        assert_eq!(removed, vec![stray]);
        assert_eq!(store.list(&filing_id.to_string()).await.unwrap(), vec![kept.storage_path]);
        assert!(manager.sweep_orphans(filing_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_excerpt_reads_plain_text() {
        let (manager, _, filing_id) = manager_with_filing(FilingType::Copyright).await;
        let mut req = request(Some(FileCategory::Deposit), "poem.txt", Some("text/plain"), 0);
        req.bytes = b"Roses  are red,\n violets are blue".to_vec();
        let file = manager.upload(filing_id, req).await.unwrap();

        let excerpt = manager.text_excerpt(&file, 14).await;
        assert_eq!(excerpt.as_deref(), Some("Roses are red,"));
    }
}
