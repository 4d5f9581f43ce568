//! Almacén de estado de sesión del asistente.
//!
//! Sustituye al "localStorage" del navegador por un adaptador explícito con
//! `save`/`load`/`remove` sobre el par (sesión, clave). Hay dos
//! implementaciones: en memoria (tests, desarrollo) y ficheros JSON en disco
//! (`<dir>/<sesión>/<clave>.json`).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Claves conocidas del almacén de sesión, además de `FilingType::application_key`.
pub const PATENT_SUBMISSION_KEY: &str = "patentSubmissionData";
pub const PATENT_DOCUMENTS_KEY: &str = "patentGeneratedDocuments";

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("invalid session key: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &str, key: &str, value: &Value) -> Result<(), SessionStoreError>;

    async fn load(&self, session: &str, key: &str) -> Result<Option<Value>, SessionStoreError>;

    async fn remove(&self, session: &str, key: &str) -> Result<(), SessionStoreError>;
}

/// Comprueba que un identificador es seguro como componente de ruta.
fn validate_component(kind: &str, value: &str) -> Result<(), SessionStoreError> {
    if value.is_empty() {
        return Err(SessionStoreError::InvalidKey(format!("{kind} cannot be empty")));
    }
    if value.contains('/')
        || value.contains('\\')
        || value.contains("..")
        || value.chars().any(|c| c.is_control())
    {
        return Err(SessionStoreError::InvalidKey(format!(
            "{kind} contains invalid characters: {value:?}"
        )));
    }
    Ok(())
}

/// Almacén en memoria.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<(String, String), Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &str, key: &str, value: &Value) -> Result<(), SessionStoreError> {
        validate_component("session id", session)?;
        validate_component("key", key)?;
        self.entries
            .write()
            .await
            .insert((session.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    async fn load(&self, session: &str, key: &str) -> Result<Option<Value>, SessionStoreError> {
        validate_component("session id", session)?;
        validate_component("key", key)?;
        Ok(self
            .entries
            .read()
            .await
            .get(&(session.to_string(), key.to_string()))
            .cloned())
    }

    async fn remove(&self, session: &str, key: &str) -> Result<(), SessionStoreError> {
        self.entries
            .write()
            .await
            .remove(&(session.to_string(), key.to_string()));
        Ok(())
    }
}

/// Almacén en disco: un fichero JSON por (sesión, clave).
pub struct FileSessionStore {
    base_path: PathBuf,
}

impl FileSessionStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn entry_path(&self, session: &str, key: &str) -> Result<PathBuf, SessionStoreError> {
        validate_component("session id", session)?;
        validate_component("key", key)?;
        Ok(self.base_path.join(session).join(format!("{key}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &str, key: &str, value: &Value) -> Result<(), SessionStoreError> {
        let path = self.entry_path(session, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(value)?;
        // Escritura atómica: fichero temporal + rename.
        let tmp_path = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.flush().await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn load(&self, session: &str, key: &str) -> Result<Option<Value>, SessionStoreError> {
        let path = self.entry_path(session, key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, session: &str, key: &str) -> Result<(), SessionStoreError> {
        let path = self.entry_path(session, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ip-filing-sessions-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn memory_store_save_load_remove() {
        let store = MemorySessionStore::new();
        let value = json!({"trademarkName": "Acme"});

        store.save("s1", "trademarkApplicationData", &value).await.unwrap();
        let loaded = store.load("s1", "trademarkApplicationData").await.unwrap();
        assert_eq!(loaded, Some(value));
        assert!(store.load("s2", "trademarkApplicationData").await.unwrap().is_none());

        store.remove("s1", "trademarkApplicationData").await.unwrap();
        assert!(store.load("s1", "trademarkApplicationData").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = temp_dir();
        let store = FileSessionStore::new(&dir);
        let value = json!({"claims": "1. A mug.", "priorityClaim": false});

        store.save("session-a", PATENT_SUBMISSION_KEY, &value).await.unwrap();
        let loaded = store.load("session-a", PATENT_SUBMISSION_KEY).await.unwrap();
        assert_eq!(loaded, Some(value));

        store.remove("session-a", PATENT_SUBMISSION_KEY).await.unwrap();
        assert!(store.load("session-a", PATENT_SUBMISSION_KEY).await.unwrap().is_none());
        // Borrar dos veces no es un error.
        store.remove("session-a", PATENT_SUBMISSION_KEY).await.unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let store = FileSessionStore::new(temp_dir());
        let err = store.load("../etc", "passwd").await.unwrap_err();
        assert!(matches!(err, SessionStoreError::InvalidKey(_)));
    }
}
