//! Modelos de dominio: solicitudes (Filing), valores de campo del asistente y
//! metadatos de ficheros de soporte.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tamaño máximo de cualquier fichero subido (10 MiB).
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Tipo de solicitud de propiedad intelectual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilingType {
    Trademark,
    Patent,
    Copyright,
}

impl FilingType {
    pub const ALL: [FilingType; 3] = [Self::Trademark, Self::Patent, Self::Copyright];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trademark => "trademark",
            Self::Patent => "patent",
            Self::Copyright => "copyright",
        }
    }

    /// Clave del almacén de sesión donde se guarda el formulario en curso.
    pub fn application_key(&self) -> &'static str {
        match self {
            Self::Trademark => "trademarkApplicationData",
            Self::Patent => "patentApplicationData",
            Self::Copyright => "copyrightApplicationData",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Trademark => "Trademark",
            Self::Patent => "Patent",
            Self::Copyright => "Copyright",
        }
    }
}

impl fmt::Display for FilingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported filing type: {0}")]
pub struct UnknownFilingType(pub String);

impl FromStr for FilingType {
    type Err = UnknownFilingType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trademark" => Ok(Self::Trademark),
            "patent" => Ok(Self::Patent),
            "copyright" => Ok(Self::Copyright),
            other => Err(UnknownFilingType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilingStatus {
    Draft,
    Submitted,
}

/// Referencia a un fichero ya subido, usada como valor de un campo de tipo fichero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Valor de un campo del formulario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
    List(Vec<String>),
    File(FileRef),
}

impl FieldValue {
    /// Un valor "vacío" no satisface un campo obligatorio.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flag(value) => !value,
            Self::Text(text) => text.trim().is_empty(),
            Self::List(items) => items.iter().all(|item| item.trim().is_empty()),
            Self::File(_) => false,
        }
    }

    /// Representación textual usada en plantillas y prompts.
    pub fn to_display(&self) -> String {
        match self {
            Self::Flag(true) => "Yes".to_string(),
            Self::Flag(false) => "No".to_string(),
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(", "),
            Self::File(file) => file.file_name.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<FileRef> for FieldValue {
    fn from(value: FileRef) -> Self {
        Self::File(value)
    }
}

/// Conjunto ordenado nombre de campo → valor.
///
/// El orden estable (BTreeMap) hace que la serialización sea determinista, lo
/// que permite comparar instantáneas guardadas y restauradas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet(BTreeMap<String, FieldValue>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(FieldValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.0.get(name), Some(FieldValue::Flag(true)))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.0.remove(name)
    }

    pub fn merge(&mut self, other: FieldSet) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Vista plana (nombre → texto) para plantillas y prompts.
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_display()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// Una solicitud de propiedad intelectual en curso o presentada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filing {
    pub id: Uuid,
    pub filing_type: FilingType,
    pub fields: FieldSet,
    pub status: FilingStatus,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Filing {
    /// Crea un borrador vacío, como al arrancar el asistente.
    pub fn new_draft(filing_type: FilingType, owner: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            filing_type,
            fields: FieldSet::new(),
            status: FilingStatus::Draft,
            owner,
            created_at: now,
            updated_at: now,
            submitted_at: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == FilingStatus::Submitted
    }

    /// Título legible de la solicitud según su tipo.
    pub fn title(&self) -> String {
        let key = match self.filing_type {
            FilingType::Trademark => "trademarkName",
            FilingType::Patent => "inventionTitle",
            FilingType::Copyright => "workTitle",
        };
        self.fields
            .text(key)
            .filter(|title| !title.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Untitled {}", self.filing_type.display_name()))
    }
}

/// Categoría de un fichero de soporte. El conjunto permitido depende del tipo
/// de solicitud (ver `uploads::categories_for`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Specimen,
    Drawing,
    Drawings,
    Specification,
    Declaration,
    PriorArt,
    Deposit,
    Other,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Specimen => "specimen",
            Self::Drawing => "drawing",
            Self::Drawings => "drawings",
            Self::Specification => "specification",
            Self::Declaration => "declaration",
            Self::PriorArt => "prior_art",
            Self::Deposit => "deposit",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "specimen" => Ok(Self::Specimen),
            "drawing" => Ok(Self::Drawing),
            "drawings" => Ok(Self::Drawings),
            "specification" => Ok(Self::Specification),
            "declaration" => Ok(Self::Declaration),
            "prior_art" | "prior-art" => Ok(Self::PriorArt),
            "deposit" => Ok(Self::Deposit),
            "other" => Ok(Self::Other),
            other => Err(format!("Unknown file category: {other}")),
        }
    }
}

/// Metadatos de un fichero de soporte asociado a una solicitud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportingFile {
    pub id: Uuid,
    pub filing_id: Uuid,
    pub category: FileCategory,
    pub file_name: String,
    pub storage_path: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

impl SupportingFile {
    pub fn to_file_ref(&self) -> FileRef {
        FileRef {
            file_id: self.id,
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
        }
    }
}
