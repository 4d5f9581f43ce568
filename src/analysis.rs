//! Orquestación de los análisis de IA sobre una solicitud: cumplimiento
//! normativo, probabilidad de aprobación, plazos y búsqueda de estado de la técnica.
//!
//! Cada análisis es un único ciclo prompt → respuesta → validación. Las
//! respuestas se validan contra tipos con esquema y se rechazan si no cumplen.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::{schema_json, AiClient};
use crate::llm::{AiError, PromptKind};
use crate::models::{Filing, FilingType, SupportingFile};
use crate::prompts;
use crate::repository::{FilingRepository, RepositoryError};
use crate::uploads::UploadManager;

/// Caracteres de extracto por documento incluidos en el prompt de cumplimiento.
const EXCERPT_CHARS: usize = 600;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error("Invalid compliance analysis format")]
    InvalidComplianceFormat(String),
    #[error("Prior art search is only available for patent filings")]
    PatentOnly,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequirementStatus {
    Met,
    Partial,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCheck {
    pub status: RequirementStatus,
    pub requirement: String,
    pub details: String,
    #[serde(default)]
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JurisdictionCompliance {
    pub name: String,
    pub requirements: Vec<RequirementCheck>,
}

/// Respuesta esperada para marcas y copyright.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JurisdictionalComplianceResponse {
    pub overall_score: f64,
    pub jurisdictions: Vec<JurisdictionCompliance>,
}

/// Respuesta esperada para patentes.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlatComplianceResponse {
    pub overall_score: f64,
    pub requirements: Vec<RequirementCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSection {
    pub jurisdiction: Option<String>,
    pub requirements: Vec<RequirementCheck>,
}

/// Informe normalizado que consume la interfaz.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub filing_id: Uuid,
    pub filing_type: FilingType,
    pub overall_score: u8,
    pub sections: Vec<ComplianceSection>,
    pub generated_at: DateTime<Utc>,
}

impl ComplianceReport {
    pub fn count(&self, status: RequirementStatus) -> usize {
        self.sections
            .iter()
            .flat_map(|section| &section.requirements)
            .filter(|req| req.status == status)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEstimate {
    /// Probabilidad de aprobación, 0-100.
    pub probability: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub name: String,
    pub estimated_months: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEstimate {
    pub estimated_months: u32,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriorArtReference {
    pub title: String,
    pub reference: String,
    pub relevance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriorArtReport {
    pub summary: String,
    pub references: Vec<PriorArtReference>,
}

/// Resultado independiente de una llamada dentro de un lote.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<T> {
    Ok { data: T },
    Failed { error: String },
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T, AnalysisError>) -> Self {
        match result {
            Ok(data) => Self::Ok { data },
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Ok { data } => Some(data),
            Self::Failed { .. } => None,
        }
    }
}

/// Los tres análisis que se lanzan en paralelo al presentar una solicitud.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAnalysis {
    pub filing_id: Uuid,
    pub compliance: Outcome<ComplianceReport>,
    pub approval: Outcome<ApprovalEstimate>,
    pub timeline: Outcome<TimelineEstimate>,
}

impl SubmissionAnalysis {
    pub fn all_succeeded(&self) -> bool {
        self.compliance.is_ok() && self.approval.is_ok() && self.timeline.is_ok()
    }

    pub fn failures(&self) -> usize {
        [self.compliance.is_ok(), self.approval.is_ok(), self.timeline.is_ok()]
            .iter()
            .filter(|ok| !**ok)
            .count()
    }
}

/// Comprueba claves obligatorias y convierte la respuesta en un informe.
pub fn normalize_compliance(filing: &Filing, value: Value) -> Result<ComplianceReport, AnalysisError> {
    let invalid = |detail: String| AnalysisError::InvalidComplianceFormat(detail);
    let second_key = match filing.filing_type {
        FilingType::Patent => "requirements",
        FilingType::Trademark | FilingType::Copyright => "jurisdictions",
    };
    for key in ["overallScore", second_key] {
        if value.get(key).is_none() {
            return Err(invalid(format!("missing key '{key}'")));
        }
    }

    let (score, sections) = match filing.filing_type {
        FilingType::Patent => {
            let parsed: FlatComplianceResponse =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
            (
                parsed.overall_score,
                vec![ComplianceSection {
                    jurisdiction: None,
                    requirements: parsed.requirements,
                }],
            )
        }
        FilingType::Trademark | FilingType::Copyright => {
            let parsed: JurisdictionalComplianceResponse =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
            let sections = parsed
                .jurisdictions
                .into_iter()
                .map(|j| ComplianceSection {
                    jurisdiction: Some(j.name),
                    requirements: j.requirements,
                })
                .collect();
            (parsed.overall_score, sections)
        }
    };

    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(invalid(format!("overallScore out of range: {score}")));
    }

    Ok(ComplianceReport {
        filing_id: filing.id,
        filing_type: filing.filing_type,
        overall_score: score.round() as u8,
        sections,
        generated_at: Utc::now(),
    })
}

#[derive(Clone)]
pub struct AnalysisService {
    repository: Arc<dyn FilingRepository>,
    uploads: UploadManager,
    ai: AiClient,
}

impl AnalysisService {
    pub fn new(repository: Arc<dyn FilingRepository>, uploads: UploadManager, ai: AiClient) -> Self {
        Self {
            repository,
            uploads,
            ai,
        }
    }

    async fn documents_for_prompt(&self, filing: &Filing) -> Result<Vec<(SupportingFile, Option<String>)>, AnalysisError> {
        if filing.filing_type != FilingType::Trademark {
            return Ok(Vec::new());
        }
        let files = self.repository.list_files(filing.id).await?;

        let mut documents = Vec::with_capacity(files.len());
        for file in files {
            let excerpt = self.uploads.text_excerpt(&file, EXCERPT_CHARS).await;
            documents.push((file, excerpt));
        }
        Ok(documents)
    }

    pub async fn check_compliance(&self, filing_id: Uuid) -> Result<ComplianceReport, AnalysisError> {
        let filing = self.repository.get(filing_id).await?;
        let documents = self.documents_for_prompt(&filing).await?;

        let (kind, schema) = match filing.filing_type {
            FilingType::Patent => (PromptKind::PatentCompliance, schema_json::<FlatComplianceResponse>()),
            _ => (PromptKind::Compliance, schema_json::<JurisdictionalComplianceResponse>()),
        };
        let prompt = prompts::compliance_prompt(&filing, &documents, &schema);

        let value = self.ai.complete_json_value(kind, &prompt).await?;
        let report = normalize_compliance(&filing, value).map_err(|e| {
            warn!("Análisis de cumplimiento inválido para {}: {:?}", filing_id, e);
            e
        })?;

        info!(
            "Cumplimiento de {} ({}): {} / 100, {} requisitos sin cubrir",
            filing_id,
            filing.filing_type,
            report.overall_score,
            report.count(RequirementStatus::Missing)
        );
        Ok(report)
    }

    pub async fn approval_chance(&self, filing_id: Uuid) -> Result<ApprovalEstimate, AnalysisError> {
        let filing = self.repository.get(filing_id).await?;
        let prompt = prompts::approval_prompt(&filing, &schema_json::<ApprovalEstimate>());
        let estimate: ApprovalEstimate = self.ai.complete_json(PromptKind::ApprovalChance, &prompt).await?;
        if estimate.probability > 100 {
            return Err(AiError::InvalidFormat(format!(
                "probability out of range: {}",
                estimate.probability
            ))
            .into());
        }
        Ok(estimate)
    }

    pub async fn filing_timeline(&self, filing_id: Uuid) -> Result<TimelineEstimate, AnalysisError> {
        let filing = self.repository.get(filing_id).await?;
        let prompt = prompts::timeline_prompt(&filing, &schema_json::<TimelineEstimate>());
        Ok(self.ai.complete_json(PromptKind::Timeline, &prompt).await?)
    }

    pub async fn prior_art_search(&self, filing_id: Uuid) -> Result<PriorArtReport, AnalysisError> {
        let filing = self.repository.get(filing_id).await?;
        if filing.filing_type != FilingType::Patent {
            return Err(AnalysisError::PatentOnly);
        }
        let prompt = prompts::prior_art_prompt(&filing, &schema_json::<PriorArtReport>());
        Ok(self.ai.complete_json(PromptKind::PriorArt, &prompt).await?)
    }

    /// Lanza los tres análisis a la vez; cada uno informa de su propio resultado.
    pub async fn submission_analysis(&self, filing_id: Uuid) -> SubmissionAnalysis {
        let (compliance, approval, timeline) = futures::join!(
            self.check_compliance(filing_id),
            self.approval_chance(filing_id),
            self.filing_timeline(filing_id),
        );

        let analysis = SubmissionAnalysis {
            filing_id,
            compliance: Outcome::from_result(compliance),
            approval: Outcome::from_result(approval),
            timeline: Outcome::from_result(timeline),
        };
        if !analysis.all_succeeded() {
            warn!(
                "Análisis de la solicitud {}: {} de 3 llamadas fallaron",
                filing_id,
                analysis.failures()
            );
        }
        analysis
    }
}
