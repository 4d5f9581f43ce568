//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! `CompletionBackend` es la costura que usa el cliente del proxy: un prompt
//! entra y sale el texto del modelo. `RigBackend` llama a Anthropic u OpenAI
//! con el modelo, el límite de tokens y la temperatura configurados;
//! `CannedBackend` devuelve respuestas fijas por tipo de prompt.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{LlmConfig, LlmProvider};

/// Para qué se usa un prompt. Permite a los backends de prueba responder
/// con la forma adecuada y aparece en los logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Freeform,
    Compliance,
    PatentCompliance,
    ApprovalChance,
    Timeline,
    PriorArt,
}

#[derive(Debug, Error)]
pub enum AiError {
    /// Error HTTP o de red hacia el proveedor. El detalle sólo va a los logs.
    #[error("API error")]
    Upstream(String),
    #[error("Invalid response format")]
    InvalidFormat(String),
    #[error("AI request timed out")]
    Timeout,
}

impl AiError {
    pub fn detail(&self) -> &str {
        match self {
            Self::Upstream(detail) | Self::InvalidFormat(detail) => detail,
            Self::Timeout => "timeout",
        }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, kind: PromptKind, prompt: &str) -> Result<String, AiError>;
}

const SYSTEM_PROMPT: &str = r#"
You are an assistant specialised in United States intellectual-property filings
(USPTO trademarks and patents, U.S. Copyright Office registrations).
Answer precisely. When the user asks for JSON, reply with a single JSON object
and nothing else: no prose, no Markdown.
"#;

/// Backend real sobre rig-core.
#[derive(Debug, Clone)]
pub struct RigBackend {
    provider: LlmProvider,
    model: String,
    max_tokens: u64,
    temperature: f64,
}

impl RigBackend {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            provider: cfg.provider,
            model: cfg.chat_model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        }
    }

    async fn complete_with_anthropic(&self, prompt: &str) -> Result<String, AiError> {
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt;
        use rig::providers::anthropic;

        // La clave la lee el cliente de ANTHROPIC_API_KEY; nunca sale del servidor.
        let client = anthropic::Client::from_env();
        let agent = client
            .agent(&self.model)
            .preamble(SYSTEM_PROMPT)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| AiError::Upstream(e.to_string()))
    }

    async fn complete_with_openai(&self, prompt: &str) -> Result<String, AiError> {
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client
            .agent(&self.model)
            .preamble(SYSTEM_PROMPT)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| AiError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl CompletionBackend for RigBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, kind: PromptKind, prompt: &str) -> Result<String, AiError> {
        debug!("Prompt {:?} ({} caracteres) hacia {:?}", kind, prompt.len(), self.provider);
        match self.provider {
            LlmProvider::Anthropic => self.complete_with_anthropic(prompt).await,
            LlmProvider::OpenAI => self.complete_with_openai(prompt).await,
            LlmProvider::Mock => Err(AiError::Upstream(
                "el proveedor mock no usa RigBackend".to_string(),
            )),
        }
    }
}

/// Respuestas fijas por tipo de prompt.
#[derive(Debug, Clone, Default)]
pub struct CannedBackend;

impl CannedBackend {
    pub fn response_for(kind: PromptKind) -> &'static str {
        match kind {
            PromptKind::Freeform => "This is a canned response from the mock AI provider.",
            PromptKind::Compliance => CANNED_COMPLIANCE,
            PromptKind::PatentCompliance => CANNED_PATENT_COMPLIANCE,
            PromptKind::ApprovalChance => CANNED_APPROVAL,
            PromptKind::Timeline => CANNED_TIMELINE,
            PromptKind::PriorArt => CANNED_PRIOR_ART,
        }
    }
}

#[async_trait]
impl CompletionBackend for CannedBackend {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, kind: PromptKind, _prompt: &str) -> Result<String, AiError> {
        Ok(Self::response_for(kind).to_string())
    }
}

/// Construye el backend según el proveedor configurado.
pub fn backend_from_config(cfg: &LlmConfig) -> Arc<dyn CompletionBackend> {
    match cfg.provider {
        LlmProvider::Mock => Arc::new(CannedBackend),
        _ => Arc::new(RigBackend::from_config(cfg)),
    }
}

const CANNED_COMPLIANCE: &str = r#"{
  "overallScore": 85,
  "jurisdictions": [
    {
      "name": "United States (USPTO)",
      "requirements": [
        {"status": "met", "requirement": "Applicant information", "details": "Owner name, entity type and address are present.", "recommendation": "None."},
        {"status": "partial", "requirement": "Identification of goods and services", "details": "Description may be too broad for the selected classes.", "recommendation": "Use terms from the USPTO ID Manual."},
        {"status": "met", "requirement": "Filing basis", "details": "A filing basis has been selected.", "recommendation": "None."}
      ]
    }
  ]
}"#;

const CANNED_PATENT_COMPLIANCE: &str = r#"{
  "overallScore": 78,
  "requirements": [
    {"status": "met", "requirement": "Title of the invention", "details": "Title is present and descriptive.", "recommendation": "None."},
    {"status": "partial", "requirement": "Written description (35 U.S.C. 112(a))", "details": "Description lacks alternative embodiments.", "recommendation": "Describe at least one alternative embodiment."},
    {"status": "missing", "requirement": "Drawings", "details": "No drawings were attached.", "recommendation": "Attach drawings where necessary to understand the invention."}
  ]
}"#;

const CANNED_APPROVAL: &str = r#"{
  "probability": 72,
  "strengths": ["Distinctive mark", "Clear identification of goods"],
  "risks": ["Possible likelihood of confusion with existing registrations"],
  "recommendations": ["Run a clearance search before filing"]
}"#;

const CANNED_TIMELINE: &str = r#"{
  "estimatedMonths": 12,
  "milestones": [
    {"name": "Examination", "estimatedMonths": 8, "description": "Examining attorney reviews the application."},
    {"name": "Publication", "estimatedMonths": 2, "description": "Published for opposition."},
    {"name": "Registration", "estimatedMonths": 2, "description": "Registration certificate issued."}
  ]
}"#;

const CANNED_PRIOR_ART: &str = r#"{
  "summary": "No directly anticipating references were identified.",
  "references": [
    {"title": "Temperature-controlled beverage container", "reference": "US 9,999,999 B2", "relevance": "Discloses a heated mug without stirring."}
  ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_responses_are_valid_json_objects() {
        for kind in [
            PromptKind::Compliance,
            PromptKind::PatentCompliance,
            PromptKind::ApprovalChance,
            PromptKind::Timeline,
            PromptKind::PriorArt,
        ] {
            let value: serde_json::Value = serde_json::from_str(CannedBackend::response_for(kind)).unwrap();
            assert!(value.is_object(), "{kind:?}");
        }
    }

    #[tokio::test]
    async fn mock_provider_builds_canned_backend() {
        let backend = backend_from_config(&LlmConfig {
            provider: LlmProvider::Mock,
            chat_model: "mock".to_string(),
            max_tokens: 10,
            temperature: 0.0,
            timeout: None,
        });
        assert_eq!(backend.model(), "mock");
        let text = backend.complete(PromptKind::Freeform, "hola").await.unwrap();
        assert!(text.contains("canned"));
    }

    #[test]
    fn upstream_error_hides_detail_in_display() {
        let err = AiError::Upstream("401 invalid x-api-key".to_string());
        assert_eq!(err.to_string(), "API error");
        assert_eq!(err.detail(), "401 invalid x-api-key");
    }
}
