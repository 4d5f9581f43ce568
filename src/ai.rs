//! Cliente del proxy de IA.
//!
//! Toda llamada al modelo produce un sobre con la forma de la API de mensajes
//! (`{id, model, content: [{type: "text", text}]}`), que es lo que devuelve la
//! ruta `/api/claude`. Los orquestadores desempaquetan el sobre y después
//! interpretan el texto como JSON con un contrato estricto: un único objeto,
//! opcionalmente dentro de un bloque ```json, o error.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{AiError, CompletionBackend, PromptKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

/// Sobre de respuesta del proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
}

impl ProxyEnvelope {
    pub fn new(model: &str, text: String) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            envelope_type: "message".to_string(),
            role: "assistant".to_string(),
            model: model.to_string(),
            content: vec![ContentBlock {
                block_type: "text".to_string(),
                text,
            }],
        }
    }

    /// Texto del primer bloque de tipo `text`.
    pub fn text(&self) -> Result<&str, AiError> {
        self.content
            .iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .ok_or_else(|| AiError::InvalidFormat("response without text content".to_string()))
    }
}

#[derive(Clone)]
pub struct AiClient {
    backend: Arc<dyn CompletionBackend>,
    timeout: Option<Duration>,
}

impl AiClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Option<Duration>) -> Self {
        Self { backend, timeout }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Una única llamada al modelo, sin reintentos.
    pub async fn proxy(&self, kind: PromptKind, prompt: &str) -> Result<ProxyEnvelope, AiError> {
        let call = self.backend.complete(kind, prompt);
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(AiError::Timeout)),
            None => call.await,
        };

        match result {
            Ok(text) => {
                info!("Respuesta del modelo para {:?}: {} caracteres", kind, text.len());
                Ok(ProxyEnvelope::new(self.backend.model(), text))
            }
            Err(e) => {
                warn!("Fallo en la llamada al modelo ({:?}): {}", kind, e.detail());
                Err(e)
            }
        }
    }

    pub async fn complete_text(&self, kind: PromptKind, prompt: &str) -> Result<String, AiError> {
        let envelope = self.proxy(kind, prompt).await?;
        Ok(envelope.text()?.to_string())
    }

    /// Llama al modelo y devuelve su respuesta como objeto JSON.
    pub async fn complete_json_value(&self, kind: PromptKind, prompt: &str) -> Result<Value, AiError> {
        let envelope = self.proxy(kind, prompt).await?;
        parse_json_object(envelope.text()?)
    }

    /// Igual que `complete_json_value` pero validando contra el tipo `T`.
    pub async fn complete_json<T: DeserializeOwned>(&self, kind: PromptKind, prompt: &str) -> Result<T, AiError> {
        let value = self.complete_json_value(kind, prompt).await?;
        serde_json::from_value(value).map_err(|e| AiError::InvalidFormat(e.to_string()))
    }
}

/// Interpreta la salida del modelo como un único objeto JSON.
///
/// Se admite un bloque de código Markdown alrededor; cualquier otro texto fuera
/// del objeto es un error (no se buscan llaves dentro de la prosa).
pub fn parse_json_object(text: &str) -> Result<Value, AiError> {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```")
                .ok_or_else(|| AiError::InvalidFormat("unterminated code block".to_string()))?
                .trim()
        }
        None => trimmed,
    };

    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(AiError::InvalidFormat("expected a JSON object".to_string())),
        Err(e) => Err(AiError::InvalidFormat(e.to_string())),
    }
}

/// Esquema JSON de `T`, para incluirlo en los prompts.
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}
