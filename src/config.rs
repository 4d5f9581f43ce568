//! Carga y gestión de configuración de la aplicación (servidor, LLM, Neo4j y almacenamiento).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAI,
    /// Respuestas fijas, sin llamadas externas (desarrollo y demos).
    Mock,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            "mock" => Ok(Self::Mock),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Variable de entorno con la clave de API que lee el cliente del proveedor.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Mock => None,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-sonnet-20241022",
            Self::OpenAI => "gpt-4o-mini",
            Self::Mock => "mock",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub chat_model: String,
    pub max_tokens: u64,
    pub temperature: f64,
    /// Sin valor no hay timeout explícito.
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub llm: LlmConfig,
    /// Sin Neo4j se usa el repositorio en memoria.
    pub neo4j: Option<Neo4jConfig>,
    pub storage_dir: PathBuf,
    pub session_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {name}: {raw}")),
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        let provider = LlmProvider::from_str(&llm_provider_str)?;

        if let Some(key_var) = provider.api_key_var() {
            if env::var(key_var).map(|k| k.trim().is_empty()).unwrap_or(true) {
                return Err(anyhow!("Falta {key_var} en el entorno"));
            }
        }

        let chat_model = env::var("LLM_CHAT_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());
        let max_tokens = parse_var("LLM_MAX_TOKENS", 4096u64)?;
        let temperature = parse_var("LLM_TEMPERATURE", 0.7f64)?;
        if !(0.0..=1.0).contains(&temperature) {
            return Err(anyhow!("LLM_TEMPERATURE debe estar entre 0.0 y 1.0"));
        }
        let timeout = match parse_var("LLM_TIMEOUT_SECS", 0u64)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let neo4j = match env::var("NEO4J_URI") {
            Ok(uri) if !uri.trim().is_empty() => Some(Neo4jConfig {
                uri,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            }),
            _ => None,
        };

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(env::temp_dir)
            .join("ip-filing-webapp");
        let storage_dir = env::var("STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("storage"));
        let session_dir = env::var("SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("sessions"));
        let frontend_dir = env::var("FRONTEND_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("frontend"));
        let open_browser = parse_var("OPEN_BROWSER", true)?;

        Ok(Self {
            server_addr,
            llm: LlmConfig {
                provider,
                chat_model,
                max_tokens,
                temperature,
                timeout,
            },
            neo4j,
            storage_dir,
            session_dir,
            frontend_dir,
            open_browser,
        })
    }
}
