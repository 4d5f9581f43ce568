//! Repositorio de solicitudes sobre Neo4j.
//!
//! Grafo: `(:Filing)-[:HAS_FILE]->(:SupportingFile)`. Los campos del
//! formulario se guardan como JSON en la propiedad `fields`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph, Node};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::config::Neo4jConfig;
use crate::models::{FieldSet, FileCategory, Filing, FilingStatus, FilingType, SupportingFile};
use crate::repository::{FilingRepository, RepositoryError};

pub async fn connect_from_config(cfg: &Neo4jConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea los constraints de unicidad para :Filing y :SupportingFile.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT filing_id IF NOT EXISTS
         FOR (f:Filing)
         REQUIRE f.id IS UNIQUE",
        "CREATE CONSTRAINT supporting_file_id IF NOT EXISTS
         FOR (s:SupportingFile)
         REQUIRE s.id IS UNIQUE",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints básicos creados).");
    Ok(())
}

pub struct Neo4jFilingRepository {
    graph: Graph,
}

impl Neo4jFilingRepository {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }
}

fn db_err(e: neo4rs::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn status_str(status: FilingStatus) -> &'static str {
    match status {
        FilingStatus::Draft => "draft",
        FilingStatus::Submitted => "submitted",
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Database(format!("invalid timestamp '{raw}': {e}")))
}

fn filing_from_node(node: &Node) -> Result<Filing, RepositoryError> {
    let field = |name: &str| -> Result<String, RepositoryError> {
        node.get::<String>(name)
            .ok_or_else(|| RepositoryError::Database(format!("Filing node without '{name}'")))
    };

    let id = Uuid::parse_str(&field("id")?).map_err(|e| RepositoryError::Database(e.to_string()))?;
    let filing_type: FilingType = field("filing_type")?
        .parse()
        .map_err(|e: crate::models::UnknownFilingType| RepositoryError::Database(e.to_string()))?;
    let status = match field("status")?.as_str() {
        "submitted" => FilingStatus::Submitted,
        _ => FilingStatus::Draft,
    };
    let fields: FieldSet = serde_json::from_str(&field("fields")?)?;
    let owner = node.get::<String>("owner").filter(|owner| !owner.is_empty());
    let submitted_at = match node.get::<String>("submitted_at").filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_time(&raw)?),
        None => None,
    };

    Ok(Filing {
        id,
        filing_type,
        fields,
        status,
        owner,
        created_at: parse_time(&field("created_at")?)?,
        updated_at: parse_time(&field("updated_at")?)?,
        submitted_at,
    })
}

fn file_from_node(node: &Node) -> Result<SupportingFile, RepositoryError> {
    let field = |name: &str| -> Result<String, RepositoryError> {
        node.get::<String>(name)
            .ok_or_else(|| RepositoryError::Database(format!("SupportingFile node without '{name}'")))
    };
    let parse_id = |raw: String| Uuid::parse_str(&raw).map_err(|e| RepositoryError::Database(e.to_string()));

    Ok(SupportingFile {
        id: parse_id(field("id")?)?,
        filing_id: parse_id(field("filing_id")?)?,
        category: field("category")?
            .parse::<FileCategory>()
            .map_err(RepositoryError::Database)?,
        file_name: field("file_name")?,
        storage_path: field("storage_path")?,
        size: node.get::<i64>("size").unwrap_or_default().max(0) as u64,
        mime_type: field("mime_type")?,
        uploaded_at: parse_time(&field("uploaded_at")?)?,
    })
}

impl Neo4jFilingRepository {
    async fn write_fields(
        &self,
        id: Uuid,
        fields: &FieldSet,
        status: FilingStatus,
    ) -> Result<Filing, RepositoryError> {
        let current = self.get(id).await?;
        if current.is_submitted() {
            return Err(RepositoryError::FilingLocked(id));
        }

        let now = Utc::now().to_rfc3339();
        let submitted_at = if status == FilingStatus::Submitted { now.clone() } else { String::new() };
        self.graph
            .run(
                query(
                    "MATCH (f:Filing {id: $id})
                     SET f.fields = $fields, f.status = $status, f.updated_at = $updated_at,
                         f.submitted_at = $submitted_at",
                )
                .param("id", id.to_string())
                .param("fields", serde_json::to_string(fields)?)
                .param("status", status_str(status))
                .param("updated_at", now)
                .param("submitted_at", submitted_at),
            )
            .await
            .map_err(db_err)?;

        self.get(id).await
    }
}

#[async_trait]
impl FilingRepository for Neo4jFilingRepository {
    async fn create(&self, filing: &Filing) -> Result<(), RepositoryError> {
        self.graph
            .run(
                query(
                    "CREATE (f:Filing {id: $id})
                     SET f.filing_type = $filing_type, f.fields = $fields, f.status = $status,
                         f.owner = $owner, f.created_at = $created_at, f.updated_at = $updated_at,
                         f.submitted_at = $submitted_at",
                )
                .param("id", filing.id.to_string())
                .param("filing_type", filing.filing_type.as_str())
                .param("fields", serde_json::to_string(&filing.fields)?)
                .param("status", status_str(filing.status))
                .param("owner", filing.owner.clone().unwrap_or_default())
                .param("created_at", filing.created_at.to_rfc3339())
                .param("updated_at", filing.updated_at.to_rfc3339())
                .param(
                    "submitted_at",
                    filing.submitted_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                ),
            )
            .await
            .map_err(db_err)
    }

    async fn get(&self, id: Uuid) -> Result<Filing, RepositoryError> {
        let mut cursor = self
            .graph
            .execute(query("MATCH (f:Filing {id: $id}) RETURN f").param("id", id.to_string()))
            .await
            .map_err(db_err)?;

        match cursor.next().await.map_err(db_err)? {
            Some(row) => {
                let node: Node = row
                    .get("f")
                    .ok_or_else(|| RepositoryError::Database("row without 'f'".to_string()))?;
                filing_from_node(&node)
            }
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn update_fields(&self, id: Uuid, fields: &FieldSet) -> Result<Filing, RepositoryError> {
        self.write_fields(id, fields, FilingStatus::Draft).await
    }

    async fn mark_submitted(&self, id: Uuid, fields: &FieldSet) -> Result<Filing, RepositoryError> {
        self.write_fields(id, fields, FilingStatus::Submitted).await
    }

    async fn add_file(&self, file: &SupportingFile) -> Result<(), RepositoryError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (f:Filing {id: $filing_id})
                     CREATE (s:SupportingFile {id: $id})
                     SET s.filing_id = $filing_id, s.category = $category, s.file_name = $file_name,
                         s.storage_path = $storage_path, s.size = $size, s.mime_type = $mime_type,
                         s.uploaded_at = $uploaded_at
                     MERGE (f)-[:HAS_FILE]->(s)
                     RETURN s.id AS id",
                )
                .param("id", file.id.to_string())
                .param("filing_id", file.filing_id.to_string())
                .param("category", file.category.as_str())
                .param("file_name", file.file_name.clone())
                .param("storage_path", file.storage_path.clone())
                .param("size", file.size as i64)
                .param("mime_type", file.mime_type.clone())
                .param("uploaded_at", file.uploaded_at.to_rfc3339()),
            )
            .await
            .map_err(db_err)?;

        match cursor.next().await.map_err(db_err)? {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(file.filing_id)),
        }
    }

    async fn list_files(&self, filing_id: Uuid) -> Result<Vec<SupportingFile>, RepositoryError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (:Filing {id: $filing_id})-[:HAS_FILE]->(s:SupportingFile)
                     RETURN s ORDER BY s.uploaded_at, s.file_name",
                )
                .param("filing_id", filing_id.to_string()),
            )
            .await
            .map_err(db_err)?;

        let mut files = Vec::new();
        while let Some(row) = cursor.next().await.map_err(db_err)? {
            if let Some(node) = row.get::<Node>("s") {
                files.push(file_from_node(&node)?);
            }
        }
        Ok(files)
    }

    async fn get_file(&self, filing_id: Uuid, file_id: Uuid) -> Result<SupportingFile, RepositoryError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (:Filing {id: $filing_id})-[:HAS_FILE]->(s:SupportingFile {id: $id})
                     RETURN s",
                )
                .param("filing_id", filing_id.to_string())
                .param("id", file_id.to_string()),
            )
            .await
            .map_err(db_err)?;

        match cursor.next().await.map_err(db_err)? {
            Some(row) => match row.get::<Node>("s") {
                Some(node) => file_from_node(&node),
                None => Err(RepositoryError::FileNotFound(file_id)),
            },
            None => Err(RepositoryError::FileNotFound(file_id)),
        }
    }

    async fn delete_file(&self, filing_id: Uuid, file_id: Uuid) -> Result<(), RepositoryError> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (:Filing {id: $filing_id})-[:HAS_FILE]->(s:SupportingFile {id: $id})
                     DETACH DELETE s
                     RETURN count(*) AS deleted",
                )
                .param("filing_id", filing_id.to_string())
                .param("id", file_id.to_string()),
            )
            .await
            .map_err(db_err)?;

        let deleted = match cursor.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>("deleted").unwrap_or_default(),
            None => 0,
        };
        if deleted == 0 {
            return Err(RepositoryError::FileNotFound(file_id));
        }
        Ok(())
    }
}

/// Conecta, asegura el esquema y devuelve el repositorio listo para usar.
pub async fn connect_repository(cfg: &Neo4jConfig) -> Result<Neo4jFilingRepository> {
    let graph = connect_from_config(cfg)
        .await
        .map_err(|e| anyhow!("Error conectando a Neo4j: {e}"))?;
    ensure_schema(&graph).await?;
    Ok(Neo4jFilingRepository::new(graph))
}

/// URL del Neo4j Browser (HTTP, puerto 7474) para el URI bolt configurado.
pub fn browser_url(cfg: &Neo4jConfig) -> String {
    // `bolt` no es un esquema "especial", así que no se puede cambiar a `http` in situ.
    let host = Url::parse(&cfg.uri)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string());
    format!("http://{host}:7474")
}
