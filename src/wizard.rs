//! Controlador de pasos del asistente de solicitudes.
//!
//! Cada sesión es una máquina de estados sobre los índices de paso `0..N-1`:
//! sólo avanza cuando el paso actual valida sin errores, retrocede sin
//! condiciones y sólo puede saltar a pasos ya visitados. Tras cada cambio de
//! campos la instantánea de la sesión se escribe en el `SessionStore` bajo la
//! clave del tipo de solicitud, y el borrador del repositorio se sincroniza al
//! superar cada paso.
//!
//! El registro en memoria es sólo una caché: cada sesión tiene su propio
//! candado, las inactivas se expulsan y una sesión que no está en caché se
//! recupera de su instantánea.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::documents::{DocumentError, DocumentGenerator, GeneratedDocuments};
use crate::models::{FieldSet, FieldValue, Filing, FilingType};
use crate::repository::{FilingRepository, RepositoryError};
use crate::session_store::{SessionStore, SessionStoreError, PATENT_DOCUMENTS_KEY, PATENT_SUBMISSION_KEY};
use crate::validation::{self, ValidationErrors};

/// Tiempo sin uso tras el que una sesión sale de la caché.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const MISSING_FILE: &str = "The selected file is no longer available. Please upload it again";

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("Please correct the highlighted fields before continuing")]
    Validation(ValidationErrors),
    #[error("Wizard session not found: {0}")]
    SessionNotFound(String),
    #[error("Session {session_id} belongs to a {existing} filing, not {requested}")]
    TypeMismatch {
        session_id: String,
        existing: FilingType,
        requested: FilingType,
    },
    #[error("Step {0} does not exist")]
    StepOutOfRange(usize),
    #[error("Cannot skip ahead to step {requested} from step {current}")]
    CannotSkipAhead { requested: usize, current: usize },
    #[error("The filing can only be submitted from the final step")]
    NotAtTerminalStep,
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Documents(#[from] DocumentError),
}

/// Estado visible de una sesión del asistente.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardSession {
    pub session_id: String,
    pub filing_type: FilingType,
    pub filing_id: Uuid,
    pub step: usize,
    pub total_steps: usize,
    pub step_title: &'static str,
    pub fields: FieldSet,
    pub errors: ValidationErrors,
}

impl WizardSession {
    fn new(session_id: String, filing_type: FilingType, filing_id: Uuid, step: usize, fields: FieldSet) -> Self {
        let mut session = Self {
            session_id,
            filing_type,
            filing_id,
            step: 0,
            total_steps: validation::step_count(filing_type),
            step_title: "",
            fields,
            errors: ValidationErrors::default(),
        };
        session.set_step(step);
        session
    }

    fn set_step(&mut self, step: usize) {
        self.step = step.min(self.total_steps.saturating_sub(1));
        self.step_title = validation::steps_for(self.filing_type)[self.step].title;
    }

    /// Copia de la sesión en otro paso y sin errores.
    fn moved_to(&self, step: usize) -> Self {
        let mut moved = self.clone();
        moved.set_step(step);
        moved.errors = ValidationErrors::default();
        moved
    }

    pub fn is_terminal(&self) -> bool {
        self.step + 1 == self.total_steps
    }
}

/// Lo que se guarda en el `SessionStore` para rehidratar una sesión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardSnapshot {
    pub filing_id: Uuid,
    pub step: usize,
    pub fields: FieldSet,
}

type SessionSlot = Arc<Mutex<WizardSession>>;

struct CachedSession {
    slot: SessionSlot,
    last_used: Instant,
}

pub struct WizardService {
    store: Arc<dyn SessionStore>,
    repository: Arc<dyn FilingRepository>,
    sessions: StdMutex<HashMap<String, CachedSession>>,
    idle_timeout: Duration,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Referencias a ficheros de un conjunto de campos: (campo, id de fichero).
fn file_fields<'a>(fields: impl Iterator<Item = (&'a String, &'a FieldValue)>) -> Vec<(String, Uuid)> {
    fields
        .filter_map(|(name, value)| match value {
            FieldValue::File(file) => Some((name.clone(), file.file_id)),
            _ => None,
        })
        .collect()
}

impl WizardService {
    pub fn new(store: Arc<dyn SessionStore>, repository: Arc<dyn FilingRepository>) -> Self {
        Self {
            store,
            repository,
            sessions: StdMutex::new(HashMap::new()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            today: utc_today,
        }
    }

    /// Fija la fecha usada para validar fechas futuras.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sesiones presentes en la caché.
    pub fn cached_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn cached(&self, session_id: &str) -> Option<SessionSlot> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get_mut(session_id).map(|entry| {
            entry.last_used = Instant::now();
            entry.slot.clone()
        })
    }

    /// Inserta una sesión salvo que otra petición se haya adelantado.
    fn cache(&self, session: WizardSession) -> SessionSlot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions
            .entry(session.session_id.clone())
            .or_insert_with(|| CachedSession {
                slot: Arc::new(Mutex::new(session)),
                last_used: Instant::now(),
            });
        entry.last_used = Instant::now();
        entry.slot.clone()
    }

    fn forget(&self, session_id: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Expulsa las sesiones inactivas que nadie está usando. Su estado ya está
    /// en el `SessionStore`.
    fn evict_idle(&self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.last_used.elapsed() < self.idle_timeout || Arc::strong_count(&entry.slot) > 1
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("{} sesiones inactivas expulsadas de la caché", evicted);
        }
    }

    /// Sesión en caché o, si no lo está, rehidratada desde su instantánea.
    async fn slot(&self, session_id: &str) -> Result<SessionSlot, WizardError> {
        if let Some(slot) = self.cached(session_id) {
            return Ok(slot);
        }
        for filing_type in FilingType::ALL {
            let Some(value) = self.store.load(session_id, filing_type.application_key()).await? else {
                continue;
            };
            let snapshot = match serde_json::from_value::<WizardSnapshot>(value) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Instantánea corrupta para la sesión {}: {}", session_id, e);
                    continue;
                }
            };
            if self.repository.get(snapshot.filing_id).await.is_ok_and(|f| f.is_submitted()) {
                // Resto de una presentación que no pudo borrar su instantánea.
                if let Err(e) = self.store.remove(session_id, filing_type.application_key()).await {
                    warn!("No se pudo borrar la instantánea de la sesión {}: {}", session_id, e);
                }
                continue;
            }
            let session = self.rehydrate(session_id, filing_type, snapshot, None).await?;
            return Ok(self.cache(session));
        }
        Err(WizardError::SessionNotFound(session_id.to_string()))
    }

    async fn persist(&self, session: &WizardSession) -> Result<(), WizardError> {
        let snapshot = WizardSnapshot {
            filing_id: session.filing_id,
            step: session.step,
            fields: session.fields.clone(),
        };
        let value = serde_json::to_value(&snapshot).map_err(SessionStoreError::from)?;
        self.store
            .save(&session.session_id, session.filing_type.application_key(), &value)
            .await?;
        Ok(())
    }

    /// Campos de fichero cuyo fichero ya no existe en la solicitud.
    async fn missing_files(&self, filing_id: Uuid, files: Vec<(String, Uuid)>) -> Result<ValidationErrors, WizardError> {
        let mut errors = ValidationErrors::default();
        for (name, file_id) in files {
            match self.repository.get_file(filing_id, file_id).await {
                Ok(_) => {}
                Err(RepositoryError::FileNotFound(_)) => errors.add(&name, MISSING_FILE.to_string()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(errors)
    }

    /// Arranca una sesión nueva o rehidrata la existente con el mismo id.
    pub async fn start(
        &self,
        filing_type: FilingType,
        session_id: Option<String>,
        owner: Option<String>,
    ) -> Result<WizardSession, WizardError> {
        self.evict_idle();
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(slot) = self.cached(&session_id) {
            let existing = slot.lock().await;
            if existing.filing_type != filing_type {
                return Err(WizardError::TypeMismatch {
                    session_id,
                    existing: existing.filing_type,
                    requested: filing_type,
                });
            }
            return Ok(existing.clone());
        }

        let session = match self.store.load(&session_id, filing_type.application_key()).await? {
            Some(value) => match serde_json::from_value::<WizardSnapshot>(value) {
                Ok(snapshot) => self.rehydrate(&session_id, filing_type, snapshot, owner).await?,
                Err(e) => {
                    warn!("Instantánea corrupta para la sesión {}: {}. Se descarta.", session_id, e);
                    self.fresh(&session_id, filing_type, owner).await?
                }
            },
            None => self.fresh(&session_id, filing_type, owner).await?,
        };

        self.persist(&session).await?;
        let slot = self.cache(session);
        let session = slot.lock().await.clone();
        Ok(session)
    }

    async fn fresh(
        &self,
        session_id: &str,
        filing_type: FilingType,
        owner: Option<String>,
    ) -> Result<WizardSession, WizardError> {
        let filing = Filing::new_draft(filing_type, owner);
        self.repository.create(&filing).await?;
        info!(
            "Nueva sesión {} del asistente de {} (solicitud {})",
            session_id, filing_type, filing.id
        );
        Ok(WizardSession::new(session_id.to_string(), filing_type, filing.id, 0, FieldSet::new()))
    }

    async fn rehydrate(
        &self,
        session_id: &str,
        filing_type: FilingType,
        snapshot: WizardSnapshot,
        owner: Option<String>,
    ) -> Result<WizardSession, WizardError> {
        match self.repository.get(snapshot.filing_id).await {
            Ok(filing) if filing.is_submitted() => {
                // Una solicitud presentada no admite más cambios: se empieza de cero.
                return self.fresh(session_id, filing_type, owner).await;
            }
            Ok(_) => {}
            Err(RepositoryError::NotFound(_)) => {
                let mut filing = Filing::new_draft(filing_type, owner);
                filing.id = snapshot.filing_id;
                filing.fields = snapshot.fields.clone();
                match self.repository.create(&filing).await {
                    Ok(()) | Err(RepositoryError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Sesión {} rehidratada en el paso {} ({} campos)",
            session_id,
            snapshot.step,
            snapshot.fields.len()
        );
        Ok(WizardSession::new(
            session_id.to_string(),
            filing_type,
            snapshot.filing_id,
            snapshot.step,
            snapshot.fields,
        ))
    }

    pub async fn get(&self, session_id: &str) -> Result<WizardSession, WizardError> {
        let slot = self.slot(session_id).await?;
        let session = slot.lock().await.clone();
        Ok(session)
    }

    /// Actualiza varios campos y guarda la instantánea.
    pub async fn set_fields(&self, session_id: &str, fields: FieldSet) -> Result<WizardSession, WizardError> {
        self.update_fields(session_id, fields, &[]).await
    }

    /// Asigna y borra campos en una sola operación. Las referencias a ficheros
    /// se resuelven contra los ficheros subidos a la solicitud; una referencia
    /// desconocida rechaza el cambio entero.
    pub async fn update_fields(
        &self,
        session_id: &str,
        mut fields: FieldSet,
        unset: &[String],
    ) -> Result<WizardSession, WizardError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        let mut unknown = ValidationErrors::default();
        for (name, file_id) in file_fields(fields.iter()) {
            match self.repository.get_file(session.filing_id, file_id).await {
                Ok(file) => fields.set(name, file.to_file_ref()),
                Err(RepositoryError::FileNotFound(_)) => {
                    unknown.add(&name, "The selected file was not uploaded to this filing".to_string())
                }
                Err(e) => return Err(e.into()),
            }
        }
        if !unknown.is_empty() {
            return Err(WizardError::Validation(unknown));
        }

        let mut changed: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
        changed.extend(unset.iter().cloned());

        let mut updated = session.clone();
        updated.errors.clear_fields(&changed);
        updated.fields.merge(fields);
        for name in unset {
            updated.fields.remove(name);
        }

        self.persist(&updated).await?;
        *session = updated;
        debug!("Sesión {}: {} campos actualizados", session_id, changed.len());
        Ok(session.clone())
    }

    pub async fn set_field(
        &self,
        session_id: &str,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<WizardSession, WizardError> {
        let mut fields = FieldSet::new();
        fields.set(name, value);
        self.set_fields(session_id, fields).await
    }

    /// Valida el paso actual y avanza si no hay errores.
    pub async fn next(&self, session_id: &str) -> Result<WizardSession, WizardError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        let mut errors = validation::validate_step(session.filing_type, session.step, &session.fields, (self.today)());
        let step_fields = validation::steps_for(session.filing_type)[session.step].fields;
        let files = file_fields(
            session
                .fields
                .iter()
                .filter(|(name, _)| step_fields.iter().any(|rule| rule.name == name.as_str())),
        );
        errors.extend(self.missing_files(session.filing_id, files).await?);
        if !errors.is_empty() {
            info!(
                "Sesión {}: el paso {} tiene {} errores",
                session_id,
                session.step,
                errors.len()
            );
            session.errors = errors.clone();
            return Err(WizardError::Validation(errors));
        }

        self.repository.update_fields(session.filing_id, &session.fields).await?;
        let from = session.step;
        let advanced = session.moved_to(from + 1);
        self.persist(&advanced).await?;
        *session = advanced;

        info!("Sesión {}: paso {} → {}", session_id, from, session.step);
        Ok(session.clone())
    }

    pub async fn previous(&self, session_id: &str) -> Result<WizardSession, WizardError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        let moved = session.moved_to(session.step.saturating_sub(1));
        self.persist(&moved).await?;
        *session = moved;
        Ok(session.clone())
    }

    /// Salta a un paso ya visitado.
    pub async fn jump_to(&self, session_id: &str, step: usize) -> Result<WizardSession, WizardError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        if step >= session.total_steps {
            return Err(WizardError::StepOutOfRange(step));
        }
        if step > session.step {
            return Err(WizardError::CannotSkipAhead {
                requested: step,
                current: session.step,
            });
        }

        let moved = session.moved_to(step);
        self.persist(&moved).await?;
        *session = moved;
        Ok(session.clone())
    }

    /// Presenta la solicitud desde el último paso.
    ///
    /// Las escrituras que pueden fallar se hacen antes de marcar la solicitud
    /// como presentada; después de hacerlo, los fallos del almacén de sesión
    /// sólo se registran.
    pub async fn submit(&self, session_id: &str) -> Result<Filing, WizardError> {
        let slot = self.slot(session_id).await?;
        let mut session = slot.lock().await;

        if !session.is_terminal() {
            return Err(WizardError::NotAtTerminalStep);
        }

        let today = (self.today)();
        let mut errors = validation::validate_step(session.filing_type, session.step, &session.fields, today);
        if errors.is_empty() {
            errors = validation::validate_filing(session.filing_type, &session.fields, today);
        }
        errors.extend(self.missing_files(session.filing_id, file_fields(session.fields.iter())).await?);
        if !errors.is_empty() {
            warn!(
                "Sesión {}: presentación rechazada, {} campos con errores (primer paso afectado: {:?})",
                session_id,
                errors.len(),
                validation::first_step_with_errors(session.filing_type, &errors)
            );
            session.errors = errors.clone();
            return Err(WizardError::Validation(errors));
        }

        let is_patent = session.filing_type == FilingType::Patent;
        if is_patent {
            let record = json!({
                "filingId": session.filing_id,
                "fields": session.fields,
            });
            self.store.save(session_id, PATENT_SUBMISSION_KEY, &record).await?;
        }

        let filing = match self.repository.mark_submitted(session.filing_id, &session.fields).await {
            Ok(filing) => filing,
            Err(e) => {
                if is_patent {
                    if let Err(cleanup) = self.store.remove(session_id, PATENT_SUBMISSION_KEY).await {
                        warn!("No se pudo retirar el registro de presentación de {}: {}", session_id, cleanup);
                    }
                }
                return Err(e.into());
            }
        };

        if is_patent {
            let record = json!({
                "filingId": filing.id,
                "submittedAt": filing.submitted_at,
                "fields": filing.fields,
            });
            if let Err(e) = self.store.save(session_id, PATENT_SUBMISSION_KEY, &record).await {
                warn!("No se pudo completar el registro de presentación de {}: {}", session_id, e);
            }
        }
        if let Err(e) = self
            .store
            .remove(session_id, session.filing_type.application_key())
            .await
        {
            warn!("No se pudo borrar la instantánea de la sesión {}: {}", session_id, e);
        }
        drop(session);
        self.forget(session_id);

        info!(
            "Solicitud {} ({}) presentada desde la sesión {}",
            filing.id, filing.filing_type, session_id
        );
        Ok(filing)
    }

    /// Genera los documentos con los campos actuales de la sesión. En patentes
    /// el resultado queda además guardado en la sesión.
    pub async fn documents(
        &self,
        session_id: &str,
        generator: &DocumentGenerator,
    ) -> Result<GeneratedDocuments, WizardError> {
        let session = self.get(session_id).await?;
        let mut filing = self.repository.get(session.filing_id).await?;
        filing.fields = session.fields;

        let documents = generator.generate(&filing)?;
        if filing.filing_type == FilingType::Patent {
            let value = serde_json::to_value(&documents).map_err(SessionStoreError::from)?;
            self.store.save(session_id, PATENT_DOCUMENTS_KEY, &value).await?;
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::models::{FileCategory, FileRef, SupportingFile};
    use crate::repository::MemoryFilingRepository;
    use crate::session_store::MemorySessionStore;
    use crate::validation::{STANDARD_CHARACTER_MARK, USE_IN_COMMERCE};

    /// Almacén en memoria que falla al escribir o borrar las claves indicadas.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemorySessionStore,
        failing: StdMutex<HashSet<String>>,
    }

    impl FlakyStore {
        fn fail_on(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        fn recover(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn check(&self, key: &str) -> Result<(), SessionStoreError> {
            if self.failing.lock().unwrap().contains(key) {
                return Err(std::io::Error::other("disk full").into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn save(&self, session: &str, key: &str, value: &Value) -> Result<(), SessionStoreError> {
            self.check(key)?;
            self.inner.save(session, key, value).await
        }

        async fn load(&self, session: &str, key: &str) -> Result<Option<Value>, SessionStoreError> {
            self.inner.load(session, key).await
        }

        async fn remove(&self, session: &str, key: &str) -> Result<(), SessionStoreError> {
            self.check(key)?;
            self.inner.remove(session, key).await
        }
    }

    fn flaky_service() -> (WizardService, Arc<FlakyStore>, Arc<MemoryFilingRepository>) {
        let store = Arc::new(FlakyStore::default());
        let repository = Arc::new(MemoryFilingRepository::new());
        let wizard = WizardService::new(store.clone(), repository.clone()).with_clock(today);
        (wizard, store, repository)
    }

    fn patent_steps() -> Vec<FieldSet> {
        let invention: FieldSet = [
            ("inventionTitle", "Self-stirring mug"),
            ("applicationType", "Utility"),
            ("inventorName", "Ada Lovelace"),
            ("inventorAddress", "12 St James's Square, London"),
            ("inventorCitizenship", "United Kingdom"),
        ]
        .into_iter()
        .collect();
        let description: FieldSet = [
            ("summary", "A mug with an integrated magnetic stirrer."),
            ("detailedDescription", "The base houses a motor driving a magnet."),
        ]
        .into_iter()
        .collect();
        let claims: FieldSet = [
            ("claims", "1. A mug comprising a base with a magnetic stirrer."),
            ("abstract", "A self-stirring mug."),
        ]
        .into_iter()
        .collect();
        let mut declaration: FieldSet = [
            ("entityStatus", "Small Entity"),
            ("signatoryName", "Ada Lovelace"),
            ("signatureDate", "2024-01-15"),
        ]
        .into_iter()
        .collect();
        declaration.set("declarationAccepted", true);
        vec![invention, description, claims, declaration]
    }

    /// Lleva una sesión de patente hasta el último paso.
    async fn patent_at_last_step(wizard: &WizardService, session_id: &str) {
        wizard.start(FilingType::Patent, Some(session_id.into()), None).await.unwrap();
        let steps = patent_steps();
        for fields in &steps[..3] {
            wizard.set_fields(session_id, fields.clone()).await.unwrap();
            wizard.next(session_id).await.unwrap();
        }
        wizard.set_fields(session_id, steps[3].clone()).await.unwrap();
    }

    fn supporting_file(filing_id: Uuid, category: FileCategory, mime_type: &str) -> SupportingFile {
        let id = Uuid::new_v4();
        SupportingFile {
            id,
            filing_id,
            category,
            file_name: "label.png".to_string(),
            storage_path: format!("{filing_id}/{category}/{id}-label.png"),
            size: 2048,
            mime_type: mime_type.to_string(),
            uploaded_at: Utc::now(),
        }
    }

    fn commerce_goods(specimen: FieldValue) -> FieldSet {
        let mut goods = goods_intent_to_use();
        goods.set("filingBasis", USE_IN_COMMERCE);
        goods.set("firstUseAnywhere", "2020-01-01");
        goods.set("firstUseCommerce", "2020-02-01");
        goods.set("typeOfCommerce", "Interstate");
        goods.set("markUsage", "Printed on shirt labels");
        goods.set("specimen", specimen);
        goods
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn service() -> (WizardService, Arc<MemorySessionStore>, Arc<MemoryFilingRepository>) {
        let store = Arc::new(MemorySessionStore::new());
        let repository = Arc::new(MemoryFilingRepository::new());
        let wizard = WizardService::new(store.clone(), repository.clone()).with_clock(today);
        (wizard, store, repository)
    }

    fn acme() -> FieldSet {
        [
            ("trademarkName", "Acme"),
            ("markType", STANDARD_CHARACTER_MARK),
            ("ownerName", "Jane Doe"),
            ("ownerType", "Individual"),
            ("ownerAddress", "1 Main St"),
        ]
        .into_iter()
        .collect()
    }

    fn goods_intent_to_use() -> FieldSet {
        let mut fields = FieldSet::new();
        fields.set("internationalClasses", vec!["25".to_string()]);
        fields.set("goodsServices", "Clothing, namely t-shirts");
        fields.set("filingBasis", "Intent to Use (Section 1(b))");
        fields
    }

    fn declaration() -> FieldSet {
        let mut fields = FieldSet::new();
        fields.set("signatoryName", "Jane Doe");
        fields.set("signatoryTitle", "Owner");
        fields.set("signatureDate", "2024-05-30");
        fields.set("declarationAccepted", true);
        fields
    }

    #[tokio::test]
    async fn acme_step_zero_advances() {
        let (wizard, _, repository) = service();
        let session = wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        assert_eq!(session.step, 0);

        wizard.set_fields("s1", acme()).await.unwrap();
        let session = wizard.next("s1").await.unwrap();
        assert_eq!(session.step, 1);
        assert!(session.errors.is_empty());

        let filing = repository.get(session.filing_id).await.unwrap();
        assert_eq!(filing.fields.text("trademarkName"), Some("Acme"));
    }

    #[tokio::test]
    async fn empty_required_field_blocks_next() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        let mut fields = acme();
        fields.set("ownerName", "   ");
        wizard.set_fields("s1", fields).await.unwrap();

        let err = wizard.next("s1").await.unwrap_err();
        match err {
            WizardError::Validation(errors) => assert!(errors.contains("ownerName")),
            other => panic!("unexpected error: {other:?}"),
        }
        let session = wizard.get("s1").await.unwrap();
        assert_eq!(session.step, 0);
        assert!(session.errors.contains("ownerName"));
        assert_eq!(session.fields.text("trademarkName"), Some("Acme"));

        // Corregir el campo limpia su error.
        let session = wizard.set_field("s1", "ownerName", "Jane Doe").await.unwrap();
        assert!(!session.errors.contains("ownerName"));
    }

    #[tokio::test]
    async fn previous_at_first_step_is_a_no_op() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Copyright, Some("s1".into()), None).await.unwrap();
        let session = wizard.previous("s1").await.unwrap();
        assert_eq!(session.step, 0);
    }

    #[tokio::test]
    async fn jump_only_goes_back() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        wizard.next("s1").await.unwrap();

        assert!(matches!(
            wizard.jump_to("s1", 2).await,
            Err(WizardError::CannotSkipAhead { requested: 2, current: 1 })
        ));
        assert!(matches!(wizard.jump_to("s1", 7).await, Err(WizardError::StepOutOfRange(7))));
        assert_eq!(wizard.jump_to("s1", 0).await.unwrap().step, 0);
    }

    #[tokio::test]
    async fn session_is_rehydrated_from_the_store() {
        let store = Arc::new(MemorySessionStore::new());
        let repository = Arc::new(MemoryFilingRepository::new());

        let first = WizardService::new(store.clone(), repository.clone()).with_clock(today);
        first.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        let before = first.set_fields("s1", acme()).await.unwrap();
        first.next("s1").await.unwrap();

        // Un servicio nuevo (p. ej. tras reiniciar) recupera la sesión.
        let second = WizardService::new(store.clone(), repository.clone()).with_clock(today);
        let after = second.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        assert_eq!(after.fields, before.fields);
        assert_eq!(after.step, 1);
        assert_eq!(after.filing_id, before.filing_id);

        let raw = store.load("s1", "trademarkApplicationData").await.unwrap().unwrap();
        let snapshot: WizardSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snapshot.fields, before.fields);
    }

    #[tokio::test]
    async fn session_type_cannot_change() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        assert!(matches!(
            wizard.start(FilingType::Patent, Some("s1".into()), None).await,
            Err(WizardError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn use_in_commerce_basis_requires_commerce_fields() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        wizard.next("s1").await.unwrap();

        let mut goods = goods_intent_to_use();
        goods.set("filingBasis", USE_IN_COMMERCE);
        wizard.set_fields("s1", goods).await.unwrap();
        let Err(WizardError::Validation(errors)) = wizard.next("s1").await else {
            panic!("expected validation errors");
        };
        for field in ["firstUseAnywhere", "firstUseCommerce", "typeOfCommerce", "markUsage", "specimen"] {
            assert!(errors.contains(field), "{field}");
        }
    }

    #[tokio::test]
    async fn submit_marks_filing_and_clears_snapshot() {
        let (wizard, store, repository) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        assert!(matches!(wizard.submit("s1").await, Err(WizardError::NotAtTerminalStep)));

        wizard.next("s1").await.unwrap();
        wizard.set_fields("s1", goods_intent_to_use()).await.unwrap();
        wizard.next("s1").await.unwrap();
        wizard.set_fields("s1", declaration()).await.unwrap();

        let filing = wizard.submit("s1").await.unwrap();
        assert!(filing.is_submitted());
        assert!(filing.submitted_at.is_some());
        assert!(store.load("s1", "trademarkApplicationData").await.unwrap().is_none());
        assert!(matches!(wizard.get("s1").await, Err(WizardError::SessionNotFound(_))));

        let stored = repository.get(filing.id).await.unwrap();
        assert_eq!(stored.fields.text("signatoryTitle"), Some("Owner"));
        assert!(repository.update_fields(filing.id, &FieldSet::new()).await.is_err());
    }

    #[tokio::test]
    async fn submit_revalidates_earlier_steps() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        wizard.next("s1").await.unwrap();
        wizard.set_fields("s1", goods_intent_to_use()).await.unwrap();
        wizard.next("s1").await.unwrap();
        wizard.set_fields("s1", declaration()).await.unwrap();
        // Se vacía un campo de un paso anterior sin volver atrás.
        wizard.set_field("s1", "goodsServices", "").await.unwrap();

        let Err(WizardError::Validation(errors)) = wizard.submit("s1").await else {
            panic!("expected validation errors");
        };
        assert!(errors.contains("goodsServices"));
        assert_eq!(wizard.get("s1").await.unwrap().step, 2);
    }

    #[tokio::test]
    async fn patent_documents_are_cached_in_session() {
        let (wizard, store, _) = service();
        wizard.start(FilingType::Patent, Some("p1".into()), None).await.unwrap();
        wizard.set_field("p1", "inventionTitle", "Self-stirring mug").await.unwrap();

        let generator = DocumentGenerator::new().unwrap();
        let documents = wizard.documents("p1", &generator).await.unwrap();
        assert!(documents["Patent Specification"].contains("Self-stirring mug"));

        let cached = store.load("p1", PATENT_DOCUMENTS_KEY).await.unwrap().unwrap();
        assert_eq!(cached["Patent Claims"], json!(documents["Patent Claims"]));
    }

    #[tokio::test]
    async fn failed_snapshot_write_does_not_advance() {
        let (wizard, store, _) = flaky_service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();

        store.fail_on("trademarkApplicationData");
        assert!(matches!(wizard.next("s1").await, Err(WizardError::Store(_))));
        assert_eq!(wizard.get("s1").await.unwrap().step, 0);
        assert!(matches!(wizard.set_field("s1", "ownerName", "John").await, Err(WizardError::Store(_))));
        assert_eq!(wizard.get("s1").await.unwrap().fields.text("ownerName"), Some("Jane Doe"));

        store.recover();
        assert_eq!(wizard.next("s1").await.unwrap().step, 1);
    }

    #[tokio::test]
    async fn failed_submission_record_leaves_filing_open_for_retry() {
        let (wizard, store, repository) = flaky_service();
        patent_at_last_step(&wizard, "p1").await;

        store.fail_on(PATENT_SUBMISSION_KEY);
        assert!(matches!(wizard.submit("p1").await, Err(WizardError::Store(_))));
        let session = wizard.get("p1").await.unwrap();
        assert_eq!(session.step, 3);
        assert!(!repository.get(session.filing_id).await.unwrap().is_submitted());

        store.recover();
        let filing = wizard.submit("p1").await.unwrap();
        assert!(filing.is_submitted());
        let record = store.load("p1", PATENT_SUBMISSION_KEY).await.unwrap().unwrap();
        assert_eq!(record["filingId"], json!(filing.id));
        assert!(record["submittedAt"].is_string());
    }

    #[tokio::test]
    async fn snapshot_cleanup_failure_after_submit_still_completes() {
        let (wizard, store, repository) = flaky_service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        wizard.next("s1").await.unwrap();
        wizard.set_fields("s1", goods_intent_to_use()).await.unwrap();
        wizard.next("s1").await.unwrap();
        wizard.set_fields("s1", declaration()).await.unwrap();

        store.fail_on("trademarkApplicationData");
        let filing = wizard.submit("s1").await.unwrap();
        assert!(repository.get(filing.id).await.unwrap().is_submitted());

        // La instantánea sobrante no resucita la sesión presentada.
        store.recover();
        assert!(store.load("s1", "trademarkApplicationData").await.unwrap().is_some());
        assert!(matches!(wizard.get("s1").await, Err(WizardError::SessionNotFound(_))));
        assert!(store.load("s1", "trademarkApplicationData").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_file_reference_is_rejected() {
        let (wizard, _, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        let phantom = FieldValue::File(FileRef {
            file_id: Uuid::new_v4(),
            file_name: "label.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 1,
        });

        let Err(WizardError::Validation(errors)) = wizard.set_field("s1", "specimen", phantom).await else {
            panic!("expected validation errors");
        };
        assert!(errors.contains("specimen"));
        assert!(wizard.get("s1").await.unwrap().fields.get("specimen").is_none());
    }

    #[tokio::test]
    async fn file_reference_takes_stored_metadata() {
        let (wizard, _, repository) = service();
        let session = wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        let file = supporting_file(session.filing_id, FileCategory::Specimen, "image/png");
        repository.add_file(&file).await.unwrap();

        let claimed = FieldValue::File(FileRef {
            file_id: file.id,
            file_name: "other.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 1,
        });
        let session = wizard.set_field("s1", "specimen", claimed).await.unwrap();
        assert_eq!(session.fields.get("specimen"), Some(&FieldValue::File(file.to_file_ref())));
    }

    #[tokio::test]
    async fn deleted_specimen_blocks_next() {
        let (wizard, _, repository) = service();
        let session = wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        wizard.next("s1").await.unwrap();

        let file = supporting_file(session.filing_id, FileCategory::Specimen, "image/png");
        repository.add_file(&file).await.unwrap();
        wizard
            .set_fields("s1", commerce_goods(FieldValue::File(file.to_file_ref())))
            .await
            .unwrap();
        repository.delete_file(session.filing_id, file.id).await.unwrap();

        let Err(WizardError::Validation(errors)) = wizard.next("s1").await else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.get("specimen"), Some(MISSING_FILE));
        assert_eq!(wizard.get("s1").await.unwrap().step, 1);
    }

    #[tokio::test]
    async fn fields_can_be_unset() {
        let (wizard, store, _) = service();
        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();

        let session = wizard
            .update_fields("s1", FieldSet::new(), &["ownerAddress".to_string()])
            .await
            .unwrap();
        assert!(session.fields.get("ownerAddress").is_none());
        let raw = store.load("s1", "trademarkApplicationData").await.unwrap().unwrap();
        let snapshot: WizardSnapshot = serde_json::from_value(raw).unwrap();
        assert!(snapshot.fields.get("ownerAddress").is_none());
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_reloaded() {
        let store = Arc::new(MemorySessionStore::new());
        let repository = Arc::new(MemoryFilingRepository::new());
        let wizard = WizardService::new(store, repository)
            .with_clock(today)
            .with_idle_timeout(Duration::ZERO);

        wizard.start(FilingType::Trademark, Some("s1".into()), None).await.unwrap();
        wizard.set_fields("s1", acme()).await.unwrap();
        wizard.start(FilingType::Copyright, Some("s2".into()), None).await.unwrap();
        assert_eq!(wizard.cached_sessions(), 1);

        // La sesión expulsada se recupera de su instantánea.
        let session = wizard.get("s1").await.unwrap();
        assert_eq!(session.filing_type, FilingType::Trademark);
        assert_eq!(session.fields.text("trademarkName"), Some("Acme"));
        assert_eq!(wizard.next("s1").await.unwrap().step, 1);
    }
}
