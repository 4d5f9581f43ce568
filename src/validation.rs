//! Reglas de validación del asistente.
//!
//! Cada tipo de solicitud se describe con una tabla declarativa de pasos y
//! campos (`StepDef` / `FieldRule`). La misma tabla la consumen el validador y
//! el endpoint que describe los pasos a la interfaz, de forma que los campos
//! condicionales (p. ej. los de "Use in Commerce") se definen en un único sitio.
//!
//! Todas las funciones de este módulo son puras.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{FieldSet, FieldValue, FilingType, MAX_FILE_SIZE_BYTES};

pub type Predicate = fn(&FieldSet) -> bool;

/// Cuándo es obligatorio un campo.
#[derive(Clone, Copy)]
pub enum Requirement {
    Always,
    Optional,
    When(Predicate),
}

impl Requirement {
    pub fn applies(&self, fields: &FieldSet) -> bool {
        match self {
            Self::Always => true,
            Self::Optional => false,
            Self::When(predicate) => predicate(fields),
        }
    }
}

#[derive(Clone, Copy)]
pub enum FieldKind {
    Text { max_len: usize },
    /// Nombres: alfanuméricos y `NAME_PUNCTUATION`.
    Name { max_len: usize },
    Select { options: &'static [&'static str] },
    /// Fecha `YYYY-MM-DD`, nunca en el futuro.
    Date,
    /// Año de cuatro cifras, nunca en el futuro.
    Year,
    /// Clases internacionales de Niza (1..=45).
    NiceClasses,
    List { max_items: usize },
    Flag,
    /// Casilla que debe estar marcada cuando el campo es obligatorio.
    Acceptance,
    File { allowed: &'static [&'static str] },
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Name { .. } => "name",
            Self::Select { .. } => "select",
            Self::Date => "date",
            Self::Year => "year",
            Self::NiceClasses => "classes",
            Self::List { .. } => "list",
            Self::Flag => "flag",
            Self::Acceptance => "acceptance",
            Self::File { .. } => "file",
        }
    }
}

#[derive(Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub requirement: Requirement,
}

const fn field(
    name: &'static str,
    label: &'static str,
    kind: FieldKind,
    requirement: Requirement,
) -> FieldRule {
    FieldRule {
        name,
        label,
        kind,
        requirement,
    }
}

pub struct StepDef {
    pub title: &'static str,
    pub fields: &'static [FieldRule],
    /// Reglas que relacionan varios campos del mismo paso.
    pub cross_check: Option<fn(&FieldSet, &mut ValidationErrors)>,
}

/// Errores de validación: nombre de campo → mensaje.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Quita los errores de los campos indicados (p. ej. tras editarlos).
    pub fn clear_fields(&mut self, fields: &[String]) {
        for field in fields {
            self.0.remove(field);
        }
    }

    pub(crate) fn add(&mut self, field: &str, message: String) {
        self.0.entry(field.to_string()).or_insert(message);
    }

    pub(crate) fn extend(&mut self, other: ValidationErrors) {
        for (field, message) in other.0 {
            self.0.entry(field).or_insert(message);
        }
    }
}

// --- Constantes de dominio ---

pub const USE_IN_COMMERCE: &str = "Use in Commerce (Section 1(a))";
pub const STANDARD_CHARACTER_MARK: &str = "Standard Character Mark (text only)";
pub const NAME_PUNCTUATION: &[char] = &[' ', '.', ',', '\'', '&', '-'];

const MARK_TYPES: &[&str] = &[
    STANDARD_CHARACTER_MARK,
    "Special Form Mark (stylized/design)",
    "Sound Mark",
];
const OWNER_TYPES: &[&str] = &[
    "Individual",
    "Corporation",
    "Limited Liability Company",
    "Partnership",
    "Other",
];
const FILING_BASES: &[&str] = &[
    USE_IN_COMMERCE,
    "Intent to Use (Section 1(b))",
    "Foreign Registration (Section 44(e))",
    "Foreign Application (Section 44(d))",
];
const TYPES_OF_COMMERCE: &[&str] = &["Interstate", "Foreign", "Territorial"];
const APPLICATION_TYPES: &[&str] = &["Utility", "Design", "Plant", "Provisional"];
const ENTITY_STATUSES: &[&str] = &["Large Entity", "Small Entity", "Micro Entity"];
const WORK_TYPES: &[&str] = &[
    "Literary Work",
    "Visual Arts Work",
    "Performing Arts Work",
    "Sound Recording",
    "Motion Picture/Audiovisual Work",
    "Computer Program",
];
const PUBLICATION_STATUSES: &[&str] = &["Published", "Unpublished"];

pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png"];
pub const IMAGE_OR_PDF_TYPES: &[&str] = &["image/jpeg", "image/png", "application/pdf"];
pub const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];
pub const DEPOSIT_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "text/plain",
    "audio/mpeg",
    "video/mp4",
];

// --- Predicados de campos condicionales ---

fn uses_commerce(fields: &FieldSet) -> bool {
    fields.text("filingBasis") == Some(USE_IN_COMMERCE)
}

fn is_special_form(fields: &FieldSet) -> bool {
    fields
        .text("markType")
        .is_some_and(|mark| !mark.is_empty() && mark != STANDARD_CHARACTER_MARK)
}

fn claims_priority(fields: &FieldSet) -> bool {
    fields.flag("priorityClaim")
}

fn is_published(fields: &FieldSet) -> bool {
    fields.text("publicationStatus") == Some("Published")
}

fn made_for_hire(fields: &FieldSet) -> bool {
    fields.flag("workMadeForHire")
}

use FieldKind::*;
use Requirement::{Always, Optional, When};

const PRIORITY_FIELDS: [FieldRule; 4] = [
    field("priorityClaim", "Priority claim", Flag, Optional),
    field("priorityCountry", "Priority country", Name { max_len: 100 }, When(claims_priority)),
    field(
        "priorityApplicationNumber",
        "Priority application number",
        Text { max_len: 50 },
        When(claims_priority),
    ),
    field("priorityFilingDate", "Priority filing date", Date, When(claims_priority)),
];

static TRADEMARK_STEPS: [StepDef; 3] = [
    StepDef {
        title: "Mark & Owner",
        fields: &[
            field("trademarkName", "Trademark name", Name { max_len: 200 }, Always),
            field("markType", "Mark type", Select { options: MARK_TYPES }, Always),
            field("markDrawing", "Mark drawing", File { allowed: IMAGE_TYPES }, When(is_special_form)),
            field("markDescription", "Mark description", Text { max_len: 1000 }, Optional),
            field("ownerName", "Owner name", Name { max_len: 200 }, Always),
            field("ownerType", "Owner type", Select { options: OWNER_TYPES }, Always),
            field("ownerAddress", "Owner address", Text { max_len: 500 }, Always),
            field("ownerEmail", "Owner email", Text { max_len: 254 }, Optional),
        ],
        cross_check: None,
    },
    StepDef {
        title: "Goods, Services & Filing Basis",
        fields: &[
            field("internationalClasses", "International classes", NiceClasses, Always),
            field("goodsServices", "Goods and services description", Text { max_len: 2000 }, Always),
            field("filingBasis", "Filing basis", Select { options: FILING_BASES }, Always),
            field("firstUseAnywhere", "Date of first use anywhere", Date, When(uses_commerce)),
            field("firstUseCommerce", "Date of first use in commerce", Date, When(uses_commerce)),
            field(
                "typeOfCommerce",
                "Type of commerce",
                Select { options: TYPES_OF_COMMERCE },
                When(uses_commerce),
            ),
            field("markUsage", "Description of mark usage", Text { max_len: 1000 }, When(uses_commerce)),
            field("specimen", "Specimen", File { allowed: IMAGE_OR_PDF_TYPES }, When(uses_commerce)),
        ],
        cross_check: Some(first_use_order),
    },
    StepDef {
        title: "Priority & Declaration",
        fields: &[
            PRIORITY_FIELDS[0],
            PRIORITY_FIELDS[1],
            PRIORITY_FIELDS[2],
            PRIORITY_FIELDS[3],
            field("signatoryName", "Signatory name", Name { max_len: 200 }, Always),
            field("signatoryTitle", "Signatory title", Text { max_len: 100 }, Always),
            field("signatureDate", "Signature date", Date, Always),
            field("declarationAccepted", "Declaration", Acceptance, Always),
        ],
        cross_check: None,
    },
];

static PATENT_STEPS: [StepDef; 4] = [
    StepDef {
        title: "Invention & Inventor",
        fields: &[
            field("inventionTitle", "Invention title", Text { max_len: 500 }, Always),
            field("applicationType", "Application type", Select { options: APPLICATION_TYPES }, Always),
            field("inventorName", "Inventor name", Name { max_len: 200 }, Always),
            field("inventorAddress", "Inventor address", Text { max_len: 500 }, Always),
            field("inventorCitizenship", "Inventor citizenship", Name { max_len: 100 }, Always),
        ],
        cross_check: None,
    },
    StepDef {
        title: "Description",
        fields: &[
            field("technicalField", "Technical field", Text { max_len: 1000 }, Optional),
            field("background", "Background", Text { max_len: 10_000 }, Optional),
            field("summary", "Summary of the invention", Text { max_len: 10_000 }, Always),
            field("detailedDescription", "Detailed description", Text { max_len: 50_000 }, Always),
            field("drawings", "Drawings", File { allowed: IMAGE_OR_PDF_TYPES }, Optional),
        ],
        cross_check: None,
    },
    StepDef {
        title: "Claims & Prior Art",
        fields: &[
            field("claims", "Claims", Text { max_len: 20_000 }, Always),
            field("abstract", "Abstract", Text { max_len: 2500 }, Always),
            field("priorArtReferences", "Prior art references", List { max_items: 50 }, Optional),
        ],
        cross_check: None,
    },
    StepDef {
        title: "Declaration",
        fields: &[
            field("entityStatus", "Entity status", Select { options: ENTITY_STATUSES }, Always),
            PRIORITY_FIELDS[0],
            PRIORITY_FIELDS[1],
            PRIORITY_FIELDS[2],
            PRIORITY_FIELDS[3],
            field("signatoryName", "Signatory name", Name { max_len: 200 }, Always),
            field("signatureDate", "Signature date", Date, Always),
            field("declarationAccepted", "Inventor declaration", Acceptance, Always),
        ],
        cross_check: None,
    },
];

static COPYRIGHT_STEPS: [StepDef; 3] = [
    StepDef {
        title: "Work",
        fields: &[
            field("workTitle", "Title of work", Text { max_len: 500 }, Always),
            field("workType", "Type of work", Select { options: WORK_TYPES }, Always),
            field("yearOfCompletion", "Year of completion", Year, Always),
            field(
                "publicationStatus",
                "Publication status",
                Select { options: PUBLICATION_STATUSES },
                Always,
            ),
            field("publicationDate", "Date of first publication", Date, When(is_published)),
        ],
        cross_check: None,
    },
    StepDef {
        title: "Author & Claimant",
        fields: &[
            field("authorName", "Author name", Name { max_len: 200 }, Always),
            field("authorCitizenship", "Author citizenship", Name { max_len: 100 }, Optional),
            field("workMadeForHire", "Work made for hire", Flag, Optional),
            field("employerName", "Employer name", Name { max_len: 200 }, When(made_for_hire)),
            field("claimantName", "Claimant name", Name { max_len: 200 }, Always),
            field("claimantAddress", "Claimant address", Text { max_len: 500 }, Always),
        ],
        cross_check: None,
    },
    StepDef {
        title: "Deposit & Certification",
        fields: &[
            field("depositCopy", "Deposit copy", File { allowed: DEPOSIT_TYPES }, Always),
            field("certifierName", "Certifier name", Name { max_len: 200 }, Always),
            field("certificationDate", "Certification date", Date, Always),
            field("certificationAccepted", "Certification", Acceptance, Always),
        ],
        cross_check: None,
    },
];

/// Tabla de pasos de un tipo de solicitud.
pub fn steps_for(filing_type: FilingType) -> &'static [StepDef] {
    match filing_type {
        FilingType::Trademark => &TRADEMARK_STEPS,
        FilingType::Patent => &PATENT_STEPS,
        FilingType::Copyright => &COPYRIGHT_STEPS,
    }
}

pub fn step_count(filing_type: FilingType) -> usize {
    steps_for(filing_type).len()
}

/// Valida los campos de un paso. Un índice fuera de rango no produce errores.
pub fn validate_step(
    filing_type: FilingType,
    step: usize,
    fields: &FieldSet,
    today: NaiveDate,
) -> ValidationErrors {
    let mut errors = ValidationErrors::default();
    let Some(def) = steps_for(filing_type).get(step) else {
        return errors;
    };

    for rule in def.fields {
        if let Some(message) = check_field(rule, fields, today) {
            errors.add(rule.name, message);
        }
    }
    if let Some(cross_check) = def.cross_check {
        cross_check(fields, &mut errors);
    }
    errors
}

/// Valida todos los pasos (usado antes de presentar la solicitud).
pub fn validate_filing(filing_type: FilingType, fields: &FieldSet, today: NaiveDate) -> ValidationErrors {
    let mut errors = ValidationErrors::default();
    for step in 0..step_count(filing_type) {
        errors.extend(validate_step(filing_type, step, fields, today));
    }
    errors
}

/// Primer paso que contiene alguno de los campos con error.
pub fn first_step_with_errors(filing_type: FilingType, errors: &ValidationErrors) -> Option<usize> {
    steps_for(filing_type)
        .iter()
        .position(|def| def.fields.iter().any(|rule| errors.contains(rule.name)))
}

fn check_field(rule: &FieldRule, fields: &FieldSet, today: NaiveDate) -> Option<String> {
    let required = rule.requirement.applies(fields);
    let value = match fields.get(rule.name) {
        Some(value) if !value.is_empty() => value,
        _ if required => {
            return Some(match rule.kind {
                Acceptance => format!("{} must be accepted", rule.label),
                _ => format!("{} is required", rule.label),
            });
        }
        _ => return None,
    };

    match (rule.kind, value) {
        (Text { max_len }, FieldValue::Text(text)) => check_length(rule.label, text, max_len),
        (Name { max_len }, FieldValue::Text(text)) => check_length(rule.label, text, max_len)
            .or_else(|| check_name_chars(rule.label, text)),
        (Select { options }, FieldValue::Text(text)) => (!options.contains(&text.as_str()))
            .then(|| format!("{} must be one of the listed options", rule.label)),
        (Date, FieldValue::Text(text)) => check_date(rule.label, text, today),
        (Year, FieldValue::Text(text)) => check_year(rule.label, text, today),
        (NiceClasses, FieldValue::List(items)) => check_classes(rule.label, items),
        (List { max_items }, FieldValue::List(items)) => (items.len() > max_items)
            .then(|| format!("{} may contain at most {} entries", rule.label, max_items)),
        (Flag | Acceptance, FieldValue::Flag(_)) => None,
        (File { allowed }, FieldValue::File(file)) => {
            if !allowed.contains(&file.mime_type.as_str()) {
                Some(format!(
                    "{} must be one of the following types: {}",
                    rule.label,
                    allowed.join(", ")
                ))
            } else if file.size > MAX_FILE_SIZE_BYTES {
                Some(format!("{} must be 10 MB or smaller", rule.label))
            } else {
                None
            }
        }
        _ => Some(format!("{} has an invalid value", rule.label)),
    }
}

fn check_length(label: &str, text: &str, max_len: usize) -> Option<String> {
    (text.chars().count() > max_len)
        .then(|| format!("{label} must be at most {max_len} characters"))
}

fn check_name_chars(label: &str, text: &str) -> Option<String> {
    let valid = text
        .chars()
        .all(|c| c.is_alphanumeric() || NAME_PUNCTUATION.contains(&c));
    (!valid).then(|| {
        format!("{label} may only contain letters, numbers, spaces and the characters . , ' & -")
    })
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn check_date(label: &str, text: &str, today: NaiveDate) -> Option<String> {
    match parse_date(text) {
        None => Some(format!("{label} must be a valid date (YYYY-MM-DD)")),
        Some(date) if date > today => Some(format!("{label} cannot be in the future")),
        Some(_) => None,
    }
}

fn check_year(label: &str, text: &str, today: NaiveDate) -> Option<String> {
    let text = text.trim();
    match text.parse::<i32>() {
        Ok(year) if text.len() == 4 => {
            (year > today.year()).then(|| format!("{label} cannot be in the future"))
        }
        _ => Some(format!("{label} must be a four-digit year")),
    }
}

fn check_classes(label: &str, items: &[String]) -> Option<String> {
    let valid = items
        .iter()
        .filter(|item| !item.trim().is_empty())
        .all(|item| matches!(item.trim().parse::<u8>(), Ok(1..=45)));
    (!valid).then(|| format!("{label} must be class numbers between 1 and 45"))
}

/// La primera fecha de uso en el comercio no puede ser anterior a la primera fecha de uso.
fn first_use_order(fields: &FieldSet, errors: &mut ValidationErrors) {
    if errors.contains("firstUseAnywhere") || errors.contains("firstUseCommerce") {
        return;
    }
    let anywhere = fields.text("firstUseAnywhere").and_then(parse_date);
    let commerce = fields.text("firstUseCommerce").and_then(parse_date);
    if let (Some(anywhere), Some(commerce)) = (anywhere, commerce) {
        if commerce < anywhere {
            errors.add(
                "firstUseCommerce",
                "Date of first use in commerce cannot be earlier than date of first use anywhere"
                    .to_string(),
            );
        }
    }
}

// --- Descripción de pasos para la interfaz ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "no_entries")]
    pub options: &'static [&'static str],
    #[serde(skip_serializing_if = "no_entries")]
    pub allowed_types: &'static [&'static str],
}

fn no_entries(entries: &&'static [&'static str]) -> bool {
    entries.is_empty()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub index: usize,
    pub title: &'static str,
    pub fields: Vec<FieldView>,
}

/// Describe los pasos evaluando los requisitos condicionales contra `fields`.
pub fn describe_steps(filing_type: FilingType, fields: &FieldSet) -> Vec<StepView> {
    steps_for(filing_type)
        .iter()
        .enumerate()
        .map(|(index, def)| StepView {
            index,
            title: def.title,
            fields: def
                .fields
                .iter()
                .map(|rule| {
                    let (max_length, options, allowed_types): (
                        Option<usize>,
                        &'static [&'static str],
                        &'static [&'static str],
                    ) = match rule.kind {
                        Text { max_len } | Name { max_len } => (Some(max_len), &[], &[]),
                        Select { options } => (None, options, &[]),
                        File { allowed } => (None, &[], allowed),
                        _ => (None, &[], &[]),
                    };
                    FieldView {
                        name: rule.name,
                        label: rule.label,
                        kind: rule.kind.name(),
                        required: rule.requirement.applies(fields),
                        max_length,
                        options,
                        allowed_types,
                    }
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileRef;
    use uuid::Uuid;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn file(mime: &str, size: u64) -> FieldValue {
        FieldValue::File(FileRef {
            file_id: Uuid::new_v4(),
            file_name: "upload".to_string(),
            mime_type: mime.to_string(),
            size,
        })
    }

    fn trademark_step0() -> FieldSet {
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

    const COMMERCE_FIELDS: [&str; 5] = [
        "firstUseAnywhere",
        "firstUseCommerce",
        "typeOfCommerce",
        "markUsage",
        "specimen",
    ];

    #[test]
    fn step_counts_per_filing_type() {
        assert_eq!(step_count(FilingType::Trademark), 3);
        assert_eq!(step_count(FilingType::Patent), 4);
        assert_eq!(step_count(FilingType::Copyright), 3);
    }

    #[test]
    fn complete_trademark_first_step_passes() {
        let errors = validate_step(FilingType::Trademark, 0, &trademark_step0(), today());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn every_always_required_field_is_reported_when_empty() {
        for filing_type in FilingType::ALL {
            for (step, def) in steps_for(filing_type).iter().enumerate() {
                let errors = validate_step(filing_type, step, &FieldSet::new(), today());
                for rule in def.fields.iter().filter(|r| matches!(r.requirement, Requirement::Always)) {
                    assert!(
                        errors.contains(rule.name),
                        "{filing_type} step {step} should flag {}",
                        rule.name
                    );
                }
            }
        }
    }

    #[test]
    fn use_in_commerce_requires_first_use_fields_and_specimen() {
        let mut fields = FieldSet::new();
        fields.set("filingBasis", USE_IN_COMMERCE);
        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        for name in COMMERCE_FIELDS {
            assert!(errors.contains(name), "{name} should be required");
        }

        fields.set("filingBasis", "Intent to Use (Section 1(b))");
        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        for name in COMMERCE_FIELDS {
            assert!(!errors.contains(name), "{name} should not be required");
        }
    }

    #[test]
    fn special_form_mark_requires_drawing() {
        let mut fields = trademark_step0();
        fields.set("markType", "Special Form Mark (stylized/design)");
        let errors = validate_step(FilingType::Trademark, 0, &fields, today());
        assert_eq!(errors.get("markDrawing"), Some("Mark drawing is required"));

        fields.set("markDrawing", file("image/png", 1024));
        assert!(validate_step(FilingType::Trademark, 0, &fields, today()).is_empty());
    }

    #[test]
    fn name_fields_reject_disallowed_characters() {
        let mut fields = trademark_step0();
        fields.set("ownerName", "Jane <script>");
        let errors = validate_step(FilingType::Trademark, 0, &fields, today());
        assert!(errors.contains("ownerName"));

        fields.set("ownerName", "O'Brien & Sons, Inc.");
        assert!(validate_step(FilingType::Trademark, 0, &fields, today()).is_empty());
    }

    #[test]
    fn length_ceiling_is_enforced() {
        let mut fields = trademark_step0();
        fields.set("ownerAddress", "x".repeat(501));
        let errors = validate_step(FilingType::Trademark, 0, &fields, today());
        assert_eq!(
            errors.get("ownerAddress"),
            Some("Owner address must be at most 500 characters")
        );
    }

    #[test]
    fn dates_must_be_valid_and_not_in_the_future() {
        let mut fields = FieldSet::new();
        fields.set("filingBasis", USE_IN_COMMERCE);
        fields.set("firstUseAnywhere", "2030-01-01");
        fields.set("firstUseCommerce", "01/02/2020");
        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        assert_eq!(
            errors.get("firstUseAnywhere"),
            Some("Date of first use anywhere cannot be in the future")
        );
        assert!(errors.get("firstUseCommerce").unwrap().contains("YYYY-MM-DD"));
    }

    #[test]
    fn first_use_in_commerce_cannot_predate_first_use() {
        let mut fields: FieldSet = [
            ("goodsServices", "Software"),
            ("filingBasis", USE_IN_COMMERCE),
            ("firstUseAnywhere", "2020-05-01"),
            ("firstUseCommerce", "2020-01-01"),
            ("typeOfCommerce", "Interstate"),
            ("markUsage", "Printed on packaging"),
        ]
        .into_iter()
        .collect();
        fields.set("internationalClasses", vec!["9".to_string()]);
        fields.set("specimen", file("application/pdf", 10));

        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("firstUseCommerce"));
    }

    #[test]
    fn file_fields_check_type_and_size() {
        let mut fields = FieldSet::new();
        fields.set("filingBasis", USE_IN_COMMERCE);
        fields.set("specimen", file("application/zip", 10));
        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        assert!(errors.get("specimen").unwrap().contains("must be one of"));

        fields.set("specimen", file("image/png", MAX_FILE_SIZE_BYTES + 1));
        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        assert_eq!(errors.get("specimen"), Some("Specimen must be 10 MB or smaller"));
    }

    #[test]
    fn priority_fields_follow_the_priority_flag() {
        let mut fields = FieldSet::new();
        let errors = validate_step(FilingType::Patent, 3, &fields, today());
        assert!(!errors.contains("priorityCountry"));

        fields.set("priorityClaim", true);
        let errors = validate_step(FilingType::Patent, 3, &fields, today());
        assert!(errors.contains("priorityCountry"));
        assert!(errors.contains("priorityApplicationNumber"));
        assert!(errors.contains("priorityFilingDate"));
    }

    #[test]
    fn declaration_must_be_accepted() {
        let mut fields = FieldSet::new();
        fields.set("declarationAccepted", false);
        let errors = validate_step(FilingType::Trademark, 2, &fields, today());
        assert_eq!(errors.get("declarationAccepted"), Some("Declaration must be accepted"));
    }

    #[test]
    fn nice_classes_must_be_in_range() {
        let mut fields = FieldSet::new();
        fields.set("internationalClasses", vec!["9".to_string(), "46".to_string()]);
        let errors = validate_step(FilingType::Trademark, 1, &fields, today());
        assert!(errors.contains("internationalClasses"));
    }

    #[test]
    fn copyright_year_cannot_be_in_the_future() {
        let mut fields = FieldSet::new();
        fields.set("yearOfCompletion", "2099");
        let errors = validate_step(FilingType::Copyright, 0, &fields, today());
        assert_eq!(
            errors.get("yearOfCompletion"),
            Some("Year of completion cannot be in the future")
        );
    }

    #[test]
    fn publication_date_follows_publication_status() {
        let mut fields: FieldSet = [
            ("workTitle", "Collected Poems"),
            ("workType", "Literary Work"),
            ("yearOfCompletion", "2020"),
            ("publicationStatus", "Unpublished"),
        ]
        .into_iter()
        .collect();
        assert!(validate_step(FilingType::Copyright, 0, &fields, today()).is_empty());

        fields.set("publicationStatus", "Published");
        let errors = validate_step(FilingType::Copyright, 0, &fields, today());
        assert_eq!(errors.get("publicationDate"), Some("Date of first publication is required"));
        assert_eq!(errors.len(), 1);

        fields.set("publicationDate", "2021-03-15");
        assert!(validate_step(FilingType::Copyright, 0, &fields, today()).is_empty());
    }

    #[test]
    fn employer_name_follows_work_made_for_hire() {
        let mut fields: FieldSet = [
            ("authorName", "Jane Doe"),
            ("claimantName", "Jane Doe"),
            ("claimantAddress", "1 Main St"),
        ]
        .into_iter()
        .collect();
        fields.set("workMadeForHire", false);
        assert!(validate_step(FilingType::Copyright, 1, &fields, today()).is_empty());

        fields.set("workMadeForHire", true);
        let errors = validate_step(FilingType::Copyright, 1, &fields, today());
        assert_eq!(errors.get("employerName"), Some("Employer name is required"));
        assert_eq!(errors.len(), 1);

        fields.set("employerName", "Acme Publishing, Inc.");
        assert!(validate_step(FilingType::Copyright, 1, &fields, today()).is_empty());
    }

    #[test]
    fn wrong_value_kind_is_reported() {
        let mut fields = trademark_step0();
        fields.set("trademarkName", vec!["Acme".to_string()]);
        let errors = validate_step(FilingType::Trademark, 0, &fields, today());
        assert_eq!(errors.get("trademarkName"), Some("Trademark name has an invalid value"));
    }

    #[test]
    fn describe_steps_reflects_conditional_requirements() {
        let mut fields = FieldSet::new();
        fields.set("filingBasis", USE_IN_COMMERCE);
        let steps = describe_steps(FilingType::Trademark, &fields);
        let specimen = steps[1].fields.iter().find(|f| f.name == "specimen").unwrap();
        assert!(specimen.required);
        assert_eq!(specimen.kind, "file");
    }

    #[test]
    fn first_step_with_errors_points_at_earliest_step() {
        let errors = validate_filing(FilingType::Patent, &FieldSet::new(), today());
        assert_eq!(first_step_with_errors(FilingType::Patent, &errors), Some(0));
    }
}
