//! Generación de documentos a partir de los campos de una solicitud y
//! exportación a HTML.
//!
//! Las plantillas son fijas por tipo de solicitud y se registran una sola vez
//! en un registro Handlebars. Los campos ausentes se renderizan vacíos.

use std::collections::BTreeMap;

use chrono::Utc;
use handlebars::Handlebars;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::{FieldValue, Filing, FilingType};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("template error: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("Unknown document: {0}")]
    UnknownDocument(String),
}

/// Documentos generados: nombre del documento → texto.
pub type GeneratedDocuments = BTreeMap<String, String>;

const TRADEMARK_APPLICATION: &str = "\
TRADEMARK/SERVICE MARK APPLICATION, PRINCIPAL REGISTER

MARK: {{trademarkName}}
Mark type: {{markType}}
{{#if markDescription}}Description of the mark: {{markDescription}}
{{/if}}
APPLICANT
Name: {{ownerName}}
Entity type: {{ownerType}}
Address: {{ownerAddress}}
Email: {{ownerEmail}}

GOODS AND SERVICES
International class(es): {{internationalClasses}}
Identification: {{goodsServices}}

FILING BASIS
{{filingBasis}}
{{#if firstUseAnywhere}}Date of first use anywhere: {{firstUseAnywhere}}
Date of first use in commerce: {{firstUseCommerce}}
Type of commerce: {{typeOfCommerce}}
Manner of use: {{markUsage}}
Specimen: {{specimen}}
{{/if}}{{#if priorityCountry}}
PRIORITY CLAIM
Country: {{priorityCountry}}
Application number: {{priorityApplicationNumber}}
Filing date: {{priorityFilingDate}}
{{/if}}
Prepared on {{generatedOn}}.
";

const DECLARATION_OF_USE: &str = "\
DECLARATION

The signatory believes that the applicant, {{ownerName}}, is the owner of the
mark {{trademarkName}} sought to be registered; that the mark is in use in
commerce and was in use in commerce as of the filing date of the application
for the goods and services identified therein; that to the best of the
signatory's knowledge and belief no other person has the right to use the
mark in commerce, either in the identical form or in such near resemblance as
to be likely to cause confusion or mistake.

The signatory being warned that willful false statements are punishable by
fine or imprisonment, or both, under 18 U.S.C. 1001, declares that all
statements made of their own knowledge are true.

Signature: /{{signatoryName}}/
Signatory's name: {{signatoryName}}
Signatory's position: {{signatoryTitle}}
Date: {{signatureDate}}
";

const PATENT_SPECIFICATION: &str = "\
{{inventionTitle}}

Application type: {{applicationType}}
Inventor: {{inventorName}}, {{inventorAddress}} ({{inventorCitizenship}})

TECHNICAL FIELD
{{technicalField}}

BACKGROUND
{{background}}

SUMMARY
{{summary}}

{{#if drawings}}BRIEF DESCRIPTION OF THE DRAWINGS
See attached drawings ({{drawings}}).

{{/if}}DETAILED DESCRIPTION
{{detailedDescription}}
";

const PATENT_CLAIMS: &str = "\
CLAIMS

What is claimed is:

{{claims}}
";

const PATENT_ABSTRACT: &str = "\
ABSTRACT OF THE DISCLOSURE

{{abstract}}
";

const INVENTOR_DECLARATION: &str = "\
DECLARATION (37 CFR 1.63) FOR UTILITY OR DESIGN APPLICATION

Title of invention: {{inventionTitle}}

As the below named inventor, I hereby declare that this declaration is
directed to the attached application; the above-identified application was
made or authorized to be made by me; and I believe that I am the original
inventor or an original joint inventor of a claimed invention in the
application.

I hereby acknowledge that any willful false statement made in this
declaration is punishable under 18 U.S.C. 1001 by fine or imprisonment of not
more than five (5) years, or both.

Inventor: {{inventorName}}
Residence: {{inventorAddress}}
Citizenship: {{inventorCitizenship}}
Entity status: {{entityStatus}}

Signature: /{{signatoryName}}/
Date: {{signatureDate}}
";

const COPYRIGHT_REGISTRATION: &str = "\
APPLICATION FOR COPYRIGHT REGISTRATION

Title of work: {{workTitle}}
Type of work: {{workType}}
Year of completion: {{yearOfCompletion}}
Publication: {{publicationStatus}}{{#if publicationDate}} ({{publicationDate}}){{/if}}

AUTHOR
Name: {{authorName}}
{{#if authorCitizenship}}Citizenship: {{authorCitizenship}}
{{/if}}Work made for hire: {{workMadeForHire}}
{{#if employerName}}Employer for hire: {{employerName}}
{{/if}}
COPYRIGHT CLAIMANT
Name: {{claimantName}}
Address: {{claimantAddress}}

DEPOSIT
{{depositCopy}}
";

const CERTIFICATION_STATEMENT: &str = "\
CERTIFICATION

I, the undersigned, hereby certify that I am the author, copyright claimant,
or owner of exclusive rights, or the authorized agent of the same, of the
work identified in this application ({{workTitle}}), and that the information
given in this application is correct to the best of my knowledge.

Name: {{certifierName}}
Date: {{certificationDate}}
";

const EXPORT_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<style>
body { font-family: Georgia, "Times New Roman", serif; max-width: 800px; margin: 40px auto; color: #222; }
h1 { font-size: 1.4em; border-bottom: 1px solid #ccc; padding-bottom: 8px; }
pre { white-space: pre-wrap; font-family: inherit; line-height: 1.5; }
</style>
</head>
<body>
<h1>{{title}}</h1>
<pre>{{body}}</pre>
</body>
</html>
"#;

const EXPORT_TEMPLATE: &str = "__export_page";

/// Nombres y plantillas por tipo de solicitud, en el orden de presentación.
fn templates_for(filing_type: FilingType) -> &'static [(&'static str, &'static str)] {
    match filing_type {
        FilingType::Trademark => &[
            ("Trademark Application", TRADEMARK_APPLICATION),
            ("Declaration of Use", DECLARATION_OF_USE),
        ],
        FilingType::Patent => &[
            ("Patent Specification", PATENT_SPECIFICATION),
            ("Patent Claims", PATENT_CLAIMS),
            ("Abstract", PATENT_ABSTRACT),
            ("Inventor Declaration", INVENTOR_DECLARATION),
        ],
        FilingType::Copyright => &[
            ("Copyright Registration", COPYRIGHT_REGISTRATION),
            ("Certification Statement", CERTIFICATION_STATEMENT),
        ],
    }
}

pub fn document_names(filing_type: FilingType) -> Vec<&'static str> {
    templates_for(filing_type).iter().map(|(name, _)| *name).collect()
}

pub struct DocumentGenerator {
    /// Plantillas de texto, sin escape.
    text: Handlebars<'static>,
    /// Página HTML de exportación, con escape HTML.
    html: Handlebars<'static>,
}

impl DocumentGenerator {
    pub fn new() -> Result<Self, DocumentError> {
        let mut text = Handlebars::new();
        text.set_strict_mode(false);
        text.register_escape_fn(handlebars::no_escape);
        for filing_type in FilingType::ALL {
            for (name, template) in templates_for(filing_type) {
                text.register_template_string(name, template)?;
            }
        }

        let mut html = Handlebars::new();
        html.register_template_string(EXPORT_TEMPLATE, EXPORT_PAGE)?;

        Ok(Self { text, html })
    }

    fn template_data(filing: &Filing) -> Value {
        let mut data = Map::new();
        for (name, value) in filing.fields.iter() {
            match value {
                // Los flags negativos se muestran como "No" pero no se usan en bloques {{#if}}.
                FieldValue::Flag(false) => {
                    data.insert(name.clone(), json!("No"));
                }
                value if value.is_empty() => {}
                value => {
                    data.insert(name.clone(), json!(value.to_display()));
                }
            }
        }
        data.insert("filingId".into(), json!(filing.id.to_string()));
        data.insert(
            "generatedOn".into(),
            json!(Utc::now().date_naive().format("%Y-%m-%d").to_string()),
        );
        Value::Object(data)
    }

    /// Rellena todas las plantillas del tipo de la solicitud.
    pub fn generate(&self, filing: &Filing) -> Result<GeneratedDocuments, DocumentError> {
        let data = Self::template_data(filing);
        let mut documents = GeneratedDocuments::new();
        for (name, _) in templates_for(filing.filing_type) {
            documents.insert(name.to_string(), self.text.render(name, &data)?);
        }
        Ok(documents)
    }

    pub fn generate_one(&self, filing: &Filing, name: &str) -> Result<String, DocumentError> {
        if !document_names(filing.filing_type).contains(&name) {
            return Err(DocumentError::UnknownDocument(name.to_string()));
        }
        Ok(self.text.render(name, &Self::template_data(filing))?)
    }

    /// Documento HTML autocontenido con el texto escapado.
    pub fn export_html(&self, name: &str, text: &str) -> Result<String, DocumentError> {
        Ok(self
            .html
            .render(EXPORT_TEMPLATE, &json!({ "title": name, "body": text }))?)
    }
}

/// Nombre de fichero para la descarga de un documento exportado.
pub fn export_file_name(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("{}.html", slug.trim_matches('-'))
}
