//! Construcción de prompts para los análisis de IA.

use crate::models::{FieldValue, Filing, FilingType, SupportingFile};
use crate::validation::steps_for;

/// Resumen legible de los campos de una solicitud, en el orden de los pasos
/// del asistente y con sus etiquetas.
pub fn filing_summary(filing: &Filing) -> String {
    let mut out = String::new();
    for step in steps_for(filing.filing_type) {
        let mut lines = Vec::new();
        for rule in step.fields {
            match filing.fields.get(rule.name) {
                Some(value) if !value.is_empty() => {
                    let shown = match value {
                        FieldValue::File(file) => format!("{} ({})", file.file_name, file.mime_type),
                        other => other.to_display(),
                    };
                    lines.push(format!("- {}: {}", rule.label, shown));
                }
                _ => {}
            }
        }
        if !lines.is_empty() {
            out.push_str(&format!("## {}\n{}\n\n", step.title, lines.join("\n")));
        }
    }
    if out.is_empty() {
        out.push_str("(no information provided yet)\n");
    }
    out.trim_end().to_string()
}

fn files_section(files: &[(SupportingFile, Option<String>)]) -> String {
    if files.is_empty() {
        return "No supporting documents have been uploaded.".to_string();
    }
    files
        .iter()
        .map(|(file, excerpt)| {
            let mut line = format!(
                "- [{}] {} ({}, {} bytes)",
                file.category, file.file_name, file.mime_type, file.size
            );
            if let Some(excerpt) = excerpt {
                line.push_str(&format!("\n  Excerpt: \"{excerpt}\""));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const JSON_RULES: &str = "Respond ONLY with a single JSON object that validates against the schema \
below. Do not include explanations, Markdown or any text outside the JSON object.";

pub fn compliance_prompt(
    filing: &Filing,
    files: &[(SupportingFile, Option<String>)],
    schema: &str,
) -> String {
    let scope = match filing.filing_type {
        FilingType::Trademark => {
            "Evaluate this trademark application against the requirements of the USPTO \
             (Trademark Act, TMEP) and, where relevant, the Madrid Protocol. Group the \
             requirements by jurisdiction."
        }
        FilingType::Copyright => {
            "Evaluate this copyright registration against the requirements of the U.S. \
             Copyright Office (17 U.S.C., Compendium III). Group the requirements by jurisdiction."
        }
        FilingType::Patent => {
            "Evaluate this patent application against 35 U.S.C. 101, 102, 103 and 112 and the \
             USPTO formal requirements (MPEP). Return a flat list of requirements."
        }
    };

    let mut prompt = format!(
        "You are reviewing a {} filing titled \"{}\" for compliance.\n{}\n\n\
         Each requirement must have a status of \"met\", \"partial\" or \"missing\", a short \
         explanation in \"details\" and a concrete \"recommendation\". \"overallScore\" is an \
         integer from 0 to 100.\n\n# Filing data\n{}\n",
        filing.filing_type.display_name(),
        filing.title(),
        scope,
        filing_summary(filing),
    );
    if filing.filing_type == FilingType::Trademark {
        prompt.push_str(&format!("\n# Supporting documents\n{}\n", files_section(files)));
    }
    prompt.push_str(&format!("\n{JSON_RULES}\n\n# Schema\n{schema}\n"));
    prompt
}

pub fn approval_prompt(filing: &Filing, schema: &str) -> String {
    format!(
        "Estimate the likelihood (0-100) that this {} application titled \"{}\" will be \
         approved/registered without a final refusal. List its main strengths, the main risks \
         and concrete recommendations to improve the chances.\n\n# Filing data\n{}\n\n{}\n\n# Schema\n{}\n",
        filing.filing_type.display_name(),
        filing.title(),
        filing_summary(filing),
        JSON_RULES,
        schema,
    )
}

pub fn timeline_prompt(filing: &Filing, schema: &str) -> String {
    format!(
        "Estimate the processing timeline for this {} application titled \"{}\" filed today \
         with the responsible U.S. office. Give the total estimated months and the main \
         milestones in order, each with its estimated duration in months.\n\n# Filing data\n{}\n\n{}\n\n# Schema\n{}\n",
        filing.filing_type.display_name(),
        filing.title(),
        filing_summary(filing),
        JSON_RULES,
        schema,
    )
}

pub fn prior_art_prompt(filing: &Filing, schema: &str) -> String {
    format!(
        "Act as a patent searcher. Based on your knowledge, list published patents or \
         publications that could be relevant prior art for the invention below, explain the \
         relevance of each one and summarise the novelty risk. Do not invent reference \
         numbers; if you are unsure of a number, describe the reference instead.\n\n\
         # Invention\n{}\n\n{}\n\n# Schema\n{}\n",
        filing_summary(filing),
        JSON_RULES,
        schema,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileCategory;
    use chrono::Utc;
    use uuid::Uuid;

    fn trademark() -> Filing {
        let mut filing = Filing::new_draft(FilingType::Trademark, None);
        filing.fields.set("trademarkName", "Acme");
        filing.fields.set("ownerName", "Jane Doe");
        filing
    }

    #[test]
    fn summary_uses_step_titles_and_labels() {
        let summary = filing_summary(&trademark());
        assert!(summary.starts_with("## Mark & Owner"));
        assert!(summary.contains("- Trademark name: Acme"));
        assert!(summary.contains("- Owner name: Jane Doe"));
        assert!(!summary.contains("Goods, Services"));
    }

    #[test]
    fn trademark_compliance_prompt_lists_documents() {
        let filing = trademark();
        let file = SupportingFile {
            id: Uuid::new_v4(),
            filing_id: filing.id,
            category: FileCategory::Specimen,
            file_name: "label.pdf".to_string(),
            storage_path: "x".to_string(),
            size: 10,
            mime_type: "application/pdf".to_string(),
            uploaded_at: Utc::now(),
        };
        let prompt = compliance_prompt(&filing, &[(file, Some("ACME brand".to_string()))], "{}");
        assert!(prompt.contains("[specimen] label.pdf"));
        assert!(prompt.contains("Excerpt: \"ACME brand\""));
        assert!(prompt.contains("# Schema"));
    }

    #[test]
    fn patent_compliance_prompt_has_no_documents_section() {
        let mut filing = Filing::new_draft(FilingType::Patent, None);
        filing.fields.set("inventionTitle", "Self-stirring mug");
        let prompt = compliance_prompt(&filing, &[], "{}");
        assert!(prompt.contains("flat list"));
        assert!(!prompt.contains("# Supporting documents"));
    }
}
