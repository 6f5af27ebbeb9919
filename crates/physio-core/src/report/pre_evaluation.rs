//! Pre-evaluation print document.

use chrono::NaiveDate;

use super::{document_file_name, escape_html};
use crate::models::{Patient, PreEvaluation};

/// Text shown for an empty or missing field.
pub const NOT_INFORMED: &str = "Não informado";

const TITLE: &str = "Ficha de Pré-Avaliação";
const FILE_PREFIX: &str = "pre-avaliacao";
const PAGE_WIDTH: usize = 72;
const LABEL_WIDTH: usize = 24;

fn or_fallback(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_INFORMED.to_string(),
    }
}

/// A pre-evaluation laid out for printing.
#[derive(Debug, Clone)]
pub struct PreEvaluationDocument<'a> {
    patient: &'a Patient,
    evaluation: &'a PreEvaluation,
    generated_on: NaiveDate,
}

impl<'a> PreEvaluationDocument<'a> {
    pub fn new(patient: &'a Patient, evaluation: &'a PreEvaluation, generated_on: NaiveDate) -> Self {
        Self {
            patient,
            evaluation,
            generated_on,
        }
    }

    /// Patient identification lines.
    pub fn identification(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Paciente", or_fallback(Some(&self.patient.name))),
            ("CPF", or_fallback(self.patient.cpf.as_deref())),
            (
                "Data de nascimento",
                or_fallback(
                    self.patient
                        .birth_date
                        .map(|d| d.format("%d/%m/%Y").to_string())
                        .as_deref(),
                ),
            ),
            ("Telefone", or_fallback(self.patient.phone.as_deref())),
        ]
    }

    /// Clinical fields in print order, with the fallback applied.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let e = self.evaluation;
        let pain = e.pain_intensity.map(|p| format!("{p}/10"));
        vec![
            ("Queixa principal", or_fallback(e.chief_complaint.as_deref())),
            ("Local da dor", or_fallback(e.pain_location.as_deref())),
            ("Intensidade da dor", or_fallback(pain.as_deref())),
            ("Duração dos sintomas", or_fallback(e.symptom_duration.as_deref())),
            ("Histórico médico", or_fallback(e.medical_history.as_deref())),
            ("Medicamentos", or_fallback(e.medications.as_deref())),
            ("Tratamentos anteriores", or_fallback(e.previous_treatments.as_deref())),
            ("Estilo de vida", or_fallback(e.lifestyle.as_deref())),
            ("Objetivos", or_fallback(e.goals.as_deref())),
            ("Observações", or_fallback(e.observations.as_deref())),
        ]
    }

    pub fn file_name(&self, ext: &str) -> String {
        document_file_name(FILE_PREFIX, &self.patient.name, self.generated_on, ext)
    }

    /// Fixed-width plain-text page.
    pub fn to_text(&self) -> String {
        let rule = "=".repeat(PAGE_WIDTH);
        let mut out = String::new();
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!("{TITLE:^PAGE_WIDTH$}\n"));
        out.push_str(&rule);
        out.push('\n');

        for (label, value) in self.identification() {
            push_field(&mut out, label, &value);
        }
        out.push_str(&"-".repeat(PAGE_WIDTH));
        out.push('\n');
        for (label, value) in self.fields() {
            push_field(&mut out, label, &value);
        }

        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!(
            "Gerado em {}\n",
            self.generated_on.format("%d/%m/%Y")
        ));
        out
    }

    /// Standalone printable HTML page.
    pub fn to_html(&self) -> String {
        let mut rows = String::new();
        for (label, value) in self.identification().into_iter().chain(self.fields()) {
            rows.push_str(&format!(
                "<tr><th>{}</th><td>{}</td></tr>\n",
                escape_html(label),
                escape_html(&value).replace('\n', "<br>")
            ));
        }

        format!(
            "<!DOCTYPE html>\n<html lang=\"pt-BR\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>{title} - {name}</title>\n\
             <style>body{{font-family:sans-serif;margin:2cm}}th{{text-align:left;vertical-align:top;padding-right:1em;width:30%}}\
             td{{white-space:pre-wrap}}@media print{{body{{margin:0}}}}</style>\n\
             </head>\n<body>\n<h1>{title}</h1>\n<table>\n{rows}</table>\n\
             <p>Gerado em {date}</p>\n</body>\n</html>\n",
            title = escape_html(TITLE),
            name = escape_html(&self.patient.name),
            rows = rows,
            date = self.generated_on.format("%d/%m/%Y"),
        )
    }
}

/// `label: value`, wrapping long values under the value column.
fn push_field(out: &mut String, label: &str, value: &str) {
    let head = format!("{label}:");
    let width = PAGE_WIDTH - LABEL_WIDTH;
    let mut lines = wrap(value, width).into_iter();
    let first = lines.next().unwrap_or_default();
    out.push_str(&format!("{head:<LABEL_WIDTH$}{first}\n"));
    for line in lines {
        out.push_str(&format!("{:LABEL_WIDTH$}{line}\n", ""));
    }
}

/// Greedy word wrap. Words longer than `width` are split across lines.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace().flat_map(|w| chunks(w, width)) {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }
    lines
}

fn chunks(word: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(width.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPatient, NewPreEvaluation};

    fn patient(name: &str) -> Patient {
        Patient::from_new(NewPatient {
            name: name.into(),
            ..Default::default()
        })
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()
    }

    #[test]
    fn test_empty_fields_render_fallback() {
        let p = patient("Ana Souza");
        let eval = PreEvaluation::from_new(NewPreEvaluation {
            patient_id: p.id.clone(),
            chief_complaint: Some("   ".into()),
            ..Default::default()
        });
        let doc = PreEvaluationDocument::new(&p, &eval, today());

        let fields = doc.fields();
        assert_eq!(fields.len(), 10);
        assert!(fields.iter().all(|(_, v)| v == NOT_INFORMED));

        let text = doc.to_text();
        assert!(text.matches(NOT_INFORMED).count() >= 10);
        assert!(text.contains("Ana Souza"));
        assert!(doc.to_html().matches(NOT_INFORMED).count() >= 10);
    }

    #[test]
    fn test_filled_fields() {
        let p = patient("Ana Souza");
        let eval = PreEvaluation::from_new(NewPreEvaluation {
            patient_id: p.id.clone(),
            chief_complaint: Some("Dor lombar".into()),
            pain_intensity: Some(7),
            ..Default::default()
        });
        let doc = PreEvaluationDocument::new(&p, &eval, today());
        let fields = doc.fields();
        assert_eq!(fields[0].1, "Dor lombar");
        assert_eq!(fields[2].1, "7/10");
        assert!(doc.to_text().contains("Queixa principal:       Dor lombar"));
    }

    #[test]
    fn test_long_values_wrap() {
        let p = patient("Ana");
        let eval = PreEvaluation::from_new(NewPreEvaluation {
            patient_id: p.id.clone(),
            medical_history: Some("palavra ".repeat(30)),
            ..Default::default()
        });
        let text = PreEvaluationDocument::new(&p, &eval, today()).to_text();
        assert!(text.lines().all(|l| l.chars().count() <= PAGE_WIDTH));
    }

    #[test]
    fn test_overlong_word_is_split() {
        let p = patient("Ana");
        let url = format!("https://exames.example.com/{}", "a1b2c3".repeat(20));
        let eval = PreEvaluation::from_new(NewPreEvaluation {
            patient_id: p.id.clone(),
            medications: Some(format!("ver {url} anexo")),
            ..Default::default()
        });
        let text = PreEvaluationDocument::new(&p, &eval, today()).to_text();
        assert!(text.lines().all(|l| l.chars().count() <= PAGE_WIDTH));

        let indent = " ".repeat(LABEL_WIDTH);
        let joined: String = text
            .lines()
            .filter(|l| l.starts_with(&indent) || l.starts_with("Medicamentos"))
            .filter_map(|l| l.get(LABEL_WIDTH..))
            .map(str::trim)
            .collect();
        assert!(joined.contains(&url));
    }

    #[test]
    fn test_wrap_splits_at_width() {
        let lines = wrap("abcdefghij xy", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "xy"]);
    }

    #[test]
    fn test_html_is_escaped() {
        let p = patient("<script>alert(1)</script>");
        let eval = PreEvaluation::from_new(NewPreEvaluation {
            patient_id: p.id.clone(),
            ..Default::default()
        });
        let html = PreEvaluationDocument::new(&p, &eval, today()).to_html();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_file_name() {
        let p = patient("João da Silva");
        let eval = PreEvaluation::from_new(NewPreEvaluation::default());
        let doc = PreEvaluationDocument::new(&p, &eval, today());
        assert_eq!(doc.file_name("pdf"), "pre-avaliacao-joao-da-silva-2026-03-07.pdf");
    }
}
