//! Printable documents and exports.
//!
//! Documents are generated on demand from already-fetched rows and are never
//! stored.

mod financial;
mod pre_evaluation;

pub use financial::*;
pub use pre_evaluation::*;

use chrono::NaiveDate;

use crate::filter::fold;

/// Lowercase, accent-free words joined with `-`.
pub fn slugify(text: &str) -> String {
    fold(text)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// `<prefix>-<slug>-<YYYY-MM-DD>.<ext>`
pub fn document_file_name(prefix: &str, patient_name: &str, date: NaiveDate, ext: &str) -> String {
    let slug = slugify(patient_name);
    let slug = if slug.is_empty() { "paciente".to_string() } else { slug };
    format!("{prefix}-{slug}-{}.{ext}", date.format("%Y-%m-%d"))
}

/// Quote a CSV field when it contains a separator, quote or newline.
pub(crate) fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Escape text for an HTML body or attribute.
pub(crate) fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Maria José da Conceição"), "maria-jose-da-conceicao");
        assert_eq!(slugify("  Ana   O'Neil "), "ana-o-neil");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_document_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            document_file_name("pre-avaliacao", "João Silva", date, "pdf"),
            "pre-avaliacao-joao-silva-2026-03-07.pdf"
        );
        assert_eq!(
            document_file_name("relatorio", "", date, "html"),
            "relatorio-paciente-2026-03-07.html"
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_html("<b>&'\"</b>"), "&lt;b&gt;&amp;&#39;&quot;&lt;/b&gt;");
    }
}
