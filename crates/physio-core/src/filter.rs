//! List filtering: accent-insensitive text search and inclusive date ranges.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::models::Entity;

/// Minimum Jaro-Winkler similarity for a word to count as a typo match.
pub const FUZZY_THRESHOLD: f64 = 0.9;

/// Query words shorter than this only match as substrings.
const FUZZY_MIN_LEN: usize = 3;

/// Lowercase and strip Portuguese diacritics.
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Case- and accent-insensitive text filter with a typo fallback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFilter {
    query: String,
    words: Vec<String>,
}

impl TextFilter {
    pub fn new(query: &str) -> Self {
        let query = fold(query.trim());
        let words = query.split_whitespace().map(str::to_string).collect();
        Self { query, words }
    }

    /// An empty filter matches everything.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        let text = fold(text);
        if text.contains(&self.query) {
            return true;
        }

        let text_words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        self.words.iter().all(|word| {
            text.contains(word.as_str())
                || (word.chars().count() >= FUZZY_MIN_LEN
                    && text_words
                        .iter()
                        .any(|candidate| jaro_winkler(word, candidate) >= FUZZY_THRESHOLD))
        })
    }

    /// Rows whose search text matches, in their original order.
    pub fn apply<'a, E: Entity>(&self, rows: &'a [E]) -> Vec<&'a E> {
        rows.iter().filter(|row| self.matches(&row.search_text())).collect()
    }
}

/// Inclusive date range; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    /// Rows whose date falls in the range, in their original order.
    pub fn apply<'a, T>(&self, rows: &'a [T], date_of: impl Fn(&T) -> NaiveDate) -> Vec<&'a T> {
        rows.iter().filter(|row| self.contains(date_of(row))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPatient, Patient};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold("João Conceição"), "joao conceicao");
        assert_eq!(fold("ÁGUA"), "agua");
    }

    #[test]
    fn test_text_filter_accents_and_case() {
        let filter = TextFilter::new("joao");
        assert!(filter.matches("João Silva"));
        assert!(TextFilter::new("SILV").matches("João Silva"));
        assert!(TextFilter::new("").matches("anything"));
        assert!(!TextFilter::new("pedro").matches("João Silva"));
    }

    #[test]
    fn test_text_filter_typo_fallback() {
        assert!(TextFilter::new("marai").matches("Maria Souza"));
        assert!(TextFilter::new("marai souza").matches("Maria Souza"));
        assert!(!TextFilter::new("marai costa").matches("Maria Souza"));
        // Short words never fuzzy match.
        assert!(!TextFilter::new("mx").matches("Maria"));
    }

    #[test]
    fn test_text_filter_over_entities() {
        let rows: Vec<Patient> = ["Ana Lúcia", "Bruno", "Anabela"]
            .into_iter()
            .map(|name| {
                Patient::from_new(NewPatient {
                    name: name.into(),
                    ..Default::default()
                })
            })
            .collect();
        let names: Vec<&str> = TextFilter::new("ana")
            .apply(&rows)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Ana Lúcia", "Anabela"]);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let range = DateRange::new(Some(day(10)), Some(day(20)));
        assert!(range.contains(day(10)));
        assert!(range.contains(day(20)));
        assert!(!range.contains(day(9)));
        assert!(!range.contains(day(21)));

        let open = DateRange::new(None, Some(day(5)));
        assert!(open.contains(day(1)));
        assert!(DateRange::default().contains(day(31)));
    }

    #[test]
    fn test_date_range_apply() {
        let dates = vec![day(9), day(10), day(15), day(21)];
        let kept = DateRange::new(Some(day(10)), Some(day(20))).apply(&dates, |d| *d);
        assert_eq!(kept, vec![&day(10), &day(15)]);
    }
}
