//! Field validation and CPF handling.
//!
//! Checks push into a [`ValidationErrors`] instead of returning early, so a
//! form reports every bad field at once.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Field name to message. Only the first error per field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.fields {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

// =========================================================================
// Checks
// =========================================================================

/// Non-blank text.
pub fn require(errs: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errs.add(field, "is required");
    }
}

pub fn min_len(errs: &mut ValidationErrors, field: &str, value: &str, min: usize) {
    if value.trim().chars().count() < min {
        errs.add(field, format!("must have at least {min} characters"));
    }
}

pub fn range<T>(errs: &mut ValidationErrors, field: &str, value: T, min: T, max: T)
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        errs.add(field, format!("must be between {min} and {max}"));
    }
}

/// Minimal address shape: `local@domain.tld`, no whitespace.
pub fn is_email(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

pub fn email(errs: &mut ValidationErrors, field: &str, value: &str) {
    if !is_email(value) {
        errs.add(field, "must be a valid email address");
    }
}

/// Present optional email must be well formed.
pub fn optional_email(errs: &mut ValidationErrors, field: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        email(errs, field, value);
    }
}

// =========================================================================
// CPF
// =========================================================================

/// Number of digits in a CPF.
pub const CPF_DIGITS: usize = 11;

/// Format CPF input as the user types.
///
/// Keeps at most 11 digits and inserts the `000.000.000-00` separators
/// progressively, so partial input stays partial.
pub fn format_cpf(input: &str) -> String {
    let digits: Vec<char> = input
        .chars()
        .filter(char::is_ascii_digit)
        .take(CPF_DIGITS)
        .collect();

    let mut out = String::with_capacity(14);
    for (i, d) in digits.iter().enumerate() {
        match i {
            3 | 6 => out.push('.'),
            9 => out.push('-'),
            _ => {}
        }
        out.push(*d);
    }
    out
}

/// Whether `input` holds a CPF with valid check digits. Separators are
/// ignored; repeated-digit numbers such as `111.111.111-11` are rejected.
pub fn is_valid_cpf(input: &str) -> bool {
    let digits: Vec<u32> = input.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != CPF_DIGITS || digits.iter().all(|&d| d == digits[0]) {
        return false;
    }
    let check = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .zip((2..=len as u32 + 1).rev())
            .map(|(d, w)| d * w)
            .sum();
        (sum * 10) % 11 % 10
    };
    check(9) == digits[9] && check(10) == digits[10]
}

pub fn cpf(errs: &mut ValidationErrors, field: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        if !is_valid_cpf(value) {
            errs.add(field, "must be a valid CPF");
        }
    }
}
