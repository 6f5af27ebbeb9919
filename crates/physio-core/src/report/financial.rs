//! Financial report over an inclusive date range.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::escape_csv;
use crate::filter::DateRange;
use crate::models::{Entity, FinancialTransaction, TransactionKind};

/// Category label for transactions without one.
pub const UNCATEGORIZED: &str = "Sem categoria";

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Subtotal for one category and kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: String,
    pub kind: TransactionKind,
    pub total: f64,
    pub count: usize,
}

/// Totals and rows for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialReport {
    pub range: DateRange,
    pub total_income: f64,
    pub total_expense: f64,
    /// Income minus expense
    pub balance: f64,
    pub by_category: Vec<CategoryTotal>,
    /// Rows in the range, newest first
    pub transactions: Vec<FinancialTransaction>,
}

impl FinancialReport {
    /// Build a report from `transactions` dated within `range`, bounds included.
    pub fn build(transactions: &[FinancialTransaction], range: DateRange) -> Self {
        let mut rows: Vec<FinancialTransaction> = range
            .apply(transactions, |t| t.date)
            .into_iter()
            .cloned()
            .collect();
        rows.sort_by(FinancialTransaction::list_order);

        let mut total_income = 0.0;
        let mut total_expense = 0.0;
        let mut groups: BTreeMap<(&'static str, String), (TransactionKind, f64, usize)> =
            BTreeMap::new();
        for t in &rows {
            match t.kind {
                TransactionKind::Income => total_income += t.amount,
                TransactionKind::Expense => total_expense += t.amount,
            }
            let label = t
                .category_name
                .clone()
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            let entry = groups
                .entry((t.kind.as_str(), label))
                .or_insert((t.kind, 0.0, 0));
            entry.1 += t.amount;
            entry.2 += 1;
        }

        let by_category = groups
            .into_iter()
            .map(|((_, category), (kind, total, count))| CategoryTotal {
                category,
                kind,
                total: cents(total),
                count,
            })
            .collect();

        Self {
            range,
            total_income: cents(total_income),
            total_expense: cents(total_expense),
            balance: cents(total_income - total_expense),
            by_category,
            transactions: rows,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One line per transaction.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("date,kind,description,category,payment_method,amount\n");

        for t in &self.transactions {
            csv.push_str(&format!(
                "{},{},{},{},{},{:.2}\n",
                t.date.format("%Y-%m-%d"),
                t.kind,
                escape_csv(&t.description),
                escape_csv(t.category_name.as_deref().unwrap_or(UNCATEGORIZED)),
                escape_csv(t.payment_method.as_deref().unwrap_or("")),
                t.signed_amount(),
            ));
        }

        csv
    }

    /// `relatorio-financeiro-<start>-<end>.csv`, open bounds written as `inicio`/`hoje`.
    pub fn file_name(&self, ext: &str) -> String {
        let start = self
            .range
            .start
            .map_or_else(|| "inicio".to_string(), |d| d.format("%Y-%m-%d").to_string());
        let end = self
            .range
            .end
            .map_or_else(|| "hoje".to_string(), |d| d.format("%Y-%m-%d").to_string());
        format!("relatorio-financeiro-{start}-{end}.{ext}")
    }
}
