//! Financial models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{join_search, new_id, now_rfc3339, text_enum, Entity, Table};

text_enum! {
    pub enum TransactionKind {
        Income => "income",
        Expense => "expense",
    }
}

/// Category used to group transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialCategory {
    pub id: String,
    pub name: String,
    pub kind: TransactionKind,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFinancialCategory {
    pub name: String,
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinancialCategoryPatch {
    pub name: Option<String>,
}

impl FinancialCategory {
    pub fn from_new(new: NewFinancialCategory) -> Self {
        Self {
            id: new_id(),
            name: new.name,
            kind: new.kind,
            created_at: now_rfc3339(),
        }
    }
}

impl Entity for FinancialCategory {
    const TABLE: Table = Table::FinancialCategories;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        self.name.clone()
    }
}

/// An income or expense entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialTransaction {
    pub id: String,
    pub kind: TransactionKind,
    /// Always positive; direction comes from `kind`
    pub amount: f64,
    pub description: String,
    pub category_id: Option<String>,
    /// Category name, joined on list
    #[serde(default)]
    pub category_name: Option<String>,
    pub patient_id: Option<String>,
    pub date: NaiveDate,
    pub payment_method: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFinancialTransaction {
    pub kind: TransactionKind,
    pub amount: f64,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinancialTransactionPatch {
    pub kind: Option<TransactionKind>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub patient_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub payment_method: Option<String>,
}

impl FinancialTransaction {
    pub fn from_new(new: NewFinancialTransaction) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            kind: new.kind,
            amount: new.amount,
            description: new.description,
            category_id: new.category_id,
            category_name: None,
            patient_id: new.patient_id,
            date: new.date,
            payment_method: new.payment_method,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: FinancialTransactionPatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if patch.category_id.is_some() {
            self.category_id = patch.category_id;
            self.category_name = None;
        }
        if patch.patient_id.is_some() {
            self.patient_id = patch.patient_id;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if patch.payment_method.is_some() {
            self.payment_method = patch.payment_method;
        }
        self.updated_at = now_rfc3339();
    }

    /// Amount with sign: positive for income, negative for expense.
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            TransactionKind::Income => self.amount,
            TransactionKind::Expense => -self.amount,
        }
    }
}

impl Entity for FinancialTransaction {
    const TABLE: Table = Table::FinancialTransactions;

    fn id(&self) -> &str {
        &self.id
    }

    // Newest first.
    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        join_search([
            Some(self.description.as_str()),
            self.category_name.as_deref(),
            self.payment_method.as_deref(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_amount() {
        let mut tx = FinancialTransaction::from_new(NewFinancialTransaction {
            kind: TransactionKind::Expense,
            amount: 120.0,
            description: "Rent".into(),
            category_id: None,
            patient_id: None,
            date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            payment_method: None,
        });
        assert_eq!(tx.signed_amount(), -120.0);

        tx.apply(FinancialTransactionPatch {
            kind: Some(TransactionKind::Income),
            ..Default::default()
        });
        assert_eq!(tx.signed_amount(), 120.0);
    }
}
