//! Session package models.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{join_search, new_id, now_rfc3339, text_enum, Entity, Table};

/// A bundle of sessions/services sold at a fixed price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    /// Service names included in the package
    pub services: Vec<String>,
    pub sessions_included: u32,
    /// Days the package stays valid after purchase
    pub validity_days: u32,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewPackage {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub services: Vec<String>,
    pub sessions_included: u32,
    pub validity_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackagePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub services: Option<Vec<String>>,
    pub sessions_included: Option<u32>,
    pub validity_days: Option<u32>,
    pub is_active: Option<bool>,
}

impl Package {
    pub fn from_new(new: NewPackage) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            name: new.name,
            description: new.description,
            price: new.price,
            services: new.services,
            sessions_included: new.sessions_included,
            validity_days: new.validity_days,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: PackagePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(services) = patch.services {
            self.services = services;
        }
        if let Some(sessions) = patch.sessions_included {
            self.sessions_included = sessions;
        }
        if let Some(days) = patch.validity_days {
            self.validity_days = days;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now_rfc3339();
    }

    /// Expiry date for a package bought on `purchased_at`.
    pub fn expires_on(&self, purchased_at: NaiveDate) -> NaiveDate {
        purchased_at + chrono::Duration::days(i64::from(self.validity_days))
    }
}

impl Entity for Package {
    const TABLE: Table = Table::Packages;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        let services = self.services.join(" ");
        join_search([
            Some(self.name.as_str()),
            self.description.as_deref(),
            Some(services.as_str()),
        ])
    }
}

text_enum! {
    pub enum ProposalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

/// A package offered to a patient, awaiting their decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageProposal {
    pub id: String,
    pub patient_id: String,
    pub package_id: String,
    /// Offered price, may differ from the package list price
    pub price: f64,
    pub status: ProposalStatus,
    pub notes: Option<String>,
    pub decided_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPackageProposal {
    pub patient_id: String,
    pub package_id: String,
    /// Defaults to the package price
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackageProposalPatch {
    pub price: Option<f64>,
    pub notes: Option<String>,
}

impl PackageProposal {
    pub fn new(new: NewPackageProposal, list_price: f64) -> Self {
        let now = now_rfc3339();
        Self {
            id: new_id(),
            patient_id: new.patient_id,
            package_id: new.package_id,
            price: new.price.unwrap_or(list_price),
            status: ProposalStatus::Pending,
            notes: new.notes,
            decided_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: PackageProposalPatch) {
        if let Some(price) = patch.price {
            self.price = price;
        }
        if patch.notes.is_some() {
            self.notes = patch.notes;
        }
        self.updated_at = now_rfc3339();
    }
}

impl Entity for PackageProposal {
    const TABLE: Table = Table::PackageProposals;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    fn search_text(&self) -> String {
        self.notes.clone().unwrap_or_default()
    }
}

/// A package owned by a patient, created when a proposal is approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientPackage {
    pub id: String,
    pub patient_id: String,
    pub package_id: String,
    pub proposal_id: String,
    pub sessions_remaining: u32,
    pub purchased_at: NaiveDate,
    pub expires_at: NaiveDate,
    pub created_at: String,
}

impl PatientPackage {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        today > self.expires_at
    }
}

impl Entity for PatientPackage {
    const TABLE: Table = Table::PatientPackages;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.purchased_at
            .cmp(&a.purchased_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Everything written by a proposal approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalApproval {
    pub proposal: PackageProposal,
    pub patient_package: PatientPackage,
    /// Income for the sale; `None` for a complimentary (zero-price) package
    pub transaction: Option<super::FinancialTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_on() {
        let package = Package::from_new(NewPackage {
            name: "10 sessions".into(),
            price: 900.0,
            sessions_included: 10,
            validity_days: 90,
            ..Default::default()
        });
        let bought = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(
            package.expires_on(bought),
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
        );
    }

    #[test]
    fn test_proposal_defaults_to_list_price() {
        let proposal = PackageProposal::new(
            NewPackageProposal {
                patient_id: "p1".into(),
                package_id: "pkg".into(),
                price: None,
                notes: None,
            },
            450.0,
        );
        assert_eq!(proposal.price, 450.0);
        assert_eq!(proposal.status, ProposalStatus::Pending);
    }
}
