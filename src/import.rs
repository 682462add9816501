//! Bulk import of accounts, raw contacts and exceptions from a JSON document.
//!
//! ```json
//! {
//!   "accounts": [{ "account_type": "com.example", "account_name": "home" }],
//!   "contacts": [{ "account": 0, "display_name": "John Doe", "phones": ["555-1234"] }],
//!   "exceptions": [{ "first": 0, "second": 1, "type": "keep_apart" }]
//! }
//! ```
//!
//! Contacts name their account by index or by `account_name`; exceptions
//! name contacts by their index in `contacts`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::aggregation::{AggregationStats, Aggregator};
use crate::db::{AccountId, Database, ExceptionType, NewAccount, NewRawContact, RawContactId};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportDocument {
    pub accounts: Vec<NewAccount>,
    pub contacts: Vec<ImportedContact>,
    pub exceptions: Vec<ImportedException>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportedContact {
    pub account: AccountRef,
    #[serde(flatten)]
    pub contact: NewRawContact,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AccountRef {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportedException {
    pub first: usize,
    pub second: usize,
    #[serde(rename = "type")]
    pub exception_type: ExceptionType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub accounts: usize,
    pub contacts: usize,
    pub exceptions: usize,
    pub aggregation: AggregationStats,
}

impl ImportDocument {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read import file {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse import document")
    }
}

/// Store every record of `document` and aggregate them in one transaction.
pub fn import_document(db: &Database, aggregator: &mut Aggregator, document: &ImportDocument) -> Result<ImportSummary> {
    db.in_transaction(|db| {
        let mut accounts = Vec::with_capacity(document.accounts.len());
        for account in &document.accounts {
            accounts.push(db.find_or_create_account(account)?);
        }

        let mut contacts = Vec::with_capacity(document.contacts.len());
        for (index, imported) in document.contacts.iter().enumerate() {
            let account = resolve_account(document, &accounts, &imported.account)
                .with_context(|| format!("Contact {} has an unknown account", index))?;
            let raw = db.insert_raw_contact(account, &imported.contact)?;
            aggregator.on_insert(db, raw)?;
            contacts.push(raw);
        }

        for exception in &document.exceptions {
            let (a, b) = (
                contact_at(&contacts, exception.first)?,
                contact_at(&contacts, exception.second)?,
            );
            db.set_aggregation_exception(a, b, exception.exception_type)?;
            for raw in [a, b] {
                if let Some(contact) = db.get_raw_contact(raw)? {
                    aggregator.mark_for_aggregation(db, raw, contact.aggregation_mode, true)?;
                }
            }
        }

        let aggregation = aggregator.aggregate_in_transaction(db)?;
        tracing::info!(
            accounts = accounts.len(),
            contacts = contacts.len(),
            exceptions = document.exceptions.len(),
            "Import complete"
        );

        Ok(ImportSummary {
            accounts: accounts.len(),
            contacts: contacts.len(),
            exceptions: document.exceptions.len(),
            aggregation,
        })
    })
}

fn resolve_account(document: &ImportDocument, ids: &[AccountId], reference: &AccountRef) -> Result<AccountId> {
    let index = match reference {
        AccountRef::Index(index) => Some(*index),
        AccountRef::Name(name) => document.accounts.iter().position(|a| &a.account_name == name),
    };
    index
        .and_then(|i| ids.get(i).copied())
        .ok_or_else(|| anyhow!("no account matches {:?}", reference))
}

fn contact_at(contacts: &[RawContactId], index: usize) -> Result<RawContactId> {
    contacts
        .get(index)
        .copied()
        .ok_or_else(|| anyhow!("exception refers to missing contact {}", index))
}
