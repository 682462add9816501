//! Raw contacts and their data items.
//!
//! The insert/update functions here are the minimal write path the engine
//! needs around it; production data normally arrives through a sync layer
//! that writes the same rows.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{
    AccountId, AggregateId, AggregationMode, DataKind, Database, DisplayNameSource,
    RawContactId, PINNED_UNPINNED,
};
use crate::normalize::{self, phone};

/// A raw contact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContact {
    pub id: RawContactId,
    pub account_id: AccountId,
    pub aggregate_id: Option<AggregateId>,
    pub aggregation_mode: AggregationMode,
    pub aggregation_needed: bool,
    pub display_name: Option<String>,
    pub display_name_source: DisplayNameSource,
    pub name_verified: bool,
    pub starred: bool,
    pub pinned: i64,
    pub send_to_voicemail: bool,
    pub custom_ringtone: Option<String>,
    pub times_contacted: i64,
    pub last_contacted: Option<i64>,
    pub source_id: Option<String>,
    pub hidden: bool,
}

const RAW_CONTACT_COLUMNS: &str = r#"
    id, account_id, aggregate_id, aggregation_mode, aggregation_needed,
    display_name, display_name_source, name_verified, starred, pinned,
    send_to_voicemail, custom_ringtone, times_contacted, last_contacted,
    source_id, hidden
"#;

impl RawContact {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawContact {
            id: row.get(0)?,
            account_id: row.get(1)?,
            aggregate_id: row.get(2)?,
            aggregation_mode: row.get(3)?,
            aggregation_needed: row.get(4)?,
            display_name: row.get(5)?,
            display_name_source: row.get(6)?,
            name_verified: row.get(7)?,
            starred: row.get(8)?,
            pinned: row.get(9)?,
            send_to_voicemail: row.get(10)?,
            custom_ringtone: row.get(11)?,
            times_contacted: row.get(12)?,
            last_contacted: row.get(13)?,
            source_id: row.get(14)?,
            hidden: row.get(15)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdentity {
    pub identity: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPhoto {
    pub reference: String,
    #[serde(default)]
    pub super_primary: bool,
    #[serde(default)]
    pub pixel_count: i64,
    #[serde(default)]
    pub file_size: i64,
}

/// Everything the write path stores for one raw contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewRawContact {
    pub display_name: Option<String>,
    pub display_name_source: DisplayNameSource,
    pub name_verified: bool,
    pub aggregation_mode: AggregationMode,
    pub starred: bool,
    pub pinned: i64,
    pub send_to_voicemail: bool,
    pub custom_ringtone: Option<String>,
    pub times_contacted: i64,
    pub last_contacted: Option<i64>,
    pub source_id: Option<String>,
    pub hidden: bool,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub identities: Vec<NewIdentity>,
    pub photos: Vec<NewPhoto>,
}

impl Default for NewRawContact {
    fn default() -> Self {
        Self {
            display_name: None,
            display_name_source: DisplayNameSource::Undefined,
            name_verified: false,
            aggregation_mode: AggregationMode::Default,
            starred: false,
            pinned: PINNED_UNPINNED,
            send_to_voicemail: false,
            custom_ringtone: None,
            times_contacted: 0,
            last_contacted: None,
            source_id: None,
            hidden: false,
            emails: Vec::new(),
            phones: Vec::new(),
            identities: Vec::new(),
            photos: Vec::new(),
        }
    }
}

impl NewRawContact {
    /// A contact with a structured display name.
    pub fn named(name: &str) -> Self {
        Self {
            display_name: Some(name.to_string()),
            display_name_source: DisplayNameSource::StructuredName,
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.emails.push(email.to_string());
        self
    }

    pub fn with_phone(mut self, number: &str) -> Self {
        self.phones.push(number.to_string());
        self
    }

    pub fn with_identity(mut self, identity: &str, namespace: Option<&str>) -> Self {
        self.identities.push(NewIdentity {
            identity: identity.to_string(),
            namespace: namespace.map(str::to_string),
        });
        self
    }
}

impl Database {
    // ========================================================================
    // Write path
    // ========================================================================

    /// Insert a raw contact with its data items and name lookup tokens.
    ///
    /// The record starts unaggregated; hand it to the aggregator's
    /// `on_insert` to give it an aggregate.
    pub fn insert_raw_contact(&self, account_id: AccountId, contact: &NewRawContact) -> Result<RawContactId> {
        self.conn.execute(
            r#"
            INSERT INTO raw_contacts (
                account_id, aggregation_mode, display_name, display_name_source,
                name_verified, starred, pinned, send_to_voicemail, custom_ringtone,
                times_contacted, last_contacted, source_id, hidden
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                account_id,
                contact.aggregation_mode,
                contact.display_name,
                contact.display_name_source,
                contact.name_verified,
                contact.starred,
                contact.pinned,
                contact.send_to_voicemail,
                contact.custom_ringtone,
                contact.times_contacted,
                contact.last_contacted,
                contact.source_id,
                contact.hidden,
            ],
        )?;
        let id = RawContactId(self.conn.last_insert_rowid());
        self.insert_data_items(id, contact)?;
        Ok(id)
    }

    /// Replace the editable fields and all data items of a raw contact.
    ///
    /// The account and aggregate link are left alone; mark the record for
    /// aggregation afterwards so matching sees the new data.
    pub fn update_raw_contact(&self, id: RawContactId, contact: &NewRawContact) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE raw_contacts
            SET aggregation_mode = ?, display_name = ?, display_name_source = ?,
                name_verified = ?, starred = ?, pinned = ?, send_to_voicemail = ?,
                custom_ringtone = ?, times_contacted = ?, last_contacted = ?,
                source_id = ?, hidden = ?
            WHERE id = ?
            "#,
            params![
                contact.aggregation_mode,
                contact.display_name,
                contact.display_name_source,
                contact.name_verified,
                contact.starred,
                contact.pinned,
                contact.send_to_voicemail,
                contact.custom_ringtone,
                contact.times_contacted,
                contact.last_contacted,
                contact.source_id,
                contact.hidden,
                id,
            ],
        )?;
        self.conn.execute("DELETE FROM name_lookup WHERE raw_contact_id = ?", [id])?;
        self.conn.execute("DELETE FROM data WHERE raw_contact_id = ?", [id])?;
        self.insert_data_items(id, contact)?;
        Ok(())
    }

    fn insert_data_items(&self, id: RawContactId, contact: &NewRawContact) -> Result<()> {
        for email in &contact.emails {
            self.conn.execute(
                "INSERT INTO data (raw_contact_id, kind, value) VALUES (?, ?, ?)",
                params![id, DataKind::Email, email],
            )?;
        }

        for number in &contact.phones {
            self.conn.execute(
                "INSERT INTO data (raw_contact_id, kind, value) VALUES (?, ?, ?)",
                params![id, DataKind::Phone, number],
            )?;
            let data_id = self.conn.last_insert_rowid();
            let normalized = phone::normalize_number(number);
            if normalized.chars().any(|c| c.is_ascii_digit()) {
                self.conn.execute(
                    r#"
                    INSERT INTO phone_lookup (data_id, raw_contact_id, normalized_number, min_match)
                    VALUES (?, ?, ?, ?)
                    "#,
                    params![data_id, id, normalized, phone::min_match(&normalized)],
                )?;
            }
        }

        for identity in &contact.identities {
            self.conn.execute(
                "INSERT INTO data (raw_contact_id, kind, value, namespace) VALUES (?, ?, ?, ?)",
                params![id, DataKind::Identity, identity.identity, identity.namespace],
            )?;
        }

        for photo in &contact.photos {
            self.conn.execute(
                r#"
                INSERT INTO data (raw_contact_id, kind, value, is_super_primary, pixel_count, file_size)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    id,
                    DataKind::Photo,
                    photo.reference,
                    photo.super_primary,
                    photo.pixel_count,
                    photo.file_size,
                ],
            )?;
        }

        let lookups = normalize::build_name_lookups(contact.display_name.as_deref(), &contact.emails);
        for lookup in lookups {
            self.conn.execute(
                "INSERT OR IGNORE INTO name_lookup (raw_contact_id, normalized_name, name_type) VALUES (?, ?, ?)",
                params![id, lookup.normalized_name, lookup.name_type],
            )?;
        }
        Ok(())
    }

    /// Delete a raw contact and its data; the caller repairs its aggregate.
    pub fn delete_raw_contact(&self, id: RawContactId) -> Result<()> {
        self.conn.execute("DELETE FROM aggregation_exceptions WHERE raw_contact_id1 = ?1 OR raw_contact_id2 = ?1", [id])?;
        self.conn.execute("DELETE FROM raw_contacts WHERE id = ?", [id])?;
        Ok(())
    }

    pub fn set_raw_contact_hidden(&self, id: RawContactId, hidden: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE raw_contacts SET hidden = ? WHERE id = ?",
            params![hidden, id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_raw_contact(&self, id: RawContactId) -> Result<Option<RawContact>> {
        let sql = format!("SELECT {} FROM raw_contacts WHERE id = ?", RAW_CONTACT_COLUMNS);
        let contact = self
            .conn
            .query_row(&sql, [id], RawContact::from_row)
            .optional()?;
        Ok(contact)
    }

    /// Members of an aggregate, ordered by raw contact id.
    pub fn raw_contacts_in_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<RawContact>> {
        let sql = format!(
            "SELECT {} FROM raw_contacts WHERE aggregate_id = ? ORDER BY id",
            RAW_CONTACT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let contacts = stmt
            .query_map([aggregate_id], RawContact::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    /// Every raw contact id with its stored aggregation mode.
    pub fn all_raw_contact_modes(&self) -> Result<Vec<(RawContactId, AggregationMode)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, aggregation_mode FROM raw_contacts ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn emails_for(&self, id: RawContactId) -> Result<Vec<String>> {
        self.data_values(id, DataKind::Email)
    }

    pub fn phones_for(&self, id: RawContactId) -> Result<Vec<String>> {
        self.data_values(id, DataKind::Phone)
    }

    fn data_values(&self, id: RawContactId, kind: DataKind) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT value FROM data WHERE raw_contact_id = ? AND kind = ? AND value IS NOT NULL ORDER BY id",
        )?;
        let values = stmt
            .query_map(params![id, kind], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }

    // ========================================================================
    // Aggregation bookkeeping
    // ========================================================================

    /// Point a raw contact at an aggregate (or at none).
    pub fn set_aggregate_link(&self, id: RawContactId, aggregate_id: Option<AggregateId>) -> Result<()> {
        self.conn.execute(
            "UPDATE raw_contacts SET aggregate_id = ? WHERE id = ?",
            params![aggregate_id, id],
        )?;
        Ok(())
    }

    /// Persist the needs-aggregation marker so an interrupted batch can resume.
    pub fn mark_aggregation_needed(&self, id: RawContactId) -> Result<()> {
        self.conn.execute(
            "UPDATE raw_contacts SET aggregation_needed = 1 WHERE id = ? AND aggregation_needed = 0",
            [id],
        )?;
        Ok(())
    }

    pub fn clear_aggregation_needed(&self, id: RawContactId) -> Result<()> {
        self.conn.execute(
            "UPDATE raw_contacts SET aggregation_needed = 0 WHERE id = ?",
            [id],
        )?;
        Ok(())
    }

    /// Raw contacts whose marker survived a previous, unfinished batch.
    pub fn raw_contacts_needing_aggregation(&self) -> Result<Vec<(RawContactId, AggregationMode)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, aggregation_mode FROM raw_contacts WHERE aggregation_needed = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
