//! Candidate queries used by the aggregator.
//!
//! Every candidate query only returns raw contacts whose aggregate is in the
//! default directory, skips the raw ids passed in `exclude` (the record under
//! evaluation plus everything still queued for aggregation), and is capped
//! with `LIMIT` after ordering by aggregate id.

use anyhow::Result;
use rusqlite::{params, Row};

use super::{
    id_array, AccountId, AggregateId, DataId, DataKind, Database, NameLookupType, NewIdentity,
    RawContactId,
};
use crate::normalize::names::NameLookup;
use crate::normalize::phone;

/// A name-token hit: the record's token and the candidate's matching token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatchRow {
    pub aggregate_id: AggregateId,
    pub raw_contact_id: RawContactId,
    pub record_type: NameLookupType,
    pub record_name: String,
    pub candidate_type: NameLookupType,
    pub candidate_name: String,
}

/// A data-item hit (identity, email or phone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMatchRow {
    pub aggregate_id: AggregateId,
    pub raw_contact_id: RawContactId,
}

impl DataMatchRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DataMatchRow {
            aggregate_id: row.get(0)?,
            raw_contact_id: row.get(1)?,
        })
    }
}

/// A photo data item of an aggregate member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRow {
    pub data_id: DataId,
    pub raw_contact_id: RawContactId,
    pub is_super_primary: bool,
    pub pixel_count: i64,
    pub file_size: i64,
}

/// Candidate filter shared by every point lookup. Expects the candidate raw
/// contact aliased as `r`, `?2` bound to the exclusion array and `?3` to the limit.
const CANDIDATE_FILTER: &str = r#"
    r.aggregate_id IS NOT NULL
    AND r.id NOT IN rarray(?2)
    AND r.aggregate_id IN (SELECT id FROM aggregates WHERE in_default_directory = 1)
    ORDER BY r.aggregate_id, r.id
    LIMIT ?3
"#;

impl Database {
    // ========================================================================
    // Record data
    // ========================================================================

    pub fn name_lookups_for(&self, id: RawContactId) -> Result<Vec<NameLookup>> {
        let mut stmt = self.conn.prepare(
            "SELECT normalized_name, name_type FROM name_lookup WHERE raw_contact_id = ? ORDER BY name_type, normalized_name",
        )?;
        let lookups = stmt
            .query_map([id], |row| {
                Ok(NameLookup {
                    normalized_name: row.get(0)?,
                    name_type: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lookups)
    }

    pub fn identities_for(&self, id: RawContactId) -> Result<Vec<NewIdentity>> {
        let mut stmt = self.conn.prepare(
            "SELECT value, namespace FROM data WHERE raw_contact_id = ? AND kind = ? AND value IS NOT NULL ORDER BY id",
        )?;
        let identities = stmt
            .query_map(params![id, DataKind::Identity], |row| {
                Ok(NewIdentity {
                    identity: row.get(0)?,
                    namespace: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(identities)
    }

    // ========================================================================
    // Point lookups
    // ========================================================================

    /// Candidates carrying a name token equal to `token`, of any lookup type.
    pub fn name_matches(
        &self,
        token: &NameLookup,
        exclude: &[RawContactId],
        limit: usize,
    ) -> Result<Vec<NameMatchRow>> {
        let sql = format!(
            r#"
            SELECT r.aggregate_id, r.id, nl.name_type, nl.normalized_name
            FROM name_lookup nl
            JOIN raw_contacts r ON r.id = nl.raw_contact_id
            WHERE nl.normalized_name = ?1 AND {}
            "#,
            CANDIDATE_FILTER
        );
        self.name_rows(&sql, token, params![token.normalized_name, id_array(exclude), limit as i64])
    }

    /// Approximate-match bucket: candidate tokens of the approximate lookup
    /// types sharing the first two characters of `token`, restricted to
    /// `within` when given.
    pub fn approximate_name_matches(
        &self,
        token: &NameLookup,
        within: Option<&[AggregateId]>,
        exclude: &[RawContactId],
        limit: usize,
    ) -> Result<Vec<NameMatchRow>> {
        let prefix: String = token.normalized_name.chars().take(2).collect();
        let sql = format!(
            r#"
            SELECT r.aggregate_id, r.id, nl.name_type, nl.normalized_name
            FROM name_lookup nl
            JOIN raw_contacts r ON r.id = nl.raw_contact_id
            WHERE substr(nl.normalized_name, 1, 2) = ?1
              AND nl.name_type IN (?4, ?5, ?6)
              AND (?8 = 0 OR r.aggregate_id IN rarray(?7))
              AND {}
            "#,
            CANDIDATE_FILTER
        );
        self.name_rows(
            &sql,
            token,
            params![
                prefix,
                id_array(exclude),
                limit as i64,
                NameLookupType::CollationKey,
                NameLookupType::Nickname,
                NameLookupType::EmailBasedNickname,
                id_array(within.unwrap_or_default()),
                within.is_some(),
            ],
        )
    }

    fn name_rows(
        &self,
        sql: &str,
        token: &NameLookup,
        params: impl rusqlite::Params,
    ) -> Result<Vec<NameMatchRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(NameMatchRow {
                    aggregate_id: row.get(0)?,
                    raw_contact_id: row.get(1)?,
                    record_type: token.name_type,
                    record_name: token.normalized_name.clone(),
                    candidate_type: row.get(2)?,
                    candidate_name: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Candidates with the same identity in the same namespace.
    pub fn identity_matches(
        &self,
        identity: &NewIdentity,
        exclude: &[RawContactId],
        limit: usize,
    ) -> Result<Vec<DataMatchRow>> {
        let sql = format!(
            r#"
            SELECT r.aggregate_id, r.id
            FROM data d
            JOIN raw_contacts r ON r.id = d.raw_contact_id
            WHERE d.value = ?1 AND d.kind = ?4 AND d.namespace IS ?5 AND {}
            "#,
            CANDIDATE_FILTER
        );
        self.data_rows(
            &sql,
            params![
                identity.identity,
                id_array(exclude),
                limit as i64,
                DataKind::Identity,
                identity.namespace,
            ],
        )
    }

    /// Candidates with exactly the same email address.
    pub fn email_matches(
        &self,
        address: &str,
        exclude: &[RawContactId],
        limit: usize,
    ) -> Result<Vec<DataMatchRow>> {
        let sql = format!(
            r#"
            SELECT r.aggregate_id, r.id
            FROM data d
            JOIN raw_contacts r ON r.id = d.raw_contact_id
            WHERE d.value = ?1 AND d.kind = ?4 AND {}
            "#,
            CANDIDATE_FILTER
        );
        self.data_rows(
            &sql,
            params![address, id_array(exclude), limit as i64, DataKind::Email],
        )
    }

    /// Candidates with a phone number equal to `number`, found through the
    /// min-match index and confirmed with `phone_numbers_equal`.
    pub fn phone_matches(
        &self,
        number: &str,
        strict: bool,
        exclude: &[RawContactId],
        limit: usize,
    ) -> Result<Vec<DataMatchRow>> {
        let normalized = phone::normalize_number(number);
        let sql = format!(
            r#"
            SELECT DISTINCT r.aggregate_id, r.id
            FROM phone_lookup pl
            JOIN raw_contacts r ON r.id = pl.raw_contact_id
            WHERE pl.min_match = ?1
              AND phone_numbers_equal(pl.normalized_number, ?4, ?5)
              AND {}
            "#,
            CANDIDATE_FILTER
        );
        self.data_rows(
            &sql,
            params![
                phone::min_match(&normalized),
                id_array(exclude),
                limit as i64,
                normalized,
                strict,
            ],
        )
    }

    fn data_rows(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<DataMatchRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, DataMatchRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // Collision and re-split support
    // ========================================================================

    /// Members of `aggregate_id` from `account_id`, other than `excluding`.
    pub fn members_in_account(
        &self,
        aggregate_id: AggregateId,
        account_id: AccountId,
        excluding: RawContactId,
    ) -> Result<Vec<RawContactId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM raw_contacts WHERE aggregate_id = ? AND account_id = ? AND id != ? ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![aggregate_id, account_id, excluding], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Whether `id` shares an email, an identity or an equal phone number
    /// with any of `others`. Names are not consulted.
    pub fn shares_secondary_data(&self, id: RawContactId, others: &[RawContactId], strict: bool) -> Result<bool> {
        let shared = self.conn.query_row(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM data a
                JOIN data b ON b.kind = a.kind AND b.value = a.value
                WHERE a.raw_contact_id = ?1 AND a.kind = ?3
                  AND b.raw_contact_id IN rarray(?2)
                UNION ALL
                SELECT 1 FROM data a
                JOIN data b ON b.kind = a.kind AND b.value = a.value AND b.namespace IS a.namespace
                WHERE a.raw_contact_id = ?1 AND a.kind = ?4
                  AND b.raw_contact_id IN rarray(?2)
                UNION ALL
                SELECT 1 FROM phone_lookup a
                JOIN phone_lookup b ON b.min_match = a.min_match
                WHERE a.raw_contact_id = ?1
                  AND b.raw_contact_id IN rarray(?2)
                  AND phone_numbers_equal(a.normalized_number, b.normalized_number, ?5)
            )
            "#,
            params![id, id_array(others), DataKind::Email, DataKind::Identity, strict],
            |row| row.get(0),
        )?;
        Ok(shared)
    }

    /// Pairs within `ids` linked by a shared email, identity or equal phone.
    pub fn secondary_links_among(
        &self,
        ids: &[RawContactId],
        strict: bool,
    ) -> Result<Vec<(RawContactId, RawContactId)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.raw_contact_id, b.raw_contact_id FROM data a
            JOIN data b ON b.kind = a.kind AND b.value = a.value
                AND (a.kind != ?3 OR b.namespace IS a.namespace)
            WHERE a.kind IN (?2, ?3)
              AND a.raw_contact_id IN rarray(?1)
              AND b.raw_contact_id IN rarray(?1)
              AND a.raw_contact_id < b.raw_contact_id
            UNION
            SELECT a.raw_contact_id, b.raw_contact_id FROM phone_lookup a
            JOIN phone_lookup b ON b.min_match = a.min_match
            WHERE a.raw_contact_id IN rarray(?1)
              AND b.raw_contact_id IN rarray(?1)
              AND a.raw_contact_id < b.raw_contact_id
              AND phone_numbers_equal(a.normalized_number, b.normalized_number, ?4)
            ORDER BY 1, 2
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![id_array(ids), DataKind::Email, DataKind::Identity, strict],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // Recompute support
    // ========================================================================

    /// Photos of every member, ordered by raw contact id then data id.
    pub fn photos_in_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<PhotoRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT d.id, d.raw_contact_id, d.is_super_primary, d.pixel_count, d.file_size
            FROM data d
            JOIN raw_contacts r ON r.id = d.raw_contact_id
            WHERE r.aggregate_id = ? AND d.kind = ?
            ORDER BY d.raw_contact_id, d.id
            "#,
        )?;
        let rows = stmt
            .query_map(params![aggregate_id, DataKind::Photo], |row| {
                Ok(PhotoRow {
                    data_id: row.get(0)?,
                    raw_contact_id: row.get(1)?,
                    is_super_primary: row.get(2)?,
                    pixel_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    file_size: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Members of an aggregate that have at least one phone number.
    pub fn members_with_phone(&self, aggregate_id: AggregateId) -> Result<Vec<RawContactId>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT d.raw_contact_id
            FROM data d
            JOIN raw_contacts r ON r.id = d.raw_contact_id
            WHERE r.aggregate_id = ? AND d.kind = ?
            ORDER BY d.raw_contact_id
            "#,
        )?;
        let ids = stmt
            .query_map(params![aggregate_id, DataKind::Phone], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}
