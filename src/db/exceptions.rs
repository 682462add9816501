//! User-specified aggregation exceptions.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use super::{id_array, Database, ExceptionType, RawContactId};
use crate::error::AggregationError;

/// An exception row; the pair is stored with the smaller id first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationException {
    pub id: i64,
    pub exception_type: ExceptionType,
    pub raw_contact_id1: RawContactId,
    pub raw_contact_id2: RawContactId,
}

fn ordered(a: RawContactId, b: RawContactId) -> (RawContactId, RawContactId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    /// Record (or replace) the exception between two raw contacts.
    pub fn set_aggregation_exception(
        &self,
        a: RawContactId,
        b: RawContactId,
        exception_type: ExceptionType,
    ) -> Result<()> {
        if a == b {
            return Err(AggregationError::SelfException(a).into());
        }
        let (first, second) = ordered(a, b);
        self.conn.execute(
            r#"
            INSERT INTO aggregation_exceptions (type, raw_contact_id1, raw_contact_id2)
            VALUES (?, ?, ?)
            ON CONFLICT (raw_contact_id1, raw_contact_id2) DO UPDATE SET type = excluded.type
            "#,
            params![exception_type, first, second],
        )?;
        Ok(())
    }

    /// Remove the exception between two raw contacts. Returns whether one existed.
    pub fn remove_aggregation_exception(&self, a: RawContactId, b: RawContactId) -> Result<bool> {
        let (first, second) = ordered(a, b);
        let removed = self.conn.execute(
            "DELETE FROM aggregation_exceptions WHERE raw_contact_id1 = ? AND raw_contact_id2 = ?",
            params![first, second],
        )?;
        Ok(removed > 0)
    }

    /// Exceptions involving `id`, as (other raw contact, type).
    pub fn exceptions_for(&self, id: RawContactId) -> Result<Vec<(RawContactId, ExceptionType)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT CASE WHEN raw_contact_id1 = ?1 THEN raw_contact_id2 ELSE raw_contact_id1 END, type
            FROM aggregation_exceptions
            WHERE raw_contact_id1 = ?1 OR raw_contact_id2 = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_aggregation_exceptions(&self) -> Result<Vec<AggregationException>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, raw_contact_id1, raw_contact_id2 FROM aggregation_exceptions ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AggregationException {
                    id: row.get(0)?,
                    exception_type: row.get(1)?,
                    raw_contact_id1: row.get(2)?,
                    raw_contact_id2: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `KeepTogether` pairs with both ends inside `ids`.
    pub fn keep_together_pairs_among(&self, ids: &[RawContactId]) -> Result<Vec<(RawContactId, RawContactId)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT raw_contact_id1, raw_contact_id2
            FROM aggregation_exceptions
            WHERE type = ?1
              AND raw_contact_id1 IN rarray(?2)
              AND raw_contact_id2 IN rarray(?2)
            ORDER BY raw_contact_id1, raw_contact_id2
            "#,
        )?;
        let rows = stmt
            .query_map(params![ExceptionType::KeepTogether, id_array(ids)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
