//! Aggregate rows. Only the aggregator creates, updates or deletes them.

use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use super::{AggregateId, DataId, Database, RawContactId};

/// Stored value of `pinned` for an unpinned contact.
pub const PINNED_UNPINNED: i64 = -1;

/// Everything about an aggregate that is derived from its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateFields {
    pub name_raw_contact_id: Option<RawContactId>,
    pub display_name: Option<String>,
    pub photo_data_id: Option<DataId>,
    pub lookup_key: String,
    pub custom_ringtone: Option<String>,
    pub starred: bool,
    pub send_to_voicemail: bool,
    pub pinned: i64,
    pub has_phone_number: bool,
    pub times_contacted: i64,
    pub last_contacted: Option<i64>,
    pub in_default_directory: bool,
}

impl Default for AggregateFields {
    fn default() -> Self {
        Self {
            name_raw_contact_id: None,
            display_name: None,
            photo_data_id: None,
            lookup_key: String::new(),
            custom_ringtone: None,
            starred: false,
            send_to_voicemail: false,
            pinned: PINNED_UNPINNED,
            has_phone_number: false,
            times_contacted: 0,
            last_contacted: None,
            in_default_directory: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub id: AggregateId,
    pub fields: AggregateFields,
    pub updated_at: String,
}

const AGGREGATE_COLUMNS: &str = r#"
    id, name_raw_contact_id, display_name, photo_data_id, lookup_key,
    custom_ringtone, starred, send_to_voicemail, pinned, has_phone_number,
    times_contacted, last_contacted, in_default_directory, updated_at
"#;

impl Aggregate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Aggregate {
            id: row.get(0)?,
            fields: AggregateFields {
                name_raw_contact_id: row.get(1)?,
                display_name: row.get(2)?,
                photo_data_id: row.get(3)?,
                lookup_key: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                custom_ringtone: row.get(5)?,
                starred: row.get(6)?,
                send_to_voicemail: row.get(7)?,
                pinned: row.get(8)?,
                has_phone_number: row.get(9)?,
                times_contacted: row.get(10)?,
                last_contacted: row.get(11)?,
                in_default_directory: row.get(12)?,
            },
            updated_at: row.get(13)?,
        })
    }
}

impl Database {
    /// Insert an empty aggregate; the caller links members and recomputes it.
    pub fn create_aggregate(&self) -> Result<AggregateId> {
        self.conn.execute("INSERT INTO aggregates DEFAULT VALUES", [])?;
        Ok(AggregateId(self.conn.last_insert_rowid()))
    }

    pub fn delete_aggregate(&self, id: AggregateId) -> Result<()> {
        self.conn.execute("DELETE FROM aggregates WHERE id = ?", [id])?;
        Ok(())
    }

    pub fn get_aggregate(&self, id: AggregateId) -> Result<Option<Aggregate>> {
        let sql = format!("SELECT {} FROM aggregates WHERE id = ?", AGGREGATE_COLUMNS);
        let aggregate = self
            .conn
            .query_row(&sql, [id], Aggregate::from_row)
            .optional()?;
        Ok(aggregate)
    }

    /// All aggregates ordered by id.
    pub fn list_aggregates(&self) -> Result<Vec<Aggregate>> {
        let sql = format!("SELECT {} FROM aggregates ORDER BY id", AGGREGATE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let aggregates = stmt
            .query_map([], Aggregate::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(aggregates)
    }

    /// Write the derived fields of an aggregate.
    pub fn update_aggregate_fields(&self, id: AggregateId, fields: &AggregateFields) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE aggregates
            SET name_raw_contact_id = ?, display_name = ?, photo_data_id = ?,
                lookup_key = ?, custom_ringtone = ?, starred = ?,
                send_to_voicemail = ?, pinned = ?, has_phone_number = ?,
                times_contacted = ?, last_contacted = ?, in_default_directory = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![
                fields.name_raw_contact_id,
                fields.display_name,
                fields.photo_data_id,
                fields.lookup_key,
                fields.custom_ringtone,
                fields.starred,
                fields.send_to_voicemail,
                fields.pinned,
                fields.has_phone_number,
                fields.times_contacted,
                fields.last_contacted,
                fields.in_default_directory,
                id,
            ],
        )?;
        Ok(())
    }

    /// Number of members of `id` other than `excluding`.
    pub fn member_count_excluding(&self, id: AggregateId, excluding: RawContactId) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM raw_contacts WHERE aggregate_id = ? AND id != ?",
            params![id, excluding],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Member ids of an aggregate in ascending order.
    pub fn member_ids(&self, id: AggregateId) -> Result<Vec<RawContactId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM raw_contacts WHERE aggregate_id = ? ORDER BY id")?;
        let ids = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn is_aggregate_visible(&self, id: AggregateId) -> Result<bool> {
        let visible = self
            .conn
            .query_row(
                "SELECT in_default_directory FROM aggregates WHERE id = ?",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(visible.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_update_delete() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let id = db.create_aggregate().unwrap();
        let created = db.get_aggregate(id).unwrap().unwrap();
        assert_eq!(created.fields, AggregateFields::default());

        let fields = AggregateFields {
            display_name: Some("John Doe".to_string()),
            lookup_key: "abc".to_string(),
            starred: true,
            pinned: 2,
            ..AggregateFields::default()
        };
        db.update_aggregate_fields(id, &fields).unwrap();
        assert_eq!(db.get_aggregate(id).unwrap().unwrap().fields, fields);
        assert!(db.is_aggregate_visible(id).unwrap());

        db.delete_aggregate(id).unwrap();
        assert!(db.get_aggregate(id).unwrap().is_none());
        assert!(!db.is_aggregate_visible(id).unwrap());
    }
}
