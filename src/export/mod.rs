use anyhow::Result;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::db::Database;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
        }
    }

    /// Parse a format name as typed on the command line.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }
}

/// Aggregate data for export
#[derive(Debug, Serialize)]
pub struct ExportedAggregate {
    pub id: i64,
    pub display_name: Option<String>,
    pub lookup_key: String,
    pub starred: bool,
    pub has_phone_number: bool,
    pub in_default_directory: bool,
    pub times_contacted: i64,
    pub last_contacted: Option<i64>,
    pub members: Vec<i64>,
}

/// Export aggregates and their member raw contacts to a file
pub fn export_aggregates(db: &Database, output_path: &Path, format: ExportFormat) -> Result<usize> {
    let aggregates = get_aggregates_for_export(db)?;
    let count = aggregates.len();

    match format {
        ExportFormat::Json => export_json(&aggregates, output_path)?,
        ExportFormat::Csv => export_csv(&aggregates, output_path)?,
    }

    tracing::info!(count, format = format.name(), path = %output_path.display(), "Exported aggregates");
    Ok(count)
}

fn get_aggregates_for_export(db: &Database) -> Result<Vec<ExportedAggregate>> {
    let mut stmt = db.conn.prepare(
        r#"
        SELECT
            a.id,
            a.display_name,
            a.lookup_key,
            a.starred,
            a.has_phone_number,
            a.in_default_directory,
            a.times_contacted,
            a.last_contacted,
            GROUP_CONCAT(r.id)
        FROM aggregates a
        LEFT JOIN raw_contacts r ON r.aggregate_id = a.id
        GROUP BY a.id
        ORDER BY a.display_name COLLATE NOCASE, a.id
        "#,
    )?;

    let aggregates = stmt
        .query_map([], |row| {
            let members: Option<String> = row.get(8)?;
            Ok(ExportedAggregate {
                id: row.get(0)?,
                display_name: row.get(1)?,
                lookup_key: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                starred: row.get(3)?,
                has_phone_number: row.get(4)?,
                in_default_directory: row.get(5)?,
                times_contacted: row.get(6)?,
                last_contacted: row.get(7)?,
                members: parse_members(members.as_deref()),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(aggregates)
}

fn parse_members(list: Option<&str>) -> Vec<i64> {
    let mut members: Vec<i64> = list
        .unwrap_or("")
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect();
    members.sort_unstable();
    members
}

fn export_json(aggregates: &[ExportedAggregate], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(aggregates)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(aggregates: &[ExportedAggregate], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "id",
        "display_name",
        "lookup_key",
        "starred",
        "has_phone_number",
        "in_default_directory",
        "times_contacted",
        "last_contacted",
        "members",
    ])?;

    for aggregate in aggregates {
        let members: Vec<String> = aggregate.members.iter().map(|id| id.to_string()).collect();
        wtr.write_record([
            &aggregate.id.to_string(),
            aggregate.display_name.as_deref().unwrap_or(""),
            &aggregate.lookup_key,
            &aggregate.starred.to_string(),
            &aggregate.has_phone_number.to_string(),
            &aggregate.in_default_directory.to_string(),
            &aggregate.times_contacted.to_string(),
            &aggregate.last_contacted.map(|v| v.to_string()).unwrap_or_default(),
            &members.join(";"),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewAccount, NewRawContact};

    fn populated() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let account = db
            .find_or_create_account(&NewAccount {
                account_type: "com.example".to_string(),
                data_set: None,
                account_name: "a".to_string(),
                writable: true,
                photo_priority: 0,
            })
            .unwrap();
        let aggregate = db.create_aggregate().unwrap();
        for name in ["Zed", "Zed Z"] {
            let raw = db.insert_raw_contact(account, &NewRawContact::named(name)).unwrap();
            db.set_aggregate_link(raw, Some(aggregate)).unwrap();
        }
        let other = db.create_aggregate().unwrap();
        let raw = db.insert_raw_contact(account, &NewRawContact::named("Amy")).unwrap();
        db.set_aggregate_link(raw, Some(other)).unwrap();
        crate::aggregation::recompute::refresh(&db, aggregate).unwrap();
        crate::aggregation::recompute::refresh(&db, other).unwrap();
        db
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("JSON"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("csv"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("html"), None);
        assert_eq!(ExportFormat::Csv.extension(), "csv");
    }

    #[test]
    fn test_parse_members() {
        assert_eq!(parse_members(Some("3,1,2")), vec![1, 2, 3]);
        assert!(parse_members(None).is_empty());
    }

    #[test]
    fn test_export_json() {
        let db = populated();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");

        assert_eq!(export_aggregates(&db, &path, ExportFormat::Json).unwrap(), 2);

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows[0]["display_name"], "Amy");
        assert_eq!(rows[1]["members"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_export_csv() {
        let db = populated();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        export_aggregates(&db, &path, ExportFormat::Csv).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "Amy");
        assert_eq!(records[1][8].split(';').count(), 2);
    }
}
