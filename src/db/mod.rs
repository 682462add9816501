mod schema;
mod types;
pub mod accounts;
pub mod aggregates;
pub mod exceptions;
pub mod lookup;
pub mod raw_contacts;

use anyhow::Result;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::path::Path;
use std::rc::Rc;

pub use schema::SCHEMA;
pub use types::{
    AccountId, AggregateId, AggregationMode, DataId, DataKind, DisplayNameSource, ExceptionType,
    NameLookupType, RawContactId,
};
pub use accounts::{Account, NewAccount};
pub use aggregates::{Aggregate, AggregateFields, PINNED_UNPINNED};
pub use exceptions::AggregationException;
pub use lookup::{DataMatchRow, NameMatchRow, PhotoRow};
pub use raw_contacts::{NewIdentity, NewPhoto, NewRawContact, RawContact};

use crate::normalize::phone;

/// SQL function comparing two phone numbers: `phone_numbers_equal(a, b, strict)`.
pub const PHONE_NUMBERS_EQUAL: &str = "phone_numbers_equal";

/// SQLite-backed contacts store.
///
/// The aggregator never opens its own transactions: callers wrap a unit of
/// work in `in_transaction` and every store method runs inside it.
pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        rusqlite::vtab::array::load_module(&conn)?;
        conn.create_scalar_function(
            PHONE_NUMBERS_EQUAL,
            3,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let a: Option<String> = ctx.get(0)?;
                let b: Option<String> = ctx.get(1)?;
                let strict: bool = ctx.get(2)?;
                Ok(match (a, b) {
                    (Some(a), Some(b)) => phone::numbers_equal(&a, &b, strict),
                    _ => false,
                })
            },
        )?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Run `f` inside one transaction: committed when `f` succeeds, rolled
    /// back (including any partial relinking) when it fails.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Counts used by the CLI `stats` command.
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |row| row.get(0))?) };
        Ok(StoreStats {
            accounts: count("SELECT COUNT(*) FROM accounts")?,
            raw_contacts: count("SELECT COUNT(*) FROM raw_contacts")?,
            aggregates: count("SELECT COUNT(*) FROM aggregates")?,
            visible_aggregates: count("SELECT COUNT(*) FROM aggregates WHERE in_default_directory = 1")?,
            pending: count("SELECT COUNT(*) FROM raw_contacts WHERE aggregation_needed = 1")?,
            exceptions: count("SELECT COUNT(*) FROM aggregation_exceptions")?,
        })
    }
}

/// Bind a list of row ids as a `rarray(?)` table-valued parameter.
pub(crate) fn id_array<T: Copy + Into<i64>>(ids: &[T]) -> Rc<Vec<Value>> {
    Rc::new(ids.iter().map(|&id| Value::Integer(id.into())).collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub accounts: i64,
    pub raw_contacts: i64,
    pub aggregates: i64,
    pub visible_aggregates: i64,
    pub pending: i64,
    pub exceptions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_numbers_equal_function() {
        let db = Database::open_in_memory().unwrap();
        let equal: bool = db
            .conn
            .query_row(
                "SELECT phone_numbers_equal('+1 650 555 1234', '(650) 555-1234', 0)",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(equal);

        let strict: bool = db
            .conn
            .query_row(
                "SELECT phone_numbers_equal('+1 650 555 1234', '(650) 555-1234', 1)",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!strict);
    }

    #[test]
    fn test_open_file_and_initialize_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contacts.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
        assert_eq!(db.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let result: Result<()> = db.in_transaction(|db| {
            db.conn.execute(
                "INSERT INTO accounts (account_type, account_name) VALUES ('t', 'n')",
                [],
            )?;
            anyhow::bail!("abort")
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().accounts, 0);
    }
}
