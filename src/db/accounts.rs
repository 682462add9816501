//! Accounts that raw contacts are synced from.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{AccountId, Database};

/// An account as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub account_type: String,
    pub data_set: Option<String>,
    pub account_name: String,
    /// Synced/writable accounts win display-name ties over read-only ones.
    pub writable: bool,
    /// Tie-breaker weight when two photos are otherwise equal.
    pub photo_priority: i64,
}

impl Account {
    /// Account type with the data set appended, as used in lookup keys.
    pub fn type_with_data_set(&self) -> String {
        match &self.data_set {
            Some(data_set) => format!("{}/{}", self.account_type, data_set),
            None => self.account_type.clone(),
        }
    }
}

/// Account description accepted by the write path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub account_type: String,
    #[serde(default)]
    pub data_set: Option<String>,
    pub account_name: String,
    #[serde(default = "default_writable")]
    pub writable: bool,
    #[serde(default)]
    pub photo_priority: i64,
}

fn default_writable() -> bool {
    true
}

impl Database {
    /// Find an account by its identifying triple, or create it.
    pub fn find_or_create_account(&self, account: &NewAccount) -> Result<AccountId> {
        let existing = self
            .conn
            .query_row(
                r#"
                SELECT id FROM accounts
                WHERE account_type = ? AND data_set IS ? AND account_name = ?
                "#,
                params![account.account_type, account.data_set, account.account_name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn.execute(
            r#"
            INSERT INTO accounts (account_type, data_set, account_name, writable, photo_priority)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                account.account_type,
                account.data_set,
                account.account_name,
                account.writable,
                account.photo_priority,
            ],
        )?;
        Ok(AccountId(self.conn.last_insert_rowid()))
    }

    pub fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let account = self
            .conn
            .query_row(
                r#"
                SELECT id, account_type, data_set, account_name, writable, photo_priority
                FROM accounts
                WHERE id = ?
                "#,
                [id],
                |row| {
                    Ok(Account {
                        id: row.get(0)?,
                        account_type: row.get(1)?,
                        data_set: row.get(2)?,
                        account_name: row.get(3)?,
                        writable: row.get(4)?,
                        photo_priority: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str, data_set: Option<&str>) -> NewAccount {
        NewAccount {
            account_type: "com.example".to_string(),
            data_set: data_set.map(str::to_string),
            account_name: name.to_string(),
            writable: true,
            photo_priority: 0,
        }
    }

    #[test]
    fn test_find_or_create_account_is_stable() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let a = db.find_or_create_account(&account("a@example.com", None)).unwrap();
        let again = db.find_or_create_account(&account("a@example.com", None)).unwrap();
        let plus = db.find_or_create_account(&account("a@example.com", Some("plus"))).unwrap();

        assert_eq!(a, again);
        assert_ne!(a, plus);

        let stored = db.get_account(plus).unwrap().unwrap();
        assert_eq!(stored.type_with_data_set(), "com.example/plus");
        assert!(db.get_account(AccountId(999)).unwrap().is_none());
    }
}
