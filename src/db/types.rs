//! Identifier newtypes and enumerations stored in the contacts database.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AggregationError;

/// Declare an integer row-id newtype usable directly as a SQL parameter.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

row_id!(
    /// Row id of a raw contact.
    RawContactId
);
row_id!(
    /// Row id of an aggregate contact.
    AggregateId
);
row_id!(AccountId);
row_id!(DataId);

/// Map a domain error into the error type rusqlite expects from `FromSql`.
fn conversion_error(err: AggregationError) -> FromSqlError {
    FromSqlError::Other(Box::new(err))
}

/// How the aggregator treats a raw contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    /// Matched automatically. The deprecated immediate mode maps here.
    #[default]
    #[serde(alias = "immediate")]
    Default,
    /// Keeps its current aggregate; only derived fields are refreshed.
    Suspended,
    /// Ignored by the aggregator.
    Disabled,
}

impl AggregationMode {
    pub const CODE_DEFAULT: i64 = 0;
    pub const CODE_IMMEDIATE: i64 = 1;
    pub const CODE_SUSPENDED: i64 = 2;
    pub const CODE_DISABLED: i64 = 3;

    pub fn code(&self) -> i64 {
        match self {
            AggregationMode::Default => Self::CODE_DEFAULT,
            AggregationMode::Suspended => Self::CODE_SUSPENDED,
            AggregationMode::Disabled => Self::CODE_DISABLED,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, AggregationError> {
        match code {
            Self::CODE_DEFAULT | Self::CODE_IMMEDIATE => Ok(AggregationMode::Default),
            Self::CODE_SUSPENDED => Ok(AggregationMode::Suspended),
            Self::CODE_DISABLED => Ok(AggregationMode::Disabled),
            other => Err(AggregationError::UnknownAggregationMode(other)),
        }
    }
}

impl ToSql for AggregationMode {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for AggregationMode {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::from_code(i64::column_result(value)?).map_err(conversion_error)
    }
}

/// Where a raw contact's display name came from, weakest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DisplayNameSource {
    #[default]
    Undefined,
    Phone,
    Email,
    StructuredName,
    Verified,
}

impl DisplayNameSource {
    pub fn code(&self) -> i64 {
        match self {
            DisplayNameSource::Undefined => 0,
            DisplayNameSource::Phone => 10,
            DisplayNameSource::Email => 20,
            DisplayNameSource::StructuredName => 40,
            DisplayNameSource::Verified => 50,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, AggregationError> {
        match code {
            0 => Ok(DisplayNameSource::Undefined),
            10 => Ok(DisplayNameSource::Phone),
            20 => Ok(DisplayNameSource::Email),
            40 => Ok(DisplayNameSource::StructuredName),
            50 => Ok(DisplayNameSource::Verified),
            other => Err(AggregationError::UnknownDisplayNameSource(other)),
        }
    }
}

impl ToSql for DisplayNameSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for DisplayNameSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::from_code(i64::column_result(value)?).map_err(conversion_error)
    }
}

/// Kind of a name lookup token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameLookupType {
    Exact,
    Variant,
    CollationKey,
    Nickname,
    EmailBasedNickname,
}

impl NameLookupType {
    pub const ALL: [NameLookupType; 5] = [
        NameLookupType::Exact,
        NameLookupType::Variant,
        NameLookupType::CollationKey,
        NameLookupType::Nickname,
        NameLookupType::EmailBasedNickname,
    ];

    pub fn code(&self) -> i64 {
        match self {
            NameLookupType::Exact => 0,
            NameLookupType::Variant => 1,
            NameLookupType::CollationKey => 2,
            NameLookupType::Nickname => 3,
            NameLookupType::EmailBasedNickname => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, AggregationError> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(AggregationError::UnknownNameLookupType(code))
    }

    /// Whether tokens of this type take part in approximate matching.
    pub fn is_approximate(&self) -> bool {
        matches!(
            self,
            NameLookupType::CollationKey
                | NameLookupType::Nickname
                | NameLookupType::EmailBasedNickname
        )
    }
}

impl ToSql for NameLookupType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for NameLookupType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::from_code(i64::column_result(value)?).map_err(conversion_error)
    }
}

/// User override between two raw contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    KeepTogether,
    KeepApart,
}

impl ExceptionType {
    pub fn code(&self) -> i64 {
        match self {
            ExceptionType::KeepTogether => 1,
            ExceptionType::KeepApart => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, AggregationError> {
        match code {
            1 => Ok(ExceptionType::KeepTogether),
            2 => Ok(ExceptionType::KeepApart),
            other => Err(AggregationError::UnknownExceptionType(other)),
        }
    }
}

impl ToSql for ExceptionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for ExceptionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::from_code(i64::column_result(value)?).map_err(conversion_error)
    }
}

/// Kind of a data item attached to a raw contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Email,
    Phone,
    Identity,
    Photo,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Email => "email",
            DataKind::Phone => "phone",
            DataKind::Identity => "identity",
            DataKind::Photo => "photo",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AggregationError> {
        match s {
            "email" => Ok(DataKind::Email),
            "phone" => Ok(DataKind::Phone),
            "identity" => Ok(DataKind::Identity),
            "photo" => Ok(DataKind::Photo),
            other => Err(AggregationError::UnknownDataKind(other.to_string())),
        }
    }
}

impl ToSql for DataKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DataKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).map_err(conversion_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_mode_maps_to_default() {
        assert_eq!(
            AggregationMode::from_code(AggregationMode::CODE_IMMEDIATE).unwrap(),
            AggregationMode::Default
        );
        let parsed: AggregationMode = serde_json::from_str("\"immediate\"").unwrap();
        assert_eq!(parsed, AggregationMode::Default);
        assert!(AggregationMode::from_code(9).is_err());
    }

    #[test]
    fn test_display_name_source_order() {
        assert!(DisplayNameSource::Undefined < DisplayNameSource::Phone);
        assert!(DisplayNameSource::Phone < DisplayNameSource::Email);
        assert!(DisplayNameSource::Email < DisplayNameSource::StructuredName);
        assert!(DisplayNameSource::StructuredName < DisplayNameSource::Verified);
        for source in [
            DisplayNameSource::Undefined,
            DisplayNameSource::Phone,
            DisplayNameSource::Email,
            DisplayNameSource::StructuredName,
            DisplayNameSource::Verified,
        ] {
            assert_eq!(DisplayNameSource::from_code(source.code()).unwrap(), source);
        }
    }

    #[test]
    fn test_name_lookup_type_codes() {
        for t in NameLookupType::ALL {
            assert_eq!(NameLookupType::from_code(t.code()).unwrap(), t);
        }
        assert!(NameLookupType::from_code(42).is_err());
        assert!(!NameLookupType::Exact.is_approximate());
        assert!(NameLookupType::CollationKey.is_approximate());
    }
}
