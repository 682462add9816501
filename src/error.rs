//! Typed failures raised by the aggregation engine.
//!
//! Storage errors travel as `anyhow::Error`; these variants cover the
//! domain-level conditions callers may want to match on.

use crate::db::{AggregateId, RawContactId};

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("unknown aggregation mode code {0}")]
    UnknownAggregationMode(i64),

    #[error("unknown display name source code {0}")]
    UnknownDisplayNameSource(i64),

    #[error("unknown name lookup type code {0}")]
    UnknownNameLookupType(i64),

    #[error("unknown aggregation exception type code {0}")]
    UnknownExceptionType(i64),

    #[error("unknown data kind '{0}'")]
    UnknownDataKind(String),

    #[error("aggregate {0} has no remaining members")]
    EmptyAggregate(AggregateId),

    #[error("raw contact {0} cannot form an exception with itself")]
    SelfException(RawContactId),

    #[error("invalid aggregation config: {0}")]
    InvalidConfig(String),
}
