//! Candidate search: feeds the scoreboard from indexed lookups.
//!
//! Exact lookups (identity, name token, email, phone) come first. The
//! aggregator only runs the approximate name scan over a candidate set the
//! exact pass already narrowed; suggestions scan every bucket.

use anyhow::Result;

use super::matcher::{MatchAlgorithm, Scoreboard};
use crate::config::AggregationConfig;
use crate::db::{AggregateId, Database, ExceptionType, NameLookupType, NewIdentity, RawContactId};
use crate::normalize::{self, names::NameLookup};

/// The matchable data of a raw contact, an aggregate, or ad-hoc query values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchTarget {
    pub tokens: Vec<NameLookup>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub identities: Vec<NewIdentity>,
}

impl MatchTarget {
    /// Load the stored lookup data of one raw contact.
    pub fn for_raw_contact(db: &Database, id: RawContactId) -> Result<Self> {
        Ok(Self {
            tokens: db.name_lookups_for(id)?,
            emails: db.emails_for(id)?,
            phones: db.phones_for(id)?,
            identities: db.identities_for(id)?,
        })
    }

    /// Union of the lookup data of every member of an aggregate.
    pub fn for_aggregate(db: &Database, id: AggregateId) -> Result<Self> {
        let mut target = Self::default();
        for member in db.member_ids(id)? {
            let data = Self::for_raw_contact(db, member)?;
            target.tokens.extend(data.tokens);
            target.emails.extend(data.emails);
            target.phones.extend(data.phones);
            target.identities.extend(data.identities);
        }
        target.tokens.sort();
        target.tokens.dedup();
        target.emails.sort();
        target.emails.dedup();
        target.phones.sort();
        target.phones.dedup();
        Ok(target)
    }

    /// Build a target from values that are not stored anywhere.
    pub fn from_values(name: Option<&str>, emails: &[String], phones: &[String]) -> Self {
        Self {
            tokens: normalize::build_name_lookups(name, emails),
            emails: emails.to_vec(),
            phones: phones.to_vec(),
            identities: Vec::new(),
        }
    }
}

/// Candidate lookups for one decision, sharing the exclusion list and limits.
pub struct CandidateSearch<'a> {
    db: &'a Database,
    config: &'a AggregationConfig,
    exclude: &'a [RawContactId],
}

impl<'a> CandidateSearch<'a> {
    pub fn new(db: &'a Database, config: &'a AggregationConfig, exclude: &'a [RawContactId]) -> Self {
        Self { db, config, exclude }
    }

    /// Apply the user's exceptions for `id` as keep-in / keep-out overrides.
    ///
    /// Exceptions are absolute, so a peer still queued for aggregation is
    /// honored at its current aggregate.
    pub fn match_exceptions(&self, id: RawContactId, board: &mut Scoreboard) -> Result<()> {
        for (peer, exception_type) in self.db.exceptions_for(id)? {
            let Some(aggregate) = self.db.get_raw_contact(peer)?.and_then(|r| r.aggregate_id) else {
                continue;
            };
            match exception_type {
                ExceptionType::KeepTogether => board.keep_in(aggregate),
                ExceptionType::KeepApart => board.keep_out(aggregate),
            }
        }
        Ok(())
    }

    /// Primary channels: identities and exact name-token equality.
    pub fn match_identities_and_names(&self, target: &MatchTarget, board: &mut Scoreboard) -> Result<()> {
        let limit = self.config.primary_hit_limit;

        for identity in &target.identities {
            for row in self.db.identity_matches(identity, self.exclude, limit)? {
                board.match_identity(row.aggregate_id);
            }
        }

        for token in &target.tokens {
            for row in self.db.name_matches(token, self.exclude, limit)? {
                board.match_name(
                    row.aggregate_id,
                    row.candidate_type,
                    &row.candidate_name,
                    row.record_type,
                    &row.record_name,
                    MatchAlgorithm::Exact,
                );
                if row.candidate_type == NameLookupType::Nickname && row.record_type == NameLookupType::Nickname {
                    board.update_score_with_nickname_match(row.aggregate_id);
                }
            }
        }
        Ok(())
    }

    /// Secondary channels: raw email equality and phone number equality.
    ///
    /// Each query may return one row past `secondary_hit_limit` so that a
    /// number or address shared by too many aggregates is detectable.
    pub fn match_emails_and_phones(&self, target: &MatchTarget, board: &mut Scoreboard) -> Result<()> {
        let limit = self.config.secondary_hit_limit + 1;

        for email in &target.emails {
            for row in self.db.email_matches(email, self.exclude, limit)? {
                board.update_score_with_email_match(row.aggregate_id);
            }
        }

        for number in &target.phones {
            let rows = self
                .db
                .phone_matches(number, self.config.strict_phone_matching, self.exclude, limit)?;
            for row in rows {
                board.update_score_with_phone_match(row.aggregate_id);
            }
        }
        Ok(())
    }

    /// Approximate name scan, bucketed by the first two characters of each
    /// approximate token. `within` restricts the scan to those aggregates.
    pub fn match_approximate_names(
        &self,
        target: &MatchTarget,
        within: Option<&[AggregateId]>,
        algorithm: MatchAlgorithm,
        board: &mut Scoreboard,
    ) -> Result<()> {
        if within.is_some_and(|aggregates| aggregates.is_empty()) {
            return Ok(());
        }

        for token in target.tokens.iter().filter(|t| t.name_type.is_approximate()) {
            let rows = self.db.approximate_name_matches(
                token,
                within,
                self.exclude,
                self.config.approximate_hit_limit,
            )?;
            for row in rows {
                board.match_name(
                    row.aggregate_id,
                    row.candidate_type,
                    &row.candidate_name,
                    row.record_type,
                    &row.record_name,
                    algorithm,
                );
            }
        }
        Ok(())
    }
}
