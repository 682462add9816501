//! Aggregation suggestions shown to a person, never merged automatically.

use anyhow::Result;
use serde::Serialize;

use super::candidates::{CandidateSearch, MatchTarget};
use super::matcher::{MatchAlgorithm, Scoreboard};
use crate::config::AggregationConfig;
use crate::db::{AggregateId, Database, RawContactId};
use crate::normalize;

/// What to find suggestions for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionTarget {
    /// An existing aggregate; its own members are never suggested.
    Aggregate(AggregateId),
    /// Values typed by a person that are not stored yet.
    Values {
        name: Option<String>,
        emails: Vec<String>,
        phones: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub aggregate_id: AggregateId,
    pub display_name: Option<String>,
    pub score: i32,
}

/// Aggregates that look like the same person as `target`, best first.
///
/// A `filter` keeps only aggregates whose display name, or one of its
/// words, starts with the filter text (case and accents ignored).
pub fn query_suggestions(
    db: &Database,
    config: &AggregationConfig,
    target: &SuggestionTarget,
    max_results: usize,
    filter: Option<&str>,
) -> Result<Vec<Suggestion>> {
    let (data, exclude, own): (MatchTarget, Vec<RawContactId>, Option<AggregateId>) = match target {
        SuggestionTarget::Aggregate(id) => {
            if db.get_aggregate(*id)?.is_none() {
                tracing::debug!(aggregate = %id, "Suggestions requested for missing aggregate");
                return Ok(Vec::new());
            }
            (MatchTarget::for_aggregate(db, *id)?, db.member_ids(*id)?, Some(*id))
        }
        SuggestionTarget::Values { name, emails, phones } => (
            MatchTarget::from_values(name.as_deref(), emails, phones),
            Vec::new(),
            None,
        ),
    };

    let search = CandidateSearch::new(db, config, &exclude);
    let mut board = Scoreboard::new();
    search.match_identities_and_names(&data, &mut board)?;
    search.match_emails_and_phones(&data, &mut board)?;
    search.match_approximate_names(&data, None, MatchAlgorithm::Approximate, &mut board)?;

    let filter = filter.map(normalize::normalize_name).filter(|f| !f.is_empty());

    let mut suggestions = Vec::new();
    for (aggregate_id, score) in board.pick_best_matches(config.suggest_threshold) {
        if suggestions.len() >= max_results {
            break;
        }
        if Some(aggregate_id) == own {
            continue;
        }
        let Some(aggregate) = db.get_aggregate(aggregate_id)? else {
            continue;
        };
        let display_name = aggregate.fields.display_name;
        if let Some(filter) = &filter {
            if !name_matches_filter(display_name.as_deref().unwrap_or(""), filter) {
                continue;
            }
        }
        suggestions.push(Suggestion {
            aggregate_id,
            display_name,
            score,
        });
    }
    Ok(suggestions)
}

fn name_matches_filter(name: &str, filter: &str) -> bool {
    normalize::normalize_name(name).starts_with(filter)
        || normalize::tokenize(name)
            .iter()
            .any(|word| normalize::normalize_name(word).starts_with(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_any_word_prefix() {
        assert!(name_matches_filter("John Doe", "jo"));
        assert!(name_matches_filter("John Doe", "doe"));
        assert!(name_matches_filter("José Núñez", "nun"));
        assert!(!name_matches_filter("John Doe", "smi"));
    }
}
