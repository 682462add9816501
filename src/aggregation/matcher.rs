//! Per-decision scoreboard of candidate aggregates.

use std::collections::BTreeMap;

use crate::db::{AggregateId, NameLookupType};

/// Score of an identity match; above every threshold.
pub const MAX_SCORE: i32 = 100;

/// Flat score for a matching email, phone number or nickname.
const SECONDARY_HIT_SCORE: i32 = 71;

/// Multiplier separating the best score from the match counter.
const SCORE_SCALE: i32 = 1000;

/// Jaro–Winkler similarity needed before an approximate name scores.
const APPROXIMATE_MATCH_THRESHOLD: f64 = 0.82;

/// Stricter similarity needed when either side came from an email address.
const APPROXIMATE_MATCH_THRESHOLD_FOR_EMAIL: f64 = 0.95;

/// Conservative matching only compares this many leading characters.
const MAX_CONSERVATIVE_NAME_LENGTH: usize = 30;

/// How two names are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchAlgorithm {
    /// Only identical names score.
    Exact,
    /// Similar names score in proportion to their similarity.
    Approximate,
    /// Approximate, limited to the leading part of long names.
    Conservative,
}

/// Outcome of `Scoreboard::pick_best_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match(AggregateId),
    NoMatch,
    Ambiguous,
}

#[derive(Debug, Clone, Default)]
struct MatchScore {
    /// Best name or identity evidence
    primary: i32,
    /// Best email, phone or nickname evidence
    secondary: i32,
    /// Number of individual hits, used as a tie-breaker
    match_count: i32,
    /// Whether an email or phone number matched
    data_match: bool,
    keep_in: bool,
    keep_out: bool,
}

impl MatchScore {
    fn score(&self) -> i32 {
        self.primary.max(self.secondary) * SCORE_SCALE + self.match_count
    }

    fn primary_rank(&self) -> i32 {
        self.primary * SCORE_SCALE + self.match_count
    }
}

/// Score range for a pair of lookup types, as (min, max).
fn score_range(candidate: NameLookupType, record: NameLookupType) -> Option<(i32, i32)> {
    use NameLookupType::*;
    match (candidate, record) {
        (Exact, Exact) => Some((99, 99)),
        (Exact, Variant) | (Variant, Exact) => Some((95, 95)),
        (Variant, Variant) => Some((90, 90)),
        (CollationKey, CollationKey) => Some((50, 80)),
        (CollationKey, EmailBasedNickname) => Some((30, 60)),
        (CollationKey, Nickname) => Some((50, 60)),
        (Nickname, _) | (EmailBasedNickname, _) => Some((50, 60)),
        _ => None,
    }
}

/// Accumulates evidence for each candidate aggregate of one raw contact.
#[derive(Debug, Default)]
pub struct Scoreboard {
    scores: BTreeMap<AggregateId, MatchScore>,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn entry(&mut self, aggregate: AggregateId) -> &mut MatchScore {
        self.scores.entry(aggregate).or_default()
    }

    fn update_primary(&mut self, aggregate: AggregateId, score: i32) {
        let entry = self.entry(aggregate);
        entry.primary = entry.primary.max(score);
        entry.match_count += 1;
    }

    fn update_secondary(&mut self, aggregate: AggregateId, score: i32) {
        let entry = self.entry(aggregate);
        entry.secondary = entry.secondary.max(score);
        entry.match_count += 1;
    }

    /// Force `aggregate` to win unless it is also kept out.
    pub fn keep_in(&mut self, aggregate: AggregateId) {
        self.entry(aggregate).keep_in = true;
    }

    /// Never pick `aggregate`.
    pub fn keep_out(&mut self, aggregate: AggregateId) {
        self.entry(aggregate).keep_out = true;
    }

    pub fn match_identity(&mut self, aggregate: AggregateId) {
        self.update_primary(aggregate, MAX_SCORE);
    }

    /// Score a name pair found for `aggregate`.
    pub fn match_name(
        &mut self,
        aggregate: AggregateId,
        candidate_type: NameLookupType,
        candidate_name: &str,
        record_type: NameLookupType,
        record_name: &str,
        algorithm: MatchAlgorithm,
    ) {
        let Some((min_score, max_score)) = score_range(candidate_type, record_type) else {
            return;
        };

        if candidate_name == record_name {
            self.update_primary(aggregate, max_score);
            return;
        }

        if algorithm == MatchAlgorithm::Exact || min_score == max_score {
            return;
        }

        let (a, b) = if algorithm == MatchAlgorithm::Conservative {
            (
                truncate(candidate_name, MAX_CONSERVATIVE_NAME_LENGTH),
                truncate(record_name, MAX_CONSERVATIVE_NAME_LENGTH),
            )
        } else {
            (candidate_name, record_name)
        };

        let threshold = if candidate_type == NameLookupType::EmailBasedNickname
            || record_type == NameLookupType::EmailBasedNickname
        {
            APPROXIMATE_MATCH_THRESHOLD_FOR_EMAIL
        } else {
            APPROXIMATE_MATCH_THRESHOLD
        };

        let similarity = strsim::jaro_winkler(a, b);
        if similarity < threshold {
            return;
        }

        let range = f64::from(max_score - min_score);
        let score = min_score + (range * (similarity - threshold) / (1.0 - threshold)) as i32;
        self.update_primary(aggregate, score.min(max_score));
    }

    pub fn update_score_with_nickname_match(&mut self, aggregate: AggregateId) {
        self.update_secondary(aggregate, SECONDARY_HIT_SCORE);
    }

    pub fn update_score_with_email_match(&mut self, aggregate: AggregateId) {
        self.update_secondary(aggregate, SECONDARY_HIT_SCORE);
        self.entry(aggregate).data_match = true;
    }

    pub fn update_score_with_phone_match(&mut self, aggregate: AggregateId) {
        self.update_secondary(aggregate, SECONDARY_HIT_SCORE);
        self.entry(aggregate).data_match = true;
    }

    /// The lowest-id aggregate forced in and not also kept out.
    pub fn kept_in(&self) -> Option<AggregateId> {
        self.scores
            .iter()
            .find(|(_, score)| score.keep_in && !score.keep_out)
            .map(|(&id, _)| id)
    }

    /// Pick the aggregate whose primary score reaches `threshold`.
    ///
    /// Kept-out aggregates are skipped and a kept-in aggregate wins outright.
    /// Without `allow_multiple`, more than one qualifying aggregate is
    /// ambiguous; with it, the best one wins unless another ties it.
    pub fn pick_best_match(&self, threshold: i32, allow_multiple: bool) -> Verdict {
        if let Some(id) = self.kept_in() {
            return Verdict::Match(id);
        }

        let mut best: Option<(AggregateId, i32)> = None;
        let mut tied = false;
        let mut qualifying = 0;

        for (&id, score) in &self.scores {
            if score.keep_out || score.primary < threshold {
                continue;
            }
            qualifying += 1;
            let rank = score.primary_rank();
            match best {
                Some((_, best_rank)) if rank < best_rank => {}
                Some((_, best_rank)) if rank == best_rank => tied = true,
                _ => {
                    best = Some((id, rank));
                    tied = false;
                }
            }
        }

        match best {
            None => Verdict::NoMatch,
            Some(_) if !allow_multiple && qualifying > 1 => Verdict::Ambiguous,
            Some(_) if tied => Verdict::Ambiguous,
            Some((id, _)) => Verdict::Match(id),
        }
    }

    /// Every aggregate scoring at least `threshold`, best first, then by id.
    pub fn pick_best_matches(&self, threshold: i32) -> Vec<(AggregateId, i32)> {
        let mut matches: Vec<(AggregateId, i32)> = self
            .scores
            .iter()
            .filter(|(_, score)| !score.keep_out)
            .filter(|(_, score)| score.keep_in || score.primary.max(score.secondary) >= threshold)
            .map(|(&id, score)| {
                let value = if score.keep_in {
                    MAX_SCORE * SCORE_SCALE
                } else {
                    score.score()
                };
                (id, value)
            })
            .collect();
        matches.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        matches
    }

    /// Aggregates backed by email or phone evidence reaching `threshold`.
    ///
    /// Every primary score is reset so that the narrowed approximate name
    /// pass alone decides between the candidates, even after a tied
    /// primary pass.
    pub fn prepare_secondary_candidates(&mut self, threshold: i32) -> Vec<AggregateId> {
        let mut candidates = Vec::new();
        for (&id, score) in self.scores.iter_mut() {
            score.primary = 0;
            if score.keep_out || !score.data_match || score.secondary < threshold {
                continue;
            }
            candidates.push(id);
        }
        candidates
    }
}

fn truncate(name: &str, max_chars: usize) -> &str {
    match name.char_indices().nth(max_chars) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}
