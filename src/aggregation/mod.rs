//! The aggregation engine.
//!
//! `Aggregator` decides which aggregate every raw contact belongs to and
//! keeps aggregate fields in sync. It never opens transactions itself: the
//! caller wraps each unit of work in `Database::in_transaction`.

pub mod candidates;
pub mod matcher;
pub mod recompute;
pub mod resplit;
pub mod suggestions;

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::AggregationConfig;
use crate::db::{AggregateId, AggregationMode, Database, RawContact, RawContactId};
use candidates::{CandidateSearch, MatchTarget};
use matcher::{MatchAlgorithm, Scoreboard, Verdict};
use recompute::RefreshOutcome;

pub use suggestions::{Suggestion, SuggestionTarget};

/// Counters for one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationStats {
    /// Raw contacts evaluated
    pub processed: usize,
    /// Raw contacts moved into an existing aggregate
    pub joined: usize,
    /// Raw contacts moved out into a new aggregate
    pub split: usize,
    /// Raw contacts that stayed where they were
    pub settled: usize,
    /// Raw contacts ignored (disabled or missing)
    pub skipped: usize,
    /// Aggregates created
    pub created: usize,
    /// Aggregates deleted after losing their last member
    pub deleted: usize,
    /// Joins rejected by the account-collision rule
    pub collisions: usize,
    /// Aggregates divided by a re-split
    pub resplits: usize,
}

/// What happened to one raw contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The raw contact no longer exists.
    Missing,
    /// Aggregation is disabled for the raw contact.
    Skipped,
    /// Stayed in its aggregate.
    Settled(AggregateId),
    /// Moved into an existing aggregate.
    Joined(AggregateId),
    /// Moved into a new aggregate of its own.
    Split(AggregateId),
}

/// Where the decision wants a raw contact to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    None,
    Aggregate { id: AggregateId, by_exception: bool },
}

pub struct Aggregator {
    config: AggregationConfig,
    board: Scoreboard,
    /// Raw contacts queued for the next batch with their requested mode
    pending: BTreeMap<RawContactId, AggregationMode>,
    /// Aggregates whose name-only glue was rejected
    resplit_queue: BTreeSet<AggregateId>,
    stats: AggregationStats,
}

impl Aggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            board: Scoreboard::new(),
            pending: BTreeMap::new(),
            resplit_queue: BTreeSet::new(),
            stats: AggregationStats::default(),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Raw contacts queued for the next batch, in processing order.
    pub fn pending(&self) -> Vec<RawContactId> {
        self.pending.keys().copied().collect()
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Give a freshly inserted raw contact a singleton aggregate and queue it.
    pub fn on_insert(&mut self, db: &Database, raw: RawContactId) -> Result<()> {
        let Some(contact) = db.get_raw_contact(raw)? else {
            tracing::debug!(raw = %raw, "Inserted raw contact not found");
            return Ok(());
        };
        if contact.aggregation_mode == AggregationMode::Disabled {
            return Ok(());
        }
        if contact.aggregate_id.is_none() {
            self.create_singleton(db, raw)?;
        }
        self.mark_for_aggregation(db, raw, contact.aggregation_mode, false)
    }

    /// Queue a raw contact for the next batch.
    ///
    /// Without `force`, a `Default` request leaves an explicit mode that is
    /// already queued in place.
    pub fn mark_for_aggregation(
        &mut self,
        db: &Database,
        raw: RawContactId,
        mode: AggregationMode,
        force: bool,
    ) -> Result<()> {
        if mode == AggregationMode::Disabled {
            return Ok(());
        }
        if !force && mode == AggregationMode::Default {
            if let Some(existing) = self.pending.get(&raw) {
                if *existing != AggregationMode::Default {
                    return Ok(());
                }
            }
        }
        self.pending.insert(raw, mode);
        db.mark_aggregation_needed(raw)?;
        Ok(())
    }

    /// Queue every member of an aggregate with its stored mode.
    pub fn mark_aggregate_for_aggregation(&mut self, db: &Database, aggregate: AggregateId) -> Result<()> {
        for contact in db.raw_contacts_in_aggregate(aggregate)? {
            self.mark_for_aggregation(db, contact.id, contact.aggregation_mode, false)?;
        }
        Ok(())
    }

    /// Queue every raw contact in the store with its stored mode.
    pub fn mark_all_for_aggregation(&mut self, db: &Database) -> Result<()> {
        for (raw, mode) in db.all_raw_contact_modes()? {
            self.mark_for_aggregation(db, raw, mode, false)?;
        }
        Ok(())
    }

    /// Re-aggregate both sides of an exception that was just added or removed.
    pub fn on_exception_changed(
        &mut self,
        db: &Database,
        a: RawContactId,
        b: RawContactId,
    ) -> Result<AggregationStats> {
        for raw in [a, b] {
            if let Some(contact) = db.get_raw_contact(raw)? {
                self.mark_for_aggregation(db, raw, contact.aggregation_mode, true)?;
            }
        }
        self.aggregate_in_transaction(db)
    }

    /// Repair linkage after a raw contact is deleted.
    pub fn on_delete(&mut self, db: &Database, raw: RawContactId) -> Result<()> {
        self.pending.remove(&raw);
        let Some(contact) = db.get_raw_contact(raw)? else {
            return Ok(());
        };
        db.delete_raw_contact(raw)?;
        if let Some(aggregate) = contact.aggregate_id {
            self.release(db, aggregate)?;
        }
        Ok(())
    }

    /// Queue the potential partners of an aggregate whose visibility changed.
    ///
    /// A visible aggregate queues its own members so they can be matched
    /// again. A hidden one queues the visible aggregates its members would
    /// match, since they may have been holding on to it.
    pub fn update_on_visibility_change(&mut self, db: &Database, aggregate: AggregateId) -> Result<()> {
        if recompute::refresh(db, aggregate)? == RefreshOutcome::Missing {
            return Ok(());
        }

        if db.is_aggregate_visible(aggregate)? {
            return self.mark_aggregate_for_aggregation(db, aggregate);
        }

        let members = db.member_ids(aggregate)?;
        let mut partners = BTreeSet::new();
        for &member in &members {
            let target = MatchTarget::for_raw_contact(db, member)?;
            let search = CandidateSearch::new(db, &self.config, &members);

            self.board.clear();
            search.match_identities_and_names(&target, &mut self.board)?;
            partners.extend(
                self.board
                    .pick_best_matches(self.config.primary_threshold)
                    .into_iter()
                    .map(|(id, _)| id),
            );

            self.board.clear();
            search.match_emails_and_phones(&target, &mut self.board)?;
            partners.extend(
                self.board
                    .pick_best_matches(self.config.secondary_threshold)
                    .into_iter()
                    .map(|(id, _)| id),
            );
        }

        for partner in partners {
            self.mark_aggregate_for_aggregation(db, partner)?;
        }
        Ok(())
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Process every queued raw contact in raw id order, then re-split the
    /// aggregates whose joins were rejected.
    ///
    /// Markers persisted by an interrupted pass are picked up first. Each
    /// marker is cleared right after its raw contact's decision is written.
    /// On error the counters and re-split queue are restored to what they
    /// were before the pass, matching the rolled-back store.
    pub fn aggregate_in_transaction(&mut self, db: &Database) -> Result<AggregationStats> {
        self.restoring_on_error(|aggregator| aggregator.run_pass(db))
    }

    fn run_pass(&mut self, db: &Database) -> Result<AggregationStats> {
        for (raw, mode) in db.raw_contacts_needing_aggregation()? {
            self.pending.entry(raw).or_insert(mode);
        }

        while let Some((&raw, &mode)) = self.pending.iter().next() {
            self.decide(db, raw, mode)?;
            self.pending.remove(&raw);
            db.clear_aggregation_needed(raw)?;
        }

        self.run_resplits(db)?;

        let stats = std::mem::take(&mut self.stats);
        tracing::info!(
            processed = stats.processed,
            joined = stats.joined,
            split = stats.split,
            created = stats.created,
            deleted = stats.deleted,
            collisions = stats.collisions,
            "Aggregation pass complete"
        );
        Ok(stats)
    }

    /// Evaluate one raw contact now, outside the batch order.
    ///
    /// Its counters are reported with the next pass.
    pub fn aggregate_record(&mut self, db: &Database, raw: RawContactId) -> Result<Outcome> {
        self.restoring_on_error(|aggregator| {
            let mode = match db.get_raw_contact(raw)? {
                Some(contact) => contact.aggregation_mode,
                None => AggregationMode::Default,
            };
            let outcome = aggregator.decide(db, raw, mode)?;
            if aggregator.pending.remove(&raw).is_some() {
                db.clear_aggregation_needed(raw)?;
            }
            aggregator.run_resplits(db)?;
            Ok(outcome)
        })
    }

    /// Run `f`, putting the counters and re-split queue back if it fails.
    fn restoring_on_error<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let stats = self.stats.clone();
        let resplit_queue = self.resplit_queue.clone();
        let result = f(self);
        if result.is_err() {
            self.stats = stats;
            self.resplit_queue = resplit_queue;
            self.board.clear();
        }
        result
    }

    /// Recompute an aggregate's derived fields without touching membership.
    pub fn update_aggregate_data(&self, db: &Database, aggregate: AggregateId) -> Result<()> {
        recompute::refresh(db, aggregate)?;
        Ok(())
    }

    pub fn query_suggestions(
        &self,
        db: &Database,
        target: &SuggestionTarget,
        max_results: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Suggestion>> {
        suggestions::query_suggestions(db, &self.config, target, max_results, filter)
    }

    // ========================================================================
    // Decision
    // ========================================================================

    fn decide(&mut self, db: &Database, raw: RawContactId, requested: AggregationMode) -> Result<Outcome> {
        let Some(contact) = db.get_raw_contact(raw)? else {
            tracing::debug!(raw = %raw, "Queued raw contact no longer exists");
            self.stats.skipped += 1;
            return Ok(Outcome::Missing);
        };

        // The stored mode wins when it has been switched off since queueing.
        let mode = match contact.aggregation_mode {
            AggregationMode::Default => requested,
            stored => stored,
        };

        let outcome = match mode {
            AggregationMode::Disabled => {
                self.stats.skipped += 1;
                return Ok(Outcome::Skipped);
            }
            AggregationMode::Suspended => self.keep_current(db, &contact)?,
            AggregationMode::Default => self.decide_default(db, &contact)?,
        };

        self.stats.processed += 1;
        tracing::debug!(raw = %raw, outcome = ?outcome, "Aggregation decision");
        Ok(outcome)
    }

    fn decide_default(&mut self, db: &Database, contact: &RawContact) -> Result<Outcome> {
        let exclude = self.exclusion_for(db, contact)?;
        let target = MatchTarget::for_raw_contact(db, contact.id)?;
        let mut vetoed = BTreeSet::new();

        loop {
            match self.choose(db, contact, &target, &exclude, &vetoed)? {
                Choice::None => return self.split(db, contact),
                Choice::Aggregate { id, .. } if Some(id) == contact.aggregate_id => {
                    return self.settle(db, id);
                }
                Choice::Aggregate { id, by_exception } => {
                    if by_exception || self.can_join(db, contact, id)? {
                        return self.join(db, contact, id);
                    }
                    tracing::info!(
                        raw = %contact.id,
                        aggregate = %id,
                        "Join rejected: same-account member without shared data"
                    );
                    self.stats.collisions += 1;
                    self.resplit_queue.insert(id);
                    vetoed.insert(id);
                }
            }
        }
    }

    /// Raw ids candidate queries must skip: the record itself and everything
    /// still queued, except fellow members of its current aggregate.
    fn exclusion_for(&self, db: &Database, contact: &RawContact) -> Result<Vec<RawContactId>> {
        let members: BTreeSet<RawContactId> = match contact.aggregate_id {
            Some(aggregate) => db.member_ids(aggregate)?.into_iter().collect(),
            None => BTreeSet::new(),
        };
        let mut exclude: Vec<RawContactId> = self
            .pending
            .keys()
            .copied()
            .filter(|id| !members.contains(id))
            .collect();
        exclude.push(contact.id);
        Ok(exclude)
    }

    /// Run the scoreboard passes in precedence order: exceptions, primary
    /// data, then secondary data narrowed by an approximate name pass.
    fn choose(
        &mut self,
        db: &Database,
        contact: &RawContact,
        target: &MatchTarget,
        exclude: &[RawContactId],
        vetoed: &BTreeSet<AggregateId>,
    ) -> Result<Choice> {
        let search = CandidateSearch::new(db, &self.config, exclude);
        let board = &mut self.board;
        board.clear();
        for &id in vetoed {
            board.keep_out(id);
        }

        search.match_exceptions(contact.id, board)?;
        if let Some(id) = board.kept_in() {
            return Ok(Choice::Aggregate { id, by_exception: true });
        }

        search.match_identities_and_names(target, board)?;
        // A tie only rules out a name-level join; email and phone may still decide.
        if let Verdict::Match(id) = board.pick_best_match(self.config.primary_threshold, true) {
            return Ok(Choice::Aggregate { id, by_exception: false });
        }

        search.match_emails_and_phones(target, board)?;
        let candidates = board.prepare_secondary_candidates(self.config.primary_threshold);
        if candidates.is_empty() || candidates.len() > self.config.secondary_hit_limit {
            return Ok(Choice::None);
        }

        search.match_approximate_names(target, Some(&candidates), MatchAlgorithm::Conservative, board)?;
        match board.pick_best_match(self.config.secondary_threshold, false) {
            Verdict::Match(id) => Ok(Choice::Aggregate { id, by_exception: false }),
            Verdict::NoMatch | Verdict::Ambiguous => Ok(Choice::None),
        }
    }

    /// Account-collision rule: joining is allowed when the target has no
    /// other member from this account, or when shared data (not just a
    /// name) links this record to one of them.
    fn can_join(&self, db: &Database, contact: &RawContact, target: AggregateId) -> Result<bool> {
        let same_account = db.members_in_account(target, contact.account_id, contact.id)?;
        if same_account.is_empty() {
            return Ok(true);
        }
        db.shares_secondary_data(contact.id, &same_account, self.config.strict_phone_matching)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn keep_current(&mut self, db: &Database, contact: &RawContact) -> Result<Outcome> {
        match contact.aggregate_id {
            Some(aggregate) => self.settle(db, aggregate),
            None => {
                let aggregate = self.create_singleton(db, contact.id)?;
                self.stats.split += 1;
                Ok(Outcome::Split(aggregate))
            }
        }
    }

    fn settle(&mut self, db: &Database, aggregate: AggregateId) -> Result<Outcome> {
        recompute::refresh(db, aggregate)?;
        self.stats.settled += 1;
        Ok(Outcome::Settled(aggregate))
    }

    fn join(&mut self, db: &Database, contact: &RawContact, target: AggregateId) -> Result<Outcome> {
        db.set_aggregate_link(contact.id, Some(target))?;
        recompute::refresh(db, target)?;
        if let Some(previous) = contact.aggregate_id {
            self.release(db, previous)?;
        }
        self.stats.joined += 1;
        tracing::debug!(raw = %contact.id, aggregate = %target, "Joined aggregate");
        Ok(Outcome::Joined(target))
    }

    /// Move a raw contact into an aggregate of its own, reusing the current
    /// one when it is the only member.
    fn split(&mut self, db: &Database, contact: &RawContact) -> Result<Outcome> {
        if let Some(current) = contact.aggregate_id {
            if db.member_count_excluding(current, contact.id)? == 0 {
                return self.settle(db, current);
            }
        }

        let aggregate = self.create_singleton(db, contact.id)?;
        if let Some(previous) = contact.aggregate_id {
            self.release(db, previous)?;
        }
        self.stats.split += 1;
        Ok(Outcome::Split(aggregate))
    }

    fn create_singleton(&mut self, db: &Database, raw: RawContactId) -> Result<AggregateId> {
        let aggregate = db.create_aggregate()?;
        db.set_aggregate_link(raw, Some(aggregate))?;
        recompute::refresh(db, aggregate)?;
        self.stats.created += 1;
        Ok(aggregate)
    }

    /// Recompute an aggregate that lost a member, deleting it when empty.
    fn release(&mut self, db: &Database, aggregate: AggregateId) -> Result<()> {
        if db.member_ids(aggregate)?.is_empty() {
            db.delete_aggregate(aggregate)?;
            self.resplit_queue.remove(&aggregate);
            self.stats.deleted += 1;
        } else {
            recompute::refresh(db, aggregate)?;
        }
        Ok(())
    }

    fn run_resplits(&mut self, db: &Database) -> Result<()> {
        let queue = std::mem::take(&mut self.resplit_queue);
        for aggregate in queue {
            let created = resplit::resplit(db, aggregate, self.config.strict_phone_matching)?;
            if !created.is_empty() {
                self.stats.resplits += 1;
                self.stats.created += created.len();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AccountId, ExceptionType, NewAccount, NewRawContact};

    struct Fixture {
        db: Database,
        aggregator: Aggregator,
        home: AccountId,
        work: AccountId,
        other: AccountId,
    }

    fn account(db: &Database, name: &str) -> AccountId {
        db.find_or_create_account(&NewAccount {
            account_type: "com.example".to_string(),
            data_set: None,
            account_name: name.to_string(),
            writable: true,
            photo_priority: 0,
        })
        .unwrap()
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(AggregationConfig::default())
        }

        fn with_config(config: AggregationConfig) -> Self {
            let db = Database::open_in_memory().unwrap();
            db.initialize().unwrap();
            let home = account(&db, "home");
            let work = account(&db, "work");
            let other = account(&db, "other");
            Self {
                db,
                aggregator: Aggregator::new(config),
                home,
                work,
                other,
            }
        }

        fn add(&mut self, account: AccountId, contact: NewRawContact) -> RawContactId {
            let id = self.db.insert_raw_contact(account, &contact).unwrap();
            self.aggregator.on_insert(&self.db, id).unwrap();
            id
        }

        fn run(&mut self) -> AggregationStats {
            let aggregator = &mut self.aggregator;
            self.db
                .in_transaction(|db| aggregator.aggregate_in_transaction(db))
                .unwrap()
        }

        fn add_and_run(&mut self, account: AccountId, contact: NewRawContact) -> RawContactId {
            let id = self.add(account, contact);
            self.run();
            id
        }

        fn reaggregate(&mut self) -> AggregationStats {
            self.aggregator.mark_all_for_aggregation(&self.db).unwrap();
            self.run()
        }

        fn exception_changed(&mut self, a: RawContactId, b: RawContactId) -> AggregationStats {
            let aggregator = &mut self.aggregator;
            self.db
                .in_transaction(|db| aggregator.on_exception_changed(db, a, b))
                .unwrap()
        }

        fn aggregate_of(&self, raw: RawContactId) -> AggregateId {
            self.db
                .get_raw_contact(raw)
                .unwrap()
                .unwrap()
                .aggregate_id
                .unwrap()
        }

        /// Every enabled raw contact is linked and no aggregate is empty.
        fn assert_linkage(&self) {
            for (raw, mode) in self.db.all_raw_contact_modes().unwrap() {
                let linked = self.db.get_raw_contact(raw).unwrap().unwrap().aggregate_id;
                if mode != AggregationMode::Disabled {
                    assert!(linked.is_some(), "raw contact {} is unlinked", raw);
                }
            }
            for aggregate in self.db.list_aggregates().unwrap() {
                assert!(!self.db.member_ids(aggregate.id).unwrap().is_empty());
            }
        }
    }

    fn no_structural_change(stats: &AggregationStats) -> bool {
        stats.joined == 0 && stats.split == 0 && stats.created == 0 && stats.deleted == 0
    }

    #[test]
    fn test_lone_record_gets_singleton() {
        let mut f = Fixture::new();
        let r1 = f.add(f.home, NewRawContact::named("John Doe"));
        let stats = f.run();

        assert_eq!(stats.created, 1);
        assert_eq!(stats.settled, 1);
        let aggregate = f.db.get_aggregate(f.aggregate_of(r1)).unwrap().unwrap();
        assert_eq!(aggregate.fields.display_name.as_deref(), Some("John Doe"));
        assert_eq!(aggregate.fields.name_raw_contact_id, Some(r1));
        assert!(f.db.raw_contacts_needing_aggregation().unwrap().is_empty());
        f.assert_linkage();
    }

    #[test]
    fn test_john_doe_scenario() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe").with_phone("555-1234"));
        let c1 = f.aggregate_of(r1);

        let r2 = f.add(f.work, NewRawContact::named("Jon Doe").with_phone("555-1234"));
        let stats = f.run();
        assert_eq!(f.aggregate_of(r2), c1);
        assert_eq!(stats.joined, 1);
        assert_eq!(stats.deleted, 1);

        let r3 = f.add(f.home, NewRawContact::named("John Doe"));
        let stats = f.run();
        let c2 = f.aggregate_of(r3);
        assert_ne!(c2, c1);
        assert_eq!(stats.collisions, 1);
        assert_eq!(f.aggregate_of(r1), c1);
        assert_eq!(f.aggregate_of(r2), c1);

        let fields = f.db.get_aggregate(c1).unwrap().unwrap().fields;
        assert!(fields.has_phone_number);
        f.assert_linkage();
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let mut f = Fixture::new();
        let r1 = f.add(f.home, NewRawContact::named("John Doe").with_phone("555-1234"));
        let r2 = f.add(f.work, NewRawContact::named("Jon Doe").with_phone("555-1234"));
        let r3 = f.add(f.home, NewRawContact::named("John Doe"));
        f.run();

        let before: Vec<_> = [r1, r2, r3].iter().map(|&r| f.aggregate_of(r)).collect();
        assert_eq!(before[0], before[1]);
        assert_ne!(before[0], before[2]);

        let stats = f.reaggregate();
        assert_eq!(stats.processed, 3);
        assert!(no_structural_change(&stats), "{:?}", stats);
        let after: Vec<_> = [r1, r2, r3].iter().map(|&r| f.aggregate_of(r)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_same_account_join_with_shared_email() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe").with_email("john@example.com"));
        let r2 = f.add_and_run(f.home, NewRawContact::named("John Doe").with_email("john@example.com"));
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));
    }

    #[test]
    fn test_identity_match_joins_despite_names() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("Alice Liddell").with_identity("alice42", Some("xmpp")));
        let r2 = f.add_and_run(f.work, NewRawContact::named("Rabbit Fan").with_identity("alice42", Some("xmpp")));
        let r3 = f.add_and_run(f.work, NewRawContact::named("Someone").with_identity("alice42", Some("sip")));
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));
        assert_ne!(f.aggregate_of(r1), f.aggregate_of(r3));
    }

    #[test]
    fn test_keep_together_merges_and_removal_splits() {
        let mut f = Fixture::new();
        let a = f.add_and_run(f.home, NewRawContact::named("Alice"));
        let b = f.add_and_run(f.home, NewRawContact::named("Bob"));
        assert_ne!(f.aggregate_of(a), f.aggregate_of(b));

        f.db.set_aggregation_exception(a, b, ExceptionType::KeepTogether).unwrap();
        let stats = f.exception_changed(a, b);
        assert_eq!(f.aggregate_of(a), f.aggregate_of(b));
        assert_eq!(stats.joined, 1);
        assert_eq!(stats.deleted, 1);

        let stats = f.reaggregate();
        assert!(no_structural_change(&stats), "{:?}", stats);

        f.db.remove_aggregation_exception(a, b).unwrap();
        let stats = f.exception_changed(a, b);
        assert_ne!(f.aggregate_of(a), f.aggregate_of(b));
        assert_eq!(stats.split, 1);
        f.assert_linkage();
    }

    #[test]
    fn test_keep_apart_vetoes_strong_match() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe").with_phone("555-1234"));
        let r2 = f.add_and_run(f.work, NewRawContact::named("John Doe").with_phone("555-1234"));
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));

        f.db.set_aggregation_exception(r1, r2, ExceptionType::KeepApart).unwrap();
        f.exception_changed(r1, r2);
        assert_ne!(f.aggregate_of(r1), f.aggregate_of(r2));

        let stats = f.reaggregate();
        assert!(no_structural_change(&stats), "{:?}", stats);
        assert_ne!(f.aggregate_of(r1), f.aggregate_of(r2));
        f.assert_linkage();
    }

    #[test]
    fn test_tied_candidates_are_not_merged() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        assert_ne!(f.aggregate_of(r1), f.aggregate_of(r2));

        let r3 = f.add_and_run(f.other, NewRawContact::named("John Doe"));
        assert_ne!(f.aggregate_of(r3), f.aggregate_of(r1));
        assert_ne!(f.aggregate_of(r3), f.aggregate_of(r2));
    }

    /// Give `count` aggregates on their own accounts the same phone number.
    fn seed_shared_phone(f: &mut Fixture, count: usize) -> AggregateId {
        let mut first = None;
        for i in 0..count {
            let name = if i == 0 { "Alpha Zed".to_string() } else { format!("Filler {}", i) };
            let owner = account(&f.db, &format!("switchboard-{}", i));
            let raw = f
                .db
                .insert_raw_contact(owner, &NewRawContact::named(&name).with_phone("555-1234"))
                .unwrap();
            let aggregate = f.db.create_aggregate().unwrap();
            f.db.set_aggregate_link(raw, Some(aggregate)).unwrap();
            recompute::refresh(&f.db, aggregate).unwrap();
            first.get_or_insert(aggregate);
        }
        first.unwrap()
    }

    #[test]
    fn test_shared_phone_over_hit_limit_is_ignored() {
        let mut f = Fixture::new();
        let limit = f.aggregator.config().secondary_hit_limit;
        let alpha = seed_shared_phone(&mut f, limit + 5);

        let newcomer = f.add_and_run(f.work, NewRawContact::named("Alpha Zedd").with_phone("555-1234"));
        assert_ne!(f.aggregate_of(newcomer), alpha);
    }

    #[test]
    fn test_shared_phone_at_hit_limit_still_matches() {
        let mut f = Fixture::new();
        let limit = f.aggregator.config().secondary_hit_limit;
        let alpha = seed_shared_phone(&mut f, limit);

        let newcomer = f.add_and_run(f.work, NewRawContact::named("Alpha Zedd").with_phone("555-1234"));
        assert_eq!(f.aggregate_of(newcomer), alpha);
    }

    #[test]
    fn test_phone_breaks_tie_between_namesakes() {
        let mut f = Fixture::new();
        let a = f.add_and_run(f.home, NewRawContact::named("John Doe").with_phone("555-1234"));
        let b = f.add_and_run(f.home, NewRawContact::named("John Doe").with_phone("555-9999"));
        assert_ne!(f.aggregate_of(a), f.aggregate_of(b));

        let r = f.add_and_run(f.other, NewRawContact::named("John Doe").with_phone("555-1234"));
        assert_eq!(f.aggregate_of(r), f.aggregate_of(a));
        assert_ne!(f.aggregate_of(r), f.aggregate_of(b));
    }

    #[test]
    fn test_failed_pass_does_not_leak_counters() {
        let mut f = Fixture::new();
        f.add_and_run(f.home, NewRawContact::named("John Doe"));
        f.add_and_run(f.work, NewRawContact::named("John Doe"));
        f.add(f.home, NewRawContact::named("John Doe"));
        let broken = f.add(f.other, NewRawContact::named("Zed"));
        f.db.conn
            .execute("UPDATE raw_contacts SET display_name_source = 99 WHERE id = ?", [broken])
            .unwrap();

        let aggregator = &mut f.aggregator;
        assert!(f
            .db
            .in_transaction(|db| aggregator.aggregate_in_transaction(db))
            .is_err());

        f.db.conn
            .execute("UPDATE raw_contacts SET display_name_source = 0 WHERE id = ?", [broken])
            .unwrap();
        let stats = f.run();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.collisions, 1);
        assert_eq!(stats.resplits, 1);
        f.assert_linkage();
    }

    #[test]
    fn test_disabled_record_is_left_alone() {
        let mut f = Fixture::new();
        let contact = NewRawContact {
            aggregation_mode: AggregationMode::Disabled,
            ..NewRawContact::named("John Doe")
        };
        let raw = f.add(f.home, contact);
        let stats = f.run();
        assert_eq!(stats.processed, 0);
        assert!(f.db.get_raw_contact(raw).unwrap().unwrap().aggregate_id.is_none());
        assert!(f.db.list_aggregates().unwrap().is_empty());
    }

    #[test]
    fn test_suspended_record_keeps_its_aggregate() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let contact = NewRawContact {
            aggregation_mode: AggregationMode::Suspended,
            ..NewRawContact::named("John Doe")
        };
        let r2 = f.add_and_run(f.work, contact);
        assert_ne!(f.aggregate_of(r1), f.aggregate_of(r2));
    }

    #[test]
    fn test_default_request_does_not_override_queued_mode() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add(f.work, NewRawContact::named("John Doe"));
        f.aggregator
            .mark_for_aggregation(&f.db, r2, AggregationMode::Suspended, true)
            .unwrap();
        f.aggregator
            .mark_for_aggregation(&f.db, r2, AggregationMode::Default, false)
            .unwrap();
        f.run();
        assert_ne!(f.aggregate_of(r1), f.aggregate_of(r2));

        f.aggregator
            .mark_for_aggregation(&f.db, r2, AggregationMode::Default, true)
            .unwrap();
        f.run();
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));
    }

    #[test]
    fn test_interrupted_batch_resumes_from_markers() {
        let mut f = Fixture::new();
        let r1 = f.add(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add(f.work, NewRawContact::named("John Doe"));
        assert_eq!(f.aggregator.pending(), vec![r1, r2]);

        // A fresh aggregator only knows the persisted markers.
        f.aggregator = Aggregator::new(AggregationConfig::default());
        let stats = f.run();
        assert_eq!(stats.processed, 2);
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));
    }

    #[test]
    fn test_failed_batch_rolls_back_linkage() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add(f.work, NewRawContact::named("John Doe"));
        let before = f.aggregate_of(r2);

        let aggregator = &mut f.aggregator;
        let result: Result<()> = f.db.in_transaction(|db| {
            aggregator.aggregate_in_transaction(db)?;
            anyhow::bail!("storage failure")
        });
        assert!(result.is_err());
        assert_eq!(f.aggregate_of(r2), before);
        assert_ne!(f.aggregate_of(r1), before);
        assert_eq!(f.db.raw_contacts_needing_aggregation().unwrap().len(), 1);
    }

    #[test]
    fn test_aggregate_record_decides_immediately() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add(f.work, NewRawContact::named("John Doe"));

        let outcome = f.aggregator.aggregate_record(&f.db, r2).unwrap();
        assert_eq!(outcome, Outcome::Joined(f.aggregate_of(r1)));
        assert!(f.aggregator.pending().is_empty());
        assert_eq!(
            f.aggregator.aggregate_record(&f.db, RawContactId(999)).unwrap(),
            Outcome::Missing
        );
    }

    #[test]
    fn test_unhidden_aggregate_is_matched_again() {
        let mut f = Fixture::new();
        let hidden = NewRawContact {
            hidden: true,
            ..NewRawContact::named("John Doe")
        };
        let r1 = f.add_and_run(f.home, hidden);
        let c1 = f.aggregate_of(r1);
        assert!(!f.db.is_aggregate_visible(c1).unwrap());

        let r2 = f.add_and_run(f.work, NewRawContact::named("John Doe"));
        assert_ne!(f.aggregate_of(r2), c1);

        f.db.set_raw_contact_hidden(r1, false).unwrap();
        f.aggregator.update_on_visibility_change(&f.db, c1).unwrap();
        assert_eq!(f.aggregator.pending(), vec![r1]);
        f.run();
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));
        f.assert_linkage();
    }

    #[test]
    fn test_hidden_aggregate_queues_partners() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let c2 = f.aggregate_of(r2);

        f.db.set_raw_contact_hidden(r2, true).unwrap();
        f.aggregator.update_on_visibility_change(&f.db, c2).unwrap();
        assert!(!f.db.is_aggregate_visible(c2).unwrap());
        assert_eq!(f.aggregator.pending(), vec![r1]);
    }

    #[test]
    fn test_delete_repairs_aggregate() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe").with_phone("555-1234"));
        let r2 = f.add_and_run(f.work, NewRawContact::named("Johnny Doe").with_phone("555-1234"));
        let c1 = f.aggregate_of(r1);
        assert_eq!(f.aggregate_of(r2), c1);

        f.aggregator.on_delete(&f.db, r2).unwrap();
        let fields = f.db.get_aggregate(c1).unwrap().unwrap().fields;
        assert_eq!(fields.name_raw_contact_id, Some(r1));

        f.aggregator.on_delete(&f.db, r1).unwrap();
        assert!(f.db.get_aggregate(c1).unwrap().is_none());
        f.aggregator.on_delete(&f.db, r1).unwrap();
    }

    #[test]
    fn test_update_aggregate_data_follows_member_edits() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let c1 = f.aggregate_of(r1);

        let edited = NewRawContact {
            starred: true,
            ..NewRawContact::named("John Doe").with_phone("555-1234")
        };
        f.db.update_raw_contact(r1, &edited).unwrap();
        f.aggregator.update_aggregate_data(&f.db, c1).unwrap();

        let fields = f.db.get_aggregate(c1).unwrap().unwrap().fields;
        assert!(fields.starred);
        assert!(fields.has_phone_number);
        assert_eq!(f.aggregate_of(r1), c1);
    }

    #[test]
    fn test_collision_resplits_name_only_glue() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Doe"));
        let r2 = f.add_and_run(f.work, NewRawContact::named("John Doe"));
        assert_eq!(f.aggregate_of(r1), f.aggregate_of(r2));

        let r3 = f.add(f.home, NewRawContact::named("John Doe"));
        let stats = f.run();
        assert_eq!(stats.collisions, 1);
        assert_eq!(stats.resplits, 1);
        let (a1, a2, a3) = (f.aggregate_of(r1), f.aggregate_of(r2), f.aggregate_of(r3));
        assert_ne!(a1, a2);
        assert_ne!(a1, a3);
        assert_ne!(a2, a3);
        f.assert_linkage();
    }

    #[test]
    fn test_suggestions_for_aggregate_and_values() {
        let mut f = Fixture::new();
        let r1 = f.add_and_run(f.home, NewRawContact::named("John Smith"));
        let r2 = f.add_and_run(f.work, NewRawContact::named("Jon Smith"));
        f.add_and_run(f.other, NewRawContact::named("Mary Major"));
        let (c1, c2) = (f.aggregate_of(r1), f.aggregate_of(r2));
        assert_ne!(c1, c2);

        let found = f
            .aggregator
            .query_suggestions(&f.db, &SuggestionTarget::Aggregate(c1), 10, None)
            .unwrap();
        assert_eq!(found.iter().map(|s| s.aggregate_id).collect::<Vec<_>>(), vec![c2]);
        assert_eq!(found[0].display_name.as_deref(), Some("Jon Smith"));

        let filtered = f
            .aggregator
            .query_suggestions(&f.db, &SuggestionTarget::Aggregate(c1), 10, Some("maj"))
            .unwrap();
        assert!(filtered.is_empty());

        let target = SuggestionTarget::Values {
            name: Some("Jon Smith".to_string()),
            emails: Vec::new(),
            phones: Vec::new(),
        };
        let found = f.aggregator.query_suggestions(&f.db, &target, 10, None).unwrap();
        let ids: Vec<_> = found.iter().map(|s| s.aggregate_id).collect();
        assert_eq!(ids[0], c2);
        assert!(ids.contains(&c1));
        assert_eq!(f.aggregator.query_suggestions(&f.db, &target, 1, None).unwrap().len(), 1);
    }
}
