//! Re-split of an aggregate whose name-only glue was rejected.
//!
//! Members stay together only when a chain of `KeepTogether` exceptions or
//! shared emails, identities or phone numbers connects them.

use anyhow::Result;
use std::collections::BTreeMap;

use super::recompute;
use crate::db::{AggregateId, Database, RawContactId};

/// Disjoint-set forest over member indices.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Join two sets, keeping the smaller index as the root.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Group `members` into connected components, each sorted, ordered by
/// their smallest raw contact id.
pub fn components(
    members: &[RawContactId],
    links: &[(RawContactId, RawContactId)],
) -> Vec<Vec<RawContactId>> {
    let mut sorted = members.to_vec();
    sorted.sort();
    sorted.dedup();

    let index: BTreeMap<RawContactId, usize> = sorted.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut sets = UnionFind::new(sorted.len());
    for (a, b) in links {
        if let (Some(&ia), Some(&ib)) = (index.get(a), index.get(b)) {
            sets.union(ia, ib);
        }
    }

    let mut groups: BTreeMap<usize, Vec<RawContactId>> = BTreeMap::new();
    for (i, &id) in sorted.iter().enumerate() {
        let root = sets.find(i);
        groups.entry(root).or_default().push(id);
    }
    groups.into_values().collect()
}

/// Split `aggregate` into its connected components.
///
/// The component holding the lowest raw contact id keeps the aggregate;
/// every other component moves to a new aggregate. Returns the created ids.
pub fn resplit(db: &Database, aggregate: AggregateId, strict_phone: bool) -> Result<Vec<AggregateId>> {
    let members = db.member_ids(aggregate)?;
    if members.len() < 2 {
        return Ok(Vec::new());
    }

    let mut links = db.keep_together_pairs_among(&members)?;
    links.extend(db.secondary_links_among(&members, strict_phone)?);

    let groups = components(&members, &links);
    if groups.len() < 2 {
        return Ok(Vec::new());
    }

    let mut created = Vec::new();
    for group in groups.iter().skip(1) {
        let new_aggregate = db.create_aggregate()?;
        for &member in group {
            db.set_aggregate_link(member, Some(new_aggregate))?;
        }
        recompute::refresh(db, new_aggregate)?;
        created.push(new_aggregate);
    }
    recompute::refresh(db, aggregate)?;

    tracing::info!(
        aggregate = %aggregate,
        components = groups.len(),
        "Re-split aggregate"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[i64]) -> Vec<RawContactId> {
        values.iter().map(|&v| RawContactId(v)).collect()
    }

    #[test]
    fn test_components_follow_links() {
        let members = ids(&[5, 1, 3, 2, 4]);
        let links = vec![
            (RawContactId(1), RawContactId(4)),
            (RawContactId(4), RawContactId(5)),
            (RawContactId(2), RawContactId(9)),
        ];
        assert_eq!(
            components(&members, &links),
            vec![ids(&[1, 4, 5]), ids(&[2]), ids(&[3])]
        );
    }

    #[test]
    fn test_single_component() {
        let members = ids(&[1, 2]);
        let links = vec![(RawContactId(2), RawContactId(1))];
        assert_eq!(components(&members, &links), vec![ids(&[1, 2])]);
    }
}
