//! Recomputation of an aggregate's derived fields from its members.

use anyhow::{anyhow, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::db::{
    Account, AccountId, AggregateFields, AggregateId, Database, PhotoRow, RawContact, RawContactId,
    PINNED_UNPINNED,
};
use crate::error::AggregationError;
use crate::normalize;

/// A member of an aggregate with the account data recomputation needs.
#[derive(Debug, Clone)]
pub struct Member {
    pub contact: RawContact,
    pub account: Account,
    pub has_phone_number: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The aggregate no longer exists.
    Missing,
    Unchanged,
    Updated,
}

/// Recompute and store the derived fields of `aggregate`, writing only
/// when something changed.
pub fn refresh(db: &Database, aggregate: AggregateId) -> Result<RefreshOutcome> {
    let Some(stored) = db.get_aggregate(aggregate)? else {
        tracing::debug!(aggregate = %aggregate, "Aggregate vanished before recompute");
        return Ok(RefreshOutcome::Missing);
    };

    let contacts = db.raw_contacts_in_aggregate(aggregate)?;
    if contacts.is_empty() {
        debug_assert!(false, "aggregate {} has no members", aggregate);
        return Err(AggregationError::EmptyAggregate(aggregate).into());
    }

    let with_phone = db.members_with_phone(aggregate)?;
    let mut accounts: BTreeMap<AccountId, Account> = BTreeMap::new();
    let mut members = Vec::with_capacity(contacts.len());
    for contact in contacts {
        let account = match accounts.get(&contact.account_id) {
            Some(account) => account.clone(),
            None => {
                let account = db
                    .get_account(contact.account_id)?
                    .ok_or_else(|| anyhow!("account {} of raw contact {} not found", contact.account_id, contact.id))?;
                accounts.insert(contact.account_id, account.clone());
                account
            }
        };
        members.push(Member {
            has_phone_number: with_phone.contains(&contact.id),
            contact,
            account,
        });
    }

    let photos = db.photos_in_aggregate(aggregate)?;
    let fields = compute_fields(&members, &photos);
    if fields == stored.fields {
        return Ok(RefreshOutcome::Unchanged);
    }

    db.update_aggregate_fields(aggregate, &fields)?;
    tracing::debug!(
        aggregate = %aggregate,
        display_name = ?fields.display_name,
        "Aggregate fields updated"
    );
    Ok(RefreshOutcome::Updated)
}

/// Derive every aggregate field from its members and their photos.
///
/// The result does not depend on the order of either slice.
pub fn compute_fields(members: &[Member], photos: &[PhotoRow]) -> AggregateFields {
    let mut members: Vec<&Member> = members.iter().collect();
    members.sort_by_key(|m| m.contact.id);

    let mut fields = AggregateFields {
        in_default_directory: false,
        ..AggregateFields::default()
    };

    let mut name_source: Option<&Member> = None;
    for &member in &members {
        let contact = &member.contact;

        name_source = match name_source {
            Some(best) if !is_better_name(member, best) => Some(best),
            _ => Some(member),
        };

        fields.starred |= contact.starred;
        fields.has_phone_number |= member.has_phone_number;
        fields.times_contacted = fields.times_contacted.max(contact.times_contacted);
        fields.last_contacted = fields.last_contacted.max(contact.last_contacted);
        fields.in_default_directory |= !contact.hidden;

        if contact.pinned >= 0 && (fields.pinned < 0 || contact.pinned < fields.pinned) {
            fields.pinned = contact.pinned;
        }

        if fields.custom_ringtone.is_none() {
            fields.custom_ringtone = contact
                .custom_ringtone
                .as_ref()
                .filter(|r| !r.is_empty())
                .cloned();
        }
    }

    fields.send_to_voicemail = !members.is_empty() && members.iter().all(|m| m.contact.send_to_voicemail);
    if fields.pinned < 0 {
        fields.pinned = PINNED_UNPINNED;
    }

    if let Some(best) = name_source {
        fields.name_raw_contact_id = Some(best.contact.id);
        fields.display_name = best.contact.display_name.clone().filter(|n| !n.is_empty());
    }

    fields.photo_data_id = choose_photo(&members, photos);
    fields.lookup_key = lookup_key(&members);
    fields
}

fn display_name(member: &Member) -> &str {
    member.contact.display_name.as_deref().unwrap_or("")
}

/// Whether `candidate` should supply the display name instead of `current`.
fn is_better_name(candidate: &Member, current: &Member) -> bool {
    let (name, best_name) = (display_name(candidate), display_name(current));
    if name.is_empty() {
        return false;
    }
    if best_name.is_empty() {
        return true;
    }

    let (c, b) = (&candidate.contact, &current.contact);
    if c.name_verified != b.name_verified {
        return c.name_verified;
    }
    if c.display_name_source != b.display_name_source {
        return c.display_name_source > b.display_name_source;
    }
    if candidate.account.writable != current.account.writable {
        return candidate.account.writable;
    }
    normalize::compare_complexity(name, best_name) == Ordering::Greater
}

/// The first super-primary photo, else the largest by pixel count, then
/// file size, then account photo priority.
fn choose_photo(members: &[&Member], photos: &[PhotoRow]) -> Option<crate::db::DataId> {
    let priority: BTreeMap<RawContactId, i64> = members
        .iter()
        .map(|m| (m.contact.id, m.account.photo_priority))
        .collect();

    let mut photos: Vec<&PhotoRow> = photos
        .iter()
        .filter(|p| priority.contains_key(&p.raw_contact_id))
        .collect();
    photos.sort_by_key(|p| (p.raw_contact_id, p.data_id));

    if let Some(photo) = photos.iter().find(|p| p.is_super_primary) {
        return Some(photo.data_id);
    }

    let rank = |p: &PhotoRow| {
        (
            p.pixel_count,
            p.file_size,
            priority.get(&p.raw_contact_id).copied().unwrap_or(0),
        )
    };
    let mut best: Option<&PhotoRow> = None;
    for photo in photos {
        if best.map_or(true, |b| rank(photo) > rank(b)) {
            best = Some(photo);
        }
    }
    best.map(|p| p.data_id)
}

/// Lookup key: one segment per member in raw id order, joined with `.`
/// and percent-encoded.
///
/// Each segment is the account hash followed by `i<source id>` (dots in the
/// source id doubled) or, without a source id, `r<raw id>-<normalized name>`.
pub fn lookup_key(members: &[&Member]) -> String {
    let segments: Vec<String> = members
        .iter()
        .map(|member| {
            let contact = &member.contact;
            let hash = account_hash(&member.account.type_with_data_set(), &member.account.account_name);
            match contact.source_id.as_deref().filter(|s| !s.is_empty()) {
                Some(source_id) => format!("{}i{}", hash, source_id.replace('.', "..")),
                None => format!(
                    "{}r{}-{}",
                    hash,
                    contact.id,
                    normalize::normalize_name(display_name(member))
                ),
            }
        })
        .collect();

    url::form_urlencoded::byte_serialize(segments.join(".").as_bytes()).collect()
}

/// 12-bit account hash built from Java-style string hashes.
fn account_hash(account_type: &str, account_name: &str) -> i32 {
    (java_hash(account_type) ^ java_hash(account_name)) & 0xFFF
}

fn java_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AggregationMode, DataId, DisplayNameSource};

    fn account(id: i64, writable: bool, photo_priority: i64) -> Account {
        Account {
            id: AccountId(id),
            account_type: "com.example".to_string(),
            data_set: None,
            account_name: format!("user{}", id),
            writable,
            photo_priority,
        }
    }

    fn member(id: i64, name: &str, source: DisplayNameSource) -> Member {
        Member {
            contact: RawContact {
                id: RawContactId(id),
                account_id: AccountId(1),
                aggregate_id: None,
                aggregation_mode: AggregationMode::Default,
                aggregation_needed: false,
                display_name: if name.is_empty() { None } else { Some(name.to_string()) },
                display_name_source: source,
                name_verified: false,
                starred: false,
                pinned: PINNED_UNPINNED,
                send_to_voicemail: false,
                custom_ringtone: None,
                times_contacted: 0,
                last_contacted: None,
                source_id: None,
                hidden: false,
            },
            account: account(1, true, 0),
            has_phone_number: false,
        }
    }

    fn photo(data_id: i64, raw: i64, pixels: i64, size: i64) -> PhotoRow {
        PhotoRow {
            data_id: DataId(data_id),
            raw_contact_id: RawContactId(raw),
            is_super_primary: false,
            pixel_count: pixels,
            file_size: size,
        }
    }

    #[test]
    fn test_display_name_precedence() {
        let phone = member(1, "555-1234", DisplayNameSource::Phone);
        let structured = member(2, "John Doe", DisplayNameSource::StructuredName);
        let fields = compute_fields(&[phone.clone(), structured.clone()], &[]);
        assert_eq!(fields.display_name.as_deref(), Some("John Doe"));
        assert_eq!(fields.name_raw_contact_id, Some(RawContactId(2)));

        let mut verified = member(3, "Johnny", DisplayNameSource::Phone);
        verified.contact.name_verified = true;
        let fields = compute_fields(&[structured.clone(), verified], &[]);
        assert_eq!(fields.display_name.as_deref(), Some("Johnny"));

        let mut read_only = member(4, "Jonathan Doe", DisplayNameSource::StructuredName);
        read_only.account = account(2, false, 0);
        let fields = compute_fields(&[read_only, structured.clone()], &[]);
        assert_eq!(fields.display_name.as_deref(), Some("John Doe"));

        let empty = member(0, "", DisplayNameSource::Verified);
        let fields = compute_fields(&[empty, phone], &[]);
        assert_eq!(fields.display_name.as_deref(), Some("555-1234"));
    }

    #[test]
    fn test_more_complex_name_wins_ties() {
        let plain = member(1, "john doe", DisplayNameSource::StructuredName);
        let capitalized = member(2, "John Doe", DisplayNameSource::StructuredName);
        let fields = compute_fields(&[plain, capitalized], &[]);
        assert_eq!(fields.display_name.as_deref(), Some("John Doe"));
    }

    #[test]
    fn test_flag_reductions() {
        let mut a = member(1, "A", DisplayNameSource::StructuredName);
        let mut b = member(2, "B", DisplayNameSource::StructuredName);
        a.contact.starred = true;
        a.contact.send_to_voicemail = true;
        a.contact.pinned = 3;
        a.contact.times_contacted = 4;
        a.contact.last_contacted = Some(100);
        b.contact.pinned = 1;
        b.contact.times_contacted = 9;
        b.contact.custom_ringtone = Some("chime".to_string());
        b.has_phone_number = true;
        b.contact.hidden = true;

        let fields = compute_fields(&[a.clone(), b.clone()], &[]);
        assert!(fields.starred);
        assert!(!fields.send_to_voicemail);
        assert_eq!(fields.pinned, 1);
        assert!(fields.has_phone_number);
        assert_eq!(fields.times_contacted, 9);
        assert_eq!(fields.last_contacted, Some(100));
        assert_eq!(fields.custom_ringtone.as_deref(), Some("chime"));
        assert!(fields.in_default_directory);

        a.contact.hidden = true;
        a.contact.pinned = PINNED_UNPINNED;
        b.contact.pinned = -5;
        let fields = compute_fields(&[a, b], &[]);
        assert!(!fields.in_default_directory);
        assert_eq!(fields.pinned, PINNED_UNPINNED);
    }

    #[test]
    fn test_photo_selection() {
        let a = member(1, "A", DisplayNameSource::StructuredName);
        let mut b = member(2, "B", DisplayNameSource::StructuredName);
        b.account = account(2, true, 5);

        let photos = vec![photo(10, 1, 100, 50), photo(11, 2, 100, 50), photo(12, 1, 90, 500)];
        let fields = compute_fields(&[a.clone(), b.clone()], &photos);
        assert_eq!(fields.photo_data_id, Some(DataId(11)));

        let mut primary = photo(13, 1, 1, 1);
        primary.is_super_primary = true;
        let mut with_primary = photos.clone();
        with_primary.push(primary);
        let fields = compute_fields(&[a, b], &with_primary);
        assert_eq!(fields.photo_data_id, Some(DataId(13)));
    }

    #[test]
    fn test_recompute_is_order_independent() {
        let mut members = vec![
            member(3, "Jon Doe", DisplayNameSource::StructuredName),
            member(1, "John Doe", DisplayNameSource::StructuredName),
            member(2, "J. Doe", DisplayNameSource::Email),
        ];
        members[0].contact.source_id = Some("abc.def".to_string());
        let photos = vec![photo(7, 2, 10, 10), photo(8, 3, 10, 10)];

        let forward = compute_fields(&members, &photos);
        members.reverse();
        let mut reversed_photos = photos.clone();
        reversed_photos.reverse();
        assert_eq!(compute_fields(&members, &reversed_photos), forward);
    }

    #[test]
    fn test_lookup_key_format() {
        let mut a = member(1, "John Doe", DisplayNameSource::StructuredName);
        let b = member(2, "Jane", DisplayNameSource::StructuredName);
        a.contact.source_id = Some("x.y z".to_string());

        let hash = account_hash("com.example", "user1");
        let key = lookup_key(&[&a, &b]);
        assert_eq!(key, format!("{}ix..y+z.{}r2-jane", hash, hash));
    }

    #[test]
    fn test_java_hash_matches_reference_values() {
        assert_eq!(java_hash(""), 0);
        assert_eq!(java_hash("a"), 97);
        assert_eq!(java_hash("hello"), 99_162_322);
    }
}
