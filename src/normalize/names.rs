//! Name normalization and name-lookup token generation.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::nicknames;
use crate::db::NameLookupType;

/// Names with more tokens than this are not permuted.
const MAX_PERMUTED_TOKENS: usize = 4;

/// A derived lookup token ready to be indexed for a raw contact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NameLookup {
    pub normalized_name: String,
    pub name_type: NameLookupType,
}

/// Split a display name into its word tokens, dropping punctuation.
pub fn tokenize(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reduce a name to a case-free, accent-free string of letters and digits.
///
/// "José O'Brien" and "jose obrien" normalize to the same key.
pub fn normalize_name(name: &str) -> String {
    name.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Build every lookup token for a raw contact.
///
/// The tokens of the display name in their original order form the
/// `Exact` entry; every other ordering is a `Variant`. Each ordering is also
/// indexed as a `CollationKey` so approximate matching can compare whole
/// names. Tokens that belong to a nickname cluster produce `Nickname`
/// entries with the cluster's canonical name substituted, and the local part
/// of each email address yields an `EmailBasedNickname`.
pub fn build_name_lookups(display_name: Option<&str>, emails: &[String]) -> Vec<NameLookup> {
    let mut out = BTreeSet::new();

    let tokens: Vec<String> = display_name
        .map(tokenize)
        .unwrap_or_default()
        .iter()
        .map(|t| normalize_name(t))
        .filter(|t| !t.is_empty())
        .collect();

    if !tokens.is_empty() {
        let exact = tokens.concat();
        insert(&mut out, &exact, NameLookupType::Exact);
        insert(&mut out, &exact, NameLookupType::CollationKey);

        if tokens.len() > MAX_PERMUTED_TOKENS {
            let mut sorted = tokens.clone();
            sorted.sort();
            let variant = sorted.concat();
            if variant != exact {
                insert(&mut out, &variant, NameLookupType::Variant);
                insert(&mut out, &variant, NameLookupType::CollationKey);
            }
        } else {
            for permutation in permutations(&tokens) {
                let variant = permutation.concat();
                if variant != exact {
                    insert(&mut out, &variant, NameLookupType::Variant);
                    insert(&mut out, &variant, NameLookupType::CollationKey);
                }
            }
        }

        for (i, token) in tokens.iter().enumerate() {
            for cluster in nicknames::clusters_for(token) {
                let mut replaced = tokens.clone();
                replaced[i] = cluster.to_string();
                insert(&mut out, &replaced.concat(), NameLookupType::Nickname);
            }
        }
    }

    for email in emails {
        let local = email.split('@').next().unwrap_or_default();
        insert(&mut out, &normalize_name(local), NameLookupType::EmailBasedNickname);
    }

    out.into_iter().collect()
}

fn insert(out: &mut BTreeSet<NameLookup>, name: &str, name_type: NameLookupType) {
    if !name.is_empty() {
        out.insert(NameLookup {
            normalized_name: name.to_string(),
            name_type,
        });
    }
}

/// All orderings of `tokens`, the original order first.
fn permutations(tokens: &[String]) -> Vec<Vec<String>> {
    if tokens.len() <= 1 {
        return vec![tokens.to_vec()];
    }
    let mut result = Vec::new();
    for i in 0..tokens.len() {
        let mut rest = tokens.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            result.push(tail);
        }
    }
    result
}

/// Order two display names by how much information they carry.
///
/// Letters and digits are compared first ignoring case, then the variant
/// with more capitals wins, then the longer raw string (punctuation,
/// spacing) wins. `Ordering::Greater` means `a` is the more complex name.
pub fn compare_complexity(a: &str, b: &str) -> Ordering {
    let clean_a: String = a.chars().filter(|c| c.is_alphanumeric()).collect();
    let clean_b: String = b.chars().filter(|c| c.is_alphanumeric()).collect();

    let folded = clean_a.to_lowercase().cmp(&clean_b.to_lowercase());
    if folded != Ordering::Equal {
        return folded;
    }

    // Uppercase sorts before lowercase, so the reversed comparison ranks
    // "John" above "john".
    let case = clean_b.cmp(&clean_a);
    if case != Ordering::Equal {
        return case;
    }

    a.chars().count().cmp(&b.chars().count())
}
