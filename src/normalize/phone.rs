//! Phone number normalization and format-insensitive comparison.

/// Minimum number of trailing digits two numbers must share for a loose match.
pub const MIN_MATCH: usize = 7;

/// Digits of `number`, keeping a leading `+` when present.
pub fn normalize_number(number: &str) -> String {
    let trimmed = number.trim_start();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}

/// Index key for phone lookups: the last `MIN_MATCH` digits, reversed.
///
/// Numbers sharing a key are only candidates; `numbers_equal` decides.
pub fn min_match(number: &str) -> String {
    number
        .chars()
        .rev()
        .filter(|c| c.is_ascii_digit())
        .take(MIN_MATCH)
        .collect()
}

/// Compare two phone numbers ignoring formatting.
///
/// Strict comparison requires the same digits. Loose comparison accepts a
/// missing country or trunk prefix: the numbers match when their trailing
/// digits agree over the length of the shorter one and that covers at least
/// `MIN_MATCH` digits (shorter numbers must agree completely).
pub fn numbers_equal(a: &str, b: &str, strict: bool) -> bool {
    let digits_a: Vec<char> = a.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits_b: Vec<char> = b.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits_a.is_empty() || digits_b.is_empty() {
        return false;
    }
    if strict || digits_a.len() < MIN_MATCH || digits_b.len() < MIN_MATCH {
        return digits_a == digits_b;
    }

    let shared = digits_a
        .iter()
        .rev()
        .zip(digits_b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    shared == digits_a.len().min(digits_b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("(555) 123-4567"), "5551234567");
        assert_eq!(normalize_number(" +1 555.123.4567"), "+15551234567");
        assert_eq!(normalize_number("ext"), "");
    }

    #[test]
    fn test_min_match() {
        assert_eq!(min_match("+1 (555) 123-4567"), "7654321");
        assert_eq!(min_match("555-12"), "21555");
    }

    #[test]
    fn test_numbers_equal_loose() {
        assert!(numbers_equal("555-1234", "5551234", false));
        assert!(numbers_equal("+1 650 555 1234", "(650) 555-1234", false));
        assert!(numbers_equal("555 1234", "650 555 1234", false));
        assert!(!numbers_equal("650 555 1234", "651 555 1234", false));
        assert!(!numbers_equal("911", "1911", false));
        assert!(!numbers_equal("", "", false));
    }

    #[test]
    fn test_numbers_equal_strict() {
        assert!(numbers_equal("555-1234", "555 1234", true));
        assert!(!numbers_equal("+1 650 555 1234", "(650) 555-1234", true));
    }
}
