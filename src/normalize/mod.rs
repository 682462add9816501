//! Text normalization shared by the store's write path and the matcher.
//!
//! Names are reduced to accent-free, case-free letter/digit strings before
//! they are indexed, and phone numbers are reduced to digits so that
//! formatting differences never hide a match.

pub mod names;
pub mod nicknames;
pub mod phone;

pub use names::{build_name_lookups, compare_complexity, normalize_name, tokenize};
pub use phone::{min_match, normalize_number, numbers_equal};
