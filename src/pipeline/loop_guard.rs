//! Loop guard — refuses to relay a message back to one of the device's own
//! numbers.

use std::sync::Arc;

use tracing::warn;

/// Phone-number equality, tolerant of formatting and prefix conventions.
pub trait NumberMatcher: Send + Sync {
    fn are_equal(&self, a: &str, b: &str) -> bool;
}

/// Minimum significant digits for a national/international suffix match.
const MIN_SUFFIX_DIGITS: usize = 7;

/// Default matcher.
///
/// - Formatting (spaces, dashes, parentheses) is ignored
/// - `00` and `+` are the same international prefix
/// - A national number (leading trunk `0`) matches an international one when
///   their trailing significant digits agree
pub struct LooseNumberMatcher;

impl LooseNumberMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LooseNumberMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Number reduced to digits, with a flag for an explicit international prefix.
#[derive(Debug, PartialEq, Eq)]
struct Normalized {
    international: bool,
    digits: String,
}

fn normalize(raw: &str) -> Normalized {
    let trimmed = raw.trim();
    let plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if plus {
        return Normalized {
            international: true,
            digits,
        };
    }
    if let Some(rest) = digits.strip_prefix("00") {
        return Normalized {
            international: true,
            digits: rest.to_string(),
        };
    }
    // National form: drop the trunk prefix.
    Normalized {
        international: false,
        digits: digits.trim_start_matches('0').to_string(),
    }
}

impl NumberMatcher for LooseNumberMatcher {
    fn are_equal(&self, a: &str, b: &str) -> bool {
        let a = normalize(a);
        let b = normalize(b);
        if a.digits.is_empty() || b.digits.is_empty() {
            return false;
        }
        if a.international == b.international {
            return a.digits == b.digits;
        }
        let (short, long) = if a.digits.len() <= b.digits.len() {
            (&a.digits, &b.digits)
        } else {
            (&b.digits, &a.digits)
        };
        short.len() >= MIN_SUFFIX_DIGITS && long.ends_with(short.as_str())
    }
}

/// Blocks relay targets that point back at this device.
pub struct LoopGuard {
    matcher: Arc<dyn NumberMatcher>,
}

impl LoopGuard {
    pub fn new(matcher: Arc<dyn NumberMatcher>) -> Self {
        Self { matcher }
    }

    /// True when `candidate` equals any of `own_numbers`.
    pub fn is_blocked(&self, candidate: &str, own_numbers: &[String]) -> bool {
        let hit = own_numbers
            .iter()
            .filter(|own| !own.trim().is_empty())
            .find(|own| self.matcher.are_equal(candidate, own));
        match hit {
            Some(own) => {
                warn!(target_number = %candidate, own_number = %own, "Relay loop blocked");
                true
            }
            None => false,
        }
    }
}
