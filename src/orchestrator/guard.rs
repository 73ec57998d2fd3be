//! No-new-facts guard for finalizer output.
//!
//! A finalizer that hallucinates a number ("27 toplantınız var") is worse
//! than a bland reply. The guard extracts numeric tokens (counts, times,
//! dates) from the candidate reply and rejects it if any of them appear in
//! none of the allowed sources (user input, tool results, formatted
//! results). Detection is heuristic; the caller handles false positives with
//! one constrained retry, then falls back to the planner reply.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn numeric_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Integers, decimals, and clock times: 3, 14.5, 09:30.
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\d+(?:[:.,]\d+)?").unwrap()
    })
}

/// Extract numeric tokens from text.
fn numeric_tokens(text: &str) -> Vec<String> {
    numeric_token_re()
        .find_iter(text)
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// Bare digit runs of a token, for loose matching ("09:30" allows "09" and
/// "30"; "3" in a JSON array count matches "3").
fn digit_parts(token: &str) -> Vec<String> {
    token
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(normalize_digits)
        .collect()
}

/// Strip leading zeros so "09" and "9" compare equal.
fn normalize_digits(digits: &str) -> String {
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_owned()
    } else {
        stripped.to_owned()
    }
}

/// Numeric tokens present in `candidate` but absent from every source.
///
/// A candidate token is allowed when the exact token, or each of its digit
/// runs, appears somewhere in the sources.
pub fn find_new_numeric_facts(candidate: &str, sources: &[&str]) -> Vec<String> {
    let mut allowed_tokens: HashSet<String> = HashSet::new();
    let mut allowed_digits: HashSet<String> = HashSet::new();
    for source in sources {
        for token in numeric_tokens(source) {
            allowed_digits.extend(digit_parts(&token));
            allowed_tokens.insert(token);
        }
    }

    numeric_tokens(candidate)
        .into_iter()
        .filter(|token| {
            if allowed_tokens.contains(token) {
                return false;
            }
            let parts = digit_parts(token);
            !parts.iter().all(|p| allowed_digits.contains(p))
        })
        .collect()
}

/// Whether the candidate introduces no new numeric facts.
pub fn passes_guard(candidate: &str, sources: &[&str]) -> bool {
    find_new_numeric_facts(candidate, sources).is_empty()
}

/// Extra instruction appended to the retry prompt after a guard violation.
pub const RETRY_CONSTRAINT: &str = "Cevabında yalnızca sana verilen bağlamdaki sayıları kullan; \
     bağlamda olmayan hiçbir sayı, saat veya tarih yazma.";
