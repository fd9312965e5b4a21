use ahash::AHashSet;

use crate::metrics_consts::DUPLICATES_DROPPED;

/// Collapse exact-duplicate message bodies. Equality is byte equality of the serialized body,
/// not of the decoded event. The order of the result is unspecified.
pub fn dedup(bodies: Vec<String>) -> Vec<String> {
    let total = bodies.len();
    let unique: AHashSet<String> = bodies.into_iter().collect();

    let duplicates = total - unique.len();
    if duplicates > 0 {
        metrics::counter!(DUPLICATES_DROPPED).increment(duplicates as u64);
    }

    unique.into_iter().collect()
}
