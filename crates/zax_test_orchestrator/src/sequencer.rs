//! Run ordering.
//!
//! Files without recorded results go first, largest first. Files with results
//! follow: failed before passed, then slowest first.

use crate::project::TestSpecification;
use crate::store::{CacheKey, FileStats};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Sorts `specs` in place using the last known results. Stable.
pub fn sort_specs(specs: &mut Vec<TestSpecification>, results: &HashMap<CacheKey, FileStats>) {
    let mut keyed: Vec<_> = specs
        .drain(..)
        .map(|spec| {
            let key = CacheKey::new(spec.project_name.clone(), spec.filepath.clone());
            let stats = results.get(&key).copied();
            let size = std::fs::metadata(&spec.filepath).ok().map(|m| m.len());
            (spec, stats, size)
        })
        .collect();

    keyed.sort_by(|(_, a_stats, a_size), (_, b_stats, b_size)| match (a_stats, b_stats) {
        (Some(a), Some(b)) => compare_results(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => compare_sizes(*a_size, *b_size),
    });

    specs.extend(keyed.into_iter().map(|(spec, _, _)| spec));
}

fn compare_results(a: &FileStats, b: &FileStats) -> Ordering {
    b.failed
        .cmp(&a.failed)
        .then_with(|| b.duration_ms.cmp(&a.duration_ms))
}

/// Unreadable files first, then larger before smaller.
fn compare_sizes(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => b.cmp(&a),
        (None, None) => Ordering::Equal,
    }
}
