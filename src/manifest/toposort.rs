use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::Version;

/// order versions ancestors first
///
/// edges run parent -> child for every listed parent present in the input,
/// and from every version to every version with a strictly later date.
/// among versions with no pending edge the earliest in input order goes
/// first, so the result is fully deterministic. a cycle (a version listing
/// itself, or a parent dated after its child) fails with `CycleDetected`.
///
/// the date edges are never materialised: versions are grouped by date and
/// a group becomes eligible once every earlier group has been emitted.
pub(crate) fn toposort(versions: Vec<Version>) -> Result<Vec<Version>> {
    let n = versions.len();

    let mut by_hash: HashMap<Hash, Vec<usize>> = HashMap::new();
    for (i, v) in versions.iter().enumerate() {
        by_hash.entry(v.hash).or_default().push(i);
    }

    // parent edges
    let mut pending = vec![0usize; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, v) in versions.iter().enumerate() {
        for parent in v.parent_set() {
            for &j in by_hash.get(&parent).map(Vec::as_slice).unwrap_or(&[]) {
                if j == i {
                    return Err(Error::CycleDetected);
                }
                children[j].push(i);
                pending[i] += 1;
            }
        }
    }

    // date groups, earliest first
    let mut dates: Vec<_> = versions.iter().map(|v| v.date).collect();
    dates.sort();
    dates.dedup();
    let group: Vec<usize> = versions
        .iter()
        .map(|v| dates.partition_point(|d| *d < v.date))
        .collect();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); dates.len()];
    for (i, &g) in group.iter().enumerate() {
        members[g].push(i);
    }
    let mut left_in_group: Vec<usize> = members.iter().map(Vec::len).collect();

    let mut frontier = 0;
    let mut ready: BTreeSet<usize> = BTreeSet::new();
    if let Some(first) = members.first() {
        ready.extend(first.iter().copied().filter(|&i| pending[i] == 0));
    }

    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);

        for &c in &children[i] {
            pending[c] -= 1;
            if pending[c] == 0 && group[c] == frontier {
                ready.insert(c);
            }
        }

        left_in_group[group[i]] -= 1;
        while frontier < dates.len() && left_in_group[frontier] == 0 {
            frontier += 1;
            if let Some(next) = members.get(frontier) {
                ready.extend(next.iter().copied().filter(|&k| pending[k] == 0));
            }
        }
    }

    if order.len() != n {
        return Err(Error::CycleDetected);
    }

    let mut rank = vec![0usize; n];
    for (pos, &i) in order.iter().enumerate() {
        rank[i] = pos;
    }
    let mut ranked: Vec<(usize, Version)> = versions
        .into_iter()
        .enumerate()
        .map(|(i, v)| (rank[i], v))
        .collect();
    ranked.sort_by_key(|(r, _)| *r);

    Ok(ranked.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::{hash, version};

    fn hashes(versions: &[Version]) -> Vec<Hash> {
        versions.iter().map(|v| v.hash).collect()
    }

    #[test]
    fn test_empty() {
        assert!(toposort(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_parents_before_children() {
        // same date, so only the parent edges order them
        let sorted = toposort(vec![
            version(3, 1, &[2]),
            version(2, 1, &[1]),
            version(1, 1, &[]),
        ])
        .unwrap();

        assert_eq!(hashes(&sorted), vec![hash(1), hash(2), hash(3)]);
    }

    #[test]
    fn test_dates_order_disconnected_versions() {
        let sorted = toposort(vec![version(1, 5, &[]), version(2, 2, &[]), version(3, 9, &[])])
            .unwrap();

        assert_eq!(hashes(&sorted), vec![hash(2), hash(1), hash(3)]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let sorted = toposort(vec![version(9, 1, &[]), version(4, 1, &[]), version(6, 1, &[])])
            .unwrap();

        assert_eq!(hashes(&sorted), vec![hash(9), hash(4), hash(6)]);
    }

    #[test]
    fn test_unknown_parents_ignored() {
        let sorted = toposort(vec![version(2, 2, &[42]), version(1, 1, &[])]).unwrap();
        assert_eq!(hashes(&sorted), vec![hash(1), hash(2)]);
    }

    #[test]
    fn test_duplicate_parent_entries() {
        let sorted = toposort(vec![version(2, 1, &[1, 1]), version(1, 1, &[])]).unwrap();
        assert_eq!(hashes(&sorted), vec![hash(1), hash(2)]);
    }

    #[test]
    fn test_parent_dated_after_child_is_cycle() {
        let result = toposort(vec![version(1, 9, &[]), version(2, 1, &[1])]);
        assert!(matches!(result, Err(Error::CycleDetected)));
    }

    #[test]
    fn test_self_parent_is_cycle() {
        let result = toposort(vec![version(1, 1, &[1])]);
        assert!(matches!(result, Err(Error::CycleDetected)));
    }

    #[test]
    fn test_mutual_parents_is_cycle() {
        let result = toposort(vec![version(1, 1, &[2]), version(2, 1, &[1])]);
        assert!(matches!(result, Err(Error::CycleDetected)));
    }

    #[test]
    fn test_diamond() {
        let sorted = toposort(vec![
            version(4, 3, &[2, 3]),
            version(3, 2, &[1]),
            version(2, 2, &[1]),
            version(1, 1, &[]),
        ])
        .unwrap();

        assert_eq!(hashes(&sorted), vec![hash(1), hash(3), hash(2), hash(4)]);
    }

    #[test]
    fn test_parents_always_precede() {
        let input = vec![
            version(5, 4, &[3, 4]),
            version(4, 3, &[2]),
            version(6, 2, &[]),
            version(3, 3, &[1]),
            version(2, 2, &[1]),
            version(1, 1, &[]),
        ];
        let sorted = toposort(input).unwrap();

        for (i, v) in sorted.iter().enumerate() {
            for p in &v.parents {
                if let Some(pos) = sorted.iter().position(|x| x.hash == *p) {
                    assert!(pos < i, "{:?} listed before its parent", v.hash);
                }
            }
            if i > 0 {
                assert!(sorted[i - 1].date <= v.date);
            }
        }
    }
}
