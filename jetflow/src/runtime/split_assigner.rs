//! locality-aware assignment of source input splits to cluster members.
//!
//! every split ends up on exactly one member; a split with at least one
//! data-local member never leaves its local members; a balancing fallback
//! places location-less splits on the least-loaded member, and a pruning
//! loop removes the most-loaded member from every over-assigned split until
//! each split has exactly one. ties on counts break deterministically: the
//! lowest member index wins the split.

use std::collections::HashMap;

use crate::core::runtime::{Member, MemberIndex};
use crate::core::split::InputSplit;

pub fn assign_splits(
    splits: &[InputSplit],
    members: &[Member],
) -> HashMap<MemberIndex, Vec<u32>> {
    // member indexes local to each split
    let mut assignments: Vec<Vec<usize>> = Vec::with_capacity(splits.len());
    let mut counts = vec![0usize; members.len()];

    for split in splits {
        let mut indexes = Vec::new();
        for (member_index, member) in members.iter().enumerate() {
            if split
                .locations()
                .iter()
                .any(|location| location == &member.address)
            {
                indexes.push(member_index);
                counts[member_index] += 1;
            }
        }
        assignments.push(indexes);
    }

    // splits with no local member go to the member with the fewest splits.
    // equal counts: the lowest member index wins
    for (split, indexes) in splits.iter().zip(assignments.iter_mut()) {
        if indexes.is_empty() {
            debug!("no local member for split {}, assigned remotely", split.index());
            let min_index = (0..counts.len())
                .min_by_key(|i| counts[*i])
                .expect("at least one member");
            indexes.push(min_index);
            counts[min_index] += 1;
        }
    }
    debug!("counts before pruning: {:?}", counts);

    // prune members from splits with more than one assignment: drop the
    // most-loaded member each round. equal counts: the highest index is
    // dropped, so the lowest index keeps the split
    loop {
        let mut found = false;
        for indexes in assignments.iter_mut() {
            if indexes.len() > 1 {
                found = true;
                let drop_position = (0..indexes.len())
                    .max_by(|a, b| {
                        counts[indexes[*a]]
                            .cmp(&counts[indexes[*b]])
                            .then(indexes[*a].cmp(&indexes[*b]))
                    })
                    .expect("non-empty indexes");
                let dropped = indexes.remove(drop_position);
                counts[dropped] -= 1;
            }
        }
        if !found {
            break;
        }
    }
    debug!("final counts: {:?}", counts);

    let mut assigned: HashMap<MemberIndex, Vec<u32>> = HashMap::new();
    for (split, indexes) in splits.iter().zip(assignments.iter()) {
        let member = &members[indexes[0]];
        assigned
            .entry(member.index)
            .or_insert_with(Vec::new)
            .push(split.index());
    }
    for split_indexes in assigned.values_mut() {
        split_indexes.sort();
    }
    assigned
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::core::runtime::{Member, MemberIndex};
    use crate::core::split::InputSplit;
    use crate::runtime::split_assigner::assign_splits;

    fn members(count: u32) -> Vec<Member> {
        (0..count)
            .map(|i| Member::new(i, format!("10.0.0.{}:5701", i)))
            .collect()
    }

    fn assignment_counts(assigned: &HashMap<MemberIndex, Vec<u32>>) -> Vec<usize> {
        let mut counts: Vec<usize> = assigned.values().map(|v| v.len()).collect();
        counts.sort();
        counts
    }

    /// every split lands on exactly one member
    #[test]
    pub fn exactly_one_member_per_split_test() {
        let members = members(3);
        let splits: Vec<InputSplit> = (0..10)
            .map(|i| {
                InputSplit::new(
                    i,
                    vec![members[(i % 3) as usize].address.clone()],
                )
            })
            .collect();

        let assigned = assign_splits(&splits, &members);

        let mut all: Vec<u32> = assigned.values().flatten().copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<u32>>());
    }

    /// a split with a data-local member never goes to a non-local member
    #[test]
    pub fn locality_respected_test() {
        let members = members(4);
        let splits: Vec<InputSplit> = (0..8)
            .map(|i| InputSplit::new(i, vec![members[(i % 2) as usize].address.clone()]))
            .collect();

        let assigned = assign_splits(&splits, &members);

        for (member_index, split_indexes) in &assigned {
            for split_index in split_indexes {
                let split = &splits[*split_index as usize];
                assert!(
                    split
                        .locations()
                        .contains(&members[member_index.0 as usize].address),
                    "split {} on non-local member {}",
                    split_index,
                    member_index.0
                );
            }
        }
    }

    /// location-less splits balance: counts differ by at most one
    #[test]
    pub fn balanced_without_locality_test() {
        let members = members(3);
        let splits: Vec<InputSplit> =
            (0..11).map(|i| InputSplit::new(i, Vec::new())).collect();

        let assigned = assign_splits(&splits, &members);

        let counts = assignment_counts(&assigned);
        assert_eq!(counts.len(), 3);
        assert!(counts[counts.len() - 1] - counts[0] <= 1, "{:?}", counts);
    }

    /// replicated splits are pruned to balance, and equal counts break
    /// toward the lowest member index
    #[test]
    pub fn pruning_and_tie_break_test() {
        let members = members(2);
        // every split is local to both members
        let splits: Vec<InputSplit> = (0..6)
            .map(|i| {
                InputSplit::new(
                    i,
                    members.iter().map(|m| m.address.clone()).collect(),
                )
            })
            .collect();

        let assigned = assign_splits(&splits, &members);

        let counts = assignment_counts(&assigned);
        assert_eq!(counts, vec![3, 3]);

        // deterministic: the same input yields the same assignment
        let again = assign_splits(&splits, &members);
        assert_eq!(assigned, again);
    }

    /// single member with replicated locations still resolves
    #[test]
    pub fn single_member_test() {
        let members = members(1);
        let splits: Vec<InputSplit> = (0..4)
            .map(|i| InputSplit::new(i, vec![members[0].address.clone()]))
            .collect();

        let assigned = assign_splits(&splits, &members);
        assert_eq!(assigned[&MemberIndex(0)], vec![0, 1, 2, 3]);
    }
}
