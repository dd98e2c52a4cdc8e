//! Version collapsing: one representative per collapse key.
//!
//! Election order (first difference decides):
//! 1. more owners
//! 2. more instances
//! 3. has a streaming link
//! 4. smallest canonical id

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{Candidate, CollapseGroup, ElectionReason};

/// Total election order; `Less` means `a` is preferred.
pub fn election_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.owners_count
        .cmp(&a.owners_count)
        .then_with(|| b.instance_count.cmp(&a.instance_count))
        .then_with(|| b.has_spotify_link.cmp(&a.has_spotify_link))
        .then_with(|| a.canonical_id.cmp(&b.canonical_id))
}

/// Criterion that separated the winner from the runner-up.
fn election_reason(winner: &Candidate, runner_up: Option<&Candidate>) -> ElectionReason {
    let Some(other) = runner_up else {
        return ElectionReason::Sole;
    };
    if winner.owners_count != other.owners_count {
        ElectionReason::OwnersCount
    } else if winner.instance_count != other.instance_count {
        ElectionReason::InstanceCount
    } else if winner.has_spotify_link != other.has_spotify_link {
        ElectionReason::StreamingLink
    } else {
        ElectionReason::CanonicalId
    }
}

/// Collapse candidates sharing a collapse key.
///
/// Returns the elected candidates and one report row per group, both ordered
/// by collapse key.
pub fn collapse_versions(candidates: &[Candidate]) -> (Vec<Candidate>, Vec<CollapseGroup>) {
    let mut groups: BTreeMap<&str, Vec<&Candidate>> = BTreeMap::new();
    for candidate in candidates {
        groups
            .entry(candidate.collapse_key.as_str())
            .or_default()
            .push(candidate);
    }

    let mut elected = Vec::with_capacity(groups.len());
    let mut report = Vec::with_capacity(groups.len());

    for (key, mut members) in groups {
        members.sort_by(|a, b| election_order(a, b));
        let winner = members[0];
        let reason = election_reason(winner, members.get(1).copied());

        report.push(CollapseGroup {
            collapse_key: key.to_string(),
            chosen_id: winner.canonical_id.clone(),
            reason,
            candidate_ids: members.iter().map(|c| c.canonical_id.clone()).collect(),
            candidate_titles: members.iter().map(|c| c.title_canon.clone()).collect(),
            candidate_artists: members.iter().map(|c| c.artists_canon.clone()).collect(),
            candidate_owners_count: members.iter().map(|c| c.owners_count).collect(),
            candidate_instance_count: members.iter().map(|c| c.instance_count).collect(),
            candidate_has_link: members.iter().map(|c| c.has_spotify_link).collect(),
        });
        elected.push(winner.clone());
    }

    (elected, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::collapse_key;

    fn cand(id: &str, title: &str, owners: usize, instances: usize, link: bool) -> Candidate {
        Candidate {
            canonical_id: id.to_string(),
            title_canon: title.to_string(),
            artists_canon: "David Bowie".to_string(),
            owners_count: owners,
            instance_count: instances,
            has_spotify_link: link,
            collapse_key: collapse_key(title, "David Bowie"),
            ..Default::default()
        }
    }

    #[test]
    fn test_remaster_collapses_remix_stays() {
        let pool = vec![
            cand("a", "Heroes", 1, 1, true),
            cand("b", "Heroes - 2017 Remaster", 3, 1, false),
            cand("c", "Heroes (Remix)", 1, 1, false),
        ];
        let (elected, report) = collapse_versions(&pool);
        assert_eq!(elected.len(), 2);
        assert_eq!(report.len(), 2);

        let base = report
            .iter()
            .find(|g| g.collapse_key.contains("||base||"))
            .unwrap();
        assert_eq!(base.chosen_id, "b");
        assert_eq!(base.reason, ElectionReason::OwnersCount);
        assert_eq!(base.candidate_ids, vec!["b", "a"]);

        let variant = report
            .iter()
            .find(|g| g.collapse_key.contains("||variant||"))
            .unwrap();
        assert_eq!(variant.reason, ElectionReason::Sole);
    }

    #[test]
    fn test_election_tie_breaks() {
        let (_, report) = collapse_versions(&[cand("a", "X", 2, 1, false), cand("b", "X (Live)", 2, 4, false)]);
        assert_eq!(report[0].chosen_id, "b");
        assert_eq!(report[0].reason, ElectionReason::InstanceCount);

        let (_, report) = collapse_versions(&[cand("a", "X", 2, 1, false), cand("b", "X (Live)", 2, 1, true)]);
        assert_eq!(report[0].chosen_id, "b");
        assert_eq!(report[0].reason, ElectionReason::StreamingLink);

        let (_, report) = collapse_versions(&[cand("z", "X", 2, 1, true), cand("m", "X (Live)", 2, 1, true)]);
        assert_eq!(report[0].chosen_id, "m");
        assert_eq!(report[0].reason, ElectionReason::CanonicalId);
    }

    #[test]
    fn test_collapse_is_deterministic_and_idempotent() {
        let pool = vec![
            cand("a", "Heroes", 1, 1, true),
            cand("b", "Heroes (Live)", 1, 1, true),
            cand("c", "Changes", 2, 2, false),
        ];
        let mut reversed = pool.clone();
        reversed.reverse();

        let (first, _) = collapse_versions(&pool);
        let (second, _) = collapse_versions(&reversed);
        assert_eq!(first, second);

        let (again, report) = collapse_versions(&first);
        assert_eq!(again, first);
        assert!(report.iter().all(|g| g.reason == ElectionReason::Sole));
    }
}
