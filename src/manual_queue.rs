//! Manual year review queue.
//!
//! Widely owned songs without a trustworthy year are surfaced for a human to
//! fix; nothing downstream in the same run consumes the queue.

use clap::ValueEnum;
use serde::Deserialize;

use crate::models::{Candidate, ManualQueueEntry};

/// How `alpha * owners` is turned into an integer threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Half rounds up.
    #[default]
    Round,
    Floor,
    Ceil,
}

impl Rounding {
    pub fn apply(self, value: f64) -> i64 {
        let rounded = match self {
            Rounding::Round => (value + 0.5).floor(),
            Rounding::Floor => value.floor(),
            Rounding::Ceil => value.ceil(),
        };
        rounded as i64
    }
}

/// Owner threshold: `max(min_k, rounding(alpha * owners_universe))`.
pub fn manual_k(alpha: f64, owners_universe: usize, rounding: Rounding, min_k: usize) -> usize {
    let scaled = rounding.apply(alpha * owners_universe as f64).max(0) as usize;
    scaled.max(min_k)
}

#[derive(Clone, Copy, Debug)]
pub struct QueueParams {
    pub year_confidence_min: f64,
    pub alpha: f64,
    pub rounding: Rounding,
    pub min_k: usize,
}

/// Candidates (pre-collapse) lacking a trusted year and owned by at least `k`
/// owners. Sorted by owners desc, instances desc, confidence asc, id asc.
/// Returns the queue and `k`.
pub fn build_manual_queue(
    candidates: &[Candidate],
    owners_universe_count: usize,
    params: QueueParams,
) -> (Vec<ManualQueueEntry>, usize) {
    let k = manual_k(params.alpha, owners_universe_count, params.rounding, params.min_k);

    let mut flagged: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| !c.has_trusted_year(params.year_confidence_min) && c.owners_count >= k)
        .collect();

    flagged.sort_by(|a, b| {
        b.owners_count
            .cmp(&a.owners_count)
            .then_with(|| b.instance_count.cmp(&a.instance_count))
            .then_with(|| a.year_confidence.total_cmp(&b.year_confidence))
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });

    let queue = flagged
        .into_iter()
        .map(|c| ManualQueueEntry {
            canonical_id: c.canonical_id.clone(),
            title_canon: c.title_canon.clone(),
            artists_canon: c.artists_canon.clone(),
            owners: c.owners_display(),
            owners_count: c.owners_count,
            instance_count: c.instance_count,
            year: c.year,
            year_confidence: c.year_confidence,
            year_source: c.year_source.clone(),
            year_note: c.year_note.clone(),
            manual_k: k,
            owners_universe_count,
            year_confidence_min: params.year_confidence_min,
        })
        .collect();

    (queue, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, year: Option<i32>, conf: f64, owners: usize, instances: usize) -> Candidate {
        Candidate {
            canonical_id: id.to_string(),
            year,
            year_confidence: conf,
            owners_count: owners,
            instance_count: instances,
            ..Default::default()
        }
    }

    fn params() -> QueueParams {
        QueueParams {
            year_confidence_min: 0.8,
            alpha: 0.67,
            rounding: Rounding::Round,
            min_k: 2,
        }
    }

    #[test]
    fn test_rounding_modes() {
        assert_eq!(Rounding::Round.apply(2.5), 3);
        assert_eq!(Rounding::Round.apply(2.49), 2);
        assert_eq!(Rounding::Floor.apply(2.9), 2);
        assert_eq!(Rounding::Ceil.apply(2.1), 3);
    }

    #[test]
    fn test_manual_k() {
        // 0.67 * 3 = 2.01 → 2
        assert_eq!(manual_k(0.67, 3, Rounding::Round, 2), 2);
        assert_eq!(manual_k(0.67, 3, Rounding::Ceil, 2), 3);
        // Floor of min_k applies for small universes
        assert_eq!(manual_k(0.67, 1, Rounding::Round, 2), 2);
        assert_eq!(manual_k(0.5, 10, Rounding::Round, 2), 5);
    }

    #[test]
    fn test_queue_membership_and_order() {
        let pool = vec![
            cand("trusted", Some(1999), 0.9, 3, 3),
            cand("missing", None, 0.0, 3, 1),
            cand("low", Some(2001), 0.5, 3, 1),
            cand("lowmore", Some(2001), 0.5, 3, 4),
            cand("few_owners", None, 0.0, 1, 9),
        ];
        let (queue, k) = build_manual_queue(&pool, 3, params());
        assert_eq!(k, 2);
        let ids: Vec<&str> = queue.iter().map(|e| e.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["lowmore", "missing", "low"]);
        assert_eq!(queue[0].owners_universe_count, 3);
        assert_eq!(queue[0].manual_k, 2);
    }

    #[test]
    fn test_empty_queue() {
        let (queue, _) = build_manual_queue(&[], 0, params());
        assert!(queue.is_empty());
    }
}
