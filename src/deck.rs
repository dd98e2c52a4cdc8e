//! Deck selection.
//!
//! Candidates are bucketed by year. Phase 1 (coverage) takes one card from
//! every year in ascending order. Phase 2 (water-filling) repeatedly feeds the
//! year with the fewest cards, smaller year first on ties. Within a year the
//! best candidate is ranked by:
//!
//! 1. owners_count desc
//! 2. artist rarity asc (fewest prior deck appearances of its artists)
//! 3. instance_count desc
//! 4. has streaming link first
//! 5. canonical_id asc
//!
//! `max_per_album` caps cards sharing an album key. Phase 1 may exceed the cap
//! when every remaining candidate of an uncovered year is capped; such cards
//! are flagged `relaxed` and counted. Phase 2 never exceeds it.

use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::models::{Candidate, DeckCard, DeckQc, SelectionPhase};

/// Number of artists reported in `top_artists`.
pub const TOP_ARTISTS: usize = 10;

/// Collapsed candidates with a year whose confidence reaches `min_confidence`,
/// sorted by year asc, owners desc, instances desc, link first, id asc.
pub fn valid_pool(collapsed: &[Candidate], min_confidence: f64) -> Vec<Candidate> {
    let mut pool: Vec<Candidate> = collapsed
        .iter()
        .filter(|c| c.has_trusted_year(min_confidence))
        .cloned()
        .collect();
    pool.sort_by(|a, b| {
        a.year
            .cmp(&b.year)
            .then_with(|| b.owners_count.cmp(&a.owners_count))
            .then_with(|| b.instance_count.cmp(&a.instance_count))
            .then_with(|| b.has_spotify_link.cmp(&a.has_spotify_link))
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
    pool
}

/// Album key used for capping; never empty.
fn cap_key(candidate: &Candidate) -> String {
    let key = candidate.album_key.trim();
    if key.is_empty() {
        format!("cid::{}", candidate.canonical_id)
    } else {
        key.to_string()
    }
}

#[derive(Debug, Default)]
pub struct DeckSelection {
    pub cards: Vec<DeckCard>,
    /// Candidates discarded because their album was full.
    pub album_cap_blocks: usize,
    /// Phase-1 picks that exceeded the album cap to cover a year.
    pub album_cap_relaxations: usize,
}

struct Selector<'a> {
    pool: &'a [Candidate],
    max_per_album: usize,
    /// Remaining pool indices per year.
    years: BTreeMap<i32, Vec<usize>>,
    year_counts: FxHashMap<i32, usize>,
    album_counts: FxHashMap<String, usize>,
    artist_counts: FxHashMap<&'a str, usize>,
    selected: FxHashSet<&'a str>,
    out: DeckSelection,
}

impl<'a> Selector<'a> {
    fn new(pool: &'a [Candidate], max_per_album: usize) -> Self {
        let mut years: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (idx, candidate) in pool.iter().enumerate() {
            if let Some(year) = candidate.year {
                years.entry(year).or_default().push(idx);
            }
        }
        Self {
            pool,
            max_per_album,
            years,
            year_counts: FxHashMap::default(),
            album_counts: FxHashMap::default(),
            artist_counts: FxHashMap::default(),
            selected: FxHashSet::default(),
            out: DeckSelection::default(),
        }
    }

    fn is_capped(&self, candidate: &Candidate) -> bool {
        self.max_per_album > 0
            && self.album_counts.get(&cap_key(candidate)).copied().unwrap_or(0) >= self.max_per_album
    }

    fn rarity(&self, candidate: &Candidate) -> Option<usize> {
        candidate
            .artists
            .iter()
            .map(|a| self.artist_counts.get(a.as_str()).copied().unwrap_or(0))
            .min()
    }

    fn rank(&self, candidate: &'a Candidate) -> (Reverse<usize>, usize, Reverse<usize>, Reverse<bool>, &'a str) {
        (
            Reverse(candidate.owners_count),
            self.rarity(candidate).unwrap_or(usize::MAX),
            Reverse(candidate.instance_count),
            Reverse(candidate.has_spotify_link),
            candidate.canonical_id.as_str(),
        )
    }

    fn best_of(&self, indices: &[usize]) -> Option<usize> {
        let pool = self.pool;
        indices
            .iter()
            .copied()
            .min_by(|&a, &b| self.rank(&pool[a]).cmp(&self.rank(&pool[b])))
    }

    /// Drop selected and capped rows from a year. Returns the capped rows.
    fn prune(&mut self, year: i32) -> Vec<usize> {
        let Some(rows) = self.years.get(&year) else {
            return Vec::new();
        };
        let mut keep = Vec::with_capacity(rows.len());
        let mut capped = Vec::new();
        for &idx in rows {
            let candidate = &self.pool[idx];
            if self.selected.contains(candidate.canonical_id.as_str()) {
                continue;
            }
            if self.is_capped(candidate) {
                capped.push(idx);
            } else {
                keep.push(idx);
            }
        }
        self.out.album_cap_blocks += capped.len();
        self.years.insert(year, keep);
        capped
    }

    fn has_candidate(&mut self, year: i32) -> bool {
        self.prune(year);
        self.years.get(&year).is_some_and(|rows| !rows.is_empty())
    }

    /// Best eligible row for `year`; with `relax`, falls back to the best
    /// capped row when nothing eligible is left.
    fn pop_next(&mut self, year: i32, relax: bool) -> Option<(usize, bool)> {
        let capped = self.prune(year);
        let rows = self.years.get(&year)?;
        if let Some(best) = self.best_of(rows) {
            if let Some(rows) = self.years.get_mut(&year) {
                rows.retain(|&idx| idx != best);
            }
            return Some((best, false));
        }
        if relax {
            return self.best_of(&capped).map(|best| (best, true));
        }
        None
    }

    fn add(&mut self, idx: usize, phase: SelectionPhase, relaxed: bool) {
        let pool = self.pool;
        let candidate = &pool[idx];
        if !self.selected.insert(candidate.canonical_id.as_str()) {
            return;
        }
        let year = candidate.year.unwrap_or_default();
        *self.year_counts.entry(year).or_default() += 1;
        if self.max_per_album > 0 {
            *self.album_counts.entry(cap_key(candidate)).or_default() += 1;
        }
        if relaxed {
            self.out.album_cap_relaxations += 1;
        }

        let artist_rarity = self.rarity(candidate);
        for artist in &candidate.artists {
            *self.artist_counts.entry(artist.as_str()).or_default() += 1;
        }

        self.out.cards.push(DeckCard {
            candidate: candidate.clone(),
            phase,
            order: self.out.cards.len() + 1,
            artist_rarity,
            relaxed,
        });
    }

    fn run(mut self, target: usize) -> DeckSelection {
        let all_years: Vec<i32> = self.years.keys().copied().collect();

        for &year in &all_years {
            if self.out.cards.len() >= target {
                break;
            }
            if let Some((idx, relaxed)) = self.pop_next(year, true) {
                self.add(idx, SelectionPhase::Coverage, relaxed);
            }
        }

        while self.out.cards.len() < target {
            let mut next: Option<(usize, i32)> = None;
            for &year in &all_years {
                if !self.has_candidate(year) {
                    continue;
                }
                let count = self.year_counts.get(&year).copied().unwrap_or(0);
                if next.map_or(true, |best| (count, year) < best) {
                    next = Some((count, year));
                }
            }
            let Some((_, year)) = next else {
                break;
            };
            if let Some((idx, _)) = self.pop_next(year, false) {
                self.add(idx, SelectionPhase::Waterfill, false);
            }
        }

        self.out
    }
}

/// Select up to `limit` cards (0 = whole pool) from a valid pool.
/// An empty pool yields an empty deck.
pub fn select_deck(pool: &[Candidate], limit: usize, max_per_album: usize) -> DeckSelection {
    if pool.is_empty() {
        return DeckSelection::default();
    }
    let target = if limit > 0 { limit } else { pool.len() };
    Selector::new(pool, max_per_album).run(target)
}

// ============================================================================
// QC
// ============================================================================

/// Cards above the cap, summed over album keys (0 when uncapped).
pub fn album_cap_violations(cards: &[DeckCard], max_per_album: usize) -> usize {
    if max_per_album == 0 {
        return 0;
    }
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();
    for card in cards {
        *counts.entry(cap_key(&card.candidate)).or_default() += 1;
    }
    counts
        .values()
        .map(|&n| n.saturating_sub(max_per_album))
        .sum()
}

fn duplicates<'b, I>(values: I) -> usize
where
    I: IntoIterator<Item = &'b str>,
{
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    values.into_iter().filter(|v| !seen.insert(v)).count()
}

/// Most frequent explicit artists in the deck, count desc then name asc.
pub fn top_artists(cards: &[DeckCard], top_n: usize) -> Vec<(String, usize)> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for card in cards {
        for artist in &card.candidate.artists {
            *counts.entry(artist.as_str()).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(artist, n)| (artist.to_string(), n))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_n);
    ranked
}

/// Fill the deck-dependent QC fields from the valid pool and the selection.
pub fn fill_deck_qc(
    qc: &mut DeckQc,
    pool: &[Candidate],
    selection: &DeckSelection,
    limit: usize,
    max_per_album: usize,
) {
    let cards = &selection.cards;

    qc.cards = cards.len();
    qc.limit = limit;
    qc.shortfall = if limit > 0 { limit.saturating_sub(cards.len()) } else { 0 };
    qc.max_per_album = max_per_album;
    qc.pool_valid_after_collapse = pool.len();

    qc.album_cap_blocks = selection.album_cap_blocks;
    qc.album_cap_relaxations = selection.album_cap_relaxations;
    qc.album_cap_violations = album_cap_violations(cards, max_per_album);
    qc.dup_card_id = duplicates(cards.iter().map(|c| c.candidate.card_id.as_str()));
    qc.dup_canonical_id = duplicates(cards.iter().map(|c| c.candidate.canonical_id.as_str()));

    qc.coverage_cards = cards
        .iter()
        .filter(|c| c.phase == SelectionPhase::Coverage)
        .count();
    qc.waterfill_cards = cards.len() - qc.coverage_cards;

    qc.year_distribution_pool.clear();
    for candidate in pool {
        if let Some(year) = candidate.year {
            *qc.year_distribution_pool.entry(year).or_default() += 1;
        }
    }
    qc.year_distribution_deck.clear();
    qc.owners_count_distribution_deck.clear();
    for card in cards {
        *qc.year_distribution_deck.entry(card.year()).or_default() += 1;
        *qc
            .owners_count_distribution_deck
            .entry(card.candidate.owners_count)
            .or_default() += 1;
    }
    qc.unique_years_pool = qc.year_distribution_pool.len();
    qc.unique_years_in_deck = qc.year_distribution_deck.len();
    qc.top_artists = top_artists(cards, TOP_ARTISTS);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, year: i32, owners: usize) -> Candidate {
        Candidate {
            canonical_id: id.to_string(),
            card_id: format!("I-{}", id),
            year: Some(year),
            year_confidence: 1.0,
            owners_count: owners,
            album_key: format!("cid::{}", id),
            ..Default::default()
        }
    }

    fn with_album(mut c: Candidate, album: &str) -> Candidate {
        c.album_key = album.to_string();
        c
    }

    fn with_artists(mut c: Candidate, artists: &[&str]) -> Candidate {
        c.artists = artists.iter().map(|s| s.to_string()).collect();
        c
    }

    fn ids(selection: &DeckSelection) -> Vec<&str> {
        selection
            .cards
            .iter()
            .map(|c| c.candidate.canonical_id.as_str())
            .collect()
    }

    fn example_pool() -> Vec<Candidate> {
        valid_pool(&[cand("A", 1999, 3), cand("B", 1999, 1), cand("C", 2001, 2)], 0.8)
    }

    #[test]
    fn test_limit_two_covers_both_years() {
        let selection = select_deck(&example_pool(), 2, 0);
        assert_eq!(ids(&selection), vec!["A", "C"]);
        assert!(selection
            .cards
            .iter()
            .all(|c| c.phase == SelectionPhase::Coverage));
    }

    #[test]
    fn test_limit_three_waterfills_smaller_year_first() {
        let selection = select_deck(&example_pool(), 3, 0);
        assert_eq!(ids(&selection), vec!["A", "C", "B"]);
        assert_eq!(selection.cards[2].phase, SelectionPhase::Waterfill);
        assert_eq!(selection.cards[2].order, 3);
    }

    #[test]
    fn test_coverage_precedes_second_card_per_year() {
        let pool = valid_pool(
            &[
                cand("a1", 1990, 9),
                cand("a2", 1990, 8),
                cand("b1", 1995, 1),
                cand("c1", 2000, 1),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 3, 0);
        let years: Vec<i32> = selection.cards.iter().map(|c| c.year()).collect();
        assert_eq!(years, vec![1990, 1995, 2000]);
    }

    #[test]
    fn test_limit_cuts_coverage_short() {
        let pool = valid_pool(
            &[
                cand("a1", 1990, 9),
                cand("a2", 1990, 8),
                cand("b1", 1995, 3),
                cand("b2", 1995, 2),
                cand("c1", 2000, 1),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 2, 0);
        assert_eq!(ids(&selection), vec!["a1", "b1"]);
        assert!(selection
            .cards
            .iter()
            .all(|c| c.phase == SelectionPhase::Coverage));
        assert_eq!(selection.album_cap_relaxations, 0);

        let mut qc = DeckQc::default();
        fill_deck_qc(&mut qc, &pool, &selection, 2, 0);
        assert_eq!(qc.coverage_cards, 2);
        assert_eq!(qc.waterfill_cards, 0);
        assert_eq!(qc.shortfall, 0);
        assert_eq!(qc.unique_years_in_deck, 2);
        assert_eq!(qc.unique_years_pool, 3);
    }

    #[test]
    fn test_limit_zero_takes_whole_pool() {
        let pool = example_pool();
        let selection = select_deck(&pool, 0, 0);
        assert_eq!(selection.cards.len(), pool.len());
    }

    #[test]
    fn test_empty_pool() {
        let selection = select_deck(&[], 10, 2);
        assert!(selection.cards.is_empty());
        assert_eq!(selection.album_cap_blocks, 0);
    }

    #[test]
    fn test_waterfill_balances_years() {
        let mut raw = Vec::new();
        for i in 0..6 {
            raw.push(cand(&format!("x{}", i), 1980, 5));
        }
        raw.push(cand("y0", 1990, 1));
        raw.push(cand("y1", 1990, 1));
        let pool = valid_pool(&raw, 0.0);
        let selection = select_deck(&pool, 4, 0);
        let mut per_year: BTreeMap<i32, usize> = BTreeMap::new();
        for card in &selection.cards {
            *per_year.entry(card.year()).or_default() += 1;
        }
        assert_eq!(per_year[&1980], 2);
        assert_eq!(per_year[&1990], 2);
    }

    #[test]
    fn test_album_cap_respected_in_waterfill() {
        let pool = valid_pool(
            &[
                with_album(cand("a", 2000, 3), "alb"),
                with_album(cand("b", 2000, 2), "alb"),
                with_album(cand("c", 2000, 1), "other"),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 0, 1);
        assert_eq!(ids(&selection), vec!["a", "c"]);
        assert_eq!(selection.album_cap_blocks, 1);
        assert_eq!(selection.album_cap_relaxations, 0);
        assert_eq!(album_cap_violations(&selection.cards, 1), 0);
    }

    #[test]
    fn test_coverage_relaxes_album_cap() {
        // 2001 only has a song from the already-used album
        let pool = valid_pool(
            &[
                with_album(cand("a", 1999, 3), "alb"),
                with_album(cand("b", 2001, 1), "alb"),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 0, 1);
        assert_eq!(ids(&selection), vec!["a", "b"]);
        assert!(selection.cards[1].relaxed);
        assert_eq!(selection.album_cap_relaxations, 1);
        assert_eq!(album_cap_violations(&selection.cards, 1), 1);
    }

    #[test]
    fn test_artist_rarity_breaks_owner_ties() {
        let pool = valid_pool(
            &[
                with_artists(cand("a", 1990, 2), &["Queen"]),
                with_artists(cand("b", 2000, 2), &["Queen"]),
                with_artists(cand("c", 2000, 2), &["Blur"]),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 2, 0);
        // b would win on id, but Queen already has a card
        assert_eq!(ids(&selection), vec!["a", "c"]);
        assert_eq!(selection.cards[1].artist_rarity, Some(0));
    }

    #[test]
    fn test_owners_dominate_rarity() {
        let pool = valid_pool(
            &[
                with_artists(cand("a", 1990, 2), &["Queen"]),
                with_artists(cand("b", 2000, 5), &["Queen"]),
                with_artists(cand("c", 2000, 2), &["Blur"]),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 2, 0);
        assert_eq!(ids(&selection), vec!["a", "b"]);
        assert_eq!(selection.cards[1].artist_rarity, Some(1));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut raw = vec![
            cand("q", 1985, 2),
            cand("r", 1985, 2),
            cand("s", 1992, 1),
            cand("t", 1992, 4),
            cand("u", 2004, 1),
        ];
        let first = select_deck(&valid_pool(&raw, 0.0), 4, 0);
        raw.reverse();
        let second = select_deck(&valid_pool(&raw, 0.0), 4, 0);
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_valid_pool_filters_untrusted_years() {
        let mut low = cand("low", 1999, 1);
        low.year_confidence = 0.5;
        let mut none = cand("none", 1999, 1);
        none.year = None;
        let pool = valid_pool(&[low, none, cand("ok", 2001, 1)], 0.8);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].canonical_id, "ok");
    }

    #[test]
    fn test_fill_deck_qc() {
        let pool = valid_pool(
            &[
                with_artists(cand("a", 1999, 3), &["X"]),
                with_artists(cand("b", 1999, 1), &["X"]),
                with_artists(cand("c", 2001, 2), &["Y"]),
            ],
            0.0,
        );
        let selection = select_deck(&pool, 5, 0);
        let mut qc = DeckQc::default();
        fill_deck_qc(&mut qc, &pool, &selection, 5, 0);
        assert_eq!(qc.cards, 3);
        assert_eq!(qc.shortfall, 2);
        assert_eq!(qc.dup_canonical_id, 0);
        assert_eq!(qc.dup_card_id, 0);
        assert_eq!(qc.coverage_cards, 2);
        assert_eq!(qc.waterfill_cards, 1);
        assert_eq!(qc.unique_years_pool, 2);
        assert_eq!(qc.unique_years_in_deck, 2);
        assert_eq!(qc.year_distribution_deck[&1999], 2);
        assert_eq!(qc.owners_count_distribution_deck[&3], 1);
        assert_eq!(qc.top_artists[0], ("X".to_string(), 2));
    }
}
