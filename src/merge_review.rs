//! Merge-candidate report.
//!
//! Groups linked instances by a deliberately loose (title, first artist) key.
//! A group whose rows resolved to several canonical ids is a likely mis-split
//! that an operator may fix with a manual merge row.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::LinkedInstance;
use crate::normalize::MULTI_SPACE;

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").unwrap());

static VERSION_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:remaster(?:ed)?|radio edit|edit|mix|remix|live|acoustic|mono|stereo|version)\b").unwrap()
});

static TRAILING_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-–—]\s*$").unwrap());

static ARTIST_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",|&| feat\.| feat | featuring ").unwrap());

/// Joined text fields are cut at this many chars.
const MAX_FIELD_CHARS: usize = 500;

pub fn base_title(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    let out = PARENTHETICAL.replace_all(&lower, "");
    let out = VERSION_WORDS.replace_all(&out, "");
    let out = TRAILING_DASH.replace_all(out.trim(), "");
    MULTI_SPACE.replace_all(out.trim(), " ").to_string()
}

/// First credited artist, lowercased.
pub fn base_artist(artists: &str) -> String {
    let lower = artists.trim().to_lowercase();
    let first = ARTIST_SPLIT.split(&lower).next().unwrap_or("").trim();
    MULTI_SPACE.replace_all(first, " ").to_string()
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeCandidateGroup {
    pub base_title: String,
    pub base_artist: String,
    pub n_rows: usize,
    pub n_canonical: usize,
    /// Sorted distinct ids, `|`-joined.
    pub canonical_ids: String,
    /// Sorted distinct raw titles, ` | `-joined.
    pub examples: String,
    /// Sorted distinct raw artist strings, ` | `-joined.
    pub artists: String,
    pub flag_remix: bool,
    pub flag_live: bool,
    pub flag_acoustic: bool,
    pub flag_feat: bool,
}

#[derive(Default)]
struct GroupAcc<'a> {
    rows: usize,
    ids: BTreeSet<&'a str>,
    titles: BTreeSet<&'a str>,
    artists: BTreeSet<&'a str>,
}

/// Groups spanning at least two canonical ids and two rows, sorted by
/// n_canonical desc, n_rows desc, then key.
pub fn merge_candidates(linked: &[LinkedInstance]) -> Vec<MergeCandidateGroup> {
    let mut groups: BTreeMap<(String, String), GroupAcc> = BTreeMap::new();
    for row in linked {
        let inst = &row.instance;
        let acc = groups
            .entry((base_title(&inst.title_trim), base_artist(&inst.artists_trim)))
            .or_default();
        acc.rows += 1;
        acc.ids.insert(row.canonical_id.as_str());
        acc.titles.insert(inst.title_trim.as_str());
        acc.artists.insert(inst.artists_trim.as_str());
    }

    let mut out: Vec<MergeCandidateGroup> = groups
        .into_iter()
        .filter(|(_, acc)| acc.ids.len() >= 2 && acc.rows >= 2)
        .map(|((title, artist), acc)| {
            let joined_titles = acc.titles.iter().copied().collect::<Vec<_>>().join(" | ");
            let probe = joined_titles.to_lowercase();
            let has = |needle: &str| probe.contains(needle);
            MergeCandidateGroup {
                flag_remix: has("remix") || has(" mix"),
                flag_live: has("live") || has("sesión") || has("sesion") || has("session"),
                flag_acoustic: has("acústico") || has("acustico") || has("acoustic"),
                flag_feat: has("feat") || has("with") || has("featuring"),
                base_title: title,
                base_artist: artist,
                n_rows: acc.rows,
                n_canonical: acc.ids.len(),
                canonical_ids: truncate_chars(
                    acc.ids.iter().copied().collect::<Vec<_>>().join("|"),
                    MAX_FIELD_CHARS,
                ),
                examples: truncate_chars(joined_titles, MAX_FIELD_CHARS),
                artists: truncate_chars(
                    acc.artists.iter().copied().collect::<Vec<_>>().join(" | "),
                    MAX_FIELD_CHARS,
                ),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        b.n_canonical
            .cmp(&a.n_canonical)
            .then_with(|| b.n_rows.cmp(&a.n_rows))
            .then_with(|| a.base_artist.cmp(&b.base_artist))
            .then_with(|| a.base_title.cmp(&b.base_title))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{link_instances, IdentityResolver};
    use crate::models::Instance;

    fn inst(artists: &str, title: &str) -> Instance {
        Instance {
            owner_label: "ana".to_string(),
            artists_trim: artists.to_string(),
            title_trim: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_title_and_artist() {
        assert_eq!(base_title("Heroes (2017 Remaster)"), "heroes");
        assert_eq!(base_title("Heroes - Live"), "heroes");
        assert_eq!(base_artist("Queen & David Bowie"), "queen");
        assert_eq!(base_artist("Drake feat. Rihanna"), "drake");
    }

    #[test]
    fn test_merge_candidates_reports_split_groups() {
        let (linked, _) = link_instances(
            vec![
                inst("David Bowie", "Heroes"),
                inst("David Bowie", "Heroes - Live"),
                inst("David Bowie", "Heroes"),
                inst("Queen", "Bohemian Rhapsody"),
                inst("Queen", "Bohemian Rhapsody"),
            ],
            &IdentityResolver::default(),
        );
        let groups = merge_candidates(&linked);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.base_artist, "david bowie");
        assert_eq!(g.base_title, "heroes");
        assert_eq!(g.n_rows, 3);
        assert_eq!(g.n_canonical, 2);
        assert!(g.flag_live);
        assert!(!g.flag_remix);
        assert_eq!(g.examples, "Heroes | Heroes - Live");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let text = "é".repeat(600);
        assert_eq!(truncate_chars(text, MAX_FIELD_CHARS).chars().count(), 500);
    }
}
