//! Identity resolution: raw (artists, title) pairs to stable canonical ids.
//!
//! The id is the first 16 hex chars of the MD5 digest of the canonical key.
//! A manual merge table can redirect any key to an operator-chosen target id;
//! the hashing itself never changes.

use md5::{Digest, Md5};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use crate::models::{CanonicalSong, Instance, LinkedInstance, ManualMerge};
use crate::normalize::{canonical_key, display_key, norm};

/// Number of hex chars kept from the digest.
///
/// Ids hash the `artist|title` key from `canonical_key`. Registries built
/// from `"artist | title"` keys carry different ids and are not compatible.
pub const CANONICAL_ID_LEN: usize = 16;

pub fn canonical_id_from_key(key: &str) -> String {
    let digest = format!("{:x}", Md5::digest(key.as_bytes()));
    digest[..CANONICAL_ID_LEN].to_string()
}

// ============================================================================
// Manual Merges
// ============================================================================

/// Alias key → target canonical id.
#[derive(Debug, Default, Clone)]
pub struct ManualMerges {
    by_key: FxHashMap<String, String>,
}

impl ManualMerges {
    /// Later rows win when two rows alias the same key.
    pub fn from_rows(rows: &[ManualMerge]) -> Self {
        let mut by_key = FxHashMap::default();
        for row in rows {
            let target = norm(&row.canonical_id_target);
            if target.is_empty() {
                continue;
            }
            if norm(&row.alias_artists_trim).is_empty() && norm(&row.alias_title_trim).is_empty() {
                continue;
            }
            let key = canonical_key(&row.alias_artists_trim, &row.alias_title_trim);
            by_key.insert(key, target);
        }
        Self { by_key }
    }

    pub fn target(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub canonical_key: String,
    pub canonical_id: String,
    /// A manual merge replaced the hashed id.
    pub overridden: bool,
}

#[derive(Debug, Default, Clone)]
pub struct IdentityResolver {
    merges: ManualMerges,
}

impl IdentityResolver {
    pub fn new(merges: ManualMerges) -> Self {
        Self { merges }
    }

    /// Never fails: empty artist or title still yields a key and an id.
    pub fn resolve(&self, artists_trim: &str, title_trim: &str) -> ResolvedIdentity {
        let key = canonical_key(artists_trim, title_trim);
        match self.merges.target(&key) {
            Some(target) => ResolvedIdentity {
                canonical_key: key,
                canonical_id: target.to_string(),
                overridden: true,
            },
            None => ResolvedIdentity {
                canonical_id: canonical_id_from_key(&key),
                canonical_key: key,
                overridden: false,
            },
        }
    }

    pub fn merges(&self) -> &ManualMerges {
        &self.merges
    }
}

/// Resolve every instance. Output order matches input order.
/// Returns the linked rows and how many of them hit a manual merge.
pub fn link_instances(
    instances: Vec<Instance>,
    resolver: &IdentityResolver,
) -> (Vec<LinkedInstance>, usize) {
    let linked: Vec<(LinkedInstance, bool)> = instances
        .into_par_iter()
        .map(|instance| {
            let resolved = resolver.resolve(&instance.artists_trim, &instance.title_trim);
            let canonical_key = display_key(&instance.artists_trim, &instance.title_trim);
            (
                LinkedInstance {
                    instance,
                    canonical_key,
                    canonical_id: resolved.canonical_id,
                },
                resolved.overridden,
            )
        })
        .collect();

    let merge_hits = linked.iter().filter(|(_, hit)| *hit).count();
    (linked.into_iter().map(|(row, _)| row).collect(), merge_hits)
}

// ============================================================================
// Canonical Songs
// ============================================================================

/// Most frequent normalized non-empty value; ties go to the lexicographically smallest.
pub fn choose_mode<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for value in values {
        let v = norm(value);
        if !v.is_empty() {
            *counts.entry(v).or_default() += 1;
        }
    }
    // BTreeMap iterates ascending, so the first max wins ties
    let mut best: Option<(&String, usize)> = None;
    for (value, &count) in &counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v.clone()).unwrap_or_default()
}

/// One canonical song per id, display strings chosen by majority vote.
/// Year fields are left empty for the enrichment stage.
pub fn build_canonical_songs(linked: &[LinkedInstance], expansion: &str) -> Vec<CanonicalSong> {
    let mut groups: BTreeMap<&str, Vec<&Instance>> = BTreeMap::new();
    for row in linked {
        groups
            .entry(row.canonical_id.as_str())
            .or_default()
            .push(&row.instance);
    }

    let mut songs: Vec<CanonicalSong> = groups
        .into_iter()
        .map(|(canonical_id, rows)| CanonicalSong {
            expansion_code: expansion.to_string(),
            canonical_id: canonical_id.to_string(),
            title_canon: choose_mode(rows.iter().map(|r| r.title_trim.as_str())),
            artists_canon: choose_mode(rows.iter().map(|r| r.artists_trim.as_str())),
            ..Default::default()
        })
        .collect();

    songs.sort_by(|a, b| {
        a.artists_canon
            .cmp(&b.artists_canon)
            .then_with(|| a.title_canon.cmp(&b.title_canon))
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
    songs
}

/// Distinct owners in first-seen order.
pub fn owners_in_order(linked: &[LinkedInstance]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for row in linked {
        let owner = row.instance.owner_label.trim();
        if !owner.is_empty() && !out.iter().any(|o| o == owner) {
            out.push(owner.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(owner: &str, artists: &str, title: &str) -> Instance {
        Instance {
            owner_label: owner.to_string(),
            artists_trim: artists.to_string(),
            title_trim: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_canonical_id_is_stable_hex() {
        let id = canonical_id_from_key("daft punk|one more time");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, canonical_id_from_key("daft punk|one more time"));
        assert_ne!(id, canonical_id_from_key("daft punk|around the world"));
        // Spaced separator keys hash to different ids
        assert_ne!(id, canonical_id_from_key("daft punk | one more time"));
    }

    #[test]
    fn test_canonical_id_known_digest() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(canonical_id_from_key(""), "d41d8cd98f00b204");
    }

    #[test]
    fn test_resolve_ignores_case_and_spacing() {
        let resolver = IdentityResolver::default();
        let a = resolver.resolve("Daft  Punk", " One More Time");
        let b = resolver.resolve("daft punk", "ONE MORE TIME");
        assert_eq!(a.canonical_id, b.canonical_id);
        assert!(!a.overridden);
    }

    #[test]
    fn test_resolve_empty_fields() {
        let resolver = IdentityResolver::default();
        let r = resolver.resolve("", "");
        assert_eq!(r.canonical_key, "|");
        assert_eq!(r.canonical_id.len(), 16);
    }

    #[test]
    fn test_manual_merge_overrides_hash() {
        let merges = ManualMerges::from_rows(&[ManualMerge {
            alias_artists_trim: "Daft Punk ".to_string(),
            alias_title_trim: "One more time (Radio Edit)".to_string(),
            canonical_id_target: " target0000000001 ".to_string(),
            note: String::new(),
        }]);
        let resolver = IdentityResolver::new(merges);
        let r = resolver.resolve("daft punk", "One More Time (Radio Edit)");
        assert_eq!(r.canonical_id, "target0000000001");
        assert!(r.overridden);

        let untouched = resolver.resolve("Daft Punk", "One More Time");
        assert!(!untouched.overridden);
    }

    #[test]
    fn test_manual_merges_skip_empty_rows() {
        let merges = ManualMerges::from_rows(&[
            ManualMerge {
                alias_artists_trim: "A".to_string(),
                alias_title_trim: "B".to_string(),
                canonical_id_target: "  ".to_string(),
                note: String::new(),
            },
            ManualMerge {
                canonical_id_target: "x".to_string(),
                ..Default::default()
            },
        ]);
        assert!(merges.is_empty());
    }

    #[test]
    fn test_link_instances_preserves_order_and_counts_hits() {
        let merges = ManualMerges::from_rows(&[ManualMerge {
            alias_artists_trim: "B".to_string(),
            alias_title_trim: "Two".to_string(),
            canonical_id_target: "merged".to_string(),
            note: String::new(),
        }]);
        let resolver = IdentityResolver::new(merges);
        let (linked, hits) = link_instances(
            vec![instance("ana", "A", "One"), instance("ana", "B", "Two")],
            &resolver,
        );
        assert_eq!(hits, 1);
        assert_eq!(linked[0].instance.title_trim, "One");
        assert_eq!(linked[0].canonical_key, "A | One");
        assert_eq!(linked[1].canonical_id, "merged");
    }

    #[test]
    fn test_choose_mode() {
        assert_eq!(choose_mode(["b", "a", "b", " a "]), "a");
        assert_eq!(choose_mode(["b", "b", "a"]), "b");
        assert_eq!(choose_mode(["", "  "]), "");
    }

    #[test]
    fn test_build_canonical_songs_groups_and_sorts() {
        let resolver = IdentityResolver::default();
        let (linked, _) = link_instances(
            vec![
                instance("ana", "Zed", "Song"),
                instance("ana", "Abba", "Waterloo"),
                instance("guille", "ABBA", "Waterloo"),
                instance("guille", "ABBA", "WATERLOO"),
            ],
            &resolver,
        );
        let songs = build_canonical_songs(&linked, "I");
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].artists_canon, "ABBA");
        assert_eq!(songs[0].title_canon, "Waterloo");
        assert_eq!(songs[0].expansion_code, "I");
        assert_eq!(songs[0].year, None);
        assert_eq!(songs[1].artists_canon, "Zed");
    }

    #[test]
    fn test_owners_in_order() {
        let resolver = IdentityResolver::default();
        let (linked, _) = link_instances(
            vec![
                instance("guille", "A", "1"),
                instance("ana", "A", "2"),
                instance("guille", "A", "3"),
            ],
            &resolver,
        );
        assert_eq!(owners_in_order(&linked), vec!["guille", "ana"]);
    }
}
