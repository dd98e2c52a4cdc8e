//! Candidate pool: canonical songs joined with per-id instance aggregates.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::display::{artists_display, card_id, clean_title_display, TitleOverrides};
use crate::models::{CanonicalSong, Candidate, LinkedInstance};
use crate::normalize::{album_key, collapse_key, sorted_owners, split_artist_list, split_artists_text};

/// Aggregated instance data for one canonical id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstanceSummary {
    /// Distinct owner labels, case-insensitively sorted.
    pub owners: Vec<String>,
    pub instance_count: usize,
    pub track_id: String,
    pub spotify_url: String,
    pub spotify_uri: String,
    pub album_id: String,
    pub album_name: String,
}

fn fill_first(slot: &mut String, value: &str) {
    if slot.is_empty() {
        let v = value.trim();
        if !v.is_empty() {
            *slot = v.to_string();
        }
    }
}

/// Aggregate instances per canonical id.
///
/// Rows are visited in (source_file, row_index) order so the "first non-empty
/// value wins" fields do not depend on how the rows were loaded. Rows with an
/// empty canonical id are skipped. Also returns the owner universe (every
/// distinct owner label across all rows).
pub fn summarize_instances(
    linked: &[LinkedInstance],
) -> (FxHashMap<String, InstanceSummary>, Vec<String>) {
    let mut ordered: Vec<&LinkedInstance> = linked
        .iter()
        .filter(|row| !row.canonical_id.trim().is_empty())
        .collect();
    ordered.sort_by(|a, b| {
        a.instance
            .source_file
            .cmp(&b.instance.source_file)
            .then_with(|| a.instance.row_index.cmp(&b.instance.row_index))
    });

    let mut summaries: FxHashMap<String, InstanceSummary> = FxHashMap::default();
    let mut owner_lists: FxHashMap<String, Vec<&str>> = FxHashMap::default();

    for row in &ordered {
        let cid = row.canonical_id.trim();
        let inst = &row.instance;
        let summary = summaries.entry(cid.to_string()).or_default();
        summary.instance_count += 1;
        fill_first(&mut summary.track_id, &inst.track_id);
        fill_first(&mut summary.spotify_url, &inst.spotify_url);
        fill_first(&mut summary.spotify_uri, &inst.spotify_uri);
        fill_first(&mut summary.album_id, &inst.album_id);
        fill_first(&mut summary.album_name, &inst.album_name);
        owner_lists
            .entry(cid.to_string())
            .or_default()
            .push(inst.owner_label.as_str());
    }

    for (cid, owners) in owner_lists {
        if let Some(summary) = summaries.get_mut(&cid) {
            summary.owners = sorted_owners(owners);
        }
    }

    let universe = sorted_owners(ordered.iter().map(|row| row.instance.owner_label.as_str()));
    (summaries, universe)
}

/// Keep the first song per trimmed canonical id, in input (rowid) order.
/// Ids are stored trimmed. Returns the number of dropped duplicates.
pub fn dedupe_songs(songs: &mut Vec<CanonicalSong>) -> usize {
    let before = songs.len();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    songs.retain_mut(|song| {
        let cid = song.canonical_id.trim();
        if cid.is_empty() {
            return true;
        }
        if cid.len() != song.canonical_id.len() {
            song.canonical_id = cid.to_string();
        }
        seen.insert(song.canonical_id.clone())
    });
    before - songs.len()
}

fn prefer_song_field(song_value: &str, summary_value: &str) -> String {
    let v = song_value.trim();
    if v.is_empty() {
        summary_value.to_string()
    } else {
        v.to_string()
    }
}

/// Build one enriched candidate per canonical song, in song order.
///
/// Songs without an instance aggregate get empty owners and zero counts.
/// Album fields on the canonical song take precedence over instance values.
pub fn build_candidates(
    songs: &[CanonicalSong],
    summaries: &FxHashMap<String, InstanceSummary>,
    expansion: &str,
    title_overrides: &TitleOverrides,
) -> Vec<Candidate> {
    let empty = InstanceSummary::default();

    songs
        .par_iter()
        .filter(|song| !song.canonical_id.trim().is_empty())
        .map(|song| {
            let cid = song.canonical_id.trim().to_string();
            let summary = summaries.get(&cid).unwrap_or(&empty);

            let title_canon = song.title_canon.trim().to_string();
            let artists_canon = song.artists_canon.trim().to_string();
            let artists_all = if song.artists_all.trim().is_empty() {
                artists_canon.clone()
            } else {
                song.artists_all.trim().to_string()
            };
            let artists_count = if song.artists_count > 0 {
                song.artists_count
            } else {
                split_artists_text(&artists_all).len()
            };

            let mut title_display = clean_title_display(&title_canon);
            let mut artists_line = artists_display(&artists_all, &artists_canon, artists_count);
            title_overrides.apply(&cid, &mut title_display, &mut artists_line);

            let album_id = prefer_song_field(&song.album_id, &summary.album_id);
            let album_name = prefer_song_field(&song.album_name, &summary.album_name);

            Candidate {
                expansion_code: expansion.to_string(),
                card_id: card_id(expansion, &cid),
                artists: split_artist_list(&artists_canon),
                title_display,
                artists_display: artists_line,
                year: song.year,
                year_confidence: song.year_confidence,
                year_source: song.year_source.clone(),
                year_note: song.year_note.clone(),
                owners: summary.owners.clone(),
                owners_count: summary.owners.len(),
                instance_count: summary.instance_count,
                track_id: summary.track_id.clone(),
                spotify_url: summary.spotify_url.clone(),
                spotify_uri: summary.spotify_uri.clone(),
                has_spotify_link: !summary.spotify_url.trim().is_empty(),
                album_key: album_key(&album_id, &album_name, &cid),
                album_id,
                album_name,
                collapse_key: collapse_key(&title_canon, &artists_canon),
                title_canon,
                artists_canon,
                canonical_id: cid,
            }
        })
        .collect()
}
