//! Core data models for the deck pipeline.
//!
//! This module contains the row types shared by every stage: raw library
//! instances, canonical songs, enriched candidates, collapse/queue report rows,
//! selected deck cards and the QC counters written at the end of a run.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Ingestion Models
// ============================================================================

/// One (song x owner) observation from a library export.
///
/// Optional fields are empty strings, never missing, so grouping and string
/// concatenation downstream are total.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instance {
    pub owner_label: String,
    pub title_trim: String,
    pub artists_trim: String,
    pub track_id: String,
    pub album_id: String,
    pub album_name: String,
    pub spotify_url: String,
    pub spotify_uri: String,
    pub processed_month: String,
    /// Export file the row came from; first half of the aggregation order.
    pub source_file: String,
    /// Row position inside `source_file`; second half of the aggregation order.
    pub row_index: i64,
}

/// Instance after identity resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedInstance {
    pub instance: Instance,
    /// Human-readable key (`artists | title`, case preserved).
    pub canonical_key: String,
    pub canonical_id: String,
}

/// Operator-authored alias row redirecting a key to an existing canonical id.
#[derive(Clone, Debug, Default)]
pub struct ManualMerge {
    pub alias_artists_trim: String,
    pub alias_title_trim: String,
    pub canonical_id_target: String,
    pub note: String,
}

// ============================================================================
// Year Resolution
// ============================================================================

/// Where a release year came from.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum YearSource {
    #[default]
    Unknown,
    Manual,
    MusicBrainz,
    Itunes,
    Spotify,
    /// Tag written by a resolver this crate does not know about; kept verbatim.
    Other(String),
}

impl YearSource {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" => YearSource::Unknown,
            "manual" => YearSource::Manual,
            "musicbrainz" | "mb" => YearSource::MusicBrainz,
            "itunes" => YearSource::Itunes,
            "spotify" => YearSource::Spotify,
            _ => YearSource::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            YearSource::Unknown => "",
            YearSource::Manual => "manual",
            YearSource::MusicBrainz => "musicbrainz",
            YearSource::Itunes => "itunes",
            YearSource::Spotify => "spotify",
            YearSource::Other(tag) => tag,
        }
    }
}

impl fmt::Display for YearSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Canonical Models
// ============================================================================

/// Deduplicated song identity, optionally enriched with a release year.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalSong {
    pub expansion_code: String,
    pub canonical_id: String,
    pub title_canon: String,
    pub artists_canon: String,
    /// Full credited artist list when an enrichment pass provided one.
    pub artists_all: String,
    pub artists_count: usize,
    pub year: Option<i32>,
    pub year_confidence: f64,
    pub year_source: YearSource,
    pub year_note: String,
    pub album_id: String,
    pub album_name: String,
}

/// Append-only registry row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub canonical_id: String,
    pub expansion_code: String,
    pub added_month: String,
}

/// Display overrides authored by an operator, keyed by canonical id.
#[derive(Clone, Debug, Default)]
pub struct TitleOverride {
    pub canonical_id: String,
    pub title_display: String,
    pub artists_display: String,
}

/// One row per canonical song after joining with aggregated instance data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Candidate {
    pub expansion_code: String,
    pub canonical_id: String,
    pub card_id: String,

    // Source names
    pub title_canon: String,
    pub artists_canon: String,
    /// Explicit artist list used for rarity scoring (`|`/`;` separated in source).
    pub artists: Vec<String>,

    // Display names
    pub title_display: String,
    pub artists_display: String,

    // Year
    pub year: Option<i32>,
    pub year_confidence: f64,
    pub year_source: YearSource,
    pub year_note: String,

    // Aggregated instance data
    pub owners: Vec<String>,
    pub owners_count: usize,
    pub instance_count: usize,
    pub track_id: String,
    pub spotify_url: String,
    pub spotify_uri: String,
    pub has_spotify_link: bool,

    // Grouping keys
    pub album_id: String,
    pub album_name: String,
    pub album_key: String,
    pub collapse_key: String,
}

impl Candidate {
    /// Year is present and at least as confident as `min_confidence`.
    pub fn has_trusted_year(&self, min_confidence: f64) -> bool {
        self.year.is_some() && self.year_confidence >= min_confidence
    }

    /// Owners joined for display, e.g. "Ana, Guille".
    pub fn owners_display(&self) -> String {
        self.owners.join(", ")
    }
}

// ============================================================================
// Collapse Models
// ============================================================================

/// Criterion that separated the elected candidate from the runner-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionReason {
    /// Group of one.
    Sole,
    OwnersCount,
    InstanceCount,
    StreamingLink,
    CanonicalId,
}

impl ElectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ElectionReason::Sole => "sole",
            ElectionReason::OwnersCount => "owners_count",
            ElectionReason::InstanceCount => "instance_count",
            ElectionReason::StreamingLink => "streaming_link",
            ElectionReason::CanonicalId => "canonical_id",
        }
    }
}

/// Collapse report row; candidate lists are in election order.
#[derive(Clone, Debug)]
pub struct CollapseGroup {
    pub collapse_key: String,
    pub chosen_id: String,
    pub reason: ElectionReason,
    pub candidate_ids: Vec<String>,
    pub candidate_titles: Vec<String>,
    pub candidate_artists: Vec<String>,
    pub candidate_owners_count: Vec<usize>,
    pub candidate_instance_count: Vec<usize>,
    pub candidate_has_link: Vec<bool>,
}

// ============================================================================
// Manual Review Models
// ============================================================================

pub const MANUAL_QUEUE_REASON: &str = "year_missing_or_low_confidence_and_high_owner_presence";

#[derive(Clone, Debug)]
pub struct ManualQueueEntry {
    pub canonical_id: String,
    pub title_canon: String,
    pub artists_canon: String,
    pub owners: String,
    pub owners_count: usize,
    pub instance_count: usize,
    pub year: Option<i32>,
    pub year_confidence: f64,
    pub year_source: YearSource,
    pub year_note: String,
    pub manual_k: usize,
    pub owners_universe_count: usize,
    pub year_confidence_min: f64,
}

// ============================================================================
// Deck Models
// ============================================================================

/// Which selection pass picked a card.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionPhase {
    /// First pass: one card per represented year.
    Coverage,
    /// Second pass: always feed the year with the fewest cards.
    Waterfill,
}

impl SelectionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionPhase::Coverage => "coverage",
            SelectionPhase::Waterfill => "waterfill",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeckCard {
    pub candidate: Candidate,
    pub phase: SelectionPhase,
    /// 1-based position in the deck.
    pub order: usize,
    /// Minimum prior deck appearances across the card's artists; `None` when
    /// the card has no explicit artist list.
    pub artist_rarity: Option<usize>,
    /// Album cap was exceeded to keep the card's year covered.
    pub relaxed: bool,
}

impl DeckCard {
    /// Resolved year; the valid pool only admits candidates with one.
    pub fn year(&self) -> i32 {
        self.candidate.year.unwrap_or_default()
    }
}

// ============================================================================
// Statistics (QC)
// ============================================================================

/// Canonicalize-stage counters.
#[derive(Default, Debug, Clone, Serialize)]
pub struct CanonicalizeQc {
    pub expansion: String,
    pub owners: Vec<String>,
    pub n_instances: usize,
    pub n_canonical: usize,
    pub n_manual_merges: usize,
    pub n_merge_hits: usize,
    pub processed_month: String,
    pub registry_added: usize,
    pub registry_total: usize,
}

/// Deck-stage counters written next to the deck.
#[derive(Default, Debug, Clone, Serialize)]
pub struct DeckQc {
    pub expansion: String,
    pub cards: usize,
    pub limit: usize,
    /// Cards missing to reach `limit` (0 when `limit` is 0 or reached).
    pub shortfall: usize,
    /// Input canonical_songs rows dropped as repeats of an earlier id.
    pub dup_canonical_songs_dropped: usize,
    pub candidates_total: usize,
    pub pool_total_after_collapse: usize,
    pub pool_valid_after_collapse: usize,
    pub collapse_groups: usize,
    pub unique_years_pool: usize,
    pub unique_years_in_deck: usize,
    pub owners_universe_count: usize,
    pub manual_year_k: usize,
    pub manual_year_queue_size: usize,
    pub year_confidence_min: f64,
    pub max_per_album: usize,
    pub album_cap_blocks: usize,
    pub album_cap_relaxations: usize,
    pub album_cap_violations: usize,
    pub dup_card_id: usize,
    pub dup_canonical_id: usize,
    pub coverage_cards: usize,
    pub waterfill_cards: usize,
    pub year_distribution_pool: BTreeMap<i32, usize>,
    pub year_distribution_deck: BTreeMap<i32, usize>,
    pub owners_count_distribution_deck: BTreeMap<usize, usize>,
    pub top_artists: Vec<(String, usize)>,

    pub elapsed_seconds: f64,
}

impl DeckQc {
    /// Log stats to stderr in JSON format
    pub fn log_phase(&self, phase: &str) {
        crate::progress::log_stats(phase, self);
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl CanonicalizeQc {
    pub fn log_phase(&self, phase: &str) {
        crate::progress::log_stats(phase, self);
    }

    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
