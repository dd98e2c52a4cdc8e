//! Year-resolution seam.
//!
//! Release years come from outside the core (MusicBrainz/iTunes lookups with
//! their own caching). The core only consumes `{year, source, confidence, note}`
//! results through [`YearLookup`]; the one implementation shipped here is the
//! operator override table.

use rustc_hash::FxHashMap;

use crate::models::{CanonicalSong, YearSource};
use crate::normalize::{norm, parse_optional_year};

/// Resolver output for one song.
#[derive(Clone, Debug, PartialEq)]
pub struct YearResolution {
    pub year: Option<i32>,
    pub source: YearSource,
    /// In [0, 1].
    pub confidence: f64,
    pub note: String,
}

pub trait YearLookup {
    /// `None` means "no opinion": the song keeps what it already has.
    fn lookup(&self, song: &CanonicalSong) -> Option<YearResolution>;
}

/// Raw override row as stored by operators.
#[derive(Clone, Debug, Default)]
pub struct YearOverrideRow {
    pub canonical_id: String,
    pub year: String,
    pub note: String,
}

/// Operator-fixed years; always win with confidence 1.0.
#[derive(Debug, Default)]
pub struct YearOverrides {
    by_id: FxHashMap<String, i32>,
    /// Rows dropped because the year did not parse.
    pub rejected: usize,
}

impl YearOverrides {
    pub fn from_rows(rows: &[YearOverrideRow]) -> Self {
        let mut by_id = FxHashMap::default();
        let mut rejected = 0;
        for row in rows {
            let cid = norm(&row.canonical_id);
            if cid.is_empty() {
                continue;
            }
            match parse_optional_year(&row.year) {
                Some(year) => {
                    by_id.insert(cid, year);
                }
                None => rejected += 1,
            }
        }
        Self { by_id, rejected }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl YearLookup for YearOverrides {
    fn lookup(&self, song: &CanonicalSong) -> Option<YearResolution> {
        self.by_id.get(&song.canonical_id).map(|&year| YearResolution {
            year: Some(year),
            source: YearSource::Manual,
            confidence: 1.0,
            note: "manual_override".to_string(),
        })
    }
}

/// Apply a lookup to every song. Returns how many songs were updated.
pub fn apply_year_lookup<L: YearLookup + ?Sized>(songs: &mut [CanonicalSong], lookup: &L) -> usize {
    let mut applied = 0;
    for song in songs.iter_mut() {
        if let Some(resolution) = lookup.lookup(song) {
            song.year = resolution.year;
            song.year_source = resolution.source;
            song.year_confidence = resolution.confidence.clamp(0.0, 1.0);
            song.year_note = resolution.note;
            applied += 1;
        }
    }
    applied
}
