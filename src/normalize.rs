//! Shared normalization functions for identity keys, collapse keys and album keys.
//! Used by both the canonicalize and build-deck binaries.
//!
//! CRITICAL: `canonical_key` feeds the canonical id hash. Changing it changes
//! every id in the registry.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Featured-artist parenthetical: "(feat. X)", "[ft Y]"
pub static FEAT_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\(\[]\s*(?:feat\.?|ft\.?|featuring)\b.*?[\)\]]").unwrap());

/// Inline featured-artist tail: "Song feat. X"
pub static FEAT_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:feat\.?|ft\.?|featuring)\b.*$").unwrap());

/// Anything that is not a lowercase ASCII letter, digit or whitespace.
pub static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// Regex to collapse any whitespace run into a single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Version qualifiers stripped before collapsing (remaster, live, edits...).
const VERSION_TAGS: &[&str] = &[
    r"\bremaster(?:ed)?\b",
    r"\bradio\s+edit\b",
    r"\bedit\b",
    r"\blive\b",
    r"\bacoustic\b",
    r"\bdemo\b",
    r"\binstrumental\b",
    r"\bextended\b",
    r"\bversion\b",
    r"\bmono\b",
    r"\bstereo\b",
    r"\bclean\b",
    r"\bexplicit\b",
    r"\breissue\b",
];

/// Markers of an intentionally different recording. Titles carrying one are
/// never stripped and never collapse with their base song.
const KEEP_DISTINCT_TAGS: &[&str] = &[
    r"\bremix\b",
    r"\bsped\s+up\b",
    r"\bspeed\s+up\b",
    r"\bslowed\b",
    r"\bnightcore\b",
];

pub static VERSION_TAG_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    VERSION_TAGS
        .iter()
        .map(|tag| Regex::new(&format!("(?i){}", tag)).unwrap())
        .collect()
});

/// Bracketed group containing a version tag: "(2011 Remaster)", "[Live at X]"
pub static VERSION_BRACKET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    VERSION_TAGS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?i)[\(\[][^\)\]]*{}[^\)\]]*[\)\]]", tag)).unwrap())
        .collect()
});

pub static KEEP_DISTINCT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    KEEP_DISTINCT_TAGS
        .iter()
        .map(|tag| Regex::new(&format!("(?i){}", tag)).unwrap())
        .collect()
});

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Trim and collapse internal whitespace. Case is preserved.
pub fn norm(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to lowercase ASCII by applying NFKD decomposition and removing combining marks.
/// e.g., "Beyoncé" → "beyonce", "Canción" → "cancion"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    // Transliterate what NFKD leaves behind (Cyrillic, CJK, ...)
    any_ascii(&stripped).to_lowercase()
}

pub fn contains_any(text: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

fn squash(text: &str) -> String {
    MULTI_SPACE.replace_all(text, " ").trim().to_string()
}

// ============================================================================
// IDENTITY KEYS
// ============================================================================

/// Hash input for canonical ids: `lower(norm(artists)) + "|" + lower(norm(title))`.
/// Changing the separator changes every id (see `CANONICAL_ID_LEN`).
pub fn canonical_key(artists_trim: &str, title_trim: &str) -> String {
    format!(
        "{}|{}",
        norm(artists_trim).to_lowercase(),
        norm(title_trim).to_lowercase()
    )
}

/// Case-preserving key shown in reports: "Artist | Title".
pub fn display_key(artists_trim: &str, title_trim: &str) -> String {
    format!("{} | {}", norm(artists_trim), norm(title_trim))
}

// ============================================================================
// COLLAPSE KEYS
// ============================================================================

/// Lowercase ASCII with featured artists and punctuation removed.
pub fn normalize_basic(text: &str) -> String {
    let mut out = fold_to_ascii(text.trim());
    out = FEAT_BRACKET.replace_all(&out, " ").to_string();
    out = FEAT_INLINE.replace_all(&out, " ").to_string();
    out = PUNCT.replace_all(&out, " ").to_string();
    squash(&out)
}

pub fn has_keep_distinct_marker(title: &str) -> bool {
    contains_any(title, &KEEP_DISTINCT_PATTERNS)
}

/// Strip feat. credits and version qualifiers from a title.
/// "Song - 2011 Remaster" → "song", "Song (Live at Wembley)" → "song"
pub fn strip_version_tags(title: &str) -> String {
    let mut out = title.to_string();

    // "Title - Remastered 2009": drop the dashed suffix only when it is a qualifier
    let parts: Vec<&str> = out.split(" - ").map(str::trim).collect();
    if parts.len() > 1 {
        let suffix = parts[1..].join(" ");
        if contains_any(&suffix, &VERSION_TAG_PATTERNS) {
            out = parts[0].to_string();
        }
    }

    out = FEAT_BRACKET.replace_all(&out, " ").to_string();
    for pattern in VERSION_BRACKET_PATTERNS.iter() {
        out = pattern.replace_all(&out, " ").to_string();
    }
    out = FEAT_INLINE.replace_all(&out, " ").to_string();

    let folded = fold_to_ascii(&out);
    squash(&PUNCT.replace_all(&folded, " "))
}

/// `artist_norm || variant_tag || title_norm`.
///
/// Titles with a keep-distinct marker get `variant` and no qualifier
/// stripping; everything else gets `base`.
pub fn collapse_key(title: &str, artists: &str) -> String {
    let mut artists_norm = normalize_basic(artists);
    let (variant_tag, mut title_norm) = if has_keep_distinct_marker(title) {
        ("variant", normalize_basic(title))
    } else {
        ("base", strip_version_tags(title))
    };

    if title_norm.is_empty() {
        title_norm = "unknown_title".to_string();
    }
    if artists_norm.is_empty() {
        artists_norm = "unknown_artist".to_string();
    }

    format!("{}||{}||{}", artists_norm, variant_tag, title_norm)
}

// ============================================================================
// ALBUM KEYS
// ============================================================================

pub fn normalize_album_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    squash(&PUNCT.replace_all(&lower, " "))
}

/// Album grouping key: album id, else normalized album name, else the
/// canonical id itself, so every candidate has one.
pub fn album_key(album_id: &str, album_name: &str, canonical_id: &str) -> String {
    let aid = album_id.trim();
    if !aid.is_empty() {
        return aid.to_string();
    }
    let name = normalize_album_name(album_name);
    if !name.is_empty() {
        return format!("name::{}", name);
    }
    format!("cid::{}", canonical_id.trim())
}

// ============================================================================
// VALUE PARSING
// ============================================================================

/// Parse a stored year. Fails closed: empty, NaN-like, non-numeric and
/// non-finite inputs yield `None`. "1999.0" (float-typed columns) → 1999.
pub fn parse_optional_year(value: &str) -> Option<i32> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(year) = text.parse::<i32>() {
        return Some(year);
    }
    let as_float = text.parse::<f64>().ok()?;
    if !as_float.is_finite() || as_float < i32::MIN as f64 || as_float > i32::MAX as f64 {
        return None;
    }
    Some(as_float.trunc() as i32)
}

/// Parse a confidence score into [0, 1]; unparsable or NaN → 0.0.
pub fn parse_confidence(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Parse a non-negative count; anything else → 0.
pub fn parse_count(value: &str) -> usize {
    let text = value.trim();
    text.parse::<usize>()
        .ok()
        .or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as usize)
        })
        .unwrap_or(0)
}

// ============================================================================
// ARTIST / OWNER LISTS
// ============================================================================

/// Explicit artist list for diversity scoring. Only `|` and `;` count as list
/// separators; "Simon & Garfunkel" stays one artist.
pub fn split_artist_list(value: &str) -> Vec<String> {
    let text = value.trim();
    if text.is_empty() {
        return Vec::new();
    }
    text.replace(" | ", "|")
        .replace(';', "|")
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Looser artist splitting for display (`| ; / \ ,`), order kept, duplicates dropped.
pub fn split_artists_text(value: &str) -> Vec<String> {
    let mut raw = value.trim().to_string();
    for sep in ['|', ';', '/', '\\'] {
        raw = raw.replace(sep, ",");
    }
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',') {
        let v = item.trim();
        if !v.is_empty() && !out.iter().any(|o| o == v) {
            out.push(v.to_string());
        }
    }
    out
}

/// Distinct non-empty owner labels, sorted case-insensitively.
pub fn sorted_owners<'a, I>(owners: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = owners
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    out.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
    out.dedup();
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_collapses_whitespace() {
        assert_eq!(norm("  Daft   Punk \t"), "Daft Punk");
        assert_eq!(norm(""), "");
    }

    #[test]
    fn test_canonical_key_is_case_folded() {
        assert_eq!(canonical_key(" Daft  Punk", "One More Time "), "daft punk|one more time");
        assert_eq!(
            canonical_key("DAFT PUNK", "one more time"),
            canonical_key("Daft Punk", "One More Time")
        );
        // Empty input still produces a key
        assert_eq!(canonical_key("", ""), "|");
    }

    #[test]
    fn test_display_key_keeps_case() {
        assert_eq!(display_key(" Daft  Punk", "One More Time"), "Daft Punk | One More Time");
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Beyoncé"), "beyonce");
        assert_eq!(fold_to_ascii("Motörhead"), "motorhead");
    }

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize_basic("Song (feat. Someone)"), "song");
        assert_eq!(normalize_basic("Drake ft. Rihanna"), "drake");
        assert_eq!(normalize_basic("AC/DC"), "ac dc");
        assert_eq!(normalize_basic("Canción"), "cancion");
    }

    #[test]
    fn test_strip_version_tags() {
        assert_eq!(strip_version_tags("Heroes - 2017 Remaster"), "heroes");
        assert_eq!(strip_version_tags("Heroes (Live at Wembley)"), "heroes");
        assert_eq!(strip_version_tags("Heroes [Radio Edit]"), "heroes");
        assert_eq!(strip_version_tags("Heroes (feat. Someone)"), "heroes");
        // Dashed suffix without a qualifier is part of the title
        assert_eq!(strip_version_tags("Part 1 - The Beginning"), "part 1 the beginning");
    }

    #[test]
    fn test_collapse_key_base_and_variant() {
        assert_eq!(collapse_key("Heroes - 2017 Remaster", "David Bowie"), "david bowie||base||heroes");
        assert_eq!(collapse_key("Heroes", "David Bowie"), "david bowie||base||heroes");
        assert_eq!(
            collapse_key("Heroes (Remix)", "David Bowie"),
            "david bowie||variant||heroes remix"
        );
        assert_eq!(
            collapse_key("Heroes - Sped Up", "David Bowie"),
            "david bowie||variant||heroes sped up"
        );
        assert_eq!(collapse_key("", ""), "unknown_artist||base||unknown_title");
    }

    #[test]
    fn test_album_key_fallbacks() {
        assert_eq!(album_key("abc123", "Whatever", "cid1"), "abc123");
        assert_eq!(album_key("", "  Low (Deluxe)! ", "cid1"), "name::low deluxe");
        assert_eq!(album_key("", "", "cid1"), "cid::cid1");
    }

    #[test]
    fn test_parse_optional_year() {
        assert_eq!(parse_optional_year("1999"), Some(1999));
        assert_eq!(parse_optional_year(" 1999.0 "), Some(1999));
        assert_eq!(parse_optional_year(""), None);
        assert_eq!(parse_optional_year("nan"), None);
        assert_eq!(parse_optional_year("NaN"), None);
        assert_eq!(parse_optional_year("inf"), None);
        assert_eq!(parse_optional_year("1999-05-01"), None);
        assert_eq!(parse_optional_year("unknown"), None);
    }

    #[test]
    fn test_parse_confidence() {
        assert_eq!(parse_confidence("0.85"), 0.85);
        assert_eq!(parse_confidence(""), 0.0);
        assert_eq!(parse_confidence("nan"), 0.0);
        assert_eq!(parse_confidence("1.7"), 1.0);
        assert_eq!(parse_confidence("-2"), 0.0);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3"), 3);
        assert_eq!(parse_count("3.0"), 3);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("-1"), 0);
    }

    #[test]
    fn test_split_artist_list() {
        assert_eq!(split_artist_list("A | B;C"), vec!["A", "B", "C"]);
        assert_eq!(split_artist_list("Simon & Garfunkel"), vec!["Simon & Garfunkel"]);
        assert!(split_artist_list("  ").is_empty());
    }

    #[test]
    fn test_split_artists_text() {
        assert_eq!(split_artists_text("A, B/A; C"), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_sorted_owners() {
        assert_eq!(
            sorted_owners(["guille", "Ana", " ", "ana", "guille"]),
            vec!["Ana", "ana", "guille"]
        );
    }
}
