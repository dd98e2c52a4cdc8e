//! Display strings printed on cards.
//!
//! Titles from streaming exports are often SHOUTED, all lowercase, or carry a
//! " - Remastered" tail. Cleaning only touches the display copy; the canonical
//! title stays untouched for hashing and collapsing.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::models::TitleOverride;
use crate::normalize::{split_artists_text, MULTI_SPACE};

static WORD_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-zÀ-ÖØ-öø-ÿ0-9]+(?:'[A-Za-zÀ-ÖØ-öø-ÿ0-9]+)?").unwrap()
});

static DASH_WITH_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+[–—-]\s+").unwrap());

static CAMEL_BUMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][A-Z]").unwrap());

/// Short words kept lowercase unless they open the title (English + Spanish/Portuguese/Italian).
const TITLE_STOPWORDS: &[&str] = &[
    "a", "al", "an", "and", "as", "at", "by", "con", "da", "das", "de", "del", "di", "do", "dos",
    "e", "el", "en", "for", "in", "la", "las", "los", "of", "on", "or", "para", "por", "the", "to",
    "u", "un", "una", "unos", "unas", "y",
];

const ACRONYM_KEEP: &[&str] = &["DJ", "EP", "LP", "OST", "TV", "UK", "USA"];

const ROMAN_NUMERALS_KEEP: &[&str] = &[
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII", "XIII", "XIV", "XV",
    "XVI", "XVII", "XVIII", "XIX", "XX",
];

/// Max artist names printed before "+N".
const MAX_ARTISTS_SHOWN: usize = 3;

fn is_stopword(word: &str) -> bool {
    TITLE_STOPWORDS.contains(&word)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn normalize_quotes_and_spaces(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{00B4}' | '\u{0060}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{00A0}' | '\u{2007}' | '\u{202F}' | '\u{2009}' | '\u{200A}' | '\u{200B}' => ' ',
            other => other,
        })
        .collect();
    MULTI_SPACE.replace_all(&replaced, " ").trim().to_string()
}

/// More than 65% of letters share a case, or the text has a camelCase bump.
pub fn mostly_upper_or_lower(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count() as f64;
    let lower = letters.iter().filter(|c| c.is_lowercase()).count() as f64;
    let total = letters.len() as f64;
    if upper / total >= 0.65 || lower / total >= 0.65 {
        return true;
    }
    CAMEL_BUMP.is_match(text)
}

/// Known numerals/acronyms always qualify. Short all-caps runs only count when
/// `caps_runs` is set: in a shouted title every word is an all-caps run.
fn is_roman_or_acronym(token: &str, caps_runs: bool) -> bool {
    let core = token.trim();
    if core.is_empty() {
        return false;
    }
    let upper = core.to_uppercase();
    if ROMAN_NUMERALS_KEEP.contains(&upper.as_str()) || ACRONYM_KEEP.contains(&upper.as_str()) {
        return true;
    }
    let len = core.chars().count();
    caps_runs
        && core.chars().all(|c| c.is_alphabetic() && c.is_uppercase())
        && (2..=5).contains(&len)
}

fn title_case_token(token: &str, is_first_word: bool) -> String {
    if token.is_empty() || token.chars().all(|c| c.is_ascii_digit()) {
        return token.to_string();
    }
    if is_roman_or_acronym(token, false) {
        return token.to_uppercase();
    }
    let low = token.to_lowercase();
    if !is_first_word && is_stopword(&low) {
        return low;
    }

    if low.contains('\'') {
        let parts: Vec<&str> = low.split('\'').collect();
        // Contractions: "don't", "rock'n" keep the tail lowercase
        if parts.len() == 2 && parts[1].chars().count() <= 2 {
            return format!("{}'{}", capitalize(parts[0]), parts[1]);
        }
        return parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if part.is_empty() || (i > 0 && is_stopword(part)) {
                    part.to_string()
                } else {
                    capitalize(part)
                }
            })
            .collect::<Vec<_>>()
            .join("'");
    }

    capitalize(&low)
}

fn apply_word_transform<F>(text: &str, transform: F) -> String
where
    F: Fn(&str, bool) -> String,
{
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (idx, m) in WORD_TOKEN.find_iter(text).enumerate() {
        out.push_str(&text[cursor..m.start()]);
        out.push_str(&transform(m.as_str(), idx == 0));
        cursor = m.end();
    }
    out.push_str(&text[cursor..]);
    out
}

pub fn smart_title_case(text: &str) -> String {
    apply_word_transform(text, title_case_token)
}

fn lower_stopwords_only(text: &str) -> String {
    apply_word_transform(text, |token, is_first_word| {
        if is_roman_or_acronym(token, true) {
            token.to_uppercase()
        } else if !is_first_word && is_stopword(&token.to_lowercase()) {
            token.to_lowercase()
        } else {
            token.to_string()
        }
    })
}

/// "ONE MORE TIME - Radio Edit" → "One More Time"
pub fn clean_title_display(title: &str) -> String {
    let mut text = normalize_quotes_and_spaces(title);
    text = DASH_WITH_SPACES.replace_all(&text, " - ").to_string();
    if let Some((head, _)) = text.split_once(" - ") {
        text = head.trim().to_string();
    }
    text = if mostly_upper_or_lower(&text) {
        smart_title_case(&text)
    } else {
        lower_stopwords_only(&text)
    };
    MULTI_SPACE.replace_all(&text, " ").trim().to_string()
}

/// Up to three names, then "+N" for the rest of `artists_count`.
pub fn build_artists_display(artists: &[String], artists_count: usize) -> String {
    let names: Vec<&str> = artists
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    if names.is_empty() {
        return String::new();
    }
    let count = if artists_count > 0 { artists_count } else { names.len() };
    if count <= MAX_ARTISTS_SHOWN || names.len() <= MAX_ARTISTS_SHOWN {
        let shown = names.len().min(count).max(1);
        return names[..shown].join(", ");
    }
    let shown = names[..MAX_ARTISTS_SHOWN].join(", ");
    format!("{} +{}", shown, count - MAX_ARTISTS_SHOWN)
}

/// Artist line for a card: full credit list when known, else the canonical string.
pub fn artists_display(artists_all: &str, artists_canon: &str, artists_count: usize) -> String {
    let mut artists = split_artists_text(artists_all);
    if artists.is_empty() {
        artists = split_artists_text(artists_canon);
    }
    let display = build_artists_display(&artists, artists_count);
    if display.is_empty() {
        artists_canon.trim().to_string()
    } else {
        display
    }
}

/// "I-3f2a9c1d" style printed card identifier.
pub fn card_id(expansion: &str, canonical_id: &str) -> String {
    let short: String = canonical_id.chars().take(8).collect();
    format!("{}-{}", expansion, short)
}

/// Operator display overrides by canonical id; empty fields do not override.
#[derive(Debug, Default)]
pub struct TitleOverrides {
    by_id: FxHashMap<String, TitleOverride>,
}

impl TitleOverrides {
    pub fn from_rows(rows: Vec<TitleOverride>) -> Self {
        let by_id = rows
            .into_iter()
            .filter(|r| !r.canonical_id.trim().is_empty())
            .map(|r| (r.canonical_id.trim().to_string(), r))
            .collect();
        Self { by_id }
    }

    pub fn apply(&self, canonical_id: &str, title: &mut String, artists: &mut String) {
        if let Some(ov) = self.by_id.get(canonical_id) {
            if !ov.title_display.trim().is_empty() {
                *title = ov.title_display.trim().to_string();
            }
            if !ov.artists_display.trim().is_empty() {
                *artists = ov.artists_display.trim().to_string();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title_shouting() {
        assert_eq!(clean_title_display("ONE MORE TIME - Radio Edit"), "One More Time");
        assert_eq!(clean_title_display("the sound of silence"), "The Sound of Silence");
    }

    #[test]
    fn test_clean_title_mixed_case_only_lowers_stopwords() {
        assert_eq!(clean_title_display("Dancing In The Dark"), "Dancing in the Dark");
        assert_eq!(clean_title_display("Rocky III Theme"), "Rocky III Theme");
    }

    #[test]
    fn test_clean_title_quotes_and_dashes() {
        assert_eq!(clean_title_display("Don\u{2019}t Stop \u{2014} Live"), "Don't Stop");
    }

    #[test]
    fn test_mixed_case_keeps_short_caps_runs() {
        assert_eq!(clean_title_display("MTV Unplugged In NY"), "MTV Unplugged in NY");
    }

    #[test]
    fn test_title_case_keeps_acronyms_and_contractions() {
        assert_eq!(smart_title_case("dj got us fallin' in love"), "DJ Got Us Fallin' in Love");
        assert_eq!(smart_title_case("don't"), "Don't");
    }

    #[test]
    fn test_build_artists_display() {
        let names: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();
        assert_eq!(build_artists_display(&names[..2], 0), "A, B");
        assert_eq!(build_artists_display(&names, 0), "A, B, C +2");
        assert_eq!(build_artists_display(&names[..3], 6), "A, B, C");
        assert_eq!(build_artists_display(&[], 4), "");
    }

    #[test]
    fn test_artists_display_fallbacks() {
        assert_eq!(artists_display("A;B", "A", 0), "A, B");
        assert_eq!(artists_display("", "Simon & Garfunkel", 0), "Simon & Garfunkel");
    }

    #[test]
    fn test_card_id() {
        assert_eq!(card_id("I", "3f2a9c1d00aa11bb"), "I-3f2a9c1d");
        assert_eq!(card_id("II", "abc"), "II-abc");
    }

    #[test]
    fn test_title_overrides() {
        let overrides = TitleOverrides::from_rows(vec![TitleOverride {
            canonical_id: "x".to_string(),
            title_display: "Fixed".to_string(),
            artists_display: " ".to_string(),
        }]);
        let mut title = "orig".to_string();
        let mut artists = "Band".to_string();
        overrides.apply("x", &mut title, &mut artists);
        assert_eq!(title, "Fixed");
        assert_eq!(artists, "Band");
    }
}
