//! SQLite table I/O.
//!
//! Input tables are read as text: missing optional columns are selected as
//! `''` so every field is a string, and a missing required table or column is
//! fatal. Output tables are dropped and recreated on every run.

use anyhow::{bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, CachedStatement, Connection};
use serde::Serialize;
use std::path::Path;

use crate::deck::DeckSelection;
use crate::merge_review::MergeCandidateGroup;
use crate::models::{
    CanonicalSong, Candidate, CollapseGroup, Instance, LinkedInstance, ManualMerge,
    ManualQueueEntry, TitleOverride, YearSource, MANUAL_QUEUE_REASON,
};
use crate::normalize::{parse_confidence, parse_count, parse_optional_year};
use crate::progress::{create_progress_bar, log_progress};
use crate::years::YearOverrideRow;

pub const WRITE_BATCH_SIZE: usize = 10_000;

const LOG_INTERVAL: u64 = 50_000;

// ============================================================================
// Connections
// ============================================================================

pub fn open_input(path: &Path) -> Result<Connection> {
    if !path.exists() {
        bail!("Input database not found: {}", path.display());
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open input database {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

/// Fresh output database. The caller removes any previous file.
pub fn create_output(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to create output database {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(conn)
}

// ============================================================================
// Schema inspection
// ============================================================================

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for name in rows {
        columns.push(name?);
    }
    Ok(columns)
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).trim().to_string(),
    }
}

/// Rows of an input table as strings, in rowid order.
struct TextTable {
    columns: Vec<&'static str>,
    rows: Vec<(i64, Vec<String>)>,
}

impl TextTable {
    fn field<'r>(&self, row: &'r [String], name: &str) -> &'r str {
        self.columns
            .iter()
            .position(|c| *c == name)
            .and_then(|idx| row.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn read_table(
    conn: &Connection,
    table: &str,
    required: &[&'static str],
    optional: &[&'static str],
) -> Result<TextTable> {
    if !table_exists(conn, table)? {
        bail!("Required table '{}' is missing", table);
    }
    let present = table_columns(conn, table)?;
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !present.iter().any(|p| p == c))
        .collect();
    if !missing.is_empty() {
        bail!(
            "Table '{}' is missing required column(s): {}",
            table,
            missing.join(", ")
        );
    }

    let columns: Vec<&'static str> = required.iter().chain(optional.iter()).copied().collect();
    let select: Vec<String> = columns
        .iter()
        .map(|c| {
            if present.iter().any(|p| p == c) {
                format!("\"{}\"", c)
            } else {
                format!("'' AS \"{}\"", c)
            }
        })
        .collect();
    let sql = format!(
        "SELECT rowid, {} FROM \"{}\" ORDER BY rowid",
        select.join(", "),
        table
    );

    let total: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
        row.get(0)
    })?;
    let pb = create_progress_bar(total as u64, &format!("Reading {}", table));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::with_capacity(total as usize);
    while let Some(row) = rows.next()? {
        let rowid: i64 = row.get(0)?;
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(value_to_string(row.get_ref(idx + 1)?));
        }
        out.push((rowid, values));
        pb.inc(1);
        log_progress(table, out.len() as u64, total as u64, LOG_INTERVAL);
    }
    pb.finish_with_message(format!("Read {} rows from {}", out.len(), table));

    Ok(TextTable { columns, rows: out })
}

/// Like `read_table`, but an absent table reads as empty.
fn read_optional_table(
    conn: &Connection,
    table: &str,
    required: &[&'static str],
    optional: &[&'static str],
) -> Result<Option<TextTable>> {
    if table_exists(conn, table)? {
        read_table(conn, table, required, optional).map(Some)
    } else {
        Ok(None)
    }
}

// ============================================================================
// Readers
// ============================================================================

const INSTANCE_REQUIRED: &[&str] = &["owner_label", "title_trim", "artists_trim"];
const INSTANCE_OPTIONAL: &[&str] = &[
    "track_id",
    "album_id",
    "album_name",
    "spotify_url",
    "spotify_uri",
    "processed_month",
    "source_file",
];

fn instance_from_row(table: &TextTable, rowid: i64, row: &[String]) -> Instance {
    Instance {
        owner_label: table.field(row, "owner_label").to_string(),
        title_trim: table.field(row, "title_trim").to_string(),
        artists_trim: table.field(row, "artists_trim").to_string(),
        track_id: table.field(row, "track_id").to_string(),
        album_id: table.field(row, "album_id").to_string(),
        album_name: table.field(row, "album_name").to_string(),
        spotify_url: table.field(row, "spotify_url").to_string(),
        spotify_uri: table.field(row, "spotify_uri").to_string(),
        processed_month: table.field(row, "processed_month").to_string(),
        source_file: table.field(row, "source_file").to_string(),
        row_index: rowid,
    }
}

pub fn read_instances(conn: &Connection) -> Result<Vec<Instance>> {
    let table = read_table(conn, "instances", INSTANCE_REQUIRED, INSTANCE_OPTIONAL)?;
    Ok(table
        .rows
        .iter()
        .map(|(rowid, row)| instance_from_row(&table, *rowid, row))
        .collect())
}

/// Linked instances written by `write_linked_instances`; the stored
/// `row_index` wins over the rowid so the aggregation order survives copies.
pub fn read_linked_instances(conn: &Connection) -> Result<Vec<LinkedInstance>> {
    let mut optional: Vec<&'static str> = INSTANCE_OPTIONAL.to_vec();
    optional.extend(["canonical_key", "row_index"]);
    let mut required: Vec<&'static str> = INSTANCE_REQUIRED.to_vec();
    required.push("canonical_id");

    let table = read_table(conn, "linked_instances", &required, &optional)?;
    Ok(table
        .rows
        .iter()
        .map(|(rowid, row)| {
            let row_index = table.field(row, "row_index").parse::<i64>().unwrap_or(*rowid);
            LinkedInstance {
                instance: instance_from_row(&table, row_index, row),
                canonical_key: table.field(row, "canonical_key").to_string(),
                canonical_id: table.field(row, "canonical_id").to_string(),
            }
        })
        .collect())
}

pub fn read_manual_merges(conn: &Connection) -> Result<Vec<ManualMerge>> {
    let Some(table) = read_optional_table(
        conn,
        "manual_merges",
        &["alias_artists_trim", "alias_title_trim", "canonical_id_target"],
        &["note"],
    )?
    else {
        return Ok(Vec::new());
    };
    Ok(table
        .rows
        .iter()
        .map(|(_, row)| ManualMerge {
            alias_artists_trim: table.field(row, "alias_artists_trim").to_string(),
            alias_title_trim: table.field(row, "alias_title_trim").to_string(),
            canonical_id_target: table.field(row, "canonical_id_target").to_string(),
            note: table.field(row, "note").to_string(),
        })
        .collect())
}

pub fn read_canonical_songs(conn: &Connection) -> Result<Vec<CanonicalSong>> {
    let table = read_table(
        conn,
        "canonical_songs",
        &["canonical_id"],
        &[
            "expansion_code",
            "title_canon",
            "artists_canon",
            "artists_all",
            "artists_count",
            "year",
            "year_confidence",
            "year_source",
            "year_note",
            "album_id",
            "album_name",
        ],
    )?;
    Ok(table
        .rows
        .iter()
        .map(|(_, row)| CanonicalSong {
            expansion_code: table.field(row, "expansion_code").to_string(),
            canonical_id: table.field(row, "canonical_id").to_string(),
            title_canon: table.field(row, "title_canon").to_string(),
            artists_canon: table.field(row, "artists_canon").to_string(),
            artists_all: table.field(row, "artists_all").to_string(),
            artists_count: parse_count(table.field(row, "artists_count")),
            year: parse_optional_year(table.field(row, "year")),
            year_confidence: parse_confidence(table.field(row, "year_confidence")),
            year_source: YearSource::parse(table.field(row, "year_source")),
            year_note: table.field(row, "year_note").to_string(),
            album_id: table.field(row, "album_id").to_string(),
            album_name: table.field(row, "album_name").to_string(),
        })
        .collect())
}

pub fn read_year_overrides(conn: &Connection) -> Result<Vec<YearOverrideRow>> {
    let Some(table) =
        read_optional_table(conn, "manual_year_overrides", &["canonical_id", "year"], &["note"])?
    else {
        return Ok(Vec::new());
    };
    Ok(table
        .rows
        .iter()
        .map(|(_, row)| YearOverrideRow {
            canonical_id: table.field(row, "canonical_id").to_string(),
            year: table.field(row, "year").to_string(),
            note: table.field(row, "note").to_string(),
        })
        .collect())
}

pub fn read_title_overrides(conn: &Connection) -> Result<Vec<TitleOverride>> {
    let Some(table) = read_optional_table(
        conn,
        "manual_title_overrides",
        &["canonical_id"],
        &["title_display", "artists_display"],
    )?
    else {
        return Ok(Vec::new());
    };
    Ok(table
        .rows
        .iter()
        .map(|(_, row)| TitleOverride {
            canonical_id: table.field(row, "canonical_id").to_string(),
            title_display: table.field(row, "title_display").to_string(),
            artists_display: table.field(row, "artists_display").to_string(),
        })
        .collect())
}

// ============================================================================
// Writers
// ============================================================================

/// Drop/create `table`, then insert `rows` in batched transactions.
fn write_table<T, F>(
    conn: &mut Connection,
    table: &str,
    schema: &str,
    insert_sql: &str,
    rows: &[T],
    mut bind: F,
) -> Result<()>
where
    F: FnMut(&mut CachedStatement<'_>, &T) -> rusqlite::Result<usize>,
{
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS \"{table}\";
         CREATE TABLE \"{table}\" ({schema});"
    ))
    .with_context(|| format!("Failed to create table {}", table))?;

    let pb = create_progress_bar(rows.len() as u64, &format!("Writing {}", table));
    let mut written: u64 = 0;

    for chunk in rows.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(insert_sql)?;
            for row in chunk {
                bind(&mut stmt, row)?;
                written += 1;
                pb.inc(1);
                log_progress(table, written, rows.len() as u64, LOG_INTERVAL);
            }
        }
        tx.commit()?;
    }

    pb.finish_with_message(format!("Wrote {} rows to {}", rows.len(), table));
    Ok(())
}

pub fn write_linked_instances(conn: &mut Connection, rows: &[LinkedInstance]) -> Result<()> {
    write_table(
        conn,
        "linked_instances",
        "owner_label TEXT NOT NULL,
         title_trim TEXT NOT NULL,
         artists_trim TEXT NOT NULL,
         track_id TEXT NOT NULL,
         album_id TEXT NOT NULL,
         album_name TEXT NOT NULL,
         spotify_url TEXT NOT NULL,
         spotify_uri TEXT NOT NULL,
         processed_month TEXT NOT NULL,
         source_file TEXT NOT NULL,
         row_index INTEGER NOT NULL,
         canonical_key TEXT NOT NULL,
         canonical_id TEXT NOT NULL",
        "INSERT INTO linked_instances VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rows,
        |stmt, r| {
            let i = &r.instance;
            stmt.execute(params![
                i.owner_label,
                i.title_trim,
                i.artists_trim,
                i.track_id,
                i.album_id,
                i.album_name,
                i.spotify_url,
                i.spotify_uri,
                i.processed_month,
                i.source_file,
                i.row_index,
                r.canonical_key,
                r.canonical_id,
            ])
        },
    )?;
    conn.execute_batch("CREATE INDEX idx_linked_canonical_id ON linked_instances(canonical_id);")?;
    Ok(())
}

pub fn write_canonical_songs(conn: &mut Connection, songs: &[CanonicalSong]) -> Result<()> {
    write_table(
        conn,
        "canonical_songs",
        "expansion_code TEXT NOT NULL,
         canonical_id TEXT PRIMARY KEY,
         title_canon TEXT NOT NULL,
         artists_canon TEXT NOT NULL,
         artists_all TEXT NOT NULL,
         artists_count INTEGER NOT NULL,
         year INTEGER,
         year_confidence REAL NOT NULL,
         year_source TEXT NOT NULL,
         year_note TEXT NOT NULL,
         album_id TEXT NOT NULL,
         album_name TEXT NOT NULL",
        "INSERT INTO canonical_songs VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        songs,
        |stmt, s| {
            stmt.execute(params![
                s.expansion_code,
                s.canonical_id,
                s.title_canon,
                s.artists_canon,
                s.artists_all,
                s.artists_count as i64,
                s.year,
                s.year_confidence,
                s.year_source.as_str(),
                s.year_note,
                s.album_id,
                s.album_name,
            ])
        },
    )
}

pub fn write_candidates(conn: &mut Connection, candidates: &[Candidate]) -> Result<()> {
    write_table(
        conn,
        "candidates",
        "expansion_code TEXT NOT NULL,
         canonical_id TEXT PRIMARY KEY,
         card_id TEXT NOT NULL,
         title_canon TEXT NOT NULL,
         artists_canon TEXT NOT NULL,
         title_display TEXT NOT NULL,
         artists_display TEXT NOT NULL,
         year INTEGER,
         year_confidence REAL NOT NULL,
         year_source TEXT NOT NULL,
         year_note TEXT NOT NULL,
         owners TEXT NOT NULL,
         owners_count INTEGER NOT NULL,
         instance_count INTEGER NOT NULL,
         track_id TEXT NOT NULL,
         spotify_url TEXT NOT NULL,
         spotify_uri TEXT NOT NULL,
         has_spotify_link INTEGER NOT NULL,
         album_id TEXT NOT NULL,
         album_name TEXT NOT NULL,
         album_key TEXT NOT NULL,
         collapse_key TEXT NOT NULL",
        "INSERT INTO candidates VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                                        ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        candidates,
        |stmt, c| {
            stmt.execute(params![
                c.expansion_code,
                c.canonical_id,
                c.card_id,
                c.title_canon,
                c.artists_canon,
                c.title_display,
                c.artists_display,
                c.year,
                c.year_confidence,
                c.year_source.as_str(),
                c.year_note,
                c.owners_display(),
                c.owners_count as i64,
                c.instance_count as i64,
                c.track_id,
                c.spotify_url,
                c.spotify_uri,
                c.has_spotify_link,
                c.album_id,
                c.album_name,
                c.album_key,
                c.collapse_key,
            ])
        },
    )
}

/// Report list columns are stored as JSON arrays.
fn json_list<T: Serialize>(values: &[T]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

pub fn write_collapse_report(conn: &mut Connection, groups: &[CollapseGroup]) -> Result<()> {
    write_table(
        conn,
        "collapse_report",
        "collapse_key TEXT PRIMARY KEY,
         canonical_id_chosen TEXT NOT NULL,
         chosen_reason TEXT NOT NULL,
         candidate_count INTEGER NOT NULL,
         candidate_ids TEXT NOT NULL,
         candidate_titles TEXT NOT NULL,
         candidate_artists TEXT NOT NULL,
         candidate_owners_count TEXT NOT NULL,
         candidate_instances_count TEXT NOT NULL,
         candidate_has_spotify_link TEXT NOT NULL",
        "INSERT INTO collapse_report VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        groups,
        |stmt, g| {
            stmt.execute(params![
                g.collapse_key,
                g.chosen_id,
                g.reason.as_str(),
                g.candidate_ids.len() as i64,
                json_list(&g.candidate_ids),
                json_list(&g.candidate_titles),
                json_list(&g.candidate_artists),
                json_list(&g.candidate_owners_count),
                json_list(&g.candidate_instance_count),
                json_list(&g.candidate_has_link),
            ])
        },
    )
}

pub fn write_manual_queue(conn: &mut Connection, queue: &[ManualQueueEntry]) -> Result<()> {
    write_table(
        conn,
        "manual_year_queue",
        "canonical_id TEXT PRIMARY KEY,
         title_canon TEXT NOT NULL,
         artists_canon TEXT NOT NULL,
         owners TEXT NOT NULL,
         owners_count INTEGER NOT NULL,
         instance_count INTEGER NOT NULL,
         year INTEGER,
         year_confidence REAL NOT NULL,
         year_source TEXT NOT NULL,
         year_note TEXT NOT NULL,
         manual_k INTEGER NOT NULL,
         owners_universe_count INTEGER NOT NULL,
         year_confidence_min REAL NOT NULL,
         queue_reason TEXT NOT NULL",
        "INSERT INTO manual_year_queue VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        queue,
        |stmt, e| {
            stmt.execute(params![
                e.canonical_id,
                e.title_canon,
                e.artists_canon,
                e.owners,
                e.owners_count as i64,
                e.instance_count as i64,
                e.year,
                e.year_confidence,
                e.year_source.as_str(),
                e.year_note,
                e.manual_k as i64,
                e.owners_universe_count as i64,
                e.year_confidence_min,
                MANUAL_QUEUE_REASON,
            ])
        },
    )
}

pub fn write_deck(conn: &mut Connection, selection: &DeckSelection) -> Result<()> {
    write_table(
        conn,
        "deck",
        "selection_order INTEGER PRIMARY KEY,
         selection_phase TEXT NOT NULL,
         card_id TEXT NOT NULL,
         canonical_id TEXT NOT NULL UNIQUE,
         expansion_code TEXT NOT NULL,
         title_display TEXT NOT NULL,
         artists_display TEXT NOT NULL,
         year INTEGER NOT NULL,
         year_confidence REAL NOT NULL,
         year_source TEXT NOT NULL,
         owners TEXT NOT NULL,
         owners_count INTEGER NOT NULL,
         instance_count INTEGER NOT NULL,
         spotify_url TEXT NOT NULL,
         spotify_uri TEXT NOT NULL,
         album_key TEXT NOT NULL,
         artist_rarity INTEGER,
         album_cap_relaxed INTEGER NOT NULL",
        "INSERT INTO deck VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        &selection.cards,
        |stmt, card| {
            let c = &card.candidate;
            stmt.execute(params![
                card.order as i64,
                card.phase.as_str(),
                c.card_id,
                c.canonical_id,
                c.expansion_code,
                c.title_display,
                c.artists_display,
                card.year(),
                c.year_confidence,
                c.year_source.as_str(),
                c.owners_display(),
                c.owners_count as i64,
                c.instance_count as i64,
                c.spotify_url,
                c.spotify_uri,
                c.album_key,
                card.artist_rarity.map(|r| r as i64),
                card.relaxed,
            ])
        },
    )
}

pub fn write_merge_candidates(conn: &mut Connection, groups: &[MergeCandidateGroup]) -> Result<()> {
    write_table(
        conn,
        "merge_candidates",
        "base_title TEXT NOT NULL,
         base_artist TEXT NOT NULL,
         n_rows INTEGER NOT NULL,
         n_canonical INTEGER NOT NULL,
         canonical_ids TEXT NOT NULL,
         examples TEXT NOT NULL,
         artists TEXT NOT NULL,
         flag_remix INTEGER NOT NULL,
         flag_live INTEGER NOT NULL,
         flag_acoustic INTEGER NOT NULL,
         flag_feat INTEGER NOT NULL,
         PRIMARY KEY (base_title, base_artist)",
        "INSERT INTO merge_candidates VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        groups,
        |stmt, g| {
            stmt.execute(params![
                g.base_title,
                g.base_artist,
                g.n_rows as i64,
                g.n_canonical as i64,
                g.canonical_ids,
                g.examples,
                g.artists,
                g.flag_remix,
                g.flag_live,
                g.flag_acoustic,
                g.flag_feat,
            ])
        },
    )
}
