//! Append-only canonical registry.
//!
//! The merge is a pure function over (existing rows, new ids); the SQLite
//! helpers below only load and persist its result. Rows are never removed and
//! a canonical id appears at most once.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use rustc_hash::FxHashSet;

use crate::models::RegistryEntry;

/// Merge new canonical ids into an existing registry.
///
/// Existing rows keep their order (later duplicates of an id are dropped).
/// New ids are appended in ascending order, skipping empty and known ids.
/// Returns the merged registry and the number of appended rows.
pub fn merge_registry(
    existing: &[RegistryEntry],
    canonical_ids: &[String],
    expansion: &str,
    added_month: &str,
) -> (Vec<RegistryEntry>, usize) {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut merged: Vec<RegistryEntry> = Vec::with_capacity(existing.len() + canonical_ids.len());

    for entry in existing {
        let cid = entry.canonical_id.trim();
        if cid.is_empty() || !seen.insert(cid.to_string()) {
            continue;
        }
        merged.push(RegistryEntry {
            canonical_id: cid.to_string(),
            ..entry.clone()
        });
    }

    let mut new_ids: Vec<&str> = canonical_ids
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    new_ids.sort_unstable();

    let before = merged.len();
    for cid in new_ids {
        if seen.insert(cid.to_string()) {
            merged.push(RegistryEntry {
                canonical_id: cid.to_string(),
                expansion_code: expansion.to_string(),
                added_month: added_month.to_string(),
            });
        }
    }
    let added = merged.len() - before;
    (merged, added)
}

// ============================================================================
// SQLite persistence
// ============================================================================

pub fn ensure_registry_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS registry (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_id TEXT NOT NULL UNIQUE,
            expansion_code TEXT NOT NULL,
            added_month TEXT NOT NULL
        );",
    )
    .context("Failed to create registry table")?;
    Ok(())
}

pub fn load_registry(conn: &Connection) -> Result<Vec<RegistryEntry>> {
    ensure_registry_table(conn)?;
    let mut stmt = conn.prepare(
        "SELECT canonical_id, expansion_code, added_month FROM registry ORDER BY seq",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(RegistryEntry {
            canonical_id: row.get(0)?,
            expansion_code: row.get(1)?,
            added_month: row.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Load, merge and append in one transaction. Returns (appended, total).
pub fn update_registry(
    conn: &mut Connection,
    canonical_ids: &[String],
    expansion: &str,
    added_month: &str,
) -> Result<(usize, usize)> {
    let existing = load_registry(conn)?;
    let (merged, added) = merge_registry(&existing, canonical_ids, expansion, added_month);

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO registry (canonical_id, expansion_code, added_month)
             VALUES (?1, ?2, ?3)",
        )?;
        for entry in &merged[merged.len() - added..] {
            stmt.execute(params![entry.canonical_id, entry.expansion_code, entry.added_month])?;
        }
    }
    tx.commit()?;

    Ok((added, merged.len()))
}
