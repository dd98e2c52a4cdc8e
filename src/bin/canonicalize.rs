//! Resolve library instances to canonical songs and update the registry.
//!
//! Reads `instances` (+ optional `manual_merges`) from the source database and
//! writes `linked_instances` and `canonical_songs` to a fresh output database.
//! New canonical ids are appended to the registry database, which is never
//! recreated.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use songdeck::config::ExpansionConfig;
use songdeck::identity::{build_canonical_songs, link_instances, owners_in_order, IdentityResolver, ManualMerges};
use songdeck::models::{CanonicalizeQc, Instance};
use songdeck::progress::{create_spinner, format_duration, report_artifact, set_log_only};
use songdeck::registry::update_registry;
use songdeck::safety::{remove_previous_output, validate_output_path};
use songdeck::store;

#[derive(Parser)]
#[command(name = "canonicalize")]
#[command(about = "Link library instances to stable canonical ids and append them to the registry")]
struct Args {
    /// Curation database with `instances` and optional `manual_merges`
    source: PathBuf,

    /// Output database (must contain 'canonical' in the name)
    output: PathBuf,

    /// Append-only registry database
    #[arg(long, default_value = "registry.sqlite3")]
    registry: PathBuf,

    /// Expansion YAML config (only `expansion` is used here)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    expansion: Option<String>,

    /// Month recorded for new registry rows (YYYY-MM)
    #[arg(long)]
    processed_month: Option<String>,

    /// QC JSON path (default: <output>.qc.json)
    #[arg(long)]
    qc: Option<PathBuf>,

    #[arg(long, default_value = "0")]
    workers: usize,

    /// Disable progress bars, print tail-friendly log lines
    #[arg(long)]
    log_only: bool,
}

fn current_month() -> String {
    let now = time::OffsetDateTime::now_utc();
    format!("{:04}-{:02}", now.year(), u8::from(now.month()))
}

/// Explicit month, else the latest month seen in the instances, else now.
fn resolve_month(explicit: Option<&str>, instances: &[Instance]) -> String {
    if let Some(month) = explicit.map(str::trim).filter(|m| !m.is_empty()) {
        return month.to_string();
    }
    instances
        .iter()
        .map(|i| i.processed_month.trim())
        .filter(|m| !m.is_empty())
        .max()
        .map(str::to_string)
        .unwrap_or_else(current_month)
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();

    let config = ExpansionConfig::load_optional(args.config.as_deref())?;
    let expansion = args.expansion.clone().unwrap_or(config.expansion);

    validate_output_path(
        &args.output,
        "canonical",
        &[args.source.as_path(), args.registry.as_path()],
    )?;

    println!("Opening source database: {:?}", args.source);
    let source_conn = store::open_input(&args.source)?;
    let instances = store::read_instances(&source_conn)?;
    let merges = ManualMerges::from_rows(&store::read_manual_merges(&source_conn)?);
    drop(source_conn);

    let month = resolve_month(args.processed_month.as_deref(), &instances);
    let n_instances = instances.len();

    let spinner = create_spinner("Resolving canonical ids");
    let resolver = IdentityResolver::new(merges);
    let (linked, merge_hits) = link_instances(instances, &resolver);
    let songs = build_canonical_songs(&linked, &expansion);
    spinner.finish_with_message(format!(
        "Resolved {} instances into {} canonical songs ({} manual merge hits)",
        n_instances,
        songs.len(),
        merge_hits
    ));

    remove_previous_output(&args.output)?;
    println!("Creating output database: {:?}", args.output);
    let mut out = store::create_output(&args.output)?;
    store::write_linked_instances(&mut out, &linked)?;
    store::write_canonical_songs(&mut out, &songs)?;
    drop(out);

    let mut registry_conn = rusqlite::Connection::open(&args.registry)
        .with_context(|| format!("Failed to open registry {}", args.registry.display()))?;
    let ids: Vec<String> = songs.iter().map(|s| s.canonical_id.clone()).collect();
    let (added, total) = update_registry(&mut registry_conn, &ids, &expansion, &month)?;

    let qc = CanonicalizeQc {
        expansion: expansion.clone(),
        owners: owners_in_order(&linked),
        n_instances,
        n_canonical: songs.len(),
        n_manual_merges: resolver.merges().len(),
        n_merge_hits: merge_hits,
        processed_month: month,
        registry_added: added,
        registry_total: total,
    };
    let qc_file = args
        .qc
        .clone()
        .unwrap_or_else(|| args.output.with_extension("qc.json"));
    qc.write_to_file(&qc_file)
        .with_context(|| format!("Failed to write QC file {}", qc_file.display()))?;
    qc.log_phase("canonicalize");

    report_artifact("canonical", &args.output);
    report_artifact("registry", &args.registry);
    report_artifact("qc", &qc_file);
    println!("Elapsed: {}", format_duration(start.elapsed()));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(month: &str) -> Instance {
        Instance {
            processed_month: month.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_month_precedence() {
        let rows = vec![inst("2024-03"), inst(""), inst("2024-11")];
        assert_eq!(resolve_month(Some("2023-01"), &rows), "2023-01");
        assert_eq!(resolve_month(None, &rows), "2024-11");
        assert_eq!(resolve_month(Some("  "), &rows), "2024-11");
    }

    #[test]
    fn test_resolve_month_falls_back_to_now() {
        let month = resolve_month(None, &[inst("")]);
        assert_eq!(month.len(), 7);
        assert_eq!(&month[4..5], "-");
    }
}
