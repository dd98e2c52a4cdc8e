use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use songdeck::collapse::collapse_versions;
use songdeck::config::{ConfigOverrides, ExpansionConfig};
use songdeck::deck::{fill_deck_qc, select_deck, valid_pool};
use songdeck::display::TitleOverrides;
use songdeck::manual_queue::{build_manual_queue, Rounding};
use songdeck::models::DeckQc;
use songdeck::pool::{build_candidates, dedupe_songs, summarize_instances};
use songdeck::progress::{create_spinner, format_duration, report_artifact, set_log_only, warn};
use songdeck::safety::{remove_previous_output, validate_output_path};
use songdeck::store;
use songdeck::years::{apply_year_lookup, YearOverrides};

/// Exit code when `--fail-on-manual-queue` is set and the queue is not empty.
const MANUAL_QUEUE_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "build-deck")]
#[command(about = "Collapse versions and select a year-balanced deck from canonical songs")]
struct Args {
    /// Canonical database (linked_instances + canonical_songs)
    source: PathBuf,

    /// Output deck database (must contain 'deck' in the name)
    output: PathBuf,

    /// Expansion YAML config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database holding manual_year_overrides / manual_title_overrides
    /// (defaults to the source database)
    #[arg(long)]
    overrides: Option<PathBuf>,

    #[arg(long)]
    expansion: Option<String>,

    /// Target deck size (0 = whole valid pool)
    #[arg(long)]
    limit: Option<usize>,

    /// Max cards per album (0 = unlimited)
    #[arg(long)]
    max_per_album: Option<usize>,

    #[arg(long)]
    year_confidence_min: Option<f64>,

    #[arg(long)]
    manual_year_alpha: Option<f64>,

    #[arg(long, value_enum)]
    manual_year_rounding: Option<Rounding>,

    #[arg(long)]
    manual_year_min_k: Option<usize>,

    /// QC JSON path (default: <output>.qc.json)
    #[arg(long)]
    qc: Option<PathBuf>,

    /// Exit with code 2 when the manual year queue is not empty
    #[arg(long)]
    fail_on_manual_queue: bool,

    #[arg(long, default_value = "0")]
    workers: usize,

    /// Disable progress bars, print tail-friendly log lines
    #[arg(long)]
    log_only: bool,
}

impl Args {
    fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            expansion: self.expansion.clone(),
            limit: self.limit,
            max_per_album: self.max_per_album,
            year_confidence_min: self.year_confidence_min,
            manual_year_alpha: self.manual_year_alpha,
            manual_year_rounding: self.manual_year_rounding,
            manual_year_min_k: self.manual_year_min_k,
        }
    }
}

fn qc_path(output: &Path, explicit: Option<&PathBuf>) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(|| output.with_extension("qc.json"))
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    set_log_only(args.log_only);

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();

    let mut config = ExpansionConfig::load_optional(args.config.as_deref())?;
    config.apply(args.config_overrides());
    let expansion = config.expansion.clone();
    let settings = config.deck.clone();

    let mut sources: Vec<&Path> = vec![args.source.as_path()];
    if let Some(p) = args.overrides.as_deref() {
        sources.push(p);
    }
    validate_output_path(&args.output, "deck", &sources)?;

    // ========================================================================
    // Load inputs
    // ========================================================================
    println!("Opening canonical database: {:?}", args.source);
    let source_conn = store::open_input(&args.source)?;
    let mut songs = store::read_canonical_songs(&source_conn)?;
    let linked = store::read_linked_instances(&source_conn)?;

    let (year_rows, title_rows) = match args.overrides.as_deref() {
        Some(path) => {
            let conn = store::open_input(path)?;
            (store::read_year_overrides(&conn)?, store::read_title_overrides(&conn)?)
        }
        None => (
            store::read_year_overrides(&source_conn)?,
            store::read_title_overrides(&source_conn)?,
        ),
    };
    drop(source_conn);

    let dup_songs = dedupe_songs(&mut songs);
    if dup_songs > 0 {
        warn(&format!(
            "{} canonical_songs row(s) repeat an earlier canonical_id and were dropped",
            dup_songs
        ));
    }

    let before = songs.len();
    songs.retain(|s| s.expansion_code.is_empty() || s.expansion_code == expansion);
    if songs.len() < before {
        println!(
            "Skipped {} canonical songs from other expansions",
            before - songs.len()
        );
    }

    let year_overrides = YearOverrides::from_rows(&year_rows);
    if year_overrides.rejected > 0 {
        warn(&format!(
            "{} manual year override(s) have an unparsable year and were ignored",
            year_overrides.rejected
        ));
    }
    let applied = apply_year_lookup(&mut songs, &year_overrides);
    println!("Applied {} manual year override(s)", applied);

    let title_overrides = TitleOverrides::from_rows(title_rows);

    // ========================================================================
    // Candidates, manual queue, collapse
    // ========================================================================
    let spinner = create_spinner("Building candidate pool");
    let (summaries, owners_universe) = summarize_instances(&linked);
    let candidates = build_candidates(&songs, &summaries, &expansion, &title_overrides);
    spinner.finish_with_message(format!(
        "Built {} candidates ({} owners)",
        candidates.len(),
        owners_universe.len()
    ));

    let (queue, manual_k) =
        build_manual_queue(&candidates, owners_universe.len(), settings.queue_params());

    let (collapsed, collapse_report) = collapse_versions(&candidates);
    println!(
        "Collapsed {} candidates into {} groups",
        candidates.len(),
        collapse_report.len()
    );

    // ========================================================================
    // Deck selection
    // ========================================================================
    let pool = valid_pool(&collapsed, settings.year_confidence_min);
    let spinner = create_spinner("Selecting deck");
    let selection = select_deck(&pool, settings.limit, settings.max_per_album);
    spinner.finish_with_message(format!("Selected {} cards", selection.cards.len()));

    let mut qc = DeckQc {
        expansion: expansion.clone(),
        dup_canonical_songs_dropped: dup_songs,
        candidates_total: candidates.len(),
        pool_total_after_collapse: collapsed.len(),
        collapse_groups: collapse_report.len(),
        owners_universe_count: owners_universe.len(),
        manual_year_k: manual_k,
        manual_year_queue_size: queue.len(),
        year_confidence_min: settings.year_confidence_min,
        ..Default::default()
    };
    fill_deck_qc(&mut qc, &pool, &selection, settings.limit, settings.max_per_album);

    // ========================================================================
    // Write outputs
    // ========================================================================
    remove_previous_output(&args.output)?;
    println!("Creating output database: {:?}", args.output);
    let mut out = store::create_output(&args.output)?;
    store::write_candidates(&mut out, &candidates)?;
    store::write_manual_queue(&mut out, &queue)?;
    store::write_collapse_report(&mut out, &collapse_report)?;
    store::write_deck(&mut out, &selection)?;
    drop(out);

    qc.elapsed_seconds = start.elapsed().as_secs_f64();
    let qc_file = qc_path(&args.output, args.qc.as_ref());
    qc.write_to_file(&qc_file)
        .with_context(|| format!("Failed to write QC file {}", qc_file.display()))?;
    qc.log_phase("deck");

    if !queue.is_empty() {
        warn(&format!(
            "{} song(s) need a manual year (owned by >= {} of {} owners); see manual_year_queue",
            queue.len(),
            manual_k,
            owners_universe.len()
        ));
    }
    if qc.shortfall > 0 {
        warn(&format!(
            "deck has {} of {} cards ({} short)",
            qc.cards, qc.limit, qc.shortfall
        ));
    }
    if qc.album_cap_relaxations > 0 {
        warn(&format!(
            "album cap relaxed {} time(s) to keep every year covered",
            qc.album_cap_relaxations
        ));
    }

    report_artifact("deck", &args.output);
    report_artifact("qc", &qc_file);
    println!("Elapsed: {}", format_duration(start.elapsed()));

    if args.fail_on_manual_queue && !queue.is_empty() {
        return Ok(ExitCode::from(MANUAL_QUEUE_EXIT));
    }
    Ok(ExitCode::SUCCESS)
}
