//! Report likely identity mis-splits for operators writing manual merges.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use songdeck::merge_review::merge_candidates;
use songdeck::progress::{report_artifact, set_log_only};
use songdeck::safety::{remove_previous_output, validate_output_path};
use songdeck::store;

#[derive(Parser)]
#[command(name = "merge-candidates")]
#[command(about = "Group linked instances by loose title/artist and list groups split across canonical ids")]
struct Args {
    /// Canonical database with `linked_instances`
    source: PathBuf,

    /// Output report database (must contain 'merge' in the name)
    output: PathBuf,

    /// Print the top N groups
    #[arg(long, default_value = "20")]
    show: usize,

    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    validate_output_path(&args.output, "merge", &[args.source.as_path()])?;

    let conn = store::open_input(&args.source)?;
    let linked = store::read_linked_instances(&conn)?;
    drop(conn);

    let groups = merge_candidates(&linked);

    remove_previous_output(&args.output)?;
    let mut out = store::create_output(&args.output)
        .with_context(|| format!("Failed to create report {}", args.output.display()))?;
    store::write_merge_candidates(&mut out, &groups)?;

    println!("\n{:=<60}", "");
    println!("{} merge candidate group(s)", groups.len());
    for g in groups.iter().take(args.show) {
        println!(
            "  [{} ids / {} rows] {} - {} :: {}",
            g.n_canonical, g.n_rows, g.base_artist, g.base_title, g.examples
        );
    }
    println!("{:=<60}", "");

    report_artifact("merge_candidates", &args.output);
    Ok(())
}
