//! Output-path checks run before an existing output file is deleted.
//!
//! Every binary recreates its output database from scratch, so a typo in the
//! output argument must never point it at an operator-curated input.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// File names that hold curated or append-only data and are never outputs.
const PROTECTED_PATTERNS: &[&str] = &["instances", "curation", "registry", "overrides"];

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output filename must contain the required pattern (e.g., "deck", "canonical")
/// - Output cannot be the same as any of the provided source paths
/// - Output filename must not look like a curated input
pub fn validate_output_path(
    output: &Path,
    required_pattern: &str,
    source_paths: &[&Path],
) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if !output_name.contains(required_pattern) {
        bail!(
            "Safety check failed: output file '{}' must contain '{}' in the name",
            output.display(),
            required_pattern
        );
    }

    for source in source_paths {
        if output == *source {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    for pattern in PROTECTED_PATTERNS {
        if output_name.contains(pattern) && !required_pattern.contains(pattern) {
            bail!(
                "Safety check failed: output '{}' matches protected input pattern '{}'",
                output.display(),
                pattern
            );
        }
    }

    Ok(())
}

/// Remove a previous output file after it passed `validate_output_path`.
pub fn remove_previous_output(output: &Path) -> Result<()> {
    if output.exists() {
        std::fs::remove_file(output).context("Failed to remove existing output file")?;
    }
    // WAL side files from an interrupted run
    for suffix in ["-wal", "-shm"] {
        let mut side = output.as_os_str().to_owned();
        side.push(suffix);
        let side = Path::new(&side);
        if side.exists() {
            std::fs::remove_file(side)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_deck_output() {
        let output = PathBuf::from("/tmp/deck_I.sqlite3");
        let source = PathBuf::from("/data/canonical_I.sqlite3");
        assert!(validate_output_path(&output, "deck", &[&source]).is_ok());
    }

    #[test]
    fn test_missing_pattern() {
        let output = PathBuf::from("/tmp/output.sqlite3");
        let source = PathBuf::from("/data/source.sqlite3");
        let result = validate_output_path(&output, "deck", &[&source]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must contain 'deck'"));
    }

    #[test]
    fn test_output_equals_source() {
        let path = PathBuf::from("/data/deck_I.sqlite3");
        let result = validate_output_path(&path, "deck", &[&path]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as source"));
    }

    #[test]
    fn test_protected_pattern_blocked() {
        let output = PathBuf::from("/tmp/canonical_from_instances.sqlite3");
        let source = PathBuf::from("/data/other.sqlite3");
        assert!(validate_output_path(&output, "canonical", &[&source]).is_err());

        let output = PathBuf::from("/tmp/deck_registry.sqlite3");
        assert!(validate_output_path(&output, "deck", &[&source]).is_err());
    }

    #[test]
    fn test_remove_previous_output_missing_file_is_ok() {
        let path = std::env::temp_dir().join("songdeck_missing_deck_output.sqlite3");
        assert!(remove_previous_output(&path).is_ok());
    }
}
