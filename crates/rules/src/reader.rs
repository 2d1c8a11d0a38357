use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::RulesError;
use crate::model::RuleFile;
use crate::parser::parse_rules;

const EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Read and parse a single rule file.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_file(path: &Path) -> Result<RuleFile, RulesError> {
    let content = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_rules(path, &content)
}

/// Expand `paths` into the list of rule files to lint.
///
/// Files are taken as given. Directories are searched recursively for
/// files with a `.yml` or `.yaml` extension. The result is sorted and
/// free of duplicates.
pub fn find_rule_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, RulesError> {
    let mut found = Vec::new();
    for path in paths {
        let meta = std::fs::metadata(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if meta.is_dir() {
            walk_dir(path, &mut found)?;
        } else {
            found.push(path.clone());
        }
    }
    found.sort();
    found.dedup();
    debug!(files = found.len(), "found rule files");
    Ok(found)
}

fn walk_dir(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), RulesError> {
    let io_error = |source| RulesError::Io {
        path: dir.display().to_string(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            walk_dir(&path, found)?;
        } else if has_rule_extension(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn has_rule_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext))
}
