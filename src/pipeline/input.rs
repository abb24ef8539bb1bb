//! Input discovery and validation.
//!
//! Directories are walked recursively for `.pdf` files (any case); explicit
//! files pass through unchanged so a mistyped path still reaches validation
//! and is reported as a failed document. Every file is checked for
//! existence, read permission and the `%PDF` magic before pdfium sees it.

use crate::error::MinerError;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Expand `inputs` into a sorted, de-duplicated list of candidate files.
pub fn discover_pdfs<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut found = BTreeSet::new();
    for input in inputs {
        let path = input.as_ref();
        if path.is_dir() {
            walk(path, &mut found);
        } else {
            found.insert(path.to_path_buf());
        }
    }
    debug!("Discovered {} input files", found.len());
    found.into_iter().collect()
}

fn walk(dir: &Path, found: &mut BTreeSet<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Cannot read directory {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, found);
        } else if is_pdf_name(&path) {
            found.insert(path);
        }
    }
}

/// Case-insensitive `.pdf` extension check.
pub fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Check that `path` exists, is readable and starts with `%PDF`.
pub fn validate_local(path: &Path) -> Result<(), MinerError> {
    if !path.is_file() {
        return Err(MinerError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(MinerError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(MinerError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).unwrap_or(0);
    if read < 4 || &magic != b"%PDF" {
        return Err(MinerError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}
