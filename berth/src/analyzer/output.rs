//! Build output detection
//!
//! Framework-agnostic: a directory counts as build output when it holds more
//! than metadata files, and looks complete when it has an entry HTML file,
//! script files, or a `server` subdirectory.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Candidate output directories, in priority order
pub const OUTPUT_DIRS: &[&str] = &["dist", "build", "out", ".next", "lib", "public"];

const METADATA_FILES: &[&str] = &[
    ".gitkeep",
    ".keep",
    ".ds_store",
    "thumbs.db",
    ".npmignore",
    ".gitignore",
    "package.json",
];

const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

const MAX_SCAN_DEPTH: usize = 3;

/// A detected build output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Directory name relative to the project root
    pub dir: String,

    /// Contains an entry file, scripts, or a server build
    pub complete: bool,
}

/// Find the first candidate directory with significant content.
///
/// A complete directory is preferred over an incomplete one earlier in the list.
pub fn detect_build_output(root: &Path) -> Option<BuildOutput> {
    let mut first_incomplete = None;

    for name in OUTPUT_DIRS {
        let dir = root.join(name);
        if !dir.is_dir() || !has_significant_content(&dir) {
            continue;
        }
        if appears_complete(&dir) {
            return Some(BuildOutput {
                dir: name.to_string(),
                complete: true,
            });
        }
        if first_incomplete.is_none() {
            first_incomplete = Some(BuildOutput {
                dir: name.to_string(),
                complete: false,
            });
        }
    }

    first_incomplete
}

/// True when the directory holds at least one non-metadata entry
pub fn has_significant_content(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    entries.flatten().any(|entry| {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        !is_metadata_file(&name)
    })
}

/// True when the directory looks like finished build output
pub fn appears_complete(dir: &Path) -> bool {
    dir.join("index.html").is_file() || dir.join("server").is_dir() || contains_scripts(dir, 0)
}

fn is_metadata_file(name: &str) -> bool {
    METADATA_FILES.contains(&name)
        || name.starts_with("readme")
        || name.starts_with("license")
        || name.ends_with(".map")
}

fn contains_scripts(dir: &Path, depth: usize) -> bool {
    if depth > MAX_SCAN_DEPTH {
        return false;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if entry.file_name() != "node_modules" && contains_scripts(&path, depth + 1) {
                return true;
            }
        } else if file_type.is_file() {
            let is_script = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SCRIPT_EXTENSIONS.contains(&e))
                .unwrap_or(false);
            if is_script {
                return true;
            }
        }
    }

    false
}
