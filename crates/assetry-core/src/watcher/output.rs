//! Deciding what a chunk of build-tool output means.
//!
//! Bundlers don't share a machine-readable "rebuilt" event, so a chunk counts as a
//! rebuild when it names a file that currently sits in the output directory. Anything
//! else is surfaced as a diagnostic.

use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Rebuilt,
    Diagnostic,
    /// Whitespace only; ignored.
    Blank,
}

pub fn classify(chunk: &str, outdir: &Path) -> OutputKind {
    if chunk.trim().is_empty() {
        return OutputKind::Blank;
    }
    if mentions_any(chunk, &output_file_names(outdir)) {
        OutputKind::Rebuilt
    } else {
        OutputKind::Diagnostic
    }
}

pub fn mentions_any(chunk: &str, names: &[String]) -> bool {
    names.iter().any(|name| chunk.contains(name.as_str()))
}

/// Names of the regular files directly inside `outdir`. Missing dir → empty.
pub fn output_file_names(outdir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(outdir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect()
}
