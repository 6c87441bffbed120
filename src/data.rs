//! Project file I/O - reading and writing project documents as JSON files.

use crate::error::{Result, TopologyError};
use crate::models::ProjectDocument;
use std::fs;
use std::path::{Path, PathBuf};

/// Loads a project document from a JSON file.
///
/// # Returns
///
/// * `Ok(ProjectDocument)` - The parsed document; it is not validated against
///   the graph model yet
/// * `Err(TopologyError)` - Error if the file cannot be read or parsed
///
/// # Errors
///
/// Returns `TopologyError::Io` if the file cannot be read.
/// Returns `TopologyError::JsonParse` if the JSON is malformed.
pub fn load_project_file(path: &Path) -> Result<ProjectDocument> {
    let content = fs::read_to_string(path)?;
    let doc: ProjectDocument = serde_json::from_str(&content)?;
    Ok(doc)
}

/// Writes a project document as pretty-printed JSON, creating parent
/// directories as needed.
pub fn save_project_file(path: &Path, doc: &ProjectDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(doc)?)?;
    Ok(())
}

/// File name for a project saved under `name`: `<name>.json`, with path
/// separators and other unsafe characters replaced.
pub fn project_file_name(name: &str) -> Result<String> {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('.').trim();
    if stem.is_empty() {
        return Err(TopologyError::invalid("project name is required"));
    }
    Ok(format!("{stem}.json"))
}

/// Sorted names of the `.json` files directly inside `dir`. A missing
/// directory lists as empty.
pub fn list_json_files(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path: PathBuf = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(name.to_string());
            }
        }
    }
    files.sort();
    Ok(files)
}
