//! Plugin descriptor files and directory discovery
//!
//! Each plugin lives in its own directory containing a descriptor, either
//! JSON (`plugin.json`) or YAML (`plugin.yaml` / `plugin.yml`):
//!
//! ```yaml
//! name: sqlite-tools
//! version: 1.2.0
//! description: Query helpers for SQLite databases
//! capabilities:
//!   - tools
//!   - resources
//! ```
//!
//! Discovery never aborts: a missing, unreadable or invalid descriptor is
//! recorded as a soft error and the scan moves on.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::PluginError;
use super::metadata::PluginMetadata;

/// Default descriptor file names, in lookup order
pub const DEFAULT_DESCRIPTOR_FILES: &[&str] = &["plugin.json", "plugin.yaml", "plugin.yml"];

/// A plugin found on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPlugin {
    /// Parsed and validated metadata
    pub metadata: PluginMetadata,

    /// Plugin directory
    pub directory: PathBuf,

    /// Descriptor file the metadata was read from
    pub descriptor: PathBuf,
}

/// A soft discovery failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryError {
    pub path: PathBuf,
    pub message: String,
}

impl From<PluginError> for DiscoveryError {
    fn from(error: PluginError) -> Self {
        match error {
            PluginError::Descriptor { path, message } => Self { path, message },
            other => Self {
                path: PathBuf::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Outcome of scanning search paths
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub found: Vec<DiscoveredPlugin>,
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    /// Whether nothing was found and nothing failed
    pub fn is_empty(&self) -> bool {
        self.found.is_empty() && self.errors.is_empty()
    }
}

/// Parse descriptor text. YAML is a superset of JSON, but JSON files are
/// parsed with serde_json for precise error messages.
pub fn parse_descriptor(path: &Path, content: &str) -> Result<PluginMetadata, PluginError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        serde_json::from_str::<PluginMetadata>(content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<PluginMetadata>(content).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| PluginError::Descriptor {
        path: path.to_path_buf(),
        message,
    })
}

/// Read and parse a descriptor file
pub fn read_descriptor(path: &Path) -> Result<PluginMetadata, PluginError> {
    let content = std::fs::read_to_string(path).map_err(|e| PluginError::Descriptor {
        path: path.to_path_buf(),
        message: format!("Failed to read descriptor: {}", e),
    })?;
    parse_descriptor(path, &content)
}

/// Scan each path's immediate subdirectories for plugin descriptors.
///
/// Results are sorted by directory name within each search path.
pub fn discover<P: AsRef<Path>>(paths: &[P], descriptor_files: &[String]) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for root in paths {
        let root = root.as_ref();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                report.errors.push(DiscoveryError {
                    path: root.to_path_buf(),
                    message: format!("Cannot read search path: {}", e),
                });
                continue;
            }
        };

        let mut directories: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        directories.sort();

        for directory in directories {
            match scan_directory(&directory, descriptor_files) {
                Ok(found) => report.found.push(found),
                Err(error) => report.errors.push(error),
            }
        }
    }

    for error in &report.errors {
        tracing::warn!(path = %error.path.display(), error = %error.message, "Plugin discovery error");
    }
    tracing::debug!(
        found = report.found.len(),
        errors = report.errors.len(),
        "Plugin discovery complete"
    );

    report
}

fn scan_directory(
    directory: &Path,
    descriptor_files: &[String],
) -> Result<DiscoveredPlugin, DiscoveryError> {
    let descriptor = descriptor_files
        .iter()
        .map(|file| directory.join(file))
        .find(|path| path.is_file())
        .ok_or_else(|| DiscoveryError {
            path: directory.to_path_buf(),
            message: "missing descriptor".to_string(),
        })?;

    let metadata = read_descriptor(&descriptor)?;
    metadata.validate().map_err(|e| DiscoveryError {
        path: descriptor.clone(),
        message: e.to_string(),
    })?;

    Ok(DiscoveredPlugin {
        metadata,
        directory: directory.to_path_buf(),
        descriptor,
    })
}
