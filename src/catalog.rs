//! Generated artifacts, tracked purely by filename convention.
//!
//! An artifact is a file named `report_<YYYYMMDD_HHMMSS>_<id>.<ext>` in the report directory.
//! There is no separate index: the directory listing is the catalog.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::PipelineResult;
use crate::output::OutputFormat;

const PREFIX: &str = "report_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// One generated report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
    pub format: OutputFormat,
}

/// Catalog of the artifacts in one report directory.
#[derive(Debug, Clone)]
pub struct ArtifactCatalog {
    dir: PathBuf,
}

impl ArtifactCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh artifact id (random UUID v4, hyphenated lowercase).
    pub fn create_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// `report_<YYYYMMDD_HHMMSS>_<id>.<ext>`
    pub fn artifact_filename(id: &str, format: OutputFormat, created_at: NaiveDateTime) -> String {
        format!(
            "{PREFIX}{}_{id}.{}",
            created_at.format(TIMESTAMP_FORMAT),
            format.extension()
        )
    }

    /// Where the artifact `id` created at `created_at` is written.
    pub fn artifact_path(
        &self,
        id: &str,
        format: OutputFormat,
        created_at: NaiveDateTime,
    ) -> PathBuf {
        self.dir.join(Self::artifact_filename(id, format, created_at))
    }

    /// All artifacts, newest first (ties broken by filename, descending).
    ///
    /// Files that do not follow the naming convention are ignored; a missing directory is an
    /// empty catalog.
    pub fn list(&self) -> PipelineResult<Vec<Artifact>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(parsed) = parse_artifact_filename(name) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            artifacts.push(Artifact {
                id: parsed.id.to_string(),
                filename: name.to_string(),
                path: entry.path().to_path_buf(),
                created_at: parsed.created_at,
                size_bytes,
                format: parsed.format,
            });
        }

        artifacts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(artifacts)
    }

    /// Path of the artifact whose id is exactly `id`.
    pub fn resolve(&self, id: &str) -> Option<PathBuf> {
        if !is_valid_id(id) {
            return None;
        }
        let escaped_dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        let pattern = Path::new(&escaped_dir).join(format!("{PREFIX}*_{id}.*"));

        let mut matches: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .ok()?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parse_artifact_filename)
                    .is_some_and(|parsed| parsed.id == id)
            })
            .collect();
        matches.sort();
        matches.pop()
    }

    /// Delete the artifact `id`. Returns false if it does not exist or cannot be removed.
    pub fn delete(&self, id: &str) -> bool {
        let Some(path) = self.resolve(id) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(id, path = %path.display(), "deleted artifact");
                true
            }
            Err(err) => {
                tracing::warn!(
                    id,
                    path = %path.display(),
                    error = %err,
                    "failed to delete artifact"
                );
                false
            }
        }
    }
}

struct ParsedName<'a> {
    created_at: NaiveDateTime,
    id: &'a str,
    format: OutputFormat,
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn parse_artifact_filename(name: &str) -> Option<ParsedName<'_>> {
    let rest = name.strip_prefix(PREFIX)?;
    let timestamp = rest.get(..TIMESTAMP_LEN)?;
    let rest = rest.get(TIMESTAMP_LEN..)?.strip_prefix('_')?;
    let (id, ext) = rest.rsplit_once('.')?;
    if !is_valid_id(id) {
        return None;
    }
    let format = OutputFormat::from_extension(ext)?;
    let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some(ParsedName {
        created_at,
        id,
        format,
    })
}
