//! Loading and saving [`RuleSet`]s as JSON or TOML documents.

use std::fs;
use std::io;
use std::path::Path;

use crate::atomic::write_bytes_atomic;
use crate::error::{PipelineError, PipelineResult, SourceKind};

use super::RuleSet;

/// On-disk encodings of a RuleSet, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesFormat {
    /// `.json`: a JSON object `output_field → expression`.
    Json,
    /// `.toml`: a TOML table `output_field = "expression"`.
    Toml,
}

impl RulesFormat {
    /// Pick the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            _ => Err(PipelineError::config(format!(
                "unsupported rules file extension for {} (expected .json or .toml)",
                path.display()
            ))),
        }
    }
}

/// Load a RuleSet from `path`. Entry order in the file is preserved.
pub fn load(path: impl AsRef<Path>) -> PipelineResult<RuleSet> {
    let path = path.as_ref();
    let format = RulesFormat::from_path(path)?;
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::NotFound {
            kind: SourceKind::Rules,
            path: path.to_path_buf(),
        },
        _ => PipelineError::Io(e),
    })?;

    let rules = match format {
        RulesFormat::Json => RuleSet::from_json_str(&text)?,
        RulesFormat::Toml => toml::from_str(&text)?,
    };
    tracing::debug!(path = %path.display(), rules = rules.len(), "loaded rules");
    Ok(rules)
}

/// Save `rules` to `path`, replacing any existing file.
pub fn save(rules: &RuleSet, path: impl AsRef<Path>) -> PipelineResult<()> {
    let path = path.as_ref();
    let text = match RulesFormat::from_path(path)? {
        RulesFormat::Json => rules.to_json_string()?,
        RulesFormat::Toml => toml::to_string(rules)?,
    };
    write_bytes_atomic(path, text.as_bytes())?;
    tracing::debug!(path = %path.display(), rules = rules.len(), "saved rules");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load, save};
    use crate::error::PipelineError;
    use crate::rules::RuleSet;

    fn sample() -> RuleSet {
        RuleSet::from_iter([
            ("total", "quantity * unit_price"),
            ("margin", "total - quantity * cost_price"),
            ("profit ratio", "margin / total"),
        ])
    }

    #[test]
    fn json_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let rules = sample();

        save(&rules, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, rules);

        save(&loaded, &path).unwrap();
        assert_eq!(load(&path).unwrap(), rules);
    }

    #[test]
    fn toml_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        let rules = sample();

        save(&rules, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, rules);
        let fields: Vec<&str> = loaded.output_fields().collect();
        assert_eq!(fields, vec!["total", "margin", "profit ratio"]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[test]
    fn unknown_extension_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = save(&sample(), dir.path().join("rules.yaml")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }
}
