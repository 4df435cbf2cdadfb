//! changekit configuration (`changekit.toml`).
//!
//! Defines where the snapshot store lives, how the diff tool is invoked,
//! which classifier computes changesets, and how merges treat conflicts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::changeset::Classifier;
use crate::diff::{DEFAULT_PROGRAM, DiffComputer};
use crate::merge::MergeStrategy;
use crate::process::RunOptions;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "changekit.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangekitConfig {
    /// Snapshot store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Diff tool settings.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Changeset computation settings.
    #[serde(default)]
    pub changeset: ChangesetConfig,

    /// Merge settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Where snapshots are kept.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store root directory (default: `.changekit/store`). Relative paths
    /// resolve against the working directory.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from(".changekit/store")
}

// ---------------------------------------------------------------------------
// DiffConfig
// ---------------------------------------------------------------------------

/// How the external diff tool runs.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffConfig {
    /// Git-compatible program (default: `"git"`).
    #[serde(default = "default_program")]
    pub program: String,

    /// Per-invocation deadline in seconds (default: 300). `0` disables it.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_owned()
}

const fn default_timeout() -> u64 {
    300
}

impl DiffConfig {
    /// Run options derived from the configured deadline.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        if self.timeout_seconds == 0 {
            RunOptions::default()
        } else {
            RunOptions::with_timeout(Duration::from_secs(self.timeout_seconds))
        }
    }

    /// A [`DiffComputer`] for this configuration.
    #[must_use]
    pub fn computer(&self) -> DiffComputer {
        DiffComputer::new(&self.program, self.run_options())
    }
}

// ---------------------------------------------------------------------------
// ChangesetConfig / MergeConfig
// ---------------------------------------------------------------------------

/// Changeset computation settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangesetConfig {
    /// `"listing"` (default) or `"diff-tool"`.
    #[serde(default)]
    pub classifier: Classifier,
}

/// Merge settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// `"fail"` (default) or any other [`MergeStrategy`] name, such as
    /// `"last-wins"` or `"leave-conflicts"`.
    #[serde(default)]
    pub on_conflict: MergeStrategy,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// File being loaded; `None` for [`ChangekitConfig::parse`].
    pub path: Option<PathBuf>,
    /// Parser message, prefixed with `line N:` when the span is known.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "invalid changekit config: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl ChangekitConfig {
    /// Read `path`. An absent file means every section takes its defaults.
    ///
    /// # Errors
    /// [`ConfigError`] carrying `path` when the file can't be read or
    /// doesn't parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("unreadable: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse a `changekit.toml` body.
    ///
    /// # Errors
    /// [`ConfigError`] (without a path) for bad TOML, wrong value types, or
    /// keys no section knows about.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(prefix) = e.span().and_then(|span| toml_str.get(..span.start)) {
                let line = prefix.chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = ChangekitConfig::default();
        assert_eq!(cfg.store.root, PathBuf::from(".changekit/store"));
        assert_eq!(cfg.diff.program, "git");
        assert_eq!(cfg.diff.timeout_seconds, 300);
        assert_eq!(cfg.changeset.classifier, Classifier::Listing);
        assert_eq!(cfg.merge.on_conflict, MergeStrategy::Fail);
    }

    #[test]
    fn parse_empty_string() {
        let cfg = ChangekitConfig::parse("").unwrap();
        assert_eq!(cfg, ChangekitConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[store]
root = "/var/lib/changekit"

[diff]
program = "/usr/local/bin/git"
timeout_seconds = 30

[changeset]
classifier = "diff-tool"

[merge]
on_conflict = "last-wins"
"#;
        let cfg = ChangekitConfig::parse(toml).unwrap();
        assert_eq!(cfg.store.root, PathBuf::from("/var/lib/changekit"));
        assert_eq!(cfg.diff.program, "/usr/local/bin/git");
        assert_eq!(cfg.diff.timeout_seconds, 30);
        assert_eq!(cfg.changeset.classifier, Classifier::DiffTool);
        assert_eq!(cfg.merge.on_conflict, MergeStrategy::LastWins);
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let cfg = ChangekitConfig::parse("[merge]\non_conflict = \"first-wins\"\n").unwrap();
        assert_eq!(cfg.merge.on_conflict, MergeStrategy::FirstWins);
        assert_eq!(cfg.diff, DiffConfig::default());
        assert_eq!(cfg.store, StoreConfig::default());
    }

    #[test]
    fn parse_rejects_unknown_top_level_field() {
        let err = ChangekitConfig::parse("unknown_field = true\n").unwrap_err();
        assert!(
            err.message.contains("unknown field"),
            "error should mention unknown field: {}",
            err.message
        );
    }

    #[test]
    fn parse_rejects_unknown_nested_field() {
        let toml = r#"
[diff]
program = "git"
extra = "oops"
"#;
        let err = ChangekitConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("unknown field"), "{}", err.message);
    }

    #[test]
    fn parse_rejects_invalid_strategy() {
        let err = ChangekitConfig::parse("[merge]\non_conflict = \"ours\"\n").unwrap_err();
        assert!(err.message.contains("unknown variant"), "{}", err.message);
    }

    #[test]
    fn parse_rejects_invalid_classifier() {
        let err = ChangekitConfig::parse("[changeset]\nclassifier = \"magic\"\n").unwrap_err();
        assert!(err.message.contains("unknown variant"), "{}", err.message);
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let toml = "[store]\nroot = \"x\"\n[diff]\ntimeout_seconds = \"soon\"\n";
        let err = ChangekitConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("line 4"), "{}", err.message);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let diff = DiffConfig {
            timeout_seconds: 0,
            ..DiffConfig::default()
        };
        assert_eq!(diff.run_options().timeout, None);
        assert_eq!(
            DiffConfig::default().run_options().timeout,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = ChangekitConfig::load(Path::new("/nonexistent/changekit.toml")).unwrap();
        assert_eq!(cfg, ChangekitConfig::default());
    }

    #[test]
    fn load_existing_file_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[diff]\nprogram = 7\n").unwrap();
        let err = ChangekitConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().starts_with(&path.display().to_string()));
    }
}
