// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the context
//! manager (§1.1, §6 "Environment and configuration").
//!
//! This crate provides [`CtxManagerConfig`] — mount mappings, the
//! default filesystem id source, the auto-collapse window, and the
//! store endpoint — together with helpers for loading from TOML files,
//! merging overlays, and producing advisory [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ctxmgr_fsresolve::MountMapping;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A mount's agent prefix shadows another mount's prefix entirely.
    ShadowedMount {
        /// The mount whose prefix is a strict prefix of another's.
        agent_prefix: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::ShadowedMount { agent_prefix } => {
                write!(f, "mount '{agent_prefix}' is shadowed by a longer prefix")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Where the default filesystem id comes from when a path resolves onto
/// no configured mount (§6 "Default filesystem id resolution").
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FilesystemIdSource {
    /// Hash the contents of a machine-identity file (e.g. `/etc/machine-id`).
    MachineId {
        /// Path to the machine-identity file.
        path: String,
    },
    /// Hash the host's reported hostname.
    Hostname,
    /// Use a fixed, pre-computed filesystem id.
    Literal {
        /// The literal id.
        id: String,
    },
}

/// Auto-collapse window parameters (§4.5).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AutoCollapseConfig {
    /// How many of the most recent tool-call ids to keep per turn.
    pub recent_toolcalls_per_turn: usize,
    /// How many of the most recent turns to consider.
    pub recent_turns_window: usize,
}

impl Default for AutoCollapseConfig {
    fn default() -> Self {
        Self {
            recent_toolcalls_per_turn: 5,
            recent_turns_window: 3,
        }
    }
}

/// Top-level runtime configuration for the context manager.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CtxManagerConfig {
    /// How to derive the default filesystem id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_filesystem_id_source: Option<FilesystemIdSource>,
    /// Configured mount mappings, agent prefix to canonical prefix.
    #[serde(default)]
    pub mounts: Vec<MountMapping>,
    /// Auto-collapse window parameters.
    #[serde(default)]
    pub auto_collapse: AutoCollapseConfig,
    /// Store endpoint URL. `None` means the in-process reference store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_endpoint: Option<String>,
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Default for CtxManagerConfig {
    fn default() -> Self {
        Self {
            default_filesystem_id_source: None,
            mounts: Vec::new(),
            auto_collapse: AutoCollapseConfig::default(),
            store_endpoint: None,
            log_level: Some("info".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`CtxManagerConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`CtxManagerConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if `path` is given but unreadable,
/// or [`ConfigError::ParseError`] if its contents are not valid TOML for
/// this shape.
pub fn load_config(path: Option<&Path>) -> Result<CtxManagerConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => CtxManagerConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`CtxManagerConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML for
/// this shape.
pub fn parse_toml(content: &str) -> Result<CtxManagerConfig, ConfigError> {
    toml::from_str::<CtxManagerConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `CTXMGR_STORE_ENDPOINT`
/// - `CTXMGR_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut CtxManagerConfig) {
    if let Ok(val) = std::env::var("CTXMGR_STORE_ENDPOINT") {
        config.store_endpoint = Some(val);
    }
    if let Ok(val) = std::env::var("CTXMGR_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (invalid log level, zero-length collapse windows, mounts
/// with empty prefixes) are returned as a [`ConfigError::ValidationError`];
/// soft issues come back as warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if any hard-error condition
/// above is found.
pub fn validate_config(config: &CtxManagerConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.auto_collapse.recent_toolcalls_per_turn == 0 {
        errors.push("auto_collapse.recent_toolcalls_per_turn must be greater than zero".into());
    }
    if config.auto_collapse.recent_turns_window == 0 {
        errors.push("auto_collapse.recent_turns_window must be greater than zero".into());
    }

    for mount in &config.mounts {
        if mount.agent_prefix.is_empty() {
            errors.push("mount agent_prefix must not be empty".into());
        }
        if mount.canonical_prefix.is_empty() {
            errors.push(format!(
                "mount '{}': canonical_prefix must not be empty",
                mount.agent_prefix
            ));
        }
        if mount.filesystem_id.is_empty() {
            errors.push(format!(
                "mount '{}': filesystem_id must not be empty",
                mount.agent_prefix
            ));
        }
    }
    for a in &config.mounts {
        for b in &config.mounts {
            if a.agent_prefix != b.agent_prefix
                && ctxmgr_fsresolve::segment_prefix_match(&a.agent_prefix, &b.agent_prefix)
            {
                warnings.push(ConfigWarning::ShadowedMount {
                    agent_prefix: a.agent_prefix.clone(),
                });
            }
        }
    }

    if config.default_filesystem_id_source.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "default_filesystem_id_source".into(),
            hint: "unmounted paths will use a filesystem id derived from an empty input".into(),
        });
    }
    if config.store_endpoint.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "store_endpoint".into(),
            hint: "the in-process reference store will be used; state does not survive a restart"
                .into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over
/// `base`. Mount lists are concatenated, overlay entries last (so a
/// longer overlay prefix still wins resolution, per longest-prefix rules).
#[must_use]
pub fn merge_configs(base: CtxManagerConfig, overlay: CtxManagerConfig) -> CtxManagerConfig {
    let mut mounts = base.mounts;
    mounts.extend(overlay.mounts);
    CtxManagerConfig {
        default_filesystem_id_source: overlay
            .default_filesystem_id_source
            .or(base.default_filesystem_id_source),
        mounts,
        auto_collapse: overlay.auto_collapse,
        store_endpoint: overlay.store_endpoint.or(base.store_endpoint),
        log_level: overlay.log_level.or(base.log_level),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    // -- 1. Default config is valid ------------------------------------------

    #[test]
    fn default_config_is_valid() {
        let cfg = CtxManagerConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(!warnings.is_empty(), "should have advisory warnings");
    }

    // -- 2. Default config has sensible defaults -----------------------------

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = CtxManagerConfig::default();
        assert_eq!(cfg.log_level.as_deref(), Some("info"));
        assert_eq!(cfg.auto_collapse.recent_toolcalls_per_turn, 5);
        assert!(cfg.mounts.is_empty());
    }

    // -- 3. Load from valid TOML string --------------------------------------

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            log_level = "debug"
            store_endpoint = "https://store.internal"

            [default_filesystem_id_source]
            source = "hostname"

            [[mounts]]
            agent_prefix = "/workspace"
            canonical_prefix = "/host/ws"
            filesystem_id = "FS1"
            writable = true
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.mounts.len(), 1);
        assert_eq!(
            cfg.default_filesystem_id_source,
            Some(FilesystemIdSource::Hostname)
        );
    }

    // -- 4. Invalid TOML gives ParseError -------------------------------------

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    // -- 5. Validation catches invalid log level ------------------------------

    #[test]
    fn validation_catches_invalid_log_level() {
        let cfg = CtxManagerConfig {
            log_level: Some("verbose".into()),
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    // -- 6. Validation catches zero-length collapse windows -------------------

    #[test]
    fn validation_catches_zero_collapse_window() {
        let cfg = CtxManagerConfig {
            auto_collapse: AutoCollapseConfig {
                recent_toolcalls_per_turn: 0,
                recent_turns_window: 1,
            },
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("recent_toolcalls_per_turn")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    // -- 7. Validation catches empty mount prefix ------------------------------

    #[test]
    fn validation_catches_empty_mount_prefix() {
        let cfg = CtxManagerConfig {
            mounts: vec![MountMapping {
                agent_prefix: String::new(),
                canonical_prefix: "/x".into(),
                filesystem_id: "FS1".into(),
                writable: true,
            }],
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    // -- 8. Merge: overlay wins on scalar fields -------------------------------

    #[test]
    fn merge_overlay_wins_scalars() {
        let base = CtxManagerConfig {
            log_level: Some("info".into()),
            ..Default::default()
        };
        let overlay = CtxManagerConfig {
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
    }

    // -- 9. Merge: mount lists concatenate -------------------------------------

    #[test]
    fn merge_concatenates_mounts() {
        let mount = |p: &str| MountMapping {
            agent_prefix: p.into(),
            canonical_prefix: p.into(),
            filesystem_id: "FS1".into(),
            writable: true,
        };
        let base = CtxManagerConfig {
            mounts: vec![mount("/a")],
            ..Default::default()
        };
        let overlay = CtxManagerConfig {
            mounts: vec![mount("/b")],
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.mounts.len(), 2);
    }

    // -- 10. load_config with missing file reports FileNotFound ---------------

    #[test]
    fn load_config_missing_file_reports_not_found() {
        let err = load_config(Some(Path::new("/does/not/exist.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    // -- 11. load_config with no path returns default --------------------------

    #[test]
    fn load_config_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg, CtxManagerConfig::default());
    }

    // -- 12. load_config reads a real file on disk ------------------------------

    #[test]
    fn load_config_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctxmgr.toml");
        std::fs::write(
            &path,
            r#"
                log_level = "warn"
                [[mounts]]
                agent_prefix = "/workspace"
                canonical_prefix = "/host/ws"
                filesystem_id = "FS1"
                writable = true
            "#,
        )
        .unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("warn"));
        assert_eq!(cfg.mounts.len(), 1);
    }
}
