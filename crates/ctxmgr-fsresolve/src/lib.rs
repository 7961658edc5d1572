// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem mount resolution (§4.2).
//!
//! Translates agent-visible paths to canonical, host-visible paths (and
//! back, for display) through an ordered list of mount mappings. Matching
//! is longest-prefix, but always segment-boundary aware: `/workspace`
//! matches `/workspace/src` but never `/workspacex`.

#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One configured mount: an agent-visible prefix bound to a canonical,
/// host-visible prefix on a named filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MountMapping {
    /// Path prefix as the agent/tool sees it.
    pub agent_prefix: String,
    /// Path prefix as it exists on the host filesystem.
    pub canonical_prefix: String,
    /// Identifier of the filesystem this mount resolves onto.
    pub filesystem_id: String,
    /// Whether writes through this mount are permitted. Carried for
    /// callers that gate write tools on it; the resolver itself does not
    /// enforce it.
    pub writable: bool,
}

/// Outcome of [`FsResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResult {
    /// The canonical, host-visible path.
    pub canonical_path: String,
    /// Filesystem the canonical path lives on.
    pub filesystem_id: String,
    /// Whether a configured mount matched (`false` means the default
    /// filesystem id was used and the path passed through unchanged).
    pub is_mounted: bool,
}

/// Resolves agent-visible paths against a default filesystem and an
/// ordered list of mount mappings.
#[derive(Debug, Clone)]
pub struct FsResolver {
    default_filesystem_id: String,
    mounts: Vec<MountMapping>,
}

impl FsResolver {
    /// Build a resolver with the given default filesystem id and mounts.
    /// Mount order does not affect resolution — the longest matching
    /// prefix always wins regardless of configuration order.
    #[must_use]
    pub fn new(default_filesystem_id: impl Into<String>, mounts: Vec<MountMapping>) -> Self {
        Self {
            default_filesystem_id: default_filesystem_id.into(),
            mounts,
        }
    }

    /// The default filesystem id used for unmounted paths.
    #[must_use]
    pub fn default_filesystem_id(&self) -> &str {
        &self.default_filesystem_id
    }

    /// Configured mounts, in the order they were supplied.
    #[must_use]
    pub fn mounts(&self) -> &[MountMapping] {
        &self.mounts
    }

    /// Resolve an agent-visible path to its canonical form.
    #[must_use]
    pub fn resolve(&self, agent_path: &str) -> ResolveResult {
        match self.best_match(agent_path, |m| &m.agent_prefix) {
            Some(mount) => ResolveResult {
                canonical_path: substitute_prefix(
                    agent_path,
                    &mount.agent_prefix,
                    &mount.canonical_prefix,
                ),
                filesystem_id: mount.filesystem_id.clone(),
                is_mounted: true,
            },
            None => ResolveResult {
                canonical_path: agent_path.to_string(),
                filesystem_id: self.default_filesystem_id.clone(),
                is_mounted: false,
            },
        }
    }

    /// Translate a canonical, host-visible path back to its agent-visible
    /// display form. Used only for rendering; falls back to the canonical
    /// path unchanged when no mount matches.
    #[must_use]
    pub fn reverse_resolve(&self, canonical_path: &str) -> String {
        match self.best_match(canonical_path, |m| &m.canonical_prefix) {
            Some(mount) => {
                substitute_prefix(canonical_path, &mount.canonical_prefix, &mount.agent_prefix)
            }
            None => canonical_path.to_string(),
        }
    }

    /// True iff `agent_path` resolves onto a configured (and therefore
    /// host-visible, watchable) mount.
    #[must_use]
    pub fn is_watchable(&self, agent_path: &str) -> bool {
        self.resolve(agent_path).is_mounted
    }

    fn best_match<'a, F>(&'a self, path: &str, prefix_of: F) -> Option<&'a MountMapping>
    where
        F: Fn(&'a MountMapping) -> &'a String,
    {
        self.mounts
            .iter()
            .filter(|m| segment_prefix_match(prefix_of(m), path))
            .max_by_key(|m| trimmed_len(prefix_of(m)))
    }
}

/// Segment-boundary-aware prefix match: `prefix` matches `path` when `path`
/// equals `prefix` (trailing slashes ignored) or starts with
/// `prefix + "/"`. A raw string-prefix match like `/workspace` against
/// `/workspacex` is rejected.
#[must_use]
pub fn segment_prefix_match(prefix: &str, path: &str) -> bool {
    let trimmed = trim_trailing_slash(prefix);
    if trimmed.is_empty() {
        // prefix was "/" (or empty) — matches any absolute path.
        return path.starts_with('/');
    }
    path == trimmed || path.starts_with(&format!("{trimmed}/"))
}

fn trimmed_len(prefix: &str) -> usize {
    trim_trailing_slash(prefix).len()
}

fn trim_trailing_slash(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

fn substitute_prefix(path: &str, from_prefix: &str, to_prefix: &str) -> String {
    let from_trimmed = trim_trailing_slash(from_prefix);
    let to_trimmed = trim_trailing_slash(to_prefix);
    let remainder = &path[from_trimmed.len()..];
    if remainder.is_empty() {
        if to_trimmed.is_empty() { "/".to_string() } else { to_trimmed.to_string() }
    } else {
        format!("{to_trimmed}{remainder}")
    }
}

/// Derive a default filesystem identifier deterministically from a
/// machine-stable input (host machine id, or failing that, the hostname).
/// Pure and hash-based — callers are responsible for sourcing the input
/// (reading `/etc/machine-id`, `hostname()`, etc.) since that is I/O.
#[must_use]
pub fn derive_default_filesystem_id(machine_stable_input: &str) -> String {
    ctxmgr_hash::sha256_hex(machine_stable_input.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(agent: &str, canonical: &str, fs: &str) -> MountMapping {
        MountMapping {
            agent_prefix: agent.to_string(),
            canonical_prefix: canonical.to_string(),
            filesystem_id: fs.to_string(),
            writable: true,
        }
    }

    #[test]
    fn unmounted_path_falls_back_to_default() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        let result = r.resolve("/etc/passwd");
        assert_eq!(result.canonical_path, "/etc/passwd");
        assert_eq!(result.filesystem_id, "DEFAULT");
        assert!(!result.is_mounted);
    }

    #[test]
    fn mounted_path_is_translated() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        let result = r.resolve("/workspace/src/a.ts");
        assert_eq!(result.canonical_path, "/host/ws/src/a.ts");
        assert_eq!(result.filesystem_id, "FS1");
        assert!(result.is_mounted);
    }

    #[test]
    fn exact_mount_root_matches() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        let result = r.resolve("/workspace");
        assert_eq!(result.canonical_path, "/host/ws");
        assert!(result.is_mounted);
    }

    #[test]
    fn segment_boundary_rejects_suffix_collision() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        let result = r.resolve("/workspacex/a.ts");
        assert!(!result.is_mounted);
        assert_eq!(result.canonical_path, "/workspacex/a.ts");
        assert_eq!(result.filesystem_id, "DEFAULT");
    }

    #[test]
    fn longest_prefix_wins() {
        let r = FsResolver::new(
            "DEFAULT",
            vec![
                mount("/workspace", "/host/ws", "FS1"),
                mount("/workspace/nested", "/host/special", "FS2"),
            ],
        );
        let result = r.resolve("/workspace/nested/file.ts");
        assert_eq!(result.filesystem_id, "FS2");
        assert_eq!(result.canonical_path, "/host/special/file.ts");
    }

    #[test]
    fn reverse_resolve_round_trips() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        let canonical = r.resolve("/workspace/src/a.ts").canonical_path;
        assert_eq!(r.reverse_resolve(&canonical), "/workspace/src/a.ts");
    }

    #[test]
    fn reverse_resolve_falls_back_unchanged() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        assert_eq!(r.reverse_resolve("/other/place"), "/other/place");
    }

    #[test]
    fn is_watchable_matches_mount_status() {
        let r = FsResolver::new("DEFAULT", vec![mount("/workspace", "/host/ws", "FS1")]);
        assert!(r.is_watchable("/workspace/a"));
        assert!(!r.is_watchable("/tmp/a"));
    }

    #[test]
    fn no_mounts_everything_falls_through() {
        let r = FsResolver::new("DEFAULT", vec![]);
        let result = r.resolve("/anything");
        assert!(!result.is_mounted);
        assert_eq!(result.filesystem_id, "DEFAULT");
    }

    #[test]
    fn derive_default_filesystem_id_is_deterministic_and_hex() {
        let a = derive_default_filesystem_id("host-abc-123");
        let b = derive_default_filesystem_id("host-abc-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn derive_default_filesystem_id_differs_per_input() {
        assert_ne!(
            derive_default_filesystem_id("host-a"),
            derive_default_filesystem_id("host-b")
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn resolve_then_reverse_resolve_round_trips_when_mounted(
            suffix in "[a-z0-9/]{0,24}",
        ) {
            let r = FsResolver::new(
                "DEFAULT",
                vec![MountMapping {
                    agent_prefix: "/workspace".into(),
                    canonical_prefix: "/host/ws".into(),
                    filesystem_id: "FS1".into(),
                    writable: true,
                }],
            );
            let agent_path = format!("/workspace/{suffix}");
            let result = r.resolve(&agent_path);
            prop_assert!(result.is_mounted);
            prop_assert_eq!(r.reverse_resolve(&result.canonical_path), agent_path);
        }

        #[test]
        fn unmounted_paths_always_use_default_filesystem_and_pass_through(
            path in "/[a-z0-9/._-]{1,32}",
        ) {
            let r = FsResolver::new(
                "DEFAULT",
                vec![MountMapping {
                    agent_prefix: "/workspace".into(),
                    canonical_prefix: "/host/ws".into(),
                    filesystem_id: "FS1".into(),
                    writable: true,
                }],
            );
            prop_assume!(!segment_prefix_match("/workspace", &path));
            let result = r.resolve(&path);
            prop_assert!(!result.is_mounted);
            prop_assert_eq!(result.filesystem_id, "DEFAULT");
            prop_assert_eq!(result.canonical_path, path);
        }

        #[test]
        fn segment_prefix_match_never_panics(
            prefix in ".{0,16}",
            path in ".{0,32}",
        ) {
            let _ = segment_prefix_match(&prefix, &path);
        }
    }
}
