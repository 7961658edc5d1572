// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory working state for one session (§4.5.1).

use std::collections::{BTreeSet, VecDeque};

/// The tool-call ids absorbed during one chat turn, used only to compute
/// the auto-collapse keep-set — the authoritative turn text lives on the
/// chat object's own payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnRef {
    /// Tool-call object ids issued during this turn, in order.
    pub toolcall_ids: Vec<String>,
}

/// Parameters of the auto-collapse window (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCollapseParams {
    /// How many of the most recent tool-call ids to keep per turn.
    pub recent_toolcalls_per_turn: usize,
    /// How many of the most recent turns to consider.
    pub recent_turns_window: usize,
}

impl Default for AutoCollapseParams {
    fn default() -> Self {
        Self {
            recent_toolcalls_per_turn: 5,
            recent_turns_window: 3,
        }
    }
}

/// Mirrors the reference crate's typed-map-of-per-entity-state pattern:
/// one `SessionCache` per live session id, held in
/// [`crate::SessionEngine`]'s map.
#[derive(Debug, Clone)]
pub struct SessionCache {
    /// Every object this session has ever encountered. Only grows.
    pub index: BTreeSet<String>,
    /// The working set surfaced to the operator/agent.
    pub pool: BTreeSet<String>,
    /// The subset of `pool` whose content is rendered in full.
    pub active: BTreeSet<String>,
    /// The subset of `pool` exempt from auto-collapse.
    pub pinned: BTreeSet<String>,
    /// Ids known to be tool-call objects, so auto-collapse can tell them
    /// apart from files (files are never auto-collapsed).
    pub toolcall_ids: BTreeSet<String>,
    /// Tool-call ids grouped by turn, oldest first, for the auto-collapse
    /// window computation.
    pub turns: VecDeque<TurnRef>,
    /// This session's chat object id.
    pub chat_ref: String,
    /// This session's system-prompt object id.
    pub system_prompt_ref: String,
}

impl SessionCache {
    /// A freshly created session: all sets empty, chat/system-prompt refs
    /// fixed at creation.
    #[must_use]
    pub fn new(chat_ref: impl Into<String>, system_prompt_ref: impl Into<String>) -> Self {
        Self {
            index: BTreeSet::new(),
            pool: BTreeSet::new(),
            active: BTreeSet::new(),
            pinned: BTreeSet::new(),
            toolcall_ids: BTreeSet::new(),
            turns: VecDeque::new(),
            chat_ref: chat_ref.into(),
            system_prompt_ref: system_prompt_ref.into(),
        }
    }

    /// Recompute the auto-collapse keep-set: the union of the last
    /// `params.recent_toolcalls_per_turn` tool-call ids from each of the
    /// last `params.recent_turns_window` turns.
    #[must_use]
    pub fn auto_collapse_keep_set(&self, params: AutoCollapseParams) -> BTreeSet<String> {
        let mut keep = BTreeSet::new();
        let skip = self.turns.len().saturating_sub(params.recent_turns_window);
        for turn in self.turns.iter().skip(skip) {
            let start = turn
                .toolcall_ids
                .len()
                .saturating_sub(params.recent_toolcalls_per_turn);
            keep.extend(turn.toolcall_ids[start..].iter().cloned());
        }
        keep
    }

    /// Apply the auto-collapse window: drop any non-pinned tool-call
    /// currently active but outside the keep-set. Files are untouched.
    pub fn apply_auto_collapse(&mut self, params: AutoCollapseParams) {
        let keep = self.auto_collapse_keep_set(params);
        self.active.retain(|id| {
            !self.toolcall_ids.contains(id) || self.pinned.contains(id) || keep.contains(id)
        });
    }
}
