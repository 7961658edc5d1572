// SPDX-License-Identifier: MIT OR Apache-2.0
//! The host message shapes the assembler consumes (§4.7) and the
//! Rust-specific resolution of the "array identity changed" ambiguity.

use ctxmgr_source::ToolCallStatus;

/// An opaque, monotonically-issued token the host adapter hands back
/// alongside each message slice. A changed epoch is treated exactly like
/// a length-shrink: the array has been replaced, not appended to.
///
/// Resolves the "array identity changed" clause of §4.7 for a Rust port,
/// which has no reference-equality analogue to compare against — see
/// the corresponding decision in the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamEpoch(pub u64);

/// One message in the host's append-only stream.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    /// A user message opens a new turn.
    User {
        /// The message text.
        text: String,
    },
    /// The assistant's response to the current turn.
    Assistant {
        /// The response text.
        text: String,
        /// Model identifier that produced this response, if known.
        model: Option<String>,
    },
    /// The result of a tool invocation the assistant issued.
    ToolResult {
        /// Provider-supplied tool-call id; becomes the object's id.
        id: String,
        /// Tool name as invoked.
        tool: String,
        /// Arguments passed to the tool.
        args: serde_json::Value,
        /// Optional human-facing rendering of `args`.
        args_display: Option<String>,
        /// Outcome of the call.
        status: ToolCallStatus,
        /// The tool's textual result, if available.
        content: Option<String>,
        /// File object ids this call touched, if any.
        file_refs: Vec<String>,
    },
}
