// SPDX-License-Identifier: MIT OR Apache-2.0
//! The context assembler (§4.7): cursor-based consumption of a
//! harness-supplied message stream, and the ordered LLM-facing render.

#![warn(missing_docs)]

mod events;
mod render;

pub use events::{HostMessage, StreamEpoch};
pub use render::{RenderRole, RenderedMessage};

use ctxmgr_error::CtxError;
use ctxmgr_fsresolve::FsResolver;
use ctxmgr_session::{SessionEngine, ToolCallInput};
use ctxmgr_store::DocStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of [`Assembler::absorb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsorbReport {
    /// Number of new messages actually consumed.
    pub consumed: usize,
    /// Whether the cursor was reset because the host replaced its stream
    /// (a shorter array, or a changed [`StreamEpoch`]).
    pub cursor_reset: bool,
}

/// One assembler instance per live session: tracks its own cursor and
/// epoch against the session engine's state (§4.7, "shared-resource
/// policy" — the cursor is owned by exactly one session).
pub struct Assembler {
    session_id: String,
    cursor: usize,
    epoch: Option<StreamEpoch>,
    engine: Arc<SessionEngine>,
    store: Arc<dyn DocStore>,
    resolver: FsResolver,
}

impl Assembler {
    /// Build an assembler bound to `session_id`, starting at cursor zero.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        engine: Arc<SessionEngine>,
        store: Arc<dyn DocStore>,
        resolver: FsResolver,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            cursor: 0,
            epoch: None,
            engine,
            store,
            resolver,
        }
    }

    /// Current cursor position, for diagnostics/tests.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Absorb the host's full message slice for this call. Implements the
    /// length/epoch-based reset protocol, then dispatches every newly
    /// appended message into the session engine.
    ///
    /// # Errors
    ///
    /// Returns a [`CtxError`] from whichever session-engine or store call
    /// fails while dispatching a message.
    pub async fn absorb(
        &mut self,
        epoch: StreamEpoch,
        messages: &[HostMessage],
        cancel: &CancellationToken,
    ) -> Result<AbsorbReport, CtxError> {
        let replaced = messages.len() < self.cursor || self.epoch != Some(epoch);
        self.epoch = Some(epoch);
        if replaced {
            tracing::debug!(
                session_id = %self.session_id,
                old_cursor = self.cursor,
                new_len = messages.len(),
                "stream replaced, resetting cursor"
            );
            self.cursor = messages.len();
            return Ok(AbsorbReport {
                consumed: 0,
                cursor_reset: true,
            });
        }

        let mut consumed = 0;
        for msg in &messages[self.cursor..] {
            self.dispatch(msg, cancel).await?;
            consumed += 1;
        }
        self.cursor = messages.len();
        tracing::debug!(session_id = %self.session_id, consumed, "absorbed messages");
        Ok(AbsorbReport {
            consumed,
            cursor_reset: false,
        })
    }

    async fn dispatch(
        &self,
        msg: &HostMessage,
        cancel: &CancellationToken,
    ) -> Result<(), CtxError> {
        match msg {
            HostMessage::User { text } => {
                self.engine
                    .begin_turn(&self.session_id, Some(text.clone()), cancel)
                    .await
            }
            HostMessage::Assistant { text, model } => {
                self.engine
                    .set_assistant_response(&self.session_id, text, model.as_deref(), cancel)
                    .await
            }
            HostMessage::ToolResult {
                id,
                tool,
                args,
                args_display,
                status,
                content,
                file_refs,
            } => {
                self.engine
                    .record_toolcall(
                        &self.session_id,
                        ToolCallInput {
                            id: id.clone(),
                            tool: tool.clone(),
                            args: args.clone(),
                            args_display: args_display.clone(),
                            status: *status,
                            content: content.clone(),
                            file_refs: file_refs.clone(),
                        },
                        cancel,
                    )
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Produce the ordered LLM-facing render: system prompt, metadata
    /// pool summary, chat history, active content blocks (§4.7).
    ///
    /// # Errors
    ///
    /// Returns a [`CtxError`] if a referenced object cannot be fetched.
    pub async fn render(&self, cancel: &CancellationToken) -> Result<Vec<RenderedMessage>, CtxError> {
        let view = self.engine.view(&self.session_id).await?;
        render::render(&view, self.store.as_ref(), &self.resolver, cancel).await
    }
}
