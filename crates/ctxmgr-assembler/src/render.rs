// SPDX-License-Identifier: MIT OR Apache-2.0
//! The ordered LLM-facing render (§4.7, block 1-4).

use ctxmgr_error::CtxError;
use ctxmgr_fsresolve::FsResolver;
use ctxmgr_session::SessionView;
use ctxmgr_source::ObjectPayload;
use ctxmgr_store::DocStore;
use tokio_util::sync::CancellationToken;

/// The role a [`RenderedMessage`] plays in the assembled sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRole {
    /// The system prompt (block 1).
    System,
    /// A user-authored or user-framed message (blocks 2-4).
    User,
    /// The assistant's own prior response, replayed in chat history.
    Assistant,
}

/// One message in the assembled, ordered LLM-facing sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// The role this message plays.
    pub role: RenderRole,
    /// The rendered text.
    pub text: String,
}

/// Render the full ordered sequence for one session's current state.
///
/// # Errors
///
/// Returns a [`CtxError`] if the chat, system prompt, or any pool/active
/// member cannot be fetched from the store.
pub async fn render(
    view: &SessionView,
    store: &dyn DocStore,
    resolver: &FsResolver,
    cancel: &CancellationToken,
) -> Result<Vec<RenderedMessage>, CtxError> {
    let mut out = Vec::new();

    let prompt = store
        .get(&view.system_prompt_ref, cancel)
        .await?
        .ok_or_else(|| CtxError::unknown_object(&view.system_prompt_ref))?;
    out.push(RenderedMessage {
        role: RenderRole::System,
        text: prompt.content.unwrap_or_default(),
    });

    let mut pool_lines = Vec::with_capacity(view.pool.len());
    for id in &view.pool {
        let doc = store.get(id, cancel).await?.ok_or_else(|| CtxError::unknown_object(id))?;
        pool_lines.push(format_pool_line(id, &doc, resolver));
    }
    out.push(RenderedMessage {
        role: RenderRole::User,
        text: format!("METADATA_POOL\n{}", pool_lines.join("\n")),
    });

    let chat = store
        .get(&view.chat_ref, cancel)
        .await?
        .ok_or_else(|| CtxError::unknown_object(&view.chat_ref))?;
    if let ObjectPayload::Chat { turns, .. } = chat.payload {
        for turn in turns {
            if let Some(user_text) = turn.user_text {
                out.push(RenderedMessage {
                    role: RenderRole::User,
                    text: user_text,
                });
            }
            if let Some(assistant_text) = turn.assistant_text {
                out.push(RenderedMessage {
                    role: RenderRole::Assistant,
                    text: assistant_text,
                });
            }
            for toolcall_id in &turn.toolcall_ids {
                let doc = store.get(toolcall_id, cancel).await?;
                let line = match doc {
                    Some(d) => format_toolcall_ref(toolcall_id, &d),
                    None => format!("toolcall_ref id={toolcall_id} tool=? status=?"),
                };
                out.push(RenderedMessage {
                    role: RenderRole::User,
                    text: line,
                });
            }
        }
    }

    for id in &view.active {
        let doc = store.get(id, cancel).await?.ok_or_else(|| CtxError::unknown_object(id))?;
        out.push(RenderedMessage {
            role: RenderRole::User,
            text: format!("ACTIVE_CONTENT id={id}\n{}", doc.content.unwrap_or_default()),
        });
    }

    Ok(out)
}

fn format_pool_line(id: &str, doc: &ctxmgr_source::ObjectDoc, resolver: &FsResolver) -> String {
    match &doc.payload {
        ObjectPayload::File { file_type, char_count } => {
            let display_path = doc
                .source
                .as_ref()
                .and_then(|s| s.path())
                .map(|p| resolver.reverse_resolve(p))
                .unwrap_or_default();
            if doc.content.is_none() {
                format!("id={id} type=file path={display_path} [unread]")
            } else {
                format!(
                    "id={id} type=file path={display_path} file_type={file_type} char_count={char_count}"
                )
            }
        }
        ObjectPayload::ToolCall { tool, status, .. } => {
            format!("id={id} type=toolcall tool={tool} status={}", status_str(*status))
        }
        _ => format!("id={id} type={}", doc.r#type.as_str()),
    }
}

fn format_toolcall_ref(id: &str, doc: &ctxmgr_source::ObjectDoc) -> String {
    match &doc.payload {
        ObjectPayload::ToolCall { tool, status, .. } => {
            format!("toolcall_ref id={id} tool={tool} status={}", status_str(*status))
        }
        _ => format!("toolcall_ref id={id} tool=? status=?"),
    }
}

fn status_str(status: ctxmgr_source::ToolCallStatus) -> &'static str {
    match status {
        ctxmgr_source::ToolCallStatus::Ok => "ok",
        ctxmgr_source::ToolCallStatus::Fail => "fail",
    }
}
