//! Posting and editing the single comment each event owns.
//!
//! Replies go into the triggering discussion when there is one. Any failure
//! there clears the discussion state and falls back to a top-level comment;
//! none of these helpers ever return an error.

use tanuki_gitlab::GitlabApi;

use crate::context::EventContext;

/// Posts a new reply and remembers where it went.
pub(super) async fn post_reply(api: &dyn GitlabApi, ctx: &mut EventContext, body: &str) {
    let Some(noteable) = ctx.noteable else {
        return;
    };
    if let Some(discussion_id) = ctx.discussion_id.clone() {
        match api
            .reply_to_discussion(ctx.project_id, noteable, &discussion_id, body)
            .await
        {
            Ok(note) => {
                ctx.discussion_note_id = Some(note.id);
                ctx.discussion_reply_succeeded = true;
                return;
            }
            Err(error) => {
                tracing::warn!(
                    project_id = ctx.project_id,
                    discussion_id = %discussion_id,
                    error = %format!("{error:#}"),
                    "discussion reply failed; falling back to a regular comment"
                );
                ctx.clear_discussion();
            }
        }
    }
    match api.create_comment(ctx.project_id, noteable, body).await {
        Ok(note) => ctx.current_comment_id = Some(note.id),
        Err(error) => tracing::warn!(
            project_id = ctx.project_id,
            target = noteable.kind_label(),
            iid = noteable.iid(),
            error = %format!("{error:#}"),
            "failed to post comment"
        ),
    }
}

/// Edits our existing reply in place. Returns false when there is nothing to
/// edit or the edit failed.
async fn edit_reply(api: &dyn GitlabApi, ctx: &EventContext, body: &str) -> bool {
    let Some(noteable) = ctx.noteable else {
        return false;
    };
    let result = if ctx.discussion_reply_succeeded {
        match (ctx.discussion_id.as_deref(), ctx.discussion_note_id) {
            (Some(discussion_id), Some(note_id)) => {
                api.update_discussion_note(ctx.project_id, noteable, discussion_id, note_id, body)
                    .await
            }
            _ => return false,
        }
    } else if let Some(note_id) = ctx.current_comment_id {
        api.update_comment(ctx.project_id, noteable, note_id, body)
            .await
    } else {
        return false;
    };
    match result {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(
                project_id = ctx.project_id,
                error = %format!("{error:#}"),
                "failed to update comment"
            );
            false
        }
    }
}

/// Best-effort progress update; a missing or failing comment is skipped.
pub(super) async fn edit_progress(api: &dyn GitlabApi, ctx: &EventContext, body: &str) {
    edit_reply(api, ctx, body).await;
}

/// Replaces the progress comment with the final body, or posts the body as a
/// new reply when the progress comment cannot be edited.
pub(super) async fn finish_reply(api: &dyn GitlabApi, ctx: &mut EventContext, body: &str) {
    if edit_reply(api, ctx, body).await {
        return;
    }
    if ctx.discussion_reply_succeeded {
        ctx.clear_discussion();
    }
    ctx.current_comment_id = None;
    post_reply(api, ctx, body).await;
}

/// Resolves the triggering discussion after a successful threaded reply.
pub(super) async fn resolve_discussion_if_needed(api: &dyn GitlabApi, ctx: &EventContext) {
    if !(ctx.discussion_resolvable && ctx.discussion_reply_succeeded) {
        return;
    }
    let (Some(noteable), Some(discussion_id)) = (ctx.noteable, ctx.discussion_id.as_deref())
    else {
        return;
    };
    if let Err(error) = api
        .resolve_discussion(ctx.project_id, noteable, discussion_id)
        .await
    {
        tracing::warn!(
            project_id = ctx.project_id,
            discussion_id,
            error = %format!("{error:#}"),
            "failed to resolve discussion"
        );
    }
}
