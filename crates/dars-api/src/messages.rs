use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use dars_db::models::NewMessage;
use dars_types::api::{Claims, PinMessageRequest, SendMessageRequest};
use dars_types::feed::Row;
use dars_types::models::RowId;

use crate::auth::AppState;
use crate::{blocking, commit, require_moderator};

const MAX_MESSAGE_CHARS: usize = 4000;

/// Post a message to an active topic.
pub async fn send_message(
    State(state): State<AppState>,
    Path(topic_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let body = req.message.trim().to_string();
    if body.is_empty() || body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(StatusCode::BAD_REQUEST);
    }

    let topic = blocking(&state, move |db| db.get_topic(topic_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !topic.is_active {
        return Err(StatusCode::CONFLICT);
    }

    let user_id = claims.sub.to_string();
    let role = claims.role;
    let message = commit(&state, move |db, feed| {
        let sender = db
            .get_user_by_id(&user_id)?
            .ok_or_else(|| anyhow::anyhow!("user {} missing", user_id))?;
        let message = db.insert_message(&NewMessage {
            sender_name: sender.shown_name(),
            sender_role: role.as_str(),
            message: &body,
            topic_id: Some(topic_id),
            user_id: Some(&user_id),
        })?;
        feed.publish_insert(Row::Message(message.clone()));
        Ok(message)
    })
    .await?;

    state.webhooks.message_sent(&message);

    Ok((StatusCode::CREATED, Json(message)))
}

/// Pin or unpin a message. Moderators only.
pub async fn pin_message(
    State(state): State<AppState>,
    Path(message_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PinMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_moderator(&claims)?;

    let new = commit(&state, move |db, feed| {
        let Some((old, new)) = db.set_message_pinned(message_id, req.is_pinned)? else {
            return Ok(None);
        };
        feed.publish_update(Row::Message(new.clone()), Row::Message(old));
        Ok(Some(new))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(new))
}

/// Delete a message. Senders may delete their own; moderators may delete any.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let existing = blocking(&state, move |db| db.get_message(message_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    if existing.user_id != Some(claims.sub) {
        require_moderator(&claims)?;
    }

    let deleted = commit(&state, move |db, feed| {
        let Some(old) = db.delete_message(message_id)? else {
            // Deleted concurrently; the feed already carried that delete.
            return Ok(false);
        };
        feed.publish_delete(Row::Message(old));
        Ok(true)
    })
    .await?;

    if deleted {
        info!("{} deleted message {}", claims.username, message_id);
    }

    Ok(StatusCode::NO_CONTENT)
}
