use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use dars_types::api::{Claims, SendPrivateMessageRequest};
use dars_types::feed::Row;
use dars_types::models::RowId;

use crate::auth::AppState;
use crate::commit;

pub async fn send_private_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendPrivateMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let body = req.message.trim().to_string();
    if body.is_empty() || req.recipient_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let sender_id = claims.sub;
    let recipient_id = req.recipient_id;
    let message = commit(&state, move |db, feed| {
        let Some(_) = db.get_user_by_id(&recipient_id.to_string())? else {
            return Ok(None);
        };
        let sender = db
            .get_user_by_id(&sender_id.to_string())?
            .ok_or_else(|| anyhow::anyhow!("user {} missing", sender_id))?;
        let message =
            db.insert_private_message(sender_id, recipient_id, sender.shown_name(), &body)?;
        feed.publish_insert(Row::PrivateMessage(message.clone()));
        Ok(Some(message))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let reader = claims.sub;
    commit(&state, move |db, feed| {
        if let Some((old, new)) = db.mark_private_read(message_id, reader)? {
            feed.publish_update(Row::PrivateMessage(new), Row::PrivateMessage(old));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
