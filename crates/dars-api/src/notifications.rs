use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use dars_types::api::{Claims, NotificationRequest};
use dars_types::feed::Row;
use dars_types::models::RowId;

use crate::auth::AppState;
use crate::{commit, require_admin};

fn validate(req: &NotificationRequest) -> Result<(), StatusCode> {
    if req.title.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if let (Some(start), Some(end)) = (req.start_date, req.end_date) {
        if end < start {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    Ok(())
}

pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NotificationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&claims)?;
    validate(&req)?;

    let notification = commit(&state, move |db, feed| {
        let notification = db.create_notification(&req)?;
        feed.publish_insert(Row::Notification(notification.clone()));
        Ok(notification)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn update_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NotificationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&claims)?;
    validate(&req)?;

    let new = commit(&state, move |db, feed| {
        let Some((old, new)) = db.update_notification(notification_id, &req)? else {
            return Ok(None);
        };
        feed.publish_update(Row::Notification(new.clone()), Row::Notification(old));
        Ok(Some(new))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(new))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&claims)?;

    let deleted = commit(&state, move |db, feed| {
        let Some(old) = db.delete_notification(notification_id)? else {
            return Ok(false);
        };
        feed.publish_delete(Row::Notification(old));
        Ok(true)
    })
    .await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
