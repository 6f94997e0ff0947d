use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use dars_types::api::{Claims, CreateTopicRequest, UpdateTopicRequest};
use dars_types::feed::Row;
use dars_types::models::RowId;

use crate::auth::AppState;
use crate::{commit, require_admin};

pub async fn create_topic(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTopicRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&claims)?;
    if req.title.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let topic = commit(&state, move |db, feed| {
        let topic = db.create_topic(req.title.trim(), &req.description, req.room_id)?;
        feed.publish_insert(Row::Topic(topic.clone()));
        Ok(topic)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(topic)))
}

/// Edit or (de)activate a topic. Deactivation reaches every subscriber as an UPDATE.
pub async fn update_topic(
    State(state): State<AppState>,
    Path(topic_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateTopicRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&claims)?;

    let new = commit(&state, move |db, feed| {
        let Some((old, new)) = db.update_topic(topic_id, &req)? else {
            return Ok(None);
        };
        feed.publish_update(Row::Topic(new.clone()), Row::Topic(old));
        Ok(Some(new))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(new))
}

pub async fn delete_topic(
    State(state): State<AppState>,
    Path(topic_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&claims)?;

    let deleted = commit(&state, move |db, feed| {
        let Some(old) = db.delete_topic(topic_id)? else {
            return Ok(false);
        };
        feed.publish_delete(Row::Topic(old));
        Ok(true)
    })
    .await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
