use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use dars_types::api::{Claims, SendReactionRequest};
use dars_types::feed::Row;
use dars_types::models::RowId;

use crate::auth::AppState;
use crate::commit;

const MAX_REACTION_LEN: usize = 32;

/// Record a live webinar reaction. Reactions are append-only.
pub async fn send_reaction(
    State(state): State<AppState>,
    Path(webinar_id): Path<RowId>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.reaction_type.is_empty() || req.reaction_type.len() > MAX_REACTION_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let participant = claims.sub.to_string();
    let reaction = commit(&state, move |db, feed| {
        let reaction = db.insert_reaction(webinar_id, &participant, &req.reaction_type)?;
        feed.publish_insert(Row::Reaction(reaction.clone()));
        Ok(reaction)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(reaction)))
}
