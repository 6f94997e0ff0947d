use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use dars_types::api::{Claims, SubscriptionToggleRequest};

use crate::auth::AppState;
use crate::blocking;

/// The caller's own account.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub.to_string();
    let user = blocking(&state, move |db| {
        db.get_user_by_id(&user_id)?.map(|row| row.to_user()).transpose()
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(user))
}

/// Opt in or out of course announcements. Fires the subscription webhook on change.
pub async fn set_subscription(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubscriptionToggleRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub.to_string();
    let enabled = req.enabled;
    let changed = blocking(&state, move |db| db.set_subscription_enabled(&user_id, enabled)).await?;

    if changed {
        info!("{} subscription enabled={}", claims.username, enabled);
        state
            .webhooks
            .subscription_changed(claims.sub, &claims.username, enabled);
    }

    Ok(Json(serde_json::json!({ "enabled": enabled, "changed": changed })))
}
