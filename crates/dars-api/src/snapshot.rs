use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use dars_types::api::Claims;
use dars_types::feed::{Filter, FilterOp, SnapshotQuery, Table};
use dars_types::models::is_participant;

use crate::auth::AppState;
use crate::blocking;

/// `GET /rest/{table}?col=op.value&order=col.dir&limit=n`
///
/// The one-shot read live lists are seeded from. Reads larger than
/// `dars_db::queries::MAX_SNAPSHOT_ROWS` keep the newest rows.
pub async fn read_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let table: Table = table.parse().map_err(|_| StatusCode::NOT_FOUND)?;

    let query = SnapshotQuery::from_query_pairs(
        table,
        params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    )
    .map_err(|e| {
        warn!("rejected snapshot on {}: {}", table, e);
        StatusCode::BAD_REQUEST
    })?;

    if !may_read(&query, claims.sub) {
        return Err(StatusCode::FORBIDDEN);
    }

    let rows = blocking(&state, move |db| db.snapshot(&query)).await?;
    let body = rows
        .iter()
        .map(|row| row.to_value())
        .collect::<Result<Vec<Value>, _>>()
        .map_err(|e| {
            error!("failed to encode {} rows: {}", table, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(body))
}

/// Private messages are readable only through a conversation the caller is in.
pub fn may_read(query: &SnapshotQuery, user_id: Uuid) -> bool {
    if query.table != Table::PrivateMessages {
        return true;
    }
    query
        .filters
        .iter()
        .any(|f| is_own_conversation(f, user_id))
}

fn is_own_conversation(filter: &Filter, user_id: Uuid) -> bool {
    filter.column == "conversation_key"
        && filter.op == FilterOp::Eq
        && is_participant(&filter.value, user_id)
}
