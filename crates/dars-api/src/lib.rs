pub mod auth;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod private;
pub mod profile;
pub mod reactions;
pub mod snapshot;
pub mod topics;
pub mod webhooks;

use axum::http::StatusCode;
use tracing::error;

use dars_db::Database;
use dars_gateway::dispatcher::Dispatcher;
use dars_types::api::Claims;

use crate::auth::{AppState, AppStateInner};

/// Run a blocking DB call off the async runtime, mapping failures to 500.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    run_blocking(state, move |app| f(&app.db)).await
}

/// Run a mutation and publish its change records under the database writer
/// lock, so subscribers see changes in the order they were committed.
pub(crate) async fn commit<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database, &Dispatcher) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    run_blocking(state, move |app| app.db.write(|db| f(db, &app.dispatcher))).await
}

async fn run_blocking<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&AppStateInner) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

pub(crate) fn require_moderator(claims: &Claims) -> Result<(), StatusCode> {
    if claims.role.can_moderate() {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

pub(crate) fn require_admin(claims: &Claims) -> Result<(), StatusCode> {
    if claims.role == dars_types::models::SenderRole::Admin {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use uuid::Uuid;

    use dars_db::Database;
    use dars_gateway::dispatcher::Dispatcher;
    use dars_types::api::Claims;
    use dars_types::models::SenderRole;

    use crate::auth::{AppState, AppStateInner};
    use crate::webhooks::Webhooks;

    pub fn state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            webhooks: Webhooks::default(),
        })
    }

    /// Registers a user straight in the database and returns their claims.
    pub fn user(state: &AppState, username: &str) -> Claims {
        let id = Uuid::new_v4();
        let role = state
            .db
            .create_user(&id.to_string(), username, None, "hash")
            .unwrap();
        Claims {
            sub: id,
            username: username.into(),
            role,
            exp: usize::MAX,
        }
    }

    pub fn moderator(state: &AppState) -> Claims {
        let mut claims = user(state, "moderator");
        claims.role = SenderRole::Moderator;
        claims
    }
}
