use std::sync::Arc;

use uuid::Uuid;

use dars_types::api::LoginResponse;
use dars_types::models::SenderRole;

use crate::backend::Backend;
use crate::config::LiveConfig;

/// The signed-in user, as returned by login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub role: SenderRole,
}

impl Session {
    /// Name announced on presence channels.
    pub fn shown_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

impl From<&LoginResponse> for Session {
    fn from(login: &LoginResponse) -> Self {
        Self {
            user_id: login.user_id,
            username: login.username.clone(),
            display_name: login.display_name.clone(),
            role: login.role,
        }
    }
}

/// Handed to every consumer at mount time. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub backend: Arc<dyn Backend>,
    pub session: Session,
    pub config: LiveConfig,
}

impl AppContext {
    pub fn new(backend: Arc<dyn Backend>, session: Session, config: LiveConfig) -> Self {
        Self {
            backend,
            session,
            config,
        }
    }
}
