//! Database row types that never leave the server.
//! Live-table rows map straight onto the dars-types structs in `queries`.

use anyhow::{Context, Result};
use dars_types::models::{SenderRole, User};

use crate::parse_ts;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub role: String,
    pub password: String,
    pub subscription_enabled: bool,
    pub created_at: String,
}

impl UserRow {
    /// Name shown next to this user's messages.
    pub fn shown_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Public view of the account, without the password hash.
    pub fn to_user(&self) -> Result<User> {
        Ok(User {
            id: self.id.parse().context("bad user id")?,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role: SenderRole::parse(&self.role).context("bad user role")?,
            subscription_enabled: self.subscription_enabled,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// Fields of a message as supplied by the sender.
pub struct NewMessage<'a> {
    pub sender_name: &'a str,
    pub sender_role: &'a str,
    pub message: &'a str,
    pub topic_id: Option<i64>,
    pub user_id: Option<&'a str>,
}
