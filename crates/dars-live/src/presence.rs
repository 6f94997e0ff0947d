use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use dars_types::models::UNKNOWN_DISPLAY_NAME;

use crate::backend::Roster;
use crate::context::AppContext;
use crate::error::LiveError;
use crate::mount::{Guarded, Mount};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Disconnected,
    /// Joined, waiting for the first sync.
    Syncing,
    Synced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnlineUser {
    pub connection_key: String,
    pub display_name: String,
    pub user_id: Option<Uuid>,
    pub online_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceState {
    pub status: PresenceStatus,
    pub users: Vec<OnlineUser>,
    /// Why the last join failed, until the next `rejoin`.
    pub error: Option<String>,
}

impl PresenceState {
    fn disconnected() -> Self {
        Self {
            status: PresenceStatus::Disconnected,
            users: Vec::new(),
            error: None,
        }
    }
}

/// Flatten a roster into display entries, earliest arrival first.
pub fn roster_users(roster: &Roster) -> Vec<OnlineUser> {
    let mut users: Vec<OnlineUser> = roster
        .iter()
        .map(|(key, meta)| OnlineUser {
            connection_key: key.clone(),
            display_name: meta
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(UNKNOWN_DISPLAY_NAME)
                .to_string(),
            user_id: meta.user_id,
            online_at: meta.online_at,
        })
        .collect();
    users.sort_by(|a, b| {
        a.online_at
            .cmp(&b.online_at)
            .then_with(|| a.connection_key.cmp(&b.connection_key))
    });
    users
}

/// Membership of one presence channel, replaced wholesale on every sync.
pub struct PresenceTracker {
    ctx: AppContext,
    channel: String,
    state: Arc<watch::Sender<PresenceState>>,
    mount: Option<Mount>,
}

impl PresenceTracker {
    /// Join `channel` announcing the session's display name.
    pub fn join(ctx: &AppContext, channel: impl Into<String>) -> Self {
        let (state, _) = watch::channel(PresenceState::disconnected());
        let mut tracker = Self {
            ctx: ctx.clone(),
            channel: channel.into(),
            state: Arc::new(state),
            mount: None,
        };
        tracker.start();
        tracker
    }

    fn start(&mut self) {
        let ctx = self.ctx.clone();
        let channel = self.channel.clone();
        self.mount = Some(Mount::spawn(&self.state, move |state| track(ctx, channel, state)));
    }

    /// Leave if still joined, then join again. The way back from a failed
    /// join or a closed channel.
    pub fn rejoin(&mut self) {
        self.leave();
        self.start();
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> PresenceState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> PresenceStatus {
        self.state.borrow().status
    }

    pub fn users(&self) -> Vec<OnlineUser> {
        self.state.borrow().users.clone()
    }

    pub fn watch(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    pub fn leave(&mut self) {
        if let Some(mount) = self.mount.take() {
            mount.stop(&self.state);
            self.state.send_replace(PresenceState::disconnected());
            debug!("left presence channel {}", self.channel);
        }
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.leave();
    }
}

async fn track(ctx: AppContext, channel: String, state: Guarded<PresenceState>) {
    let name = ctx.session.shown_name().to_string();
    let connect = ctx.config.connect_timeout;
    let joined = tokio::time::timeout(connect, ctx.backend.join_presence(&channel, Some(name)))
        .await
        .unwrap_or_else(|_| {
            Err(LiveError::Timeout {
                what: "presence join",
                after: connect,
            })
        });
    let mut syncs = match joined {
        Ok(syncs) => syncs,
        Err(e) => {
            warn!("joining presence channel {} failed: {}", channel, e);
            state.modify(|s| {
                *s = PresenceState::disconnected();
                s.error = Some(e.to_string());
                true
            });
            return;
        }
    };

    state.modify(|s| {
        s.status = PresenceStatus::Syncing;
        s.error = None;
        true
    });

    while let Some(roster) = syncs.recv().await {
        let users = roster_users(&roster);
        state.modify(|s| {
            s.status = PresenceStatus::Synced;
            s.users = users;
            true
        });
    }

    debug!("presence channel {} closed", channel);
    state.modify(|s| {
        *s = PresenceState::disconnected();
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dars_types::models::PresenceMeta;

    #[test]
    fn missing_names_get_placeholder() {
        let now = Utc::now();
        let roster = Roster::from([
            (
                "b".to_string(),
                PresenceMeta {
                    display_name: Some("زهرا".into()),
                    user_id: None,
                    online_at: Some(now),
                },
            ),
            (
                "a".to_string(),
                PresenceMeta {
                    display_name: Some("  ".into()),
                    user_id: None,
                    online_at: Some(now - Duration::minutes(1)),
                },
            ),
            ("c".to_string(), PresenceMeta::default()),
        ]);

        let users = roster_users(&roster);
        let names: Vec<&str> = users.iter().map(|u| u.display_name.as_str()).collect();
        // None sorts before Some
        assert_eq!(names, vec![UNKNOWN_DISPLAY_NAME, UNKNOWN_DISPLAY_NAME, "زهرا"]);
        assert_eq!(users[0].connection_key, "c");
    }
}
