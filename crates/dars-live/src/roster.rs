use std::collections::HashSet;

use tokio::sync::watch;

use crate::context::AppContext;
use crate::presence::{OnlineUser, PresenceState, PresenceStatus, PresenceTracker};

/// Site-wide presence channel every signed-in client joins.
pub const ONLINE_CHANNEL: &str = "online-users";

/// Who is online right now.
pub struct OnlineRoster {
    tracker: PresenceTracker,
}

impl OnlineRoster {
    pub fn join(ctx: &AppContext) -> Self {
        Self {
            tracker: PresenceTracker::join(ctx, ONLINE_CHANNEL),
        }
    }

    pub fn users(&self) -> Vec<OnlineUser> {
        self.tracker.users()
    }

    /// Distinct people; one user with two open tabs counts once.
    pub fn count(&self) -> usize {
        distinct_people(&self.tracker.users())
    }

    pub fn status(&self) -> PresenceStatus {
        self.tracker.status()
    }

    pub fn watch(&self) -> watch::Receiver<PresenceState> {
        self.tracker.watch()
    }

    pub fn rejoin(&mut self) {
        self.tracker.rejoin();
    }

    pub fn leave(&mut self) {
        self.tracker.leave();
    }
}

fn distinct_people(users: &[OnlineUser]) -> usize {
    users
        .iter()
        .map(|u| match u.user_id {
            Some(id) => id.to_string(),
            None => u.connection_key.clone(),
        })
        .collect::<HashSet<_>>()
        .len()
}
