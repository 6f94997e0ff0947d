use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error};

use dars_types::feed::{ChangeRecord, Row};
use dars_types::models::PresenceMeta;

/// Full roster of one presence channel: connection key -> meta.
pub type Roster = HashMap<String, PresenceMeta>;

/// What the dispatcher fans out to every connection. Each connection decides
/// on its own whether the item concerns it.
#[derive(Debug, Clone)]
pub enum Outbound {
    Change(Arc<ChangeRecord>),
    PresenceSync { channel: String, roster: Arc<Roster> },
}

/// Change-data-capture fan-out plus presence channels.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for committed changes and presence syncs
    broadcast_tx: broadcast::Sender<Outbound>,

    /// Presence: channel -> (connection key -> meta)
    presence: RwLock<HashMap<String, Roster>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to everything the dispatcher publishes.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a committed change. Having no connected receivers is not an error.
    pub fn publish(&self, change: ChangeRecord) {
        debug!(
            "publish {:?} on {} (id {:?})",
            change.event_type,
            change.table,
            change.filter_row().and_then(|row| row.get("id"))
        );
        let _ = self.inner.broadcast_tx.send(Outbound::Change(Arc::new(change)));
    }

    pub fn publish_insert(&self, row: Row) {
        match ChangeRecord::insert(&row) {
            Ok(change) => self.publish(change),
            Err(e) => error!("failed to encode insert on {}: {}", row.table(), e),
        }
    }

    pub fn publish_update(&self, new: Row, old: Row) {
        match ChangeRecord::update(&new, &old) {
            Ok(change) => self.publish(change),
            Err(e) => error!("failed to encode update on {}: {}", new.table(), e),
        }
    }

    pub fn publish_delete(&self, old: Row) {
        match ChangeRecord::delete(&old) {
            Ok(change) => self.publish(change),
            Err(e) => error!("failed to encode delete on {}: {}", old.table(), e),
        }
    }

    /// Add (or replace) a connection's entry in a presence channel and sync
    /// the channel's full roster to its members.
    pub async fn presence_join(&self, channel: &str, connection_key: &str, meta: PresenceMeta) {
        let roster = {
            let mut presence = self.inner.presence.write().await;
            let roster = presence.entry(channel.to_string()).or_default();
            roster.insert(connection_key.to_string(), meta);
            Arc::new(roster.clone())
        };
        self.sync(channel, roster);
    }

    pub async fn presence_leave(&self, channel: &str, connection_key: &str) {
        let roster = {
            let mut presence = self.inner.presence.write().await;
            let Some(roster) = presence.get_mut(channel) else {
                return;
            };
            if roster.remove(connection_key).is_none() {
                return;
            }
            let snapshot = Arc::new(roster.clone());
            if roster.is_empty() {
                presence.remove(channel);
            }
            snapshot
        };
        self.sync(channel, roster);
    }

    /// Remove a closed connection from every presence channel it was in.
    pub async fn presence_disconnect(&self, connection_key: &str) {
        let synced: Vec<(String, Arc<Roster>)> = {
            let mut presence = self.inner.presence.write().await;
            let mut synced = Vec::new();
            for (channel, roster) in presence.iter_mut() {
                if roster.remove(connection_key).is_some() {
                    synced.push((channel.clone(), Arc::new(roster.clone())));
                }
            }
            presence.retain(|_, roster| !roster.is_empty());
            synced
        };
        for (channel, roster) in synced {
            self.sync(&channel, roster);
        }
    }

    fn sync(&self, channel: &str, roster: Arc<Roster>) {
        let _ = self.inner.broadcast_tx.send(Outbound::PresenceSync {
            channel: channel.to_string(),
            roster,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dars_types::feed::ChangeKind;
    use dars_types::models::Topic;

    fn meta(name: &str) -> PresenceMeta {
        PresenceMeta {
            display_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn next_sync(rx: &mut broadcast::Receiver<Outbound>) -> (String, Arc<Roster>) {
        match rx.try_recv().unwrap() {
            Outbound::PresenceSync { channel, roster } => (channel, roster),
            other => panic!("expected presence sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn publishes_changes_to_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.publish_insert(Row::Topic(Topic {
            id: 5,
            title: "ادبیات".into(),
            description: String::new(),
            room_id: None,
            is_active: true,
            created_at: Utc::now(),
        }));

        match rx.try_recv().unwrap() {
            Outbound::Change(change) => {
                assert_eq!(change.event_type, ChangeKind::Insert);
                assert_eq!(change.new.as_ref().unwrap()["id"], 5);
            }
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn presence_syncs_full_roster() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.presence_join("online-users", "c1", meta("علی")).await;
        dispatcher.presence_join("online-users", "c2", meta("نگار")).await;

        let (_, first) = next_sync(&mut rx);
        assert_eq!(first.len(), 1);
        let (channel, second) = next_sync(&mut rx);
        assert_eq!(channel, "online-users");
        assert_eq!(second.len(), 2);

        dispatcher.presence_leave("online-users", "c1").await;
        let (_, after_leave) = next_sync(&mut rx);
        assert_eq!(after_leave.keys().collect::<Vec<_>>(), vec!["c2"]);

        // leaving a channel you never joined is silent
        dispatcher.presence_leave("online-users", "nobody").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_leaves_every_channel() {
        let dispatcher = Dispatcher::new();
        dispatcher.presence_join("online-users", "c1", meta("علی")).await;
        dispatcher.presence_join("webinar-9", "c1", meta("علی")).await;
        dispatcher.presence_join("webinar-9", "c2", meta("رضا")).await;

        let mut rx = dispatcher.subscribe();
        dispatcher.presence_disconnect("c1").await;

        let mut synced = vec![next_sync(&mut rx), next_sync(&mut rx)];
        synced.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(synced[0].0, "online-users");
        assert!(synced[0].1.is_empty());
        assert_eq!(synced[1].1.keys().collect::<Vec<_>>(), vec!["c2"]);

        // a second disconnect finds nothing left to sync
        dispatcher.presence_disconnect("c1").await;
        assert!(rx.try_recv().is_err());
    }
}
