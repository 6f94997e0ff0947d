use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use dars_types::feed::Filter;
use dars_types::models::{Message, RowId, Topic};

use crate::context::AppContext;
use crate::error::LiveError;
use crate::live_list::{ListSource, ListState, LiveList, Phase};
use crate::reconcile::ListPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Pending,
    Failed(String),
    /// Accepted by the server as the given message id.
    Sent(RowId),
}

/// A message typed by this client, tracked until the feed echoes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub local_id: Uuid,
    pub topic_id: RowId,
    pub body: String,
    pub delivery: Delivery,
}

fn topic_source(room_id: Option<RowId>) -> ListSource<Topic> {
    let source = ListSource::table(ListPolicy::append().only(|t: &Topic| t.is_active))
        .snapshot_filter(Filter::eq("is_active", true));
    match room_id {
        Some(room_id) => source.scoped("room_id", room_id),
        None => source,
    }
}

fn message_source(topic_id: RowId) -> ListSource<Message> {
    ListSource::table(ListPolicy::append()).scoped("topic_id", topic_id)
}

/// Topic-scoped group chat: the active topics of a room and the messages of
/// the selected one.
pub struct ChatRoom {
    ctx: AppContext,
    room_id: Option<RowId>,
    topics: LiveList<Topic>,
    selected: Option<(RowId, LiveList<Message>)>,
    outbox: watch::Sender<Vec<Outgoing>>,
}

impl ChatRoom {
    pub fn open(ctx: &AppContext, room_id: Option<RowId>) -> Self {
        let (outbox, _) = watch::channel(Vec::new());
        Self {
            ctx: ctx.clone(),
            room_id,
            topics: LiveList::mount(ctx, topic_source(room_id)),
            selected: None,
            outbox,
        }
    }

    pub fn room_id(&self) -> Option<RowId> {
        self.room_id
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.topics.items()
    }

    pub fn topics_phase(&self) -> Phase {
        self.topics.phase()
    }

    pub fn watch_topics(&self) -> watch::Receiver<ListState<Topic>> {
        self.topics.watch()
    }

    /// Switch the message view. The previous topic's subscription is closed
    /// before the new one opens.
    pub fn select_topic(&mut self, topic_id: RowId) {
        if self.selected_topic() == Some(topic_id) {
            return;
        }
        if let Some((previous, mut list)) = self.selected.take() {
            list.unmount();
            debug!("left topic {}", previous);
        }
        // Sent entries of the old topic can no longer be echoed.
        self.outbox.send_if_modified(|outbox| {
            let before = outbox.len();
            outbox.retain(|e| !matches!(e.delivery, Delivery::Sent(_)));
            outbox.len() != before
        });
        self.selected = Some((topic_id, LiveList::mount(&self.ctx, message_source(topic_id))));
    }

    pub fn selected_topic(&self) -> Option<RowId> {
        self.selected.as_ref().map(|(id, _)| *id)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.selected
            .as_ref()
            .map(|(_, list)| list.items())
            .unwrap_or_default()
    }

    pub fn pinned(&self) -> Vec<Message> {
        self.messages().into_iter().filter(|m| m.is_pinned).collect()
    }

    pub fn messages_phase(&self) -> Option<Phase> {
        self.selected.as_ref().map(|(_, list)| list.phase())
    }

    pub fn watch_messages(&self) -> Option<watch::Receiver<ListState<Message>>> {
        self.selected.as_ref().map(|(_, list)| list.watch())
    }

    /// Outgoing messages the feed has not delivered yet.
    pub fn outbox(&self) -> Vec<Outgoing> {
        let echoed = self.messages();
        self.outbox
            .borrow()
            .iter()
            .filter(|entry| !is_echoed(entry, &echoed))
            .cloned()
            .collect()
    }

    pub fn watch_outbox(&self) -> watch::Receiver<Vec<Outgoing>> {
        self.outbox.subscribe()
    }

    /// Send to the selected topic. The message shows up in `messages` when
    /// the feed delivers it; until then it sits in the outbox.
    pub async fn send(&self, body: &str) -> Result<Message, LiveError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(LiveError::EmptyMessage);
        }
        let topic_id = self.selected_topic().ok_or(LiveError::NoTopicSelected)?;

        let local_id = Uuid::new_v4();
        let echoed = self.messages();
        self.outbox.send_modify(|outbox| {
            prune_sent(outbox, &echoed);
            outbox.push(Outgoing {
                local_id,
                topic_id,
                body: body.to_string(),
                delivery: Delivery::Pending,
            });
        });

        self.deliver(local_id, topic_id, body).await
    }

    /// Resend a message whose delivery failed.
    pub async fn retry_send(&self, local_id: Uuid) -> Result<Message, LiveError> {
        let mut retried = None;
        self.outbox.send_if_modified(|outbox| {
            let entry = outbox
                .iter_mut()
                .find(|e| e.local_id == local_id && matches!(e.delivery, Delivery::Failed(_)));
            match entry {
                Some(entry) => {
                    entry.delivery = Delivery::Pending;
                    retried = Some((entry.topic_id, entry.body.clone()));
                    true
                }
                None => false,
            }
        });

        let (topic_id, body) = retried.ok_or(LiveError::NotRetryable)?;
        self.deliver(local_id, topic_id, &body).await
    }

    async fn deliver(&self, local_id: Uuid, topic_id: RowId, body: &str) -> Result<Message, LiveError> {
        let result = self.ctx.backend.send_message(topic_id, body).await;
        let delivery = match &result {
            Ok(message) => Delivery::Sent(message.id),
            Err(e) => {
                warn!("sending to topic {} failed: {}", topic_id, e);
                Delivery::Failed(e.to_string())
            }
        };
        self.outbox.send_modify(|outbox| {
            if let Some(entry) = outbox.iter_mut().find(|e| e.local_id == local_id) {
                entry.delivery = delivery;
            }
        });
        result
    }

    /// Remount the topic list and the selected topic's messages.
    pub fn reload(&mut self) {
        self.topics.retry();
        if let Some((_, list)) = self.selected.as_mut() {
            list.retry();
        }
    }
}

fn is_echoed(entry: &Outgoing, messages: &[Message]) -> bool {
    match entry.delivery {
        Delivery::Sent(id) => messages.iter().any(|m| m.id == id),
        _ => false,
    }
}

/// Drop sent entries the feed has delivered.
fn prune_sent(outbox: &mut Vec<Outgoing>, messages: &[Message]) -> bool {
    let before = outbox.len();
    outbox.retain(|entry| !is_echoed(entry, messages));
    outbox.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dars_types::models::SenderRole;

    fn entry(delivery: Delivery) -> Outgoing {
        Outgoing {
            local_id: Uuid::new_v4(),
            topic_id: 1,
            body: "سوال دارم".into(),
            delivery,
        }
    }

    fn message(id: RowId) -> Message {
        Message {
            id,
            sender_name: "سارا".into(),
            sender_role: SenderRole::Member,
            message: "سوال دارم".into(),
            topic_id: Some(1),
            user_id: None,
            is_pinned: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn echoed_entries_are_pruned() {
        let mut outbox = vec![
            entry(Delivery::Sent(7)),
            entry(Delivery::Sent(8)),
            entry(Delivery::Pending),
            entry(Delivery::Failed("503".into())),
        ];
        assert!(prune_sent(&mut outbox, &[message(7)]));
        assert_eq!(outbox.len(), 3);
        assert!(!prune_sent(&mut outbox, &[message(7)]));
        assert!(!prune_sent(&mut outbox, &[]));
        assert!(outbox.iter().any(|e| e.delivery == Delivery::Sent(8)));
    }
}
