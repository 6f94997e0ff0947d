use tokio::sync::watch;
use uuid::Uuid;

use dars_types::models::{PrivateMessage, conversation_key};

use crate::context::AppContext;
use crate::error::LiveError;
use crate::live_list::{ListSource, ListState, LiveList, Phase};
use crate::reconcile::ListPolicy;

/// A two-party conversation between the session user and `peer`.
pub struct PrivateThread {
    ctx: AppContext,
    peer: Uuid,
    key: String,
    list: LiveList<PrivateMessage>,
}

impl PrivateThread {
    pub fn open(ctx: &AppContext, peer: Uuid) -> Self {
        let key = conversation_key(ctx.session.user_id, peer);
        let source = ListSource::table(ListPolicy::append()).scoped("conversation_key", &key);
        Self {
            ctx: ctx.clone(),
            peer,
            key,
            list: LiveList::mount(ctx, source),
        }
    }

    pub fn peer(&self) -> Uuid {
        self.peer
    }

    pub fn conversation_key(&self) -> &str {
        &self.key
    }

    pub fn messages(&self) -> Vec<PrivateMessage> {
        self.list.items()
    }

    pub fn phase(&self) -> Phase {
        self.list.phase()
    }

    pub fn watch(&self) -> watch::Receiver<ListState<PrivateMessage>> {
        self.list.watch()
    }

    /// Messages addressed to the session user that are still unread.
    pub fn unread_count(&self) -> usize {
        let me = self.ctx.session.user_id;
        self.list
            .items()
            .iter()
            .filter(|m| m.recipient_id == me && !m.is_read)
            .count()
    }

    pub async fn send(&self, body: &str) -> Result<PrivateMessage, LiveError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(LiveError::EmptyMessage);
        }
        self.ctx.backend.send_private_message(self.peer, body).await
    }

    pub fn retry(&mut self) {
        self.list.retry();
    }
}
