use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use dars_types::feed::{ChangeRecord, SnapshotQuery, SubscriptionSpec};
use dars_types::models::{Message, PresenceMeta, PrivateMessage, Reaction, RowId};

use crate::error::LiveError;

/// connection key -> payload, replaced wholesale on every sync.
pub type Roster = HashMap<String, PresenceMeta>;

/// Everything the live consumers need from the backend.
///
/// Streams end when the backend side goes away. Dropping a receiver closes
/// the subscription or leaves the presence channel.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// One-shot bulk read. Rows stay loosely typed until a list decodes them.
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<Vec<Value>, LiveError>;

    /// Resolves once the subscription is live on the server.
    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<mpsc::Receiver<ChangeRecord>, LiveError>;

    async fn join_presence(
        &self,
        channel: &str,
        display_name: Option<String>,
    ) -> Result<mpsc::Receiver<Roster>, LiveError>;

    async fn send_message(&self, topic_id: RowId, body: &str) -> Result<Message, LiveError>;

    async fn send_private_message(
        &self,
        recipient_id: Uuid,
        body: &str,
    ) -> Result<PrivateMessage, LiveError>;

    async fn send_reaction(
        &self,
        webinar_id: RowId,
        reaction_type: &str,
    ) -> Result<Reaction, LiveError>;
}
