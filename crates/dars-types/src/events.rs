use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::feed::{ChangeRecord, EventFilter, Filter, Table};
use crate::models::PresenceMeta;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: Uuid,
        username: String,
        /// Presence key for this connection
        connection_key: String,
    },

    /// A subscription was accepted and will start delivering changes
    Subscribed { subscription_id: String },

    /// A row change matching one of this connection's subscriptions
    Change {
        subscription_id: String,
        change: ChangeRecord,
    },

    /// Full current roster of a presence channel, keyed by connection
    PresenceSync {
        channel: String,
        roster: HashMap<String, PresenceMeta>,
    },

    /// A command was rejected
    Error {
        subscription_id: Option<String>,
        message: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Open a logical change-feed channel on this connection.
    Subscribe {
        subscription_id: String,
        table: Table,
        #[serde(default)]
        event: EventFilter,
        #[serde(default)]
        filter: Option<Filter>,
    },

    /// Close a previously opened channel.
    Unsubscribe { subscription_id: String },

    /// Join a presence channel with the given display name.
    PresenceJoin {
        channel: String,
        display_name: Option<String>,
    },

    /// Leave a presence channel.
    PresenceLeave { channel: String },
}
