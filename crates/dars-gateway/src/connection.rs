use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dars_types::events::{GatewayCommand, GatewayEvent};
use dars_types::feed::{SubscriptionSpec, Table};
use dars_types::models::{PresenceMeta, is_participant};

use crate::dispatcher::{Dispatcher, Outbound};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Per-connection state shared between the send and receive halves.
#[derive(Default)]
pub struct ConnectionState {
    /// subscription id -> scope
    pub subscriptions: RwLock<HashMap<String, SubscriptionSpec>>,
    /// presence channels this connection joined
    pub presence_channels: RwLock<HashSet<String>>,
}

impl ConnectionState {
    /// Events this connection should receive for one dispatcher item.
    pub async fn deliveries(&self, outbound: &Outbound) -> Vec<GatewayEvent> {
        match outbound {
            Outbound::Change(change) => {
                let subs = self.subscriptions.read().await;
                subs.iter()
                    .filter(|(_, spec)| spec.matches(change))
                    .map(|(id, _)| GatewayEvent::Change {
                        subscription_id: id.clone(),
                        change: (**change).clone(),
                    })
                    .collect()
            }
            Outbound::PresenceSync { channel, roster } => {
                let joined = self.presence_channels.read().await;
                if joined.contains(channel) {
                    vec![GatewayEvent::PresenceSync {
                        channel: channel.clone(),
                        roster: (**roster).clone(),
                    }]
                } else {
                    vec![]
                }
            }
        }
    }
}

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer, so we go straight
/// to Ready + event loop.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();
    let connection_key = Uuid::new_v4().simple().to_string();

    info!("{} ({}) connected to gateway as {}", username, user_id, connection_key);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
        connection_key: connection_key.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, user_id, username, connection_key).await;
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| warn!("failed to encode event: {}", e))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ())
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    username: String,
    connection_key: String,
) {
    let mut broadcast_rx = dispatcher.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let state = Arc::new(ConnectionState::default());
    let send_state = state.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward matching feed items + direct replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let outbound = match result {
                        Ok(outbound) => outbound,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // Clients recover from gaps by remounting.
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    for event in send_state.deliveries(&outbound).await {
                        if send_event(&mut sender, &event).await.is_err() {
                            return;
                        }
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_state = state.clone();
    let recv_key = connection_key.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &recv_dispatcher,
                            &recv_state,
                            &reply_tx,
                            user_id,
                            &recv_key,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_username,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = reply_tx.send(GatewayEvent::Error {
                            subscription_id: None,
                            message: format!("bad command: {}", e),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.presence_disconnect(&connection_key).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Validate a subscription and check the caller may see what it scopes.
fn authorize(spec: &SubscriptionSpec, user_id: Uuid) -> Result<(), String> {
    spec.validate().map_err(|e| e.to_string())?;
    if spec.table == Table::PrivateMessages {
        let own = spec
            .filter
            .as_ref()
            .is_some_and(|f| f.column == "conversation_key" && is_participant(&f.value, user_id));
        if !own {
            return Err("private messages require a conversation_key filter you take part in".into());
        }
    }
    Ok(())
}

async fn handle_command(
    dispatcher: &Dispatcher,
    state: &ConnectionState,
    reply_tx: &mpsc::UnboundedSender<GatewayEvent>,
    user_id: Uuid,
    connection_key: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Subscribe {
            subscription_id,
            table,
            event,
            filter,
        } => {
            let spec = SubscriptionSpec {
                table,
                event,
                filter,
            };
            let reply = match authorize(&spec, user_id) {
                Ok(()) => {
                    debug!("{} subscribing {} to {:?}", connection_key, subscription_id, spec);
                    state
                        .subscriptions
                        .write()
                        .await
                        .insert(subscription_id.clone(), spec);
                    GatewayEvent::Subscribed { subscription_id }
                }
                Err(message) => GatewayEvent::Error {
                    subscription_id: Some(subscription_id),
                    message,
                },
            };
            let _ = reply_tx.send(reply);
        }

        GatewayCommand::Unsubscribe { subscription_id } => {
            debug!("{} unsubscribing {}", connection_key, subscription_id);
            state
                .subscriptions
                .write()
                .await
                .remove(&subscription_id);
        }

        GatewayCommand::PresenceJoin {
            channel,
            display_name,
        } => {
            state
                .presence_channels
                .write()
                .await
                .insert(channel.clone());
            let meta = PresenceMeta {
                display_name,
                user_id: Some(user_id),
                online_at: Some(Utc::now()),
            };
            dispatcher.presence_join(&channel, connection_key, meta).await;
        }

        GatewayCommand::PresenceLeave { channel } => {
            dispatcher.presence_leave(&channel, connection_key).await;
            state
                .presence_channels
                .write()
                .await
                .remove(&channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dars_types::feed::{ChangeRecord, Filter, Row};
    use dars_types::models::{Message as ChatMessage, SenderRole};

    fn change(topic_id: i64) -> Outbound {
        let row = Row::Message(ChatMessage {
            id: 1,
            sender_name: "حسین".into(),
            sender_role: SenderRole::Admin,
            message: "شروع کلاس".into(),
            topic_id: Some(topic_id),
            user_id: None,
            is_pinned: false,
            created_at: Utc::now(),
        });
        Outbound::Change(Arc::new(ChangeRecord::insert(&row).unwrap()))
    }

    #[tokio::test]
    async fn delivers_changes_per_matching_subscription() {
        let state = ConnectionState::default();
        {
            let mut subs = state.subscriptions.write().await;
            subs.insert(
                "topic-3".into(),
                SubscriptionSpec::table(Table::Messages).with_filter(Filter::eq("topic_id", 3)),
            );
            subs.insert("all".into(), SubscriptionSpec::table(Table::Messages));
            subs.insert("topics".into(), SubscriptionSpec::table(Table::Topics));
        }

        let mut ids: Vec<String> = state
            .deliveries(&change(3))
            .await
            .into_iter()
            .map(|e| match e {
                GatewayEvent::Change { subscription_id, .. } => subscription_id,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["all", "topic-3"]);

        assert_eq!(state.deliveries(&change(4)).await.len(), 1);
    }

    #[test]
    fn private_subscriptions_are_scoped_to_participants() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let key = dars_types::models::conversation_key(me, other);

        let open = SubscriptionSpec::table(Table::PrivateMessages);
        assert!(authorize(&open, me).is_err());

        let mine = open.clone().with_filter(Filter::eq("conversation_key", &key));
        assert!(authorize(&mine, me).is_ok());
        assert!(authorize(&mine, Uuid::new_v4()).is_err());

        let bad_column = SubscriptionSpec::table(Table::Topics).with_filter(Filter::eq("secret", 1));
        assert!(authorize(&bad_column, me).is_err());
    }

    #[tokio::test]
    async fn presence_only_for_joined_channels() {
        let state = ConnectionState::default();
        let sync = Outbound::PresenceSync {
            channel: "online-users".into(),
            roster: Arc::new(HashMap::new()),
        };
        assert!(state.deliveries(&sync).await.is_empty());

        state
            .presence_channels
            .write()
            .await
            .insert("online-users".into());
        assert_eq!(state.deliveries(&sync).await.len(), 1);
    }
}
