//! [`Backend`] over the dars server: REST for snapshots and sends, one
//! gateway WebSocket per subscription or presence channel.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use dars_types::api::{
    LoginRequest, LoginResponse, SendMessageRequest, SendPrivateMessageRequest,
    SendReactionRequest,
};
use dars_types::events::{GatewayCommand, GatewayEvent};
use dars_types::feed::{ChangeRecord, SnapshotQuery, SubscriptionSpec};
use dars_types::models::{Message, PrivateMessage, Reaction, RowId};

use crate::backend::{Backend, Roster};
use crate::config::LiveConfig;
use crate::context::Session;
use crate::error::LiveError;

type Gateway = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RemoteBackend {
    http: reqwest::Client,
    base: Url,
    token: String,
    buffer: usize,
}

impl RemoteBackend {
    pub fn new(base_url: &str, token: impl Into<String>, config: &LiveConfig) -> Result<Self, LiveError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(base_url)?,
            token: token.into(),
            buffer: config.event_buffer.max(1),
        })
    }

    /// Log in with a password and return a backend bound to the issued token.
    pub async fn login(
        base_url: &str,
        username: &str,
        password: &str,
        config: &LiveConfig,
    ) -> Result<(Self, Session), LiveError> {
        let mut backend = Self::new(base_url, String::new(), config)?;
        let url = backend.base.join("auth/login")?;
        let resp = backend
            .http
            .post(url)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let login: LoginResponse = read_json(resp).await?;
        info!("logged in as {} ({})", login.username, login.user_id);

        let session = Session::from(&login);
        backend.token = login.token;
        Ok((backend, session))
    }

    fn gateway_url(&self) -> Result<Url, LiveError> {
        gateway_url(&self.base, &self.token)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, LiveError> {
        let resp = self
            .http
            .post(self.base.join(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        read_json(resp).await
    }

    /// Connect and wait for the server's `Ready`.
    async fn open_gateway(&self) -> Result<Gateway, LiveError> {
        let url = self.gateway_url()?;
        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        match next_event(&mut ws).await? {
            GatewayEvent::Ready { connection_key, .. } => {
                debug!("gateway ready as {}", connection_key);
                Ok(ws)
            }
            GatewayEvent::Error { message, .. } => Err(LiveError::Rejected(message)),
            other => Err(LiveError::Rejected(format!("expected Ready, got {:?}", other))),
        }
    }
}

/// `http(s)://host/base` -> `ws(s)://host/base/gateway?token=...`
fn gateway_url(base: &Url, token: &str) -> Result<Url, LiveError> {
    let mut url = base.join("gateway")?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| LiveError::Rejected(format!("cannot use {} as a gateway", base)))?;
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, LiveError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LiveError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

async fn send_command(ws: &mut Gateway, cmd: &GatewayCommand) -> Result<(), LiveError> {
    let text = serde_json::to_string(cmd)?;
    ws.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

/// Next decodable gateway event, answering pings on the way.
async fn next_event(ws: &mut Gateway) -> Result<GatewayEvent, LiveError> {
    while let Some(msg) = ws.next().await {
        match msg? {
            WsMessage::Text(text) => match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                Ok(event) => return Ok(event),
                Err(e) => warn!("undecodable gateway frame: {}", e),
            },
            WsMessage::Ping(payload) => ws.send(WsMessage::Pong(payload)).await?,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Err(LiveError::Closed)
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<Vec<Value>, LiveError> {
        let url = self.base.join(&format!("rest/{}", query.table))?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&query.to_query_pairs())
            .send()
            .await?;
        read_json(resp).await
    }

    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<mpsc::Receiver<ChangeRecord>, LiveError> {
        let mut ws = self.open_gateway().await?;
        let subscription_id = Uuid::new_v4().simple().to_string();
        send_command(
            &mut ws,
            &GatewayCommand::Subscribe {
                subscription_id: subscription_id.clone(),
                table: spec.table,
                event: spec.event,
                filter: spec.filter.clone(),
            },
        )
        .await?;

        loop {
            match next_event(&mut ws).await? {
                GatewayEvent::Subscribed { subscription_id: id } if id == subscription_id => break,
                GatewayEvent::Error { message, .. } => return Err(LiveError::Rejected(message)),
                other => debug!("ignoring {:?} before subscription ack", other),
            }
        }
        debug!("subscription {} live on {}", subscription_id, spec.table);

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(forward_changes(ws, subscription_id, tx));
        Ok(rx)
    }

    async fn join_presence(
        &self,
        channel: &str,
        display_name: Option<String>,
    ) -> Result<mpsc::Receiver<Roster>, LiveError> {
        let mut ws = self.open_gateway().await?;
        send_command(
            &mut ws,
            &GatewayCommand::PresenceJoin {
                channel: channel.to_string(),
                display_name,
            },
        )
        .await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(forward_presence(ws, channel.to_string(), tx));
        Ok(rx)
    }

    async fn send_message(&self, topic_id: RowId, body: &str) -> Result<Message, LiveError> {
        self.post(
            &format!("topics/{}/messages", topic_id),
            &SendMessageRequest {
                message: body.to_string(),
            },
        )
        .await
    }

    async fn send_private_message(
        &self,
        recipient_id: Uuid,
        body: &str,
    ) -> Result<PrivateMessage, LiveError> {
        self.post(
            "private-messages",
            &SendPrivateMessageRequest {
                recipient_id,
                message: body.to_string(),
            },
        )
        .await
    }

    async fn send_reaction(
        &self,
        webinar_id: RowId,
        reaction_type: &str,
    ) -> Result<Reaction, LiveError> {
        self.post(
            &format!("webinars/{}/reactions", webinar_id),
            &SendReactionRequest {
                reaction_type: reaction_type.to_string(),
            },
        )
        .await
    }
}

/// Pump change frames until either side goes away. A dropped receiver
/// unsubscribes and closes the socket.
async fn forward_changes(mut ws: Gateway, subscription_id: String, tx: mpsc::Sender<ChangeRecord>) {
    loop {
        tokio::select! {
            _ = tx.closed() => {
                let _ = send_command(&mut ws, &GatewayCommand::Unsubscribe {
                    subscription_id: subscription_id.clone(),
                }).await;
                break;
            }
            event = next_event(&mut ws) => match event {
                Ok(GatewayEvent::Change { subscription_id: id, change }) if id == subscription_id => {
                    if tx.send(change).await.is_err() {
                        break;
                    }
                }
                Ok(GatewayEvent::Error { message, .. }) => warn!("gateway error on {}: {}", subscription_id, message),
                Ok(_) => {}
                Err(e) => {
                    debug!("subscription {} ended: {}", subscription_id, e);
                    break;
                }
            }
        }
    }
    let _ = ws.close(None).await;
}

async fn forward_presence(mut ws: Gateway, channel: String, tx: mpsc::Sender<Roster>) {
    loop {
        tokio::select! {
            _ = tx.closed() => {
                let _ = send_command(&mut ws, &GatewayCommand::PresenceLeave {
                    channel: channel.clone(),
                }).await;
                break;
            }
            event = next_event(&mut ws) => match event {
                Ok(GatewayEvent::PresenceSync { channel: synced, roster }) if synced == channel => {
                    if tx.send(roster).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("presence channel {} ended: {}", channel, e);
                    break;
                }
            }
        }
    }
    let _ = ws.close(None).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_swaps_scheme_and_carries_token() {
        let base = Url::parse("https://dars.example/api/").unwrap();
        let url = gateway_url(&base, "abc.def").unwrap();
        assert_eq!(url.as_str(), "wss://dars.example/api/gateway?token=abc.def");

        let base = Url::parse("http://127.0.0.1:3000").unwrap();
        let url = gateway_url(&base, "t").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:3000/gateway?token=t");
    }
}
