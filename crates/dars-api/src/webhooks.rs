//! Best-effort outbound webhooks.
//!
//! Every call is fire-and-forget: it runs on its own task, failures are
//! logged and swallowed, and nothing is retried.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use dars_types::models::Message;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WebhookEvent {
    #[serde(rename = "message.sent")]
    MessageSent,
    #[serde(rename = "subscription.enabled")]
    SubscriptionEnabled,
    #[serde(rename = "subscription.disabled")]
    SubscriptionDisabled,
}

#[derive(Clone, Default)]
pub struct Webhooks {
    client: reqwest::Client,
    message_url: Option<String>,
    subscription_url: Option<String>,
}

impl Webhooks {
    pub fn new(message_url: Option<String>, subscription_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            message_url,
            subscription_url,
        }
    }

    pub fn message_sent(&self, message: &Message) {
        let data = json!({
            "id": message.id,
            "topic_id": message.topic_id,
            "user_id": message.user_id,
            "sender_name": message.sender_name,
            "sender_role": message.sender_role,
            "message": message.message,
            "created_at": message.created_at,
        });
        self.fire(self.message_url.as_deref(), WebhookEvent::MessageSent, data);
    }

    pub fn subscription_changed(&self, user_id: Uuid, username: &str, enabled: bool) {
        let event = if enabled {
            WebhookEvent::SubscriptionEnabled
        } else {
            WebhookEvent::SubscriptionDisabled
        };
        let data = json!({ "user_id": user_id, "username": username });
        self.fire(self.subscription_url.as_deref(), event, data);
    }

    fn fire(&self, url: Option<&str>, event: WebhookEvent, data: Value) {
        let Some(url) = url else {
            return;
        };
        let body = envelope(event, data);
        let request = self.client.post(url).json(&body);
        let url = url.to_string();

        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("webhook {:?} delivered to {}", event, url);
                }
                Ok(resp) => warn!("webhook {:?} to {} returned {}", event, url, resp.status()),
                Err(e) => warn!("webhook {:?} to {} failed: {}", event, url, e),
            }
        });
    }
}

fn envelope(event: WebhookEvent, data: Value) -> Value {
    json!({
        "event": event,
        "data": data,
        "sent_at": Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_names_the_event() {
        let body = envelope(WebhookEvent::SubscriptionDisabled, json!({"user_id": 1}));
        assert_eq!(body["event"], "subscription.disabled");
        assert_eq!(body["data"]["user_id"], 1);
        assert!(body["sent_at"].is_string());
    }

    #[tokio::test]
    async fn unconfigured_webhooks_are_noops() {
        let hooks = Webhooks::default();
        hooks.subscription_changed(Uuid::new_v4(), "x", true);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_swallowed() {
        let hooks = Webhooks::new(Some("http://127.0.0.1:9/hook".into()), None);
        let message = Message {
            id: 1,
            sender_name: "لیلا".into(),
            sender_role: dars_types::models::SenderRole::Member,
            message: "سلام".into(),
            topic_id: Some(1),
            user_id: None,
            is_pinned: false,
            created_at: Utc::now(),
        };
        hooks.message_sent(&message);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
