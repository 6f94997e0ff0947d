#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, watch};
use uuid::Uuid;

use dars_live::{AppContext, Backend, LiveConfig, LiveError, Roster, Session};
use dars_types::feed::{ChangeRecord, Record, SnapshotQuery, SubscriptionSpec, Table};
use dars_types::models::{
    Message, Notification, NotificationType, PrivateMessage, Reaction, RowId, SenderRole, Topic,
};

const WAIT: Duration = Duration::from_secs(3);

/// In-memory stand-in for the server: serves scripted snapshots, fans pushed
/// change records out to matching subscriptions, and echoes sends onto the
/// feed the way the API does.
#[derive(Default)]
pub struct ScriptedBackend {
    rows: Mutex<HashMap<Table, Vec<Value>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fail_snapshots: AtomicBool,
    fail_sends: AtomicBool,
    stall_connects: AtomicBool,
    snapshot_calls: AtomicUsize,
    subscribers: Mutex<Vec<(SubscriptionSpec, mpsc::Sender<ChangeRecord>)>>,
    presence: Mutex<HashMap<String, Vec<mpsc::Sender<Roster>>>>,
    presence_names: Mutex<Vec<Option<String>>>,
    next_id: AtomicI64,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            ..Default::default()
        })
    }

    pub fn set_rows<T: Record>(&self, rows: &[T]) {
        let values = rows
            .iter()
            .map(|row| serde_json::to_value(row).unwrap())
            .collect();
        self.rows.lock().unwrap().insert(T::TABLE, values);
    }

    /// Snapshots block until `release_snapshot` is called once per read.
    pub fn hold_snapshots(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_snapshot(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Subscribes and presence joins never resolve while set.
    pub fn stall_connects(&self, stall: bool) {
        self.stall_connects.store(stall, Ordering::SeqCst);
    }

    async fn connect(&self) {
        if self.stall_connects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn live_subscriptions(&self) -> usize {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|(_, tx)| !tx.is_closed());
        subs.len()
    }

    pub async fn wait_for_subscriptions(&self, count: usize) {
        wait_until(|| self.live_subscriptions() == count).await;
    }

    pub async fn push(&self, record: ChangeRecord) {
        let targets: Vec<mpsc::Sender<ChangeRecord>> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(spec, tx)| !tx.is_closed() && spec.matches(&record))
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in targets {
            let _ = tx.send(record.clone()).await;
        }
    }

    pub async fn insert<T: Record>(&self, row: T) {
        self.push(ChangeRecord::insert(&row.into_row()).unwrap()).await;
    }

    pub async fn update<T: Record>(&self, new: T, old: T) {
        self.push(ChangeRecord::update(&new.into_row(), &old.into_row()).unwrap())
            .await;
    }

    pub async fn delete<T: Record>(&self, old: T) {
        self.push(ChangeRecord::delete(&old.into_row()).unwrap()).await;
    }

    pub fn presence_members(&self, channel: &str) -> usize {
        let mut presence = self.presence.lock().unwrap();
        let members = presence.entry(channel.to_string()).or_default();
        members.retain(|tx| !tx.is_closed());
        members.len()
    }

    pub fn presence_names(&self) -> Vec<Option<String>> {
        self.presence_names.lock().unwrap().clone()
    }

    pub async fn sync(&self, channel: &str, roster: Roster) {
        let members: Vec<mpsc::Sender<Roster>> = self
            .presence
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .unwrap_or_default();
        for tx in members {
            let _ = tx.send(roster.clone()).await;
        }
    }

    /// Server side of the channel goes away.
    pub fn close_presence(&self, channel: &str) {
        self.presence.lock().unwrap().remove(channel);
    }

    fn next_id(&self) -> RowId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_send(&self) -> Result<(), LiveError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LiveError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn snapshot(&self, query: &SnapshotQuery) -> Result<Vec<Value>, LiveError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(LiveError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        let rows = self
            .rows
            .lock()
            .unwrap()
            .get(&query.table)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .collect())
    }

    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<mpsc::Receiver<ChangeRecord>, LiveError> {
        self.connect().await;
        spec.validate()
            .map_err(|e| LiveError::Rejected(e.to_string()))?;
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().unwrap().push((spec.clone(), tx));
        Ok(rx)
    }

    async fn join_presence(
        &self,
        channel: &str,
        display_name: Option<String>,
    ) -> Result<mpsc::Receiver<Roster>, LiveError> {
        self.connect().await;
        let (tx, rx) = mpsc::channel(16);
        self.presence
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        self.presence_names.lock().unwrap().push(display_name);
        Ok(rx)
    }

    async fn send_message(&self, topic_id: RowId, body: &str) -> Result<Message, LiveError> {
        self.check_send()?;
        let message = Message {
            id: self.next_id(),
            sender_name: "آزمون".into(),
            sender_role: SenderRole::Member,
            message: body.to_string(),
            topic_id: Some(topic_id),
            user_id: None,
            is_pinned: false,
            created_at: Utc::now(),
        };
        self.insert(message.clone()).await;
        Ok(message)
    }

    async fn send_private_message(
        &self,
        recipient_id: Uuid,
        body: &str,
    ) -> Result<PrivateMessage, LiveError> {
        self.check_send()?;
        let sender_id = Uuid::new_v4();
        let message = PrivateMessage {
            id: self.next_id(),
            conversation_key: dars_types::models::conversation_key(sender_id, recipient_id),
            sender_id,
            recipient_id,
            sender_name: "آزمون".into(),
            message: body.to_string(),
            is_read: false,
            created_at: Utc::now(),
        };
        self.insert(message.clone()).await;
        Ok(message)
    }

    async fn send_reaction(
        &self,
        webinar_id: RowId,
        reaction_type: &str,
    ) -> Result<Reaction, LiveError> {
        self.check_send()?;
        let reaction = Reaction {
            id: self.next_id(),
            webinar_id,
            participant_id: Uuid::new_v4(),
            reaction_type: reaction_type.to_string(),
            created_at: Utc::now(),
        };
        self.insert(reaction.clone()).await;
        Ok(reaction)
    }
}

pub fn session() -> Session {
    Session {
        user_id: Uuid::new_v4(),
        username: "reza".into(),
        display_name: Some("رضا".into()),
        role: SenderRole::Member,
    }
}

pub fn test_config() -> LiveConfig {
    LiveConfig {
        snapshot_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        recheck_interval: Duration::from_millis(50),
        event_buffer: 64,
    }
}

pub fn context(backend: &Arc<ScriptedBackend>) -> AppContext {
    context_with(backend, test_config())
}

pub fn context_with(backend: &Arc<ScriptedBackend>, config: LiveConfig) -> AppContext {
    AppContext::new(backend.clone(), session(), config)
}

/// Wait for the watched state to satisfy `pred` and return a copy of it.
pub async fn settle<S: Clone>(rx: &mut watch::Receiver<S>, pred: impl FnMut(&S) -> bool) -> S {
    let state = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("state sender dropped");
    (*state).clone()
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn ids<T: Record>(rows: &[T]) -> Vec<RowId> {
    rows.iter().map(Record::id).collect()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn message(id: RowId, topic_id: RowId, secs: i64) -> Message {
    Message {
        id,
        sender_name: "استاد احمدی".into(),
        sender_role: SenderRole::Admin,
        message: format!("پیام شماره {id}"),
        topic_id: Some(topic_id),
        user_id: None,
        is_pinned: false,
        created_at: at(secs),
    }
}

pub fn topic(id: RowId, room_id: Option<RowId>, active: bool) -> Topic {
    Topic {
        id,
        title: format!("جلسه {id}"),
        description: "رفع اشکال".into(),
        room_id,
        is_active: active,
        created_at: at(id),
    }
}

pub fn notification(id: RowId, kind: NotificationType, priority: i32) -> Notification {
    Notification {
        id,
        title: format!("اطلاعیه {id}"),
        message: "شروع ثبت‌نام ترم جدید".into(),
        notification_type: kind,
        color: "#2563eb".into(),
        link: None,
        priority,
        is_active: true,
        start_date: None,
        end_date: None,
        created_at: at(id),
    }
}
