//! A list seeded by a snapshot read and kept current by a change feed.
//!
//! Mounting opens the subscription first, then reads the snapshot. Changes
//! that arrive while the snapshot is in flight are buffered and replayed on
//! top of it, so nothing committed between the two is lost and nothing is
//! applied before the list is seeded. Idempotent inserts absorb the overlap.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use dars_types::feed::{ChangeRecord, Filter, Record, SnapshotQuery, SubscriptionSpec};

use crate::change::Change;
use crate::context::AppContext;
use crate::error::LiveError;
use crate::mount::{Guarded, Mount};
use crate::reconcile::{ListPolicy, apply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Ready,
    /// Subscribing or the snapshot failed; the list is empty until `retry`.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T> {
    pub phase: Phase,
    pub items: Vec<T>,
    pub error: Option<String>,
}

impl<T> ListState<T> {
    fn loading() -> Self {
        Self {
            phase: Phase::Loading,
            items: Vec::new(),
            error: None,
        }
    }

    fn ready(items: Vec<T>) -> Self {
        Self {
            phase: Phase::Ready,
            items,
            error: None,
        }
    }

    fn fail(&mut self, error: &LiveError) {
        self.phase = Phase::Failed;
        self.items.clear();
        self.error = Some(error.to_string());
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }
}

/// What a live list reads and listens to.
#[derive(Clone)]
pub struct ListSource<T> {
    pub query: SnapshotQuery,
    pub subscription: SubscriptionSpec,
    pub policy: ListPolicy<T>,
}

impl<T: Record> ListSource<T> {
    /// The whole table in its natural order.
    pub fn table(policy: ListPolicy<T>) -> Self {
        Self {
            query: SnapshotQuery::new(T::TABLE),
            subscription: SubscriptionSpec::table(T::TABLE),
            policy,
        }
    }

    /// Scope both the snapshot and the change feed to `column = value`.
    pub fn scoped(mut self, column: &str, value: impl ToString) -> Self {
        let filter = Filter::eq(column, value);
        self.query.filters.push(filter.clone());
        self.subscription.filter = Some(filter);
        self
    }

    /// Narrow the snapshot only. The feed still delivers rows outside it so
    /// that eligibility changes are seen.
    pub fn snapshot_filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }
}

pub struct LiveList<T: Record> {
    ctx: AppContext,
    source: ListSource<T>,
    state: Arc<watch::Sender<ListState<T>>>,
    mount: Option<Mount>,
}

impl<T: Record> LiveList<T> {
    /// Start loading. Must be called inside a tokio runtime.
    pub fn mount(ctx: &AppContext, source: ListSource<T>) -> Self {
        let (state, _) = watch::channel(ListState::loading());
        let mut list = Self {
            ctx: ctx.clone(),
            source,
            state: Arc::new(state),
            mount: None,
        };
        list.start();
        list
    }

    fn start(&mut self) {
        let ctx = self.ctx.clone();
        let source = self.source.clone();
        self.mount = Some(Mount::spawn(&self.state, move |state| {
            run(ctx, source, state)
        }));
    }

    pub fn state(&self) -> ListState<T> {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    pub fn watch(&self) -> watch::Receiver<ListState<T>> {
        self.state.subscribe()
    }

    pub fn source(&self) -> &ListSource<T> {
        &self.source
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_some()
    }

    /// Tear down and mount again: fresh subscription, fresh snapshot.
    pub fn retry(&mut self) {
        self.unmount();
        self.state.send_replace(ListState::loading());
        self.start();
    }

    /// Close the subscription. The last published state stays readable but
    /// never changes again.
    pub fn unmount(&mut self) {
        if let Some(mount) = self.mount.take() {
            mount.stop(&self.state);
            debug!("unmounted {} list", T::TABLE);
        }
    }
}

impl<T: Record> Drop for LiveList<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn run<T: Record>(ctx: AppContext, source: ListSource<T>, state: Guarded<ListState<T>>) {
    let table = T::TABLE;

    let connect = ctx.config.connect_timeout;
    let subscribed = tokio::time::timeout(connect, ctx.backend.subscribe(&source.subscription))
        .await
        .unwrap_or_else(|_| {
            Err(LiveError::Timeout {
                what: "subscribe",
                after: connect,
            })
        });
    let mut changes = match subscribed {
        Ok(changes) => changes,
        Err(e) => {
            warn!("subscribing to {} failed: {}", table, e);
            state.modify(|s| {
                s.fail(&e);
                true
            });
            return;
        }
    };

    let timeout = ctx.config.snapshot_timeout;
    let snapshot = tokio::time::timeout(timeout, ctx.backend.snapshot(&source.query));
    tokio::pin!(snapshot);

    let mut buffered = Vec::new();
    let mut feed_open = true;
    let result = loop {
        tokio::select! {
            result = &mut snapshot => {
                break result.unwrap_or_else(|_| Err(LiveError::Timeout {
                    what: "snapshot",
                    after: timeout,
                }));
            }
            record = changes.recv(), if feed_open => match record {
                Some(record) => buffered.push(record),
                None => feed_open = false,
            },
        }
    };

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            warn!("snapshot of {} failed: {}", table, e);
            state.modify(|s| {
                s.fail(&e);
                true
            });
            return;
        }
    };

    let mut items = seed(rows, &source.policy);
    let replayed = buffered.len();
    for record in &buffered {
        if let Some(change) = decode(record) {
            apply(&mut items, change, &source.policy);
        }
    }
    debug!("{} ready: {} rows, {} buffered changes", table, items.len(), replayed);
    state.modify(|s| {
        *s = ListState::ready(items);
        true
    });

    if !feed_open {
        warn!("{} change feed closed before the snapshot arrived", table);
        return;
    }

    while let Some(record) = changes.recv().await {
        if let Some(change) = decode(&record) {
            state.modify(|s| apply(&mut s.items, change, &source.policy));
        }
    }
    debug!("{} change feed closed", table);
}

fn seed<T: Record>(rows: Vec<Value>, policy: &ListPolicy<T>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("dropping undecodable {} snapshot row: {}", T::TABLE, e);
                None
            }
        })
        .filter(|row| (policy.eligible)(row))
        .collect()
}

fn decode<T: Record>(record: &ChangeRecord) -> Option<Change<T>> {
    match Change::decode(record) {
        Ok(change) => Some(change),
        Err(e) => {
            warn!("dropping malformed {} change: {}", T::TABLE, e);
            None
        }
    }
}
