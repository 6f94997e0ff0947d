use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use dars_types::models::{Notification, NotificationType};

use crate::context::AppContext;
use crate::live_list::{ListSource, ListState, LiveList, Phase};
use crate::mount::{Guarded, Mount};
use crate::reconcile::ListPolicy;

/// Notifications visible at `now`, highest priority first, newest first
/// within a priority.
pub fn active_notifications(items: &[Notification], now: DateTime<Utc>) -> Vec<Notification> {
    let mut active: Vec<Notification> = items
        .iter()
        .filter(|n| n.is_active_at(now))
        .cloned()
        .collect();
    active.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    active
}

/// Live notification list plus its time-window filter. Mount once per
/// application and read the per-surface accessors.
pub struct NotificationCenter {
    list: LiveList<Notification>,
    active: Arc<watch::Sender<Vec<Notification>>>,
    recheck: Option<Mount>,
}

impl NotificationCenter {
    pub fn mount(ctx: &AppContext) -> Self {
        let list = LiveList::mount(ctx, ListSource::table(ListPolicy::prepend()));
        let (active, _) = watch::channel(Vec::new());
        let active = Arc::new(active);

        let rows = list.watch();
        let every = ctx.config.recheck_interval;
        let recheck = Mount::spawn(&active, move |out| recheck(rows, every, out));

        Self {
            list,
            active,
            recheck: Some(recheck),
        }
    }

    pub fn phase(&self) -> Phase {
        self.list.phase()
    }

    /// Every row the feed knows about, including inactive ones.
    pub fn all(&self) -> Vec<Notification> {
        self.list.items()
    }

    pub fn active(&self) -> Vec<Notification> {
        self.active.borrow().clone()
    }

    pub fn of_type(&self, kind: NotificationType) -> Vec<Notification> {
        self.active
            .borrow()
            .iter()
            .filter(|n| n.notification_type == kind)
            .cloned()
            .collect()
    }

    pub fn banners(&self) -> Vec<Notification> {
        self.of_type(NotificationType::Banner)
    }

    pub fn floating(&self) -> Vec<Notification> {
        self.of_type(NotificationType::Floating)
    }

    pub fn popups(&self) -> Vec<Notification> {
        self.of_type(NotificationType::Popup)
    }

    pub fn watch_active(&self) -> watch::Receiver<Vec<Notification>> {
        self.active.subscribe()
    }

    pub fn retry(&mut self) {
        self.list.retry();
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        if let Some(recheck) = self.recheck.take() {
            recheck.stop(&self.active);
        }
    }
}

/// Recompute on every list change and on every tick, since windows open and
/// close without any row changing.
async fn recheck(
    mut rows: watch::Receiver<ListState<Notification>>,
    every: Duration,
    out: Guarded<Vec<Notification>>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = rows.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let active = active_notifications(&rows.borrow_and_update().items, Utc::now());
        out.modify(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }
}
