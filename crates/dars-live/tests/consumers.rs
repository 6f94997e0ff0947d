mod common;

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use dars_live::chat::{ChatRoom, Delivery};
use dars_live::notifications::NotificationCenter;
use dars_live::private::PrivateThread;
use dars_live::reactions::WebinarReactions;
use dars_live::roster::{ONLINE_CHANNEL, OnlineRoster};
use dars_live::presence::PresenceStatus;
use dars_live::{LiveConfig, LiveError, Phase, Roster};
use dars_types::models::{
    NotificationType, PresenceMeta, PrivateMessage, UNKNOWN_DISPLAY_NAME, conversation_key,
};

use common::*;

#[tokio::test]
async fn deactivated_topic_leaves_the_list() {
    let backend = ScriptedBackend::new();
    backend.set_rows(&[topic(1, None, true), topic(2, None, true), topic(3, None, false)]);
    let room = ChatRoom::open(&context(&backend), None);

    let mut rx = room.watch_topics();
    let state = settle(&mut rx, |s| s.phase == Phase::Ready).await;
    assert_eq!(ids(&state.items), vec![1, 2]);

    backend.update(topic(2, None, false), topic(2, None, true)).await;
    let state = settle(&mut rx, |s| s.items.len() == 1).await;
    assert_eq!(ids(&state.items), vec![1]);

    // Inserted inactive: never shown. Reactivated: back in place.
    backend.insert(topic(4, None, false)).await;
    backend.update(topic(2, None, true), topic(2, None, false)).await;
    let state = settle(&mut rx, |s| s.items.len() == 2).await;
    assert_eq!(ids(&state.items), vec![1, 2]);
}

#[tokio::test]
async fn topics_are_scoped_to_the_room() {
    let backend = ScriptedBackend::new();
    backend.set_rows(&[topic(1, Some(5), true), topic(2, Some(6), true)]);
    let room = ChatRoom::open(&context(&backend), Some(5));

    let mut rx = room.watch_topics();
    let state = settle(&mut rx, |s| s.phase == Phase::Ready).await;
    assert_eq!(ids(&state.items), vec![1]);

    backend.insert(topic(3, Some(6), true)).await;
    backend.insert(topic(4, Some(5), true)).await;
    let state = settle(&mut rx, |s| s.items.len() == 2).await;
    assert_eq!(ids(&state.items), vec![1, 4]);
}

#[tokio::test]
async fn selecting_a_topic_swaps_the_message_subscription() {
    let backend = ScriptedBackend::new();
    backend.set_rows(&[topic(1, None, true), topic(2, None, true)]);
    backend.set_rows(&[message(10, 1, 0), message(20, 2, 0), message(21, 2, 5)]);
    let mut room = ChatRoom::open(&context(&backend), None);
    assert!(room.messages_phase().is_none());

    room.select_topic(1);
    let mut rx = room.watch_messages().unwrap();
    let state = settle(&mut rx, |s| s.phase == Phase::Ready).await;
    assert_eq!(ids(&state.items), vec![10]);

    room.select_topic(2);
    let mut rx = room.watch_messages().unwrap();
    let state = settle(&mut rx, |s| s.phase == Phase::Ready).await;
    assert_eq!(ids(&state.items), vec![20, 21]);
    assert_eq!(room.selected_topic(), Some(2));

    // topics + topic 2 messages
    backend.wait_for_subscriptions(2).await;

    backend.insert(message(11, 1, 30)).await;
    backend.insert(message(22, 2, 30)).await;
    let state = settle(&mut rx, |s| s.items.len() == 3).await;
    assert_eq!(ids(&state.items), vec![20, 21, 22]);

    assert!(room.pinned().is_empty());
    let mut pinned = message(21, 2, 5);
    pinned.is_pinned = true;
    backend.update(pinned, message(21, 2, 5)).await;
    settle(&mut rx, |s| s.items.iter().any(|m| m.is_pinned)).await;
    assert_eq!(ids(&room.pinned()), vec![21]);
}

#[tokio::test]
async fn send_goes_through_the_outbox() {
    let backend = ScriptedBackend::new();
    backend.set_rows(&[topic(1, None, true)]);
    let mut room = ChatRoom::open(&context(&backend), None);

    assert!(matches!(room.send("سلام").await, Err(LiveError::NoTopicSelected)));

    room.select_topic(1);
    let mut rx = room.watch_messages().unwrap();
    settle(&mut rx, |s| s.phase == Phase::Ready).await;
    assert!(matches!(room.send("   ").await, Err(LiveError::EmptyMessage)));

    let sent = room.send("سلام به همه").await.unwrap();
    let state = settle(&mut rx, |s| s.items.iter().any(|m| m.id == sent.id)).await;
    assert_eq!(state.items.len(), 1);
    assert!(room.outbox().is_empty());

    backend.fail_sends(true);
    assert!(room.send("سوال دارم").await.is_err());
    let outbox = room.outbox();
    assert_eq!(outbox.len(), 1);
    assert!(matches!(outbox[0].delivery, Delivery::Failed(_)));
    let local_id = outbox[0].local_id;

    backend.fail_sends(false);
    let resent = room.retry_send(local_id).await.unwrap();
    assert_eq!(resent.message, "سوال دارم");
    settle(&mut rx, |s| s.items.len() == 2).await;
    assert!(room.outbox().is_empty());
    assert!(matches!(room.retry_send(local_id).await, Err(LiveError::NotRetryable)));
}

#[tokio::test]
async fn presence_roster_is_replaced_on_every_sync() {
    let backend = ScriptedBackend::new();
    let ctx = context(&backend);
    let roster = OnlineRoster::join(&ctx);
    let mut rx = roster.watch();

    settle(&mut rx, |s| s.status == PresenceStatus::Syncing).await;
    assert_eq!(backend.presence_members(ONLINE_CHANNEL), 1);
    assert_eq!(backend.presence_names(), vec![Some("رضا".to_string())]);

    let me = PresenceMeta {
        display_name: Some("رضا".into()),
        user_id: Some(ctx.session.user_id),
        online_at: Some(Utc::now()),
    };
    backend
        .sync(
            ONLINE_CHANNEL,
            Roster::from([("k1".to_string(), me.clone()), ("k2".to_string(), PresenceMeta::default())]),
        )
        .await;
    let state = settle(&mut rx, |s| s.status == PresenceStatus::Synced).await;
    assert_eq!(state.users.len(), 2);
    assert!(state.users.iter().any(|u| u.display_name == UNKNOWN_DISPLAY_NAME));

    backend
        .sync(ONLINE_CHANNEL, Roster::from([("k3".to_string(), me)]))
        .await;
    let state = settle(&mut rx, |s| s.users.len() == 1).await;
    assert_eq!(state.users[0].connection_key, "k3");
    assert_eq!(roster.count(), 1);

    backend.close_presence(ONLINE_CHANNEL);
    let state = settle(&mut rx, |s| s.status == PresenceStatus::Disconnected).await;
    assert!(state.users.is_empty());
}

#[tokio::test]
async fn leaving_presence_drops_membership() {
    let backend = ScriptedBackend::new();
    let mut roster = OnlineRoster::join(&context(&backend));
    let mut rx = roster.watch();
    settle(&mut rx, |s| s.status == PresenceStatus::Syncing).await;

    roster.leave();
    assert_eq!(roster.status(), PresenceStatus::Disconnected);
    wait_until(|| backend.presence_members(ONLINE_CHANNEL) == 0).await;
}

#[tokio::test]
async fn stalled_presence_join_gives_up_and_rejoins() {
    let backend = ScriptedBackend::new();
    backend.stall_connects(true);
    let ctx = context_with(
        &backend,
        LiveConfig {
            connect_timeout: Duration::from_millis(100),
            ..test_config()
        },
    );

    let mut roster = OnlineRoster::join(&ctx);
    let mut rx = roster.watch();
    let state = settle(&mut rx, |s| s.error.is_some()).await;
    assert_eq!(state.status, PresenceStatus::Disconnected);
    assert!(state.error.unwrap().contains("presence join did not complete"));
    assert_eq!(backend.presence_members(ONLINE_CHANNEL), 0);

    backend.stall_connects(false);
    roster.rejoin();
    let state = settle(&mut rx, |s| s.status == PresenceStatus::Syncing).await;
    assert!(state.error.is_none());
    assert_eq!(backend.presence_members(ONLINE_CHANNEL), 1);
}

#[tokio::test]
async fn rejoin_after_the_channel_closes() {
    let backend = ScriptedBackend::new();
    let mut roster = OnlineRoster::join(&context(&backend));
    let mut rx = roster.watch();
    settle(&mut rx, |s| s.status == PresenceStatus::Syncing).await;

    backend.close_presence(ONLINE_CHANNEL);
    settle(&mut rx, |s| s.status == PresenceStatus::Disconnected).await;

    roster.rejoin();
    settle(&mut rx, |s| s.status == PresenceStatus::Syncing).await;
    assert_eq!(backend.presence_members(ONLINE_CHANNEL), 1);
}

#[tokio::test]
async fn notification_center_filters_by_window_and_surface() {
    let backend = ScriptedBackend::new();
    let now = Utc::now();

    let mut expired = notification(2, NotificationType::Banner, 9);
    expired.end_date = Some(now - chrono::Duration::hours(1));
    let mut upcoming = notification(3, NotificationType::Banner, 9);
    upcoming.start_date = Some(now + chrono::Duration::days(1));
    let mut hidden = notification(4, NotificationType::Popup, 9);
    hidden.is_active = false;

    backend.set_rows(&[
        notification(5, NotificationType::Popup, 5),
        notification(1, NotificationType::Banner, 1),
        expired,
        upcoming,
        hidden,
    ]);
    let center = NotificationCenter::mount(&context(&backend));

    let mut rx = center.watch_active();
    let active = settle(&mut rx, |a| !a.is_empty()).await;
    assert_eq!(ids(&active), vec![5, 1]);
    assert_eq!(ids(&center.banners()), vec![1]);
    assert_eq!(ids(&center.popups()), vec![5]);
    assert!(center.floating().is_empty());
    assert_eq!(center.all().len(), 5);

    backend.insert(notification(6, NotificationType::Floating, 7)).await;
    let active = settle(&mut rx, |a| a.len() == 3).await;
    assert_eq!(ids(&active), vec![6, 5, 1]);
}

#[tokio::test]
async fn notification_expires_without_any_change() {
    let backend = ScriptedBackend::new();
    let mut closing = notification(1, NotificationType::Banner, 0);
    closing.end_date = Some(Utc::now() + chrono::Duration::milliseconds(300));
    backend.set_rows(&[closing]);
    let center = NotificationCenter::mount(&context(&backend));

    let mut rx = center.watch_active();
    settle(&mut rx, |a| a.len() == 1).await;
    let snapshot_calls = backend.snapshot_calls();

    // Only the recheck timer can drop it.
    settle(&mut rx, |a| a.is_empty()).await;
    assert_eq!(backend.snapshot_calls(), snapshot_calls);
    assert_eq!(center.phase(), Phase::Ready);
}

fn private(id: i64, sender: Uuid, recipient: Uuid, key: &str) -> PrivateMessage {
    PrivateMessage {
        id,
        conversation_key: key.to_string(),
        sender_id: sender,
        recipient_id: recipient,
        sender_name: "مهدی".into(),
        message: "تکلیف را فرستادم".into(),
        is_read: false,
        created_at: at(id),
    }
}

#[tokio::test]
async fn private_thread_is_scoped_to_the_conversation() {
    let backend = ScriptedBackend::new();
    let ctx = context(&backend);
    let me = ctx.session.user_id;
    let peer = Uuid::new_v4();
    let key = conversation_key(me, peer);

    let stranger = Uuid::new_v4();
    backend.set_rows(&[
        private(1, peer, me, &key),
        private(2, me, peer, &key),
        private(3, stranger, peer, &conversation_key(stranger, peer)),
    ]);

    let thread = PrivateThread::open(&ctx, peer);
    assert_eq!(thread.conversation_key(), key);
    let mut rx = thread.watch();
    let state = settle(&mut rx, |s| s.phase == Phase::Ready).await;
    assert_eq!(ids(&state.items), vec![1, 2]);
    assert_eq!(thread.unread_count(), 1);

    let mut read = private(1, peer, me, &key);
    read.is_read = true;
    backend.update(read, private(1, peer, me, &key)).await;
    settle(&mut rx, |s| s.items[0].is_read).await;
    assert_eq!(thread.unread_count(), 0);

    assert!(matches!(thread.send("").await, Err(LiveError::EmptyMessage)));
}

#[tokio::test]
async fn webinar_reactions_count_per_type() {
    let backend = ScriptedBackend::new();
    let reactions = WebinarReactions::open(&context(&backend), 8);
    let mut rx = reactions.watch();
    settle(&mut rx, |s| s.phase == Phase::Ready).await;

    reactions.send("clap").await.unwrap();
    reactions.send("clap").await.unwrap();
    reactions.send("heart").await.unwrap();
    settle(&mut rx, |s| s.items.len() == 3).await;

    let counts = reactions.counts();
    assert_eq!(counts.get("clap"), Some(&2));
    assert_eq!(counts.get("heart"), Some(&1));

    // Another webinar's reactions never arrive here.
    let other = WebinarReactions::open(&context(&backend), 9);
    let mut other_rx = other.watch();
    settle(&mut other_rx, |s| s.phase == Phase::Ready).await;
    other.send("clap").await.unwrap();
    settle(&mut other_rx, |s| s.items.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(reactions.reactions().len(), 3);
}
