//! End-to-end dispatch tests: frames in, events out to consumers

mod harness;

use harness::*;
use live::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn open_channel() -> (ScriptedTransport, RealtimeChannel, ServerPeer) {
    let transport = ScriptedTransport::accepting();
    let channel = channel(&transport);
    channel.connect();
    let peer = transport.next_peer().await;
    wait_for_state(&channel, ConnectionState::Open).await;
    (transport, channel, peer)
}

async fn recv(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Subscription closed")
}

#[tokio::test(start_paused = true)]
async fn test_commission_paid_reaches_filtered_and_wildcard_subscribers() {
    let (_transport, channel, peer) = open_channel().await;
    let bus = channel.bus();

    let (tray_id, mut notifications) =
        bus.subscribe_channel(Some(EventFilter::types(["commission_paid"])));
    let (feed_id, mut activity) = bus.subscribe_channel(None);

    peer.push_json(paid_frame());

    for event in [recv(&mut notifications).await, recv(&mut activity).await] {
        assert_eq!(event.kind(), &EventKind::CommissionPaid);
        assert_eq!(event.event_type(), "commission_paid");
        assert_eq!(event.message(), "£500 paid");
        assert_eq!(event.timestamp().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    bus.unsubscribe(tray_id);
    bus.unsubscribe(feed_id);
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_discarded_and_order_is_kept() {
    let (_transport, channel, peer) = open_channel().await;
    let (_id, mut rx) = channel.bus().subscribe_channel(None);

    peer.push_text("{invalid json");
    for n in 0..3 {
        peer.push_json(json!({"type": "commission_created", "message": format!("c{n}")}));
    }

    for n in 0..3 {
        assert_eq!(recv(&mut rx).await.message(), format!("c{n}"));
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(channel.state(), ConnectionState::Open);

    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_type_is_delivered() {
    let (_transport, channel, peer) = open_channel().await;
    let (_id, mut rx) = channel.bus().subscribe_channel(None);

    peer.push_text(r#"{"type":"totally_unknown_tag","message":"x"}"#);

    let event = recv(&mut rx).await;
    assert!(event.kind().is_unknown());
    assert_eq!(event.event_type(), "totally_unknown_tag");
    assert_eq!(event.message(), "x");
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_binary_frames_are_decoded() {
    let (_transport, channel, peer) = open_channel().await;
    let (_id, mut rx) = channel.bus().subscribe_channel(None);

    peer.push_binary(br#"{"type":"deadline_reminder","message":"due","priority":"high"}"#.to_vec());

    let event = recv(&mut rx).await;
    assert_eq!(event.kind(), &EventKind::DeadlineReminder);
    assert_eq!(event.priority(), Priority::High);
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_panicking_consumer_does_not_block_others() {
    let (_transport, channel, peer) = open_channel().await;
    let bus = channel.bus();
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    let _a = bus.subscribe(None, move |_| o.lock().push("a"));
    let _b = bus.subscribe(None, |_| panic!("render failed"));
    let o = order.clone();
    let _c = bus.subscribe(None, move |_| o.lock().push("c"));
    let (_d, mut last) = bus.subscribe_channel(None);

    peer.push_json(paid_frame());
    peer.push_json(paid_frame());
    recv(&mut last).await;
    recv(&mut last).await;

    assert_eq!(*order.lock(), vec!["a", "c", "a", "c"]);
    assert_eq!(channel.state(), ConnectionState::Open);
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_self_unsubscribe_during_dispatch() {
    let (_transport, channel, peer) = open_channel().await;
    let bus = channel.bus().clone();
    let calls = Arc::new(Mutex::new(0));
    let own_id = Arc::new(Mutex::new(None));

    let (c, own, inner_bus) = (calls.clone(), own_id.clone(), bus.clone());
    let id = bus.subscribe(None, move |_| {
        *c.lock() += 1;
        if let Some(id) = own.lock().take() {
            inner_bus.unsubscribe(id);
        }
    });
    *own_id.lock() = Some(id);
    let (_tail, mut tail) = bus.subscribe_channel(None);

    peer.push_json(paid_frame());
    peer.push_json(paid_frame());
    recv(&mut tail).await;
    recv(&mut tail).await;

    assert_eq!(*calls.lock(), 1);
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_survive_reconnect() {
    let (transport, channel, peer) = open_channel().await;
    let (_id, mut rx) = channel.bus().subscribe_channel(None);

    peer.close(1011, "restarting");
    let second = transport.next_peer().await;
    wait_for_state(&channel, ConnectionState::Open).await;

    second.push_json(paid_frame());
    assert_eq!(recv(&mut rx).await.message(), "£500 paid");
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_consumers_render_live_traffic() {
    let (_transport, channel, peer) = open_channel().await;
    let bus = channel.bus();

    let tray = NotificationTray::from_config(channel.config());
    let feed = ActivityFeed::from_config(channel.config());
    let dashboard = DashboardCounters::new();
    tray.attach(bus);
    feed.attach(bus);
    dashboard.attach(bus);
    let (_tail, mut tail) = bus.subscribe_channel(None);

    peer.push_json(json!({"type": "connection", "message": "Connected"}));
    peer.push_json(json!({
        "type": "commission_paid",
        "title": "Commission paid",
        "message": "paid out",
        "data": {"client_name": "Acme Ltd", "amount": 500, "user": "Dana"},
        "priority": "high"
    }));
    peer.push_json(json!({
        "type": "stats_update",
        "data": {"onlineUsers": 4, "activeConnections": 6, "todayCommissions": 2, "todayPayments": 900}
    }));
    for _ in 0..3 {
        recv(&mut tail).await;
    }

    let notifications = tray.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].category, NotificationCategory::Payment);
    assert_eq!(notifications[0].title, "Commission paid");
    assert_eq!(tray.unread_count(), 1);

    let items = feed.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].actor, "Dana");
    assert_eq!(items[0].target.as_deref(), Some("Acme Ltd"));
    assert_eq!(items[0].amount, Some(500.0));

    assert_eq!(dashboard.stats().online_users, 4);
    assert_eq!(dashboard.tally("connection"), 1);
    assert_eq!(dashboard.total_events(), 3);

    assert!(tray.detach());
    assert!(feed.detach());
    assert!(dashboard.detach());
    channel.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_failed_reaches_tray_once() {
    let transport = ScriptedTransport::refusing();
    let mut config = ChannelConfig::default();
    config.reconnect.max_attempts = 2;
    let channel = channel_with(&transport, config);

    let tray = NotificationTray::new(50);
    tray.attach(channel.bus());

    channel.connect();
    wait_for_state(&channel, ConnectionState::Faulted).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let notifications = tray.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].category, NotificationCategory::System);
    assert_eq!(notifications[0].title, "Connection failed");
    assert_eq!(notifications[0].priority, Priority::High);

    tray.detach();
    channel.shutdown().await;
}
