use parksmart::broadcast::{BroadcastHub, ConnectionState, DeliveryError, HubSettings, SlotEvent};
use parksmart::state::SlotStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn event(n: usize) -> SlotEvent {
    SlotEvent::SlotUpdate {
        slot_id: format!("E-{n:02}"),
        status: SlotStatus::Occupied,
        timestamp: "2026-01-11T12:30:00Z".to_string(),
    }
}

fn hub_with_capacity(queue_capacity: usize) -> Arc<BroadcastHub> {
    Arc::new(BroadcastHub::new(HubSettings {
        queue_capacity,
        subscriber_buffer: 64,
        send_timeout: Duration::from_millis(200),
    }))
}

async fn next_slot_id(subscription: &mut parksmart::broadcast::Subscription) -> String {
    tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("event delivered in time")
        .expect("subscription open")
        .slot_id()
        .to_string()
}

#[tokio::test]
async fn events_within_capacity_arrive_in_publish_order() {
    let hub = hub_with_capacity(10);
    let mut subscription = hub.connect();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let delivery = Arc::clone(&hub).spawn_delivery_loop(shutdown_rx);

    for n in 0..10 {
        hub.publish(event(n));
    }

    for n in 0..10 {
        assert_eq!(next_slot_id(&mut subscription).await, format!("E-{n:02}"));
    }
    assert_eq!(hub.stats().dropped, 0);

    let _ = shutdown_tx.send(true);
    let _ = delivery.await;
}

#[tokio::test]
async fn overflow_before_delivery_keeps_newest_events() {
    let hub = hub_with_capacity(3);
    let mut subscription = hub.connect();

    for n in 0..4 {
        hub.publish(event(n));
    }
    assert_eq!(hub.stats().dropped, 1);
    assert_eq!(hub.stats().queued, 3);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let delivery = Arc::clone(&hub).spawn_delivery_loop(shutdown_rx);

    for n in 1..4 {
        assert_eq!(next_slot_id(&mut subscription).await, format!("E-{n:02}"));
    }

    let _ = shutdown_tx.send(true);
    let _ = delivery.await;
}

#[tokio::test]
async fn closed_receiver_fails_only_its_own_delivery() {
    let hub = hub_with_capacity(10);
    let leaving = hub.connect();
    let leaving_id = leaving.id();
    let mut staying = hub.connect();

    drop(leaving);
    hub.publish(event(0));
    let round = hub.deliver_next().await;

    assert_eq!(round.delivered, 1);
    assert_eq!(round.failed, vec![(leaving_id, DeliveryError::Closed)]);
    assert_eq!(hub.connection_state(leaving_id), ConnectionState::Closed);
    assert_eq!(next_slot_id(&mut staying).await, "E-00");

    hub.publish(event(1));
    let round = hub.deliver_next().await;

    assert_eq!(round.delivered, 1);
    assert!(round.failed.is_empty());
    assert_eq!(next_slot_id(&mut staying).await, "E-01");
    assert_eq!(hub.stats().failed, 1);
}

#[tokio::test]
async fn disconnect_during_a_stalled_send_releases_the_round() {
    let hub = Arc::new(BroadcastHub::new(HubSettings {
        queue_capacity: 10,
        subscriber_buffer: 1,
        send_timeout: Duration::from_secs(30),
    }));
    let mut reader = hub.connect();
    let mut stalled = hub.connect();
    let stalled_id = stalled.id();

    // Fills both buffers; only the reader drains its copy.
    hub.publish(event(0));
    let first = hub.deliver_next().await;
    assert_eq!(first.delivered, 2);
    assert_eq!(next_slot_id(&mut reader).await, "E-00");

    hub.publish(event(1));
    let round = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.deliver_next().await }
    });
    // Let the round reach the stalled send.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!round.is_finished());

    let removed = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.disconnect(stalled_id) }
    })
    .await
    .expect("disconnect task");
    assert!(removed);

    let round = tokio::time::timeout(Duration::from_secs(1), round)
        .await
        .expect("round finishes without waiting out the send timeout")
        .expect("round task");

    assert_eq!(round.delivered, 1);
    assert_eq!(round.departed, 1);
    assert!(round.failed.is_empty());
    assert_eq!(next_slot_id(&mut reader).await, "E-01");
    assert_eq!(next_slot_id(&mut stalled).await, "E-00");
    assert!(stalled.recv().await.is_none());

    let stats = hub.stats();
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.subscribers, 1);
    assert!(!hub.disconnect(stalled_id));
}

#[tokio::test]
async fn disconnected_subscriber_receives_nothing_further() {
    let hub = hub_with_capacity(10);
    let mut first = hub.connect();
    let mut second = hub.connect();

    hub.publish(event(0));
    hub.deliver_next().await;
    assert!(hub.disconnect(first.id()));
    hub.publish(event(1));
    hub.deliver_next().await;

    assert_eq!(next_slot_id(&mut first).await, "E-00");
    assert!(first.recv().await.is_none());
    assert_eq!(next_slot_id(&mut second).await, "E-00");
    assert_eq!(next_slot_id(&mut second).await, "E-01");
    assert!(!hub.disconnect(first.id()));
}
