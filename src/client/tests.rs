use super::*;
use crate::message::Message;
use crate::response::{DeliveryError, Response};
use crate::transport::retry::RetryPolicy;
use crate::transport::stanza::{AckFrame, Stanza};
use crate::utils::error::FcmError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

type Inbound = mpsc::UnboundedSender<Result<String, String>>;

// In-memory backend: records every write and lets the test push frames
// into any connection it handed out.
#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail_connects: AtomicBool,
    fail_writes: AtomicBool,
    written: Mutex<Vec<(usize, String)>>,
    inbound: Mutex<Vec<Option<Inbound>>>,
}

impl FakeState {
    fn push(&self, connection: usize, frame: impl Into<String>) {
        let inbound = self.inbound.lock().unwrap();
        let tx = inbound[connection - 1].as_ref().unwrap();
        tx.send(Ok(frame.into())).unwrap();
    }

    fn push_error(&self, connection: usize, error: &str) {
        let inbound = self.inbound.lock().unwrap();
        let tx = inbound[connection - 1].as_ref().unwrap();
        tx.send(Err(error.to_string())).unwrap();
    }

    fn close_peer(&self, connection: usize) {
        self.inbound.lock().unwrap()[connection - 1].take();
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `(connection, message_id)` for every message written so far.
    fn written_ids(&self) -> Vec<(usize, String)> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(connection, stanza)| {
                let Stanza::Chat {
                    payload: Some(payload),
                } = Stanza::parse(stanza)
                else {
                    panic!("not a message stanza: {stanza}");
                };
                let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
                let id = value["message_id"].as_str().unwrap().to_string();
                (*connection, id)
            })
            .collect()
    }

    fn was_written(&self, message_id: &str) -> bool {
        self.written_ids().iter().any(|(_, id)| id == message_id)
    }
}

struct FakeConnector {
    state: Arc<FakeState>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, FcmError> {
        if self.state.fail_connects.load(Ordering::SeqCst) {
            return Err(FcmError::connection("connection refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let index = {
            let mut inbound = self.state.inbound.lock().unwrap();
            inbound.push(Some(tx));
            inbound.len()
        };
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            index,
            inbound: rx,
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    index: usize,
    inbound: mpsc::UnboundedReceiver<Result<String, String>>,
    state: Arc<FakeState>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn write_stanza(&mut self, stanza: &str) -> Result<(), FcmError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(FcmError::connection("broken pipe"));
        }
        self.state
            .written
            .lock()
            .unwrap()
            .push((self.index, stanza.to_string()));
        Ok(())
    }

    async fn read_stanza(&mut self) -> Result<Option<String>, FcmError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(FcmError::connection(e)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), FcmError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_options() -> ClientOptions {
    ClientOptions {
        command_capacity: 16,
        send_timeout: Duration::from_secs(5),
        max_read_failures: 3,
        reconnect_policy: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(10)),
    }
}

async fn start_client() -> (XmppClient, Arc<FakeState>) {
    let state = Arc::new(FakeState::default());
    let connector = FakeConnector {
        state: state.clone(),
    };
    let client = XmppClient::with_connector(Box::new(connector), test_options())
        .await
        .unwrap();
    (client, state)
}

fn message(id: &str) -> Message {
    Message::for_token("token-1").with_message_id(id)
}

fn ack(id: &str) -> String {
    format!(
        r#"<message><gcm xmlns="google:mobile:data">{{"message_type":"ack","message_id":"{id}","from":"token-1"}}</gcm></message>"#
    )
}

fn nack(id: &str, error: &str) -> String {
    format!(
        r#"<message><gcm xmlns="google:mobile:data">{{"message_type":"nack","message_id":"{id}","from":"token-1","error":"{error}","error_description":"test"}}</gcm></message>"#
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn ack_frame(id: &str, error: &str) -> AckFrame {
    AckFrame {
        message_type: if error.is_empty() { "ack" } else { "nack" }.to_string(),
        message_id: id.to_string(),
        from: "token-1".to_string(),
        error: error.to_string(),
        ..AckFrame::default()
    }
}

#[tokio::test]
async fn test_correlator_delivers_ack() {
    let mut correlator = Correlator::new();
    let (mut pending, waiter) = PendingSend::new(&message("m1"), Duration::from_secs(1)).unwrap();

    assert_eq!(correlator.register(&mut pending), Registration::Registered);
    assert!(correlator.is_pending("m1"));
    assert_eq!(correlator.resolve(&ack_frame("m1", "")), Resolution::Delivered);
    assert!(correlator.is_empty());

    let response = waiter.wait().await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.success, 1);
    assert_eq!(response.results[0].message_id, "m1");
    assert_eq!(response.results[0].registration_id, "token-1");
}

#[test]
fn test_correlator_ack_without_waiter_is_dropped() {
    let mut correlator = Correlator::new();
    assert_eq!(
        correlator.resolve(&ack_frame("unknown", "")),
        Resolution::NoWaiter
    );
    assert!(correlator.is_empty());
}

#[test]
fn test_detached_send_is_not_registered() {
    let mut correlator = Correlator::new();
    let mut pending = PendingSend::detached(&message("m1")).unwrap();
    assert_eq!(correlator.register(&mut pending), Registration::NoReply);
    assert!(!correlator.is_pending("m1"));
}

#[tokio::test(start_paused = true)]
async fn test_waiter_timeout_synthesizes_service_unavailable() {
    let mut correlator = Correlator::new();
    let (mut pending, waiter) =
        PendingSend::new(&message("m1"), Duration::from_millis(50)).unwrap();
    correlator.register(&mut pending);

    let response = waiter.wait().await.unwrap();
    assert_eq!(response.status_code, 503);
    assert_eq!(response.failure, 1);
    assert_eq!(
        response.results[0].error,
        Some(DeliveryError::ServiceUnavailable)
    );

    assert_eq!(correlator.prune(Instant::now()), 1);
    // a late acknowledgment finds nothing and does not panic
    assert_eq!(correlator.resolve(&ack_frame("m1", "")), Resolution::NoWaiter);
}

#[tokio::test]
async fn test_prune_drops_entries_whose_caller_went_away() {
    let mut correlator = Correlator::new();
    let (mut pending, waiter) = PendingSend::new(&message("m1"), Duration::from_secs(60)).unwrap();
    correlator.register(&mut pending);
    drop(waiter);

    assert_eq!(correlator.prune(Instant::now()), 1);
    assert!(correlator.is_empty());
}

#[tokio::test]
async fn test_send_resolves_on_ack() {
    let (client, state) = start_client().await;

    let msg = message("m1");

    let (response, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m1")).await;
        state.push(1, ack("m1"));
    });

    let response: Response = response.unwrap();
    assert_eq!(response.status_code, 200);
    assert!(response.results[0].is_success());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_send_times_out_without_ack() {
    let (client, _state) = start_client().await;

    let response = client
        .send_with_timeout(&message("m1"), Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(response.status_code, 503);
    assert_eq!(response.results[0].message_id, "m1");
    assert_eq!(
        response.results[0].error,
        Some(DeliveryError::ServiceUnavailable)
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_nack_is_reported_in_response() {
    let (client, state) = start_client().await;

    let msg = message("m1");

    let (response, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m1")).await;
        state.push(1, nack("m1", "DEVICE_UNREGISTERED"));
    });

    let response = response.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.failure, 1);
    assert_eq!(
        response.results[0].error,
        Some(DeliveryError::DeviceUnregistered)
    );
    assert!(response.results[0].unregistered());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_draining_nack_reconnects_without_dropping_queued_sends() {
    let (client, state) = start_client().await;

    let msg = message("m1");

    let (response, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m1")).await;
        state.push(1, nack("m1", "CONNECTION_DRAINING"));
    });
    assert_eq!(
        response.unwrap().results[0].error,
        Some(DeliveryError::ConnectionDraining)
    );

    client.async_send(&message("m2")).await.unwrap();
    client.async_send(&message("m3")).await.unwrap();

    wait_until(|| state.connects() == 2).await;
    wait_until(|| state.was_written("m2") && state.was_written("m3")).await;
    let ids: Vec<String> = state.written_ids().into_iter().map(|(_, id)| id).collect();
    assert_eq!(ids.iter().filter(|id| *id == "m2").count(), 1);
    assert_eq!(ids.iter().filter(|id| *id == "m3").count(), 1);

    // acknowledgments now arrive on the replacement connection
    let msg = message("m4");
    let (response, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m4")).await;
        state.push(2, ack("m4"));
    });
    assert!(response.unwrap().results[0].is_success());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_draining_control_message_reconnects() {
    let (client, state) = start_client().await;

    state.push(
        1,
        r#"<message><gcm xmlns="google:mobile:data">{"message_type":"control","control_type":"CONNECTION_DRAINING"}</gcm></message>"#,
    );

    wait_until(|| state.connects() == 2).await;
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_write_is_resent_after_reconnect() {
    let (client, state) = start_client().await;
    state.fail_connects.store(true, Ordering::SeqCst);
    state.fail_writes.store(true, Ordering::SeqCst);

    client.async_send(&message("m1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!state.was_written("m1"));

    state.fail_writes.store(false, Ordering::SeqCst);
    state.fail_connects.store(false, Ordering::SeqCst);

    wait_until(|| state.was_written("m1")).await;
    assert_eq!(state.written_ids(), vec![(2, "m1".to_string())]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_peer_close_triggers_reconnect() {
    let (client, state) = start_client().await;

    state.close_peer(1);

    wait_until(|| state.connects() == 2).await;
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_consecutive_read_failures_trigger_reconnect() {
    let (client, state) = start_client().await;

    // a good frame in between resets the failure count
    state.push_error(1, "garbled");
    state.push_error(1, "garbled");
    state.push(1, "<presence/>");
    state.push_error(1, "garbled");
    state.push_error(1, "garbled");

    let msg = message("m1");

    let (response, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m1")).await;
        state.push(1, ack("m1"));
    });
    assert!(response.unwrap().results[0].is_success());
    assert_eq!(state.connects(), 1);

    state.push_error(1, "garbled");
    state.push_error(1, "garbled");
    state.push_error(1, "garbled");
    wait_until(|| state.connects() == 2).await;
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_loop() {
    let (client, state) = start_client().await;

    state.push(
        1,
        r#"<message><gcm xmlns="google:mobile:data">not json</gcm></message>"#,
    );
    state.push(1, "<iq type=\"result\"/>");

    let msg = message("m1");

    let (response, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m1")).await;
        state.push(1, ack("m1"));
    });
    assert!(response.unwrap().results[0].is_success());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_fails_waiting_sends() {
    let (client, state) = start_client().await;

    let msg = message("m1");

    let (result, _) = tokio::join!(client.send(&msg), async {
        wait_until(|| state.was_written("m1")).await;
        client.close().await.unwrap();
    });

    assert!(matches!(result, Err(FcmError::ClientClosed)));
    assert_eq!(state.closes.load(Ordering::SeqCst), 1);

    assert!(matches!(
        client.async_send(&message("m2")).await,
        Err(FcmError::ClientClosed)
    ));
    assert!(matches!(
        client.reconnect().await,
        Err(FcmError::ClientClosed)
    ));
    // closing twice is harmless
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_explicit_reconnect_replaces_connection() {
    let (client, state) = start_client().await;

    client.reconnect().await.unwrap();

    wait_until(|| state.connects() == 2).await;
    client.async_send(&message("m1")).await.unwrap();
    wait_until(|| state.was_written("m1")).await;
    assert_eq!(state.written_ids(), vec![(2, "m1".to_string())]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_sends_queued_behind_reconnect_go_out_in_order_on_new_connection() {
    let (client, state) = start_client().await;

    // nothing below yields, so all four commands are queued before the loop runs
    client.reconnect().await.unwrap();
    client.async_send(&message("m1")).await.unwrap();
    client.async_send(&message("m2")).await.unwrap();
    client.async_send(&message("m3")).await.unwrap();

    wait_until(|| state.written_ids().len() == 3).await;
    assert_eq!(state.connects(), 2);
    assert_eq!(
        state.written_ids(),
        vec![
            (2, "m1".to_string()),
            (2, "m2".to_string()),
            (2, "m3".to_string()),
        ]
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_steady_traffic_does_not_delay_reconnect() {
    let (client, state) = start_client().await;
    state.fail_connects.store(true, Ordering::SeqCst);
    state.close_peer(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.connects(), 1);

    // backoff is capped at 10ms; commands arrive faster than that
    state.fail_connects.store(false, Ordering::SeqCst);
    let started = Instant::now();
    let mut sent = 0;
    while started.elapsed() < Duration::from_millis(200) {
        client
            .async_send(&message(&format!("t{sent}")))
            .await
            .unwrap();
        sent += 1;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    assert_eq!(state.connects(), 2);
    assert!(state.written_ids().iter().any(|(connection, _)| *connection == 2));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_correlator_rejects_duplicate_pending_id() {
    let mut correlator = Correlator::new();
    let (mut first, first_waiter) =
        PendingSend::new(&message("m1"), Duration::from_secs(60)).unwrap();
    let (mut second, second_waiter) =
        PendingSend::new(&message("m1"), Duration::from_secs(60)).unwrap();

    assert_eq!(correlator.register(&mut first), Registration::Registered);
    assert_eq!(correlator.register(&mut second), Registration::Rejected);
    assert_eq!(correlator.len(), 1);

    let rejected = second_waiter.wait().await;
    assert!(matches!(rejected, Err(FcmError::DuplicateMessageId(id)) if id == "m1"));

    // the first caller still gets its acknowledgment
    assert_eq!(correlator.resolve(&ack_frame("m1", "")), Resolution::Delivered);
    assert!(first_waiter.wait().await.unwrap().results[0].is_success());
}

#[tokio::test]
async fn test_correlator_reuses_id_after_caller_went_away() {
    let mut correlator = Correlator::new();
    let (mut first, first_waiter) =
        PendingSend::new(&message("m1"), Duration::from_secs(60)).unwrap();
    correlator.register(&mut first);
    drop(first_waiter);

    let (mut second, second_waiter) =
        PendingSend::new(&message("m1"), Duration::from_secs(60)).unwrap();
    assert_eq!(correlator.register(&mut second), Registration::Registered);
    assert_eq!(correlator.resolve(&ack_frame("m1", "")), Resolution::Delivered);
    assert!(second_waiter.wait().await.unwrap().results[0].is_success());
}

#[tokio::test]
async fn test_duplicate_message_id_is_rejected_while_first_waits() {
    let (client, state) = start_client().await;

    let first = message("dup");
    let second = message("dup");

    let (response, _) = tokio::join!(client.send(&first), async {
        wait_until(|| state.was_written("dup")).await;
        let result = client.send(&second).await;
        assert!(matches!(result, Err(FcmError::DuplicateMessageId(id)) if id == "dup"));
        state.push(1, ack("dup"));
    });

    let response = response.unwrap();
    assert_eq!(response.status_code, 200);
    assert!(response.results[0].is_success());
    let written = state.written_ids();
    assert_eq!(written.iter().filter(|(_, id)| id == "dup").count(), 1);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_resend_queue_is_bounded() {
    let (client, state) = start_client().await;
    state.fail_writes.store(true, Ordering::SeqCst);
    state.fail_connects.store(true, Ordering::SeqCst);

    for i in 0..20 {
        client.async_send(&message(&format!("d{i}"))).await.unwrap();
    }
    let result = client
        .send_with_timeout(&message("extra"), Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(FcmError::ResendQueueFull(16))));

    state.fail_writes.store(false, Ordering::SeqCst);
    state.fail_connects.store(false, Ordering::SeqCst);

    wait_until(|| state.written_ids().len() == 16).await;
    client.async_send(&message("after")).await.unwrap();
    wait_until(|| state.was_written("after")).await;

    let mut expected: Vec<(usize, String)> = (0..16).map(|i| (2, format!("d{i}"))).collect();
    expected.push((2, "after".to_string()));
    assert_eq!(state.written_ids(), expected);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_send_is_not_resent() {
    let (client, state) = start_client().await;
    state.fail_writes.store(true, Ordering::SeqCst);
    state.fail_connects.store(true, Ordering::SeqCst);

    let response = client
        .send_with_timeout(&message("late"), Duration::from_millis(30))
        .await
        .unwrap();
    assert_eq!(response.status_code, 503);
    tokio::time::sleep(Duration::from_millis(30)).await;

    state.fail_writes.store(false, Ordering::SeqCst);
    state.fail_connects.store(false, Ordering::SeqCst);
    wait_until(|| state.connects() == 2).await;

    client.async_send(&message("after")).await.unwrap();
    wait_until(|| state.was_written("after")).await;
    assert_eq!(state.written_ids(), vec![(2, "after".to_string())]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_initial_connect_failure_is_returned() {
    let state = Arc::new(FakeState::default());
    state.fail_connects.store(true, Ordering::SeqCst);
    let connector = FakeConnector {
        state: state.clone(),
    };

    let result = XmppClient::with_connector(Box::new(connector), test_options()).await;

    assert!(matches!(result, Err(FcmError::Connection { .. })));
}

#[tokio::test]
async fn test_send_requires_message_id() {
    let (client, state) = start_client().await;

    let result = client.send(&Message::for_token("token-1")).await;

    assert!(matches!(result, Err(FcmError::Validation(_))));
    assert!(state.written_ids().is_empty());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_manager_tracks_generations() {
    let state = Arc::new(FakeState::default());
    let mut manager = ConnectionManager::new(Box::new(FakeConnector {
        state: state.clone(),
    }));

    assert!(!manager.is_connected());
    assert!(matches!(
        manager.write_stanza("<presence/>").await,
        Err(FcmError::NotConnected)
    ));

    manager.connect().await.unwrap();
    manager.connect().await.unwrap();
    assert_eq!(manager.generation(), 2);

    manager.disconnect();
    assert!(!manager.is_connected());
    assert!(matches!(
        manager.read_stanza().await,
        Err(FcmError::NotConnected)
    ));
}
