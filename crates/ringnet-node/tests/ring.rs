//! Simulated-ring integration tests.
//!
//! Engines are wired into rings in-memory: each node's outbox feeds the next
//! node's event channel through a forwarding task, with a tap recording every
//! datagram for assertions. Time is tokio's paused clock, so a 1-second token
//! hold costs nothing and the schedules are deterministic.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use ringnet_core::crc;
use ringnet_core::frame::{self, Control, DataFrame, Frame};
use ringnet_core::queue::QueueError;
use ringnet_node::engine::{Engine, EngineError, EngineHandle, EngineSettings, Event, NodeIdentity};
use ringnet_node::status::EngineState;
use ringnet_node::watchdog;

const HOLD: Duration = Duration::from_secs(1);

// ── Harness ───────────────────────────────────────────────────────────────────

fn spawn_node(
    name: &str,
    generator: bool,
    error_probability: f64,
    max_retries: u32,
) -> (EngineHandle, mpsc::Receiver<Vec<u8>>) {
    let identity = NodeIdentity {
        name: name.to_string(),
        hold: HOLD,
        generator,
    };
    let settings = EngineSettings {
        error_probability,
        max_retries,
    };
    let (engine, handle, outbox) = Engine::new(identity, settings);
    tokio::spawn(engine.run());
    (handle, outbox)
}

/// Forward one node's outbox to the next node, recording every datagram.
fn forward(
    mut outbox: mpsc::Receiver<Vec<u8>>,
    next: mpsc::Sender<Event>,
) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tap_tx, tap_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(bytes) = outbox.recv().await {
            let _ = tap_tx.send(bytes.clone());
            if next.send(Event::Datagram(bytes)).await.is_err() {
                break;
            }
        }
    });
    tap_rx
}

/// Like [`forward`], but the first token datagram is lost in transit.
fn forward_dropping_first_token(
    mut outbox: mpsc::Receiver<Vec<u8>>,
    next: mpsc::Sender<Event>,
) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tap_tx, tap_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut dropped = false;
        while let Some(bytes) = outbox.recv().await {
            let _ = tap_tx.send(bytes.clone());
            if !dropped && matches!(frame::decode(&bytes), Ok(Frame::Token)) {
                dropped = true;
                continue;
            }
            if next.send(Event::Datagram(bytes)).await.is_err() {
                break;
            }
        }
    });
    tap_rx
}

/// Record a lone node's emissions without delivering them anywhere.
fn sink(mut outbox: mpsc::Receiver<Vec<u8>>) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tap_tx, tap_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(bytes) = outbox.recv().await {
            let _ = tap_tx.send(bytes);
        }
    });
    tap_rx
}

/// Alice → Bob → Carol → Alice, Alice generating. Only Alice injects errors.
fn three_ring(
    alice_error_probability: f64,
    max_retries: u32,
) -> ([EngineHandle; 3], [mpsc::UnboundedReceiver<Vec<u8>>; 3]) {
    let (alice, alice_out) = spawn_node("Alice", true, alice_error_probability, max_retries);
    let (bob, bob_out) = spawn_node("Bob", false, 0.0, max_retries);
    let (carol, carol_out) = spawn_node("Carol", false, 0.0, max_retries);

    let tap_alice = forward(alice_out, bob.events());
    let tap_bob = forward(bob_out, carol.events());
    let tap_carol = forward(carol_out, alice.events());

    ([alice, bob, carol], [tap_alice, tap_bob, tap_carol])
}

fn drain(tap: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Ok(bytes) = tap.try_recv() {
        out.push(bytes);
    }
    out
}

fn data_frames(datagrams: &[Vec<u8>]) -> Vec<DataFrame> {
    datagrams
        .iter()
        .filter_map(|bytes| match frame::decode(bytes) {
            Ok(Frame::Data(data)) => Some(data),
            _ => None,
        })
        .collect()
}

// ── End-to-end scenarios ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unicast_happy_path() {
    let ([alice, bob, carol], [mut tap_alice, mut tap_bob, mut tap_carol]) = three_ring(0.0, 2);

    alice.enqueue("Bob", "hi").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let alice_status = alice.status().await.unwrap();
    assert_eq!(alice_status.counters.frames_sent, 1);
    assert_eq!(alice_status.queue_len, 0, "head dropped after ACK");

    let bob_status = bob.status().await.unwrap();
    assert_eq!(bob_status.counters.frames_received, 1);
    assert_eq!(bob_status.counters.integrity_errors, 0);
    assert_eq!(carol.status().await.unwrap().queue_len, 0);

    // The frame Alice put on the wire is byte-exact.
    let expected = format!(
        "2000;Alice:Bob:maquinanaoexiste:{}:hi",
        crc::checksum_string("Alice:Bob:hi")
    );
    let sent = data_frames(&drain(&mut tap_alice));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].encode(), expected);

    // Bob rewrote the control to ACK; Carol forwarded it unchanged.
    let via_bob = data_frames(&drain(&mut tap_bob));
    assert_eq!(via_bob.len(), 1);
    assert_eq!(via_bob[0].control, Control::Ack);
    let via_carol = data_frames(&drain(&mut tap_carol));
    assert_eq!(via_carol.len(), 1);
    assert_eq!(via_carol[0].control, Control::Ack);
}

#[tokio::test(start_paused = true)]
async fn unicast_with_injected_error_retransmits_until_the_cap() {
    let ([alice, bob, _carol], [_tap_alice, mut tap_bob, _tap_carol]) = three_ring(1.0, 2);

    alice.enqueue("Bob", "x").await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;

    // Initial transmission plus two retransmissions, then the head is dropped.
    let alice_status = alice.status().await.unwrap();
    assert_eq!(alice_status.counters.frames_sent, 3);
    assert_eq!(alice_status.queue_len, 0);

    let bob_status = bob.status().await.unwrap();
    assert_eq!(bob_status.counters.integrity_errors, 3);
    assert_eq!(bob_status.counters.frames_received, 0);

    // Every copy Bob passed on was a NAK.
    let via_bob = data_frames(&drain(&mut tap_bob));
    assert_eq!(via_bob.len(), 3);
    assert!(via_bob.iter().all(|f| f.control == Control::Nak));
}

#[tokio::test(start_paused = true)]
async fn broadcast_cycles_once_and_reaches_everyone() {
    let ([alice, bob, carol], [_tap_alice, mut tap_bob, _tap_carol]) = three_ring(1.0, 2);

    alice.enqueue("TODOS", "hello").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(alice.status().await.unwrap().queue_len, 0);
    assert_eq!(alice.status().await.unwrap().counters.frames_sent, 1);
    assert_eq!(bob.status().await.unwrap().counters.frames_received, 1);
    assert_eq!(carol.status().await.unwrap().counters.frames_received, 1);

    // Broadcasts bypass error injection (p = 1 here) and intermediate nodes
    // forward them untouched.
    let via_bob = data_frames(&drain(&mut tap_bob));
    assert_eq!(via_bob.len(), 1);
    assert_eq!(via_bob[0].control, Control::NotDelivered);
    assert!(via_bob[0].verify());
    assert_eq!(bob.status().await.unwrap().counters.integrity_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_destination_circulates_and_is_dropped_at_origin() {
    let ([alice, bob, carol], [_tap_alice, _tap_bob, mut tap_carol]) = three_ring(0.0, 2);

    alice.enqueue("Dave", "q").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(alice.status().await.unwrap().queue_len, 0);
    assert_eq!(bob.status().await.unwrap().counters.frames_received, 0);
    assert_eq!(carol.status().await.unwrap().counters.frames_received, 0);

    // The frame came back to Alice with the control untouched.
    let returned = data_frames(&drain(&mut tap_carol));
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].control, Control::NotDelivered);
    assert_eq!(returned[0].destination, "Dave");
}

#[tokio::test(start_paused = true)]
async fn watchdog_recovers_a_lost_token() {
    let (alice, alice_out) = spawn_node("Alice", true, 0.0, 2);
    let (bob, bob_out) = spawn_node("Bob", false, 0.0, 2);
    let (carol, carol_out) = spawn_node("Carol", false, 0.0, 2);

    let (_shutdown_guard, shutdown_rx) = watch::channel(false);
    tokio::spawn(watchdog::run(HOLD, alice.events(), shutdown_rx));

    // The very first token Alice forwards is lost in transit.
    let _tap_alice = forward_dropping_first_token(alice_out, bob.events());
    let _tap_bob = forward(bob_out, carol.events());
    let _tap_carol = forward(carol_out, alice.events());

    tokio::time::sleep(Duration::from_secs(40)).await;

    // Regenerated within the circulation bound; the ring is live again.
    let alice_status = alice.status().await.unwrap();
    assert!(
        alice_status.counters.tokens_generated >= 2,
        "startup token plus at least one watchdog regeneration"
    );
    assert!(bob.status().await.unwrap().counters.tokens_received >= 1);
    assert!(carol.status().await.unwrap().counters.tokens_received >= 1);
}

#[tokio::test(start_paused = true)]
async fn queue_overflow_rejects_the_eleventh_and_drains_in_order() {
    let ([alice, bob, _carol], [mut tap_alice, _tap_bob, _tap_carol]) = three_ring(0.0, 2);

    for i in 1..=10 {
        alice.enqueue("Bob", &format!("msg {i}")).await.unwrap();
    }
    let err = alice.enqueue("Bob", "overflow").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Queue(QueueError::Full { capacity: 10 })
    ));

    tokio::time::sleep(Duration::from_secs(40)).await;

    assert_eq!(alice.status().await.unwrap().queue_len, 0);
    assert_eq!(bob.status().await.unwrap().counters.frames_received, 10);

    let sent = data_frames(&drain(&mut tap_alice));
    let payloads: Vec<&str> = sent.iter().map(|f| f.payload.as_str()).collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("msg {i}")).collect();
    assert_eq!(payloads, expected);
}

// ── Protocol properties ───────────────────────────────────────────────────────

/// Between any two data frames released by the same origin there is a token
/// emission from that origin: at most one frame in flight per node.
#[tokio::test(start_paused = true)]
async fn single_frame_in_flight_per_origin() {
    let ([alice, _bob, _carol], [mut tap_alice, _tap_bob, _tap_carol]) = three_ring(0.0, 2);

    for i in 0..3 {
        alice.enqueue("Bob", &format!("payload {i}")).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(15)).await;

    let mut in_flight = false;
    for bytes in drain(&mut tap_alice) {
        match frame::decode(&bytes).unwrap() {
            Frame::Data(data) if data.origin == "Alice" => {
                assert!(!in_flight, "second frame released before the first returned");
                in_flight = true;
            }
            Frame::Token => in_flight = false,
            Frame::Data(_) => {}
        }
    }
}

/// In a fault-free ring the token keeps circulating and the generator's
/// watchdog never fires.
#[tokio::test(start_paused = true)]
async fn token_is_conserved_in_a_fault_free_ring() {
    let (alice, alice_out) = spawn_node("Alice", true, 0.0, 2);
    let (bob, bob_out) = spawn_node("Bob", false, 0.0, 2);
    let (carol, carol_out) = spawn_node("Carol", false, 0.0, 2);

    let (_shutdown_guard, shutdown_rx) = watch::channel(false);
    tokio::spawn(watchdog::run(HOLD, alice.events(), shutdown_rx));

    let _tap_alice = forward(alice_out, bob.events());
    let _tap_bob = forward(bob_out, carol.events());
    let _tap_carol = forward(carol_out, alice.events());

    // Three full circulation bounds with nothing to transmit.
    tokio::time::sleep(Duration::from_secs(30)).await;

    let alice_status = alice.status().await.unwrap();
    assert_eq!(
        alice_status.counters.tokens_generated, 1,
        "startup token only — the watchdog must not fire"
    );
    assert!(bob.status().await.unwrap().counters.tokens_received >= 5);
    assert!(carol.status().await.unwrap().counters.tokens_received >= 5);
}

// ── Boundary behaviours ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn token_while_holding_rearms_and_counts() {
    let (node, outbox) = spawn_node("Alice", false, 0.0, 2);
    let mut tap = sink(outbox);
    let events = node.events();

    events.send(Event::Datagram(b"1000".to_vec())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    events.send(Event::Datagram(b"1000".to_vec())).await.unwrap();

    let status = node.status().await.unwrap();
    assert_eq!(status.counters.tokens_received, 2);
    assert!(status.has_token);

    // The first hold timer is stale after the re-arm: nothing leaves at the
    // original expiry.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(drain(&mut tap).is_empty());

    // One token leaves a full hold after the second arrival.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let out = drain(&mut tap);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], frame::token_wire());
}

#[tokio::test(start_paused = true)]
async fn unknown_control_on_return_releases_token_and_keeps_head() {
    let (node, outbox) = spawn_node("Alice", false, 0.0, 2);
    let mut tap = sink(outbox);

    node.enqueue("Bob", "hi").await.unwrap();
    node.events()
        .send(Event::Datagram(b"1000".to_vec()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let sent = drain(&mut tap);
    let mut returned = match frame::decode(&sent[0]).unwrap() {
        Frame::Data(data) => data,
        Frame::Token => panic!("expected the queued frame first"),
    };
    returned.set_control(Control::Other("garbled".to_string()));
    node.events()
        .send(Event::Datagram(returned.encode().into_bytes()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Token released, head left in place for the next possession.
    let out = drain(&mut tap);
    assert_eq!(out, vec![frame::token_wire().to_vec()]);
    let status = node.status().await.unwrap();
    assert_eq!(status.state, EngineState::Idle);
    assert_eq!(status.queue_len, 1);
}

#[tokio::test(start_paused = true)]
async fn unexpected_return_is_logged_and_discarded() {
    let (node, outbox) = spawn_node("Alice", false, 0.0, 2);
    let mut tap = sink(outbox);

    let bogus = DataFrame::new("Alice", "Bob", "never sent");
    node.events()
        .send(Event::Datagram(bogus.encode().into_bytes()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // No token emitted, no state change.
    assert!(drain(&mut tap).is_empty());
    let status = node.status().await.unwrap();
    assert_eq!(status.state, EngineState::Idle);
    assert!(!status.has_token);
}

#[tokio::test(start_paused = true)]
async fn forced_token_generation_fails_while_holding() {
    let (node, outbox) = spawn_node("Alice", false, 0.0, 2);
    let _tap = sink(outbox);

    node.generate_token().await.unwrap();

    node.events()
        .send(Event::Datagram(b"1000".to_vec()))
        .await
        .unwrap();
    let err = node.generate_token().await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyHolding));
}

#[tokio::test(start_paused = true)]
async fn malformed_datagrams_do_not_disturb_the_engine() {
    let (node, outbox) = spawn_node("Alice", false, 0.0, 2);
    let mut tap = sink(outbox);
    let events = node.events();

    for junk in [
        b"2000;Alice:Bob".to_vec(),
        b"garbage".to_vec(),
        vec![0xff, 0xfe, 0x80],
        b"3000;x:y:z:1:2".to_vec(),
    ] {
        events.send(Event::Datagram(junk)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(drain(&mut tap).is_empty());
    let status = node.status().await.unwrap();
    assert_eq!(status.state, EngineState::Idle);
    assert_eq!(status.counters.frames_received, 0);
}
