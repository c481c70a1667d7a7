//! Integration tests for the heartbeat protocol.
//!
//! Each test spins up a session tracker and one or more probe emitters on
//! the loopback interface, spawned as separate tokio tasks so both sides
//! make progress concurrently.  Loss is driven through the configured
//! percentage at its deterministic endpoints (0 and 100).

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use udp_heartbeat::emitter::{Emitter, EmitterConfig};
use udp_heartbeat::socket::Socket;
use udp_heartbeat::tracker::{Tracker, TrackerConfig, TrackerReport};
use udp_heartbeat::wire::{unix_micros_now, Probe, Reply};
use udp_heartbeat::RunStats;

/// Bind a socket to an OS-assigned port on loopback.
async fn ephemeral() -> Socket {
    let addr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Spawn a tracker on loopback with the given loss percentage.
///
/// Returns its address, a handle resolving to the shutdown report, and the
/// sender that triggers the shutdown.
async fn spawn_tracker(
    loss_percent: u8,
) -> (
    std::net::SocketAddr,
    tokio::task::JoinHandle<TrackerReport>,
    watch::Sender<bool>,
) {
    let socket = ephemeral().await;
    let config = TrackerConfig {
        loss_percent,
        ..TrackerConfig::default()
    };
    let tracker = Tracker::from_socket(socket, config);
    let addr = tracker.local_addr();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(tracker.run(shutdown_rx));
    (addr, handle, shutdown_tx)
}

/// Run an emitter to completion against `server`, sending `count` probes
/// at a test-friendly cadence.
async fn run_emitter(server: std::net::SocketAddr, count: u64) -> RunStats {
    let config = EmitterConfig {
        count: Some(count),
        probe_interval: Duration::from_millis(10),
        reply_timeout: Duration::from_millis(500),
        ..EmitterConfig::new(server)
    };
    let emitter = Emitter::from_socket(ephemeral().await, config);

    // Held open so the emitter stops on its count, not on a dropped channel.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    emitter.run(shutdown_rx).await
}

// ---------------------------------------------------------------------------
// Test 1: zero loss — every probe is answered
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_zero_loss_all_probes_answered() {
    let (addr, tracker, shutdown) = spawn_tracker(0).await;

    let stats = run_emitter(addr, 5).await;
    assert_eq!(stats.sent, 5);
    assert_eq!(stats.received, 5);
    assert_eq!(stats.loss_percentage(), 0.0);

    shutdown.send(true).unwrap();
    let report = tracker.await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    let (_, session) = &report.sessions[0];
    assert_eq!(session.received, 5);
    assert_eq!(session.lost, 0);
    assert_eq!(session.loss_percentage(), 0.0);
}

// ---------------------------------------------------------------------------
// Test 2: full loss — no replies, everything counted lost
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_loss_no_replies() {
    let (addr, tracker, shutdown) = spawn_tracker(100).await;

    let stats = run_emitter(addr, 3).await;
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.received, 0);
    assert_eq!(stats.loss_percentage(), 100.0);

    shutdown.send(true).unwrap();
    let report = tracker.await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    let (_, session) = &report.sessions[0];
    assert_eq!(session.received, 3);
    assert_eq!(session.lost, 3);
    assert_eq!(session.loss_percentage(), 100.0);
}

// ---------------------------------------------------------------------------
// Test 3: malformed probe — diagnostic reply, loop keeps serving
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_probe_survived() {
    let (addr, tracker, shutdown) = spawn_tracker(0).await;
    let probe_sock = ephemeral().await;

    // No tab-separated timestamp: must draw a diagnostic, not a crash.
    probe_sock.send_to(b"not a probe", addr).await.unwrap();
    let (diag, from) = timeout(Duration::from_secs(2), probe_sock.recv_from())
        .await
        .expect("no diagnostic within 2s")
        .unwrap();
    assert_eq!(from, addr);
    let diag = String::from_utf8(diag).unwrap();
    assert!(
        diag.starts_with("unrecognized probe"),
        "unexpected diagnostic: {diag}"
    );
    assert!(Reply::decode(diag.as_bytes()).is_err());

    // A well-formed probe right after must still be served.
    let probe = Probe {
        seq: 1,
        sent_at: unix_micros_now(),
    };
    probe_sock
        .send_to(probe.encode().as_bytes(), addr)
        .await
        .unwrap();
    let (raw, _) = timeout(Duration::from_secs(2), probe_sock.recv_from())
        .await
        .expect("no reply within 2s")
        .unwrap();
    let reply = Reply::decode(&raw).expect("reply must decode");
    assert_eq!(reply.lost_since_reply, 0);

    shutdown.send(true).unwrap();
    let report = tracker.await.unwrap();
    // The malformed datagram never created a session; the probe did.
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].1.received, 1);
}

// ---------------------------------------------------------------------------
// Test 4: reported delay reflects the probe's send timestamp
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reply_delay_measures_send_to_receipt() {
    let (addr, tracker, shutdown) = spawn_tracker(0).await;
    let probe_sock = ephemeral().await;

    // Backdate the probe by two seconds; the observed delay must include it.
    let probe = Probe {
        seq: 1,
        sent_at: unix_micros_now() - 2_000_000,
    };
    probe_sock
        .send_to(probe.encode().as_bytes(), addr)
        .await
        .unwrap();

    let (raw, _) = timeout(Duration::from_secs(2), probe_sock.recv_from())
        .await
        .expect("no reply within 2s")
        .unwrap();
    let reply = Reply::decode(&raw).unwrap();
    assert!(reply.delay >= Duration::from_secs(2), "delay {:?}", reply.delay);
    assert!(reply.delay < Duration::from_secs(10), "delay {:?}", reply.delay);

    shutdown.send(true).unwrap();
    tracker.await.unwrap();
}

// ---------------------------------------------------------------------------
// Test 5: two clients, two sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_two_clients_tracked_separately() {
    let (addr, tracker, shutdown) = spawn_tracker(0).await;

    let a = tokio::spawn(run_emitter(addr, 2));
    let b = tokio::spawn(run_emitter(addr, 3));
    let (a, b) = tokio::join!(a, b);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.received, 2);
    assert_eq!(b.received, 3);

    shutdown.send(true).unwrap();
    let report = tracker.await.unwrap();
    assert_eq!(report.sessions.len(), 2, "one session per client address");
    let received: u64 = report.sessions.iter().map(|(_, s)| s.received).sum();
    assert_eq!(received, 5);
}

// ---------------------------------------------------------------------------
// Test 6: shutdown with no traffic — empty report, no division error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_without_traffic() {
    let (_addr, tracker, shutdown) = spawn_tracker(40).await;

    shutdown.send(true).unwrap();
    let report = timeout(Duration::from_secs(2), tracker)
        .await
        .expect("tracker must unwind promptly on shutdown")
        .unwrap();
    assert!(report.sessions.is_empty());

    // Rendering an empty report must not blow up.
    let rendered = report.to_string();
    assert!(rendered.contains("Summary"));
}

// ---------------------------------------------------------------------------
// Test 7: emitter keeps going when the server never answers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_emitter_survives_silent_server() {
    // A bound socket that never replies: every reply wait times out.
    let silent = ephemeral().await;
    let server = silent.local_addr;

    let config = EmitterConfig {
        count: Some(3),
        probe_interval: Duration::from_millis(10),
        reply_timeout: Duration::from_millis(50),
        ..EmitterConfig::new(server)
    };
    let emitter = Emitter::from_socket(ephemeral().await, config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let stats = emitter.run(shutdown_rx).await;
    assert_eq!(stats.sent, 3, "sequence advances despite timeouts");
    assert_eq!(stats.received, 0);
    assert_eq!(stats.loss_percentage(), 100.0);
}

// ---------------------------------------------------------------------------
// Test 7b: timed-out probes loop straight back to the next send
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_timeouts_skip_inter_probe_pause() {
    let silent = ephemeral().await;
    let server = silent.local_addr;

    // A long interval with a short reply timeout: if the emitter slept the
    // interval after timeouts, three probes would take over two seconds.
    let config = EmitterConfig {
        count: Some(3),
        probe_interval: Duration::from_secs(1),
        reply_timeout: Duration::from_millis(50),
        ..EmitterConfig::new(server)
    };
    let emitter = Emitter::from_socket(ephemeral().await, config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let started = std::time::Instant::now();
    let stats = emitter.run(shutdown_rx).await;
    let elapsed = started.elapsed();

    assert_eq!(stats.sent, 3);
    assert_eq!(stats.received, 0);
    assert!(
        elapsed < Duration::from_millis(900),
        "unanswered probes must resend immediately, took {elapsed:?}"
    );
}

// ---------------------------------------------------------------------------
// Test 8: an undecodable reply aborts the emitter loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_emitter_aborts_on_garbage_reply() {
    let fake_server = ephemeral().await;
    let server = fake_server.local_addr;

    let config = EmitterConfig {
        count: Some(10),
        probe_interval: Duration::from_millis(10),
        reply_timeout: Duration::from_secs(2),
        ..EmitterConfig::new(server)
    };
    let emitter = Emitter::from_socket(ephemeral().await, config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(emitter.run(shutdown_rx));

    // Answer the first probe with something that is not a reply.
    let (_, from) = fake_server.recv_from().await.unwrap();
    fake_server.send_to(b"%%% not a reply %%%", from).await.unwrap();

    let stats = timeout(Duration::from_secs(5), run)
        .await
        .expect("emitter must abort, not run out its count")
        .unwrap();
    assert_eq!(stats.sent, 1, "loop stopped at the bad reply");
    assert_eq!(stats.received, 0);
}

// ---------------------------------------------------------------------------
// Test 8b: idle notices do not stop the receive loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_idle_notice_keeps_serving() {
    let socket = ephemeral().await;
    let config = TrackerConfig {
        loss_percent: 0,
        idle_timeout: Duration::from_millis(50),
        ..TrackerConfig::default()
    };
    let tracker = Tracker::from_socket(socket, config);
    let addr = tracker.local_addr();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(tracker.run(shutdown_rx));

    // Let several idle periods elapse with no traffic at all.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The loop must still be receiving and replying afterwards.
    let probe_sock = ephemeral().await;
    let probe = Probe {
        seq: 1,
        sent_at: unix_micros_now(),
    };
    probe_sock
        .send_to(probe.encode().as_bytes(), addr)
        .await
        .unwrap();
    let (raw, _) = timeout(Duration::from_secs(2), probe_sock.recv_from())
        .await
        .expect("tracker must keep serving after idle notices")
        .unwrap();
    assert!(Reply::decode(&raw).is_ok());

    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].1.received, 1);
}

// ---------------------------------------------------------------------------
// Test 9: interrupting the emitter mid-run yields the partial statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_emitter_interrupt_reports_partial_stats() {
    let (addr, tracker, tracker_shutdown) = spawn_tracker(0).await;

    let config = EmitterConfig {
        count: None, // unbounded, like the real client
        probe_interval: Duration::from_millis(20),
        reply_timeout: Duration::from_millis(500),
        ..EmitterConfig::new(addr)
    };
    let emitter = Emitter::from_socket(ephemeral().await, config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(emitter.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();

    let stats = timeout(Duration::from_secs(2), run)
        .await
        .expect("emitter must unwind on interrupt")
        .unwrap();
    assert!(stats.sent >= 1);
    assert!(stats.received <= stats.sent);

    tracker_shutdown.send(true).unwrap();
    tracker.await.unwrap();
}
