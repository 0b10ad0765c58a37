use serde_json::json;
use tokio::time::{sleep, timeout};

use super::*;
use crate::config::AttachmentOrder;
use crate::error::CallError;
use crate::pending::Part;
use crate::transport::memory::{self, MemoryConnector, MemoryPeer};

const SHORT: Duration = Duration::from_millis(50);

async fn open_session(config: SessionConfig) -> (Session, MemoryPeer) {
    let (connector, peer) = memory::pair();
    let session = Session::with_connector(config, Arc::new(connector));
    session.open().await.expect("open should succeed");
    (session, peer)
}

/// Issue a call and answer it, so every frame queued before has been routed.
async fn round_trip(session: &Session, peer: &mut MemoryPeer) {
    let marker = session.issue("marker", json!({})).expect("issue marker");
    let call = peer.next_call().await.expect("marker call");
    peer.send_text(format!(r#"{{"id":"{}","result":"marker"}}"#, call.id));
    marker.wait().await.expect("marker settles");
}

async fn wait_for_state(session: &Session, expected: SessionState) {
    timeout(Duration::from_secs(1), async {
        while session.state() != expected {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("session should reach expected state");
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn new_session_is_idle() {
    let (connector, _peer) = memory::pair();
    let session = Session::with_connector(SessionConfig::default(), Arc::new(connector));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn call_before_open_fails_without_sending() {
    let (connector, mut peer) = memory::pair();
    let session = Session::with_connector(SessionConfig::default(), Arc::new(connector));

    let err = session.call_empty("echo").await.expect_err("not open");
    assert!(matches!(err, CallError::NotReady));

    session.open().await.expect("open");
    assert!(peer.try_next_outbound().is_none(), "no frame may be sent");
}

#[tokio::test]
async fn open_reports_connection_error() {
    let session = Session::with_connector(SessionConfig::default(), Arc::new(MemoryConnector::refusing()));

    let err = session.open().await.expect_err("refused");
    assert!(matches!(err, SessionError::Connection { .. }));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.issue("echo", json!({})), Err(CallError::NotReady)));
}

#[tokio::test]
async fn open_twice_is_rejected() {
    let (session, _peer) = open_session(SessionConfig::default()).await;
    assert_eq!(session.state(), SessionState::Open);
    assert!(matches!(session.open().await, Err(SessionError::AlreadyOpen)));
}

#[tokio::test]
async fn close_sends_normal_close_once() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;

    session.close();
    session.close();

    assert_eq!(
        peer.next_outbound().await,
        Some(Outbound::Close { code: 1000, reason: "manual".to_owned() })
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert!(peer.try_next_outbound().is_none());
    assert!(matches!(session.issue("echo", json!({})), Err(CallError::NotReady)));
}

#[tokio::test]
async fn close_before_open_is_a_no_op() {
    let (connector, mut peer) = memory::pair();
    let session = Session::with_connector(SessionConfig::default(), Arc::new(connector));
    session.close();
    assert_eq!(session.state(), SessionState::Idle);
    session.open().await.expect("open");
    assert!(peer.try_next_outbound().is_none());
}

// =============================================================================
// CALLS
// =============================================================================

#[tokio::test]
async fn echo_call_resolves_with_result() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;

    let pending = session.issue("echo", json!({})).expect("issue");
    assert_eq!(pending.id(), "1");

    let call = peer.next_call().await.expect("call frame");
    assert_eq!(call, frames::CallEnvelope::new("1", "echo", json!({})));
    peer.send_text(r#"{"id":"1","result":"pong"}"#);

    let reply = pending.wait().await.expect("success");
    assert_eq!(reply.into_sequence(), vec![Part::Result(json!("pong"))]);
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn concurrent_calls_get_increasing_ids_in_issue_order() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;

    let pending: Vec<PendingReply> = (0..10)
        .map(|n| session.issue("echo", json!({ "n": n })).expect("issue"))
        .collect();
    assert_eq!(session.pending_count(), 10);

    let mut sent = Vec::new();
    for _ in 0..10 {
        sent.push(peer.next_call().await.expect("call"));
    }
    let ids: Vec<u64> = sent.iter().map(|c| c.id.parse().expect("numeric id")).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<u64>>());

    for call in sent.iter().rev() {
        peer.send_text(format!(r#"{{"id":"{}","result":{}}}"#, call.id, call.params["n"]));
    }
    for (n, reply) in pending.into_iter().enumerate() {
        assert_eq!(reply.wait().await.expect("success").result, json!(n));
    }
}

#[tokio::test]
async fn replies_match_by_id_regardless_of_arrival_order() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;
    let first = session.issue("a", json!({})).expect("first");
    let second = session.issue("b", json!({})).expect("second");

    peer.send_text(r#"{"id":"2","result":"for-b"}"#);
    peer.send_text(r#"{"id":"1","result":"for-a"}"#);

    assert_eq!(second.wait().await.expect("b").result, json!("for-b"));
    assert_eq!(first.wait().await.expect("a").result, json!("for-a"));
}

#[tokio::test]
async fn binary_frames_become_attachments_in_send_order() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("file", json!({})).expect("issue");
    let _ = peer.next_call().await;

    peer.send_binary(b"attachment1".to_vec());
    peer.send_binary(b"attachment2".to_vec());
    peer.send_text(r#"{"id":"1","result":"ok"}"#);

    let reply = pending.wait().await.expect("success");
    assert_eq!(
        reply.into_sequence(),
        vec![
            Part::Result(json!("ok")),
            Part::Attachment(b"attachment1".to_vec()),
            Part::Attachment(b"attachment2".to_vec()),
        ]
    );
}

#[tokio::test]
async fn reversed_attachment_order_is_honored() {
    let config = SessionConfig::default().with_attachment_order(AttachmentOrder::Reversed);
    let (session, peer) = open_session(config).await;
    let pending = session.issue("file", json!({})).expect("issue");

    peer.send_binary(vec![1]);
    peer.send_binary(vec![2]);
    peer.send_text(r#"{"id":"1","result":"ok"}"#);

    assert_eq!(pending.wait().await.expect("success").attachments, vec![vec![2], vec![1]]);
}

#[tokio::test]
async fn remote_error_settles_as_failure() {
    let (session, peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("missing", json!({})).expect("issue");

    peer.send_text(r#"{"id":"1","error":"Method Unavailable : \"missing\""}"#);

    let err = pending.wait().await.expect_err("failure");
    assert_eq!(err.remote(), Some(&json!("Method Unavailable : \"missing\"")));
}

#[tokio::test]
async fn duplicate_and_unknown_replies_do_not_disturb_pending_calls() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;
    let first = session.issue("a", json!({})).expect("first");
    let second = session.issue("b", json!({})).expect("second");
    let _ = peer.next_call().await;
    let _ = peer.next_call().await;

    peer.send_text(r#"{"id":"1","result":"once"}"#);
    peer.send_text(r#"{"id":"1","result":"twice"}"#);
    peer.send_text(r#"{"id":"42","result":"stray"}"#);
    peer.send_text("not json at all");
    peer.send_text(r#"{"result":"no id"}"#);

    assert_eq!(first.wait().await.expect("first").result, json!("once"));
    assert_eq!(session.pending_count(), 1);

    peer.send_text(r#"{"id":"2","result":"fine"}"#);
    assert_eq!(second.wait().await.expect("second").result, json!("fine"));
    assert_eq!(session.state(), SessionState::Open);
}

/// A reply carrying neither `result` nor `error` removes the call from the
/// table and never settles it. The caller only gets out through its own
/// timeout or by dropping the handle.
#[tokio::test]
async fn unknown_envelope_leaves_its_caller_suspended() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;
    let abandoned = session.issue("a", json!({})).expect("first");
    let other = session.issue("b", json!({})).expect("second");
    let _ = peer.next_call().await;
    let _ = peer.next_call().await;

    peer.send_text(r#"{"id":"1"}"#);
    round_trip(&session, &mut peer).await;

    assert_eq!(session.pending_count(), 1);
    assert_eq!(session.abandoned_count(), 1);
    assert!(timeout(SHORT, abandoned.wait()).await.is_err(), "abandoned call must not settle");

    peer.send_text(r#"{"id":"2","result":"still works"}"#);
    assert_eq!(other.wait().await.expect("other").result, json!("still works"));
}

#[tokio::test]
async fn dropping_a_pending_reply_frees_its_entry() {
    let (session, _peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("slow", json!({})).expect("issue");
    assert_eq!(session.pending_count(), 1);

    drop(pending);
    assert_eq!(session.pending_count(), 0);
}

// =============================================================================
// TIMEOUTS
// =============================================================================

#[tokio::test]
async fn call_timeout_fails_the_call_and_late_reply_is_orphaned() {
    let config = SessionConfig::default().with_call_timeout(Duration::from_millis(20));
    let (session, mut peer) = open_session(config).await;

    let err = session.call_empty("slow").await.expect_err("timeout");
    assert!(matches!(err, CallError::Timeout(limit) if limit == Duration::from_millis(20)));
    assert_eq!(session.pending_count(), 0);

    let _ = peer.next_call().await;
    peer.send_text(r#"{"id":"1","result":"too late"}"#);
    round_trip(&session, &mut peer).await;
    assert_eq!(session.pending_count(), 0);
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn reply_within_timeout_wins() {
    let config = SessionConfig::default().with_call_timeout(Duration::from_secs(5));
    let (session, peer) = open_session(config).await;
    let pending = session.issue("fast", json!({})).expect("issue");

    peer.send_text(r#"{"id":"1","result":true}"#);

    assert_eq!(pending.wait().await.expect("success").result, json!(true));
}

// =============================================================================
// TEARDOWN
// =============================================================================

#[tokio::test]
async fn transport_close_rejects_pending_calls() {
    let (session, peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("a", json!({})).expect("issue");

    peer.close(1001, "going away");

    assert!(matches!(pending.wait().await, Err(CallError::Closed)));
    wait_for_state(&session, SessionState::Closed).await;
    assert!(matches!(session.issue("b", json!({})), Err(CallError::NotReady)));
}

#[tokio::test]
async fn transport_error_closes_the_session() {
    let (session, peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("a", json!({})).expect("issue");

    peer.fail("connection reset");

    assert!(matches!(pending.wait().await, Err(CallError::Closed)));
    wait_for_state(&session, SessionState::Closed).await;
}

#[tokio::test]
async fn abandon_policy_keeps_calls_pending_after_close() {
    let config = SessionConfig::default().with_teardown(TeardownPolicy::Abandon);
    let (session, peer) = open_session(config).await;
    let pending = session.issue("a", json!({})).expect("issue");

    peer.close(1000, "done");
    wait_for_state(&session, SessionState::Closed).await;

    assert_eq!(session.pending_count(), 1);
    assert!(timeout(SHORT, pending.wait()).await.is_err());
}

#[tokio::test]
async fn replies_after_close_request_are_still_routed() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("a", json!({})).expect("issue");
    let _ = peer.next_call().await;

    session.close();
    peer.send_text(r#"{"id":"1","result":"in time"}"#);
    peer.close(1000, "manual");

    assert_eq!(pending.wait().await.expect("success").result, json!("in time"));
}

#[tokio::test]
async fn array_text_frame_leaves_pending_calls_alone() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;
    let pending = session.issue("a", json!({})).expect("issue");
    let _ = peer.next_call().await;

    peer.send_binary(b"kept".to_vec());
    peer.send_text(r#"["1","hijacked"]"#);
    peer.send_text(r#"{"id":"1","result":"real"}"#);

    let reply = pending.wait().await.expect("success");
    assert_eq!(reply.result, json!("real"));
    assert_eq!(reply.attachments, vec![b"kept".to_vec()]);
    assert_eq!(session.state(), SessionState::Open);
}

// =============================================================================
// RE-OPEN AND DROP
// =============================================================================

#[tokio::test]
async fn reopen_rejects_previous_calls_and_ignores_the_old_stream() {
    let (connector, mut peers) = memory::pairs(2);
    let mut second = peers.pop().expect("second peer");
    let mut first = peers.pop().expect("first peer");
    let session = Session::with_connector(SessionConfig::default(), Arc::new(connector));

    session.open().await.expect("open");
    let stale = session.issue("a", json!({})).expect("issue on first connection");
    assert_eq!(first.next_call().await.expect("first call").id, "1");

    session.close();
    session.open().await.expect("re-open before the old transport confirmed close");
    assert_eq!(session.state(), SessionState::Open);

    let outcome = timeout(Duration::from_secs(1), stale.wait()).await.expect("stale call settles");
    assert!(matches!(outcome, Err(CallError::Closed)));

    let fresh = session.issue("b", json!({})).expect("issue on second connection");
    assert_eq!(second.next_call().await.expect("second call").id, "2");

    // The old dispatch task lets go of its stream at the first frame it sees.
    timeout(Duration::from_secs(1), async {
        while first.send_binary(b"stale".to_vec()) {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("old connection should be detached");
    assert!(!first.close(1000, "late"));

    second.send_text(r#"{"id":"2","result":"ok"}"#);
    let reply = fresh.wait().await.expect("fresh call succeeds");
    assert_eq!(reply.result, json!("ok"));
    assert!(reply.attachments.is_empty(), "no attachment may cross connections");
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn reopen_after_transport_close_keeps_counting_ids() {
    let (connector, mut peers) = memory::pairs(2);
    let mut second = peers.pop().expect("second peer");
    let first = peers.pop().expect("first peer");
    let session = Session::with_connector(SessionConfig::default(), Arc::new(connector));

    session.open().await.expect("open");
    let _ = session.issue("a", json!({})).expect("issue");
    first.close(1001, "going away");
    wait_for_state(&session, SessionState::Closed).await;

    session.open().await.expect("re-open");
    let pending = session.issue("b", json!({})).expect("issue");
    assert_eq!(pending.id(), "2");
    assert_eq!(second.next_call().await.expect("call").id, "2");
}

#[tokio::test]
async fn dropping_an_open_session_closes_its_transport() {
    let (session, mut peer) = open_session(SessionConfig::default()).await;

    drop(session);

    let sent = timeout(Duration::from_secs(1), peer.next_outbound()).await.expect("close should be sent");
    assert_eq!(sent, Some(Outbound::Close { code: 1000, reason: "manual".to_owned() }));
    let ended = timeout(Duration::from_secs(1), peer.next_outbound()).await.expect("channel should end");
    assert_eq!(ended, None);
}

#[tokio::test]
async fn closed_waits_for_the_transport_to_confirm() {
    let (session, peer) = open_session(SessionConfig::default()).await;

    session.close();
    assert!(timeout(SHORT, session.closed()).await.is_err(), "peer has not confirmed yet");

    peer.close(1000, "manual");
    timeout(Duration::from_secs(1), session.closed()).await.expect("closed after confirmation");
}

#[tokio::test]
async fn closed_returns_at_once_for_an_unopened_session() {
    let (connector, _peer) = memory::pair();
    let session = Session::with_connector(SessionConfig::default(), Arc::new(connector));
    timeout(SHORT, session.closed()).await.expect("nothing to wait for");
}
