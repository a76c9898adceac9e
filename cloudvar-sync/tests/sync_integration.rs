//! End-to-end engine scenarios over an in-process transport.
//!
//! Time is paused; every deadline is reached with `tokio::time::advance`.

use cloudvar_sync::{
    ChannelTransport, CloudConfig, CloudError, CloudSession, CloudValue, OutgoingMessage,
    SendMessageKind, ServerMessage, Timing, TransportEvent,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{advance, Instant};

const SNAPSHOT: &str = r#"{"type":"snapshot","payload":{
    "public_variables":[
        {"cvid":"c1","name":"score","value":3},
        {"cvid":"c2","name":"lives","value":3},
        {"cvid":"c3","name":"level","value":1}
    ],
    "private_variables":[{"cvid":"p1","name":"coins","value":0}],
    "lists":[{"cvid":"l1","name":"names","value":["a","b"]}]
}}"#;

fn open_session(config: CloudConfig) -> (CloudSession, mpsc::UnboundedReceiver<OutgoingMessage>) {
    let (transport, rx) = ChannelTransport::new();
    let session = CloudSession::new(transport, &config).unwrap();
    session.handle_event(TransportEvent::Opened).unwrap();
    session.handle_message(SNAPSHOT).unwrap();
    (session, rx)
}

/// Fire every timer that is due now.
fn poll_now(session: &CloudSession) {
    session.poll_timers(Instant::now());
}

/// Turn an uploaded frame into the server's echo of it.
fn echo(session: &CloudSession, sent: &OutgoingMessage) {
    let message = match sent.kind {
        SendMessageKind::UpdatePublicVariable => {
            ServerMessage::PublicVariableUpdate(sent.payload.clone())
        }
        SendMessageKind::UpdatePrivateVariable => {
            ServerMessage::PrivateVariableUpdate(sent.payload.clone())
        }
        SendMessageKind::UpdateList => ServerMessage::ListUpdate(sent.payload.clone()),
    };
    session.handle_message(&message.encode().unwrap()).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_echo_of_uploaded_frame_confirms_every_command() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let score = session.public_variables().get("score").await.unwrap();
    let lives = session.public_variables().get("lives").await.unwrap();

    let a = score.set(5);
    let b = score.set("five");
    let c = lives.set(2);
    poll_now(&session);

    let sent = rx.try_recv().unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(
        sent.payload,
        json!([
            {"cvid": "c1", "value": 5.0},
            {"cvid": "c1", "value": "five"},
            {"cvid": "c2", "value": 2.0},
        ])
    );

    echo(&session, &sent);
    for done in [a, b, c] {
        assert_eq!(done.await, Ok(()));
    }
    assert_eq!(score.get(), CloudValue::from("five"));
    assert_eq!(lives.get(), CloudValue::from(2));
    assert_eq!(session.public_variables().pending_batches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_foreign_write_is_overridden_by_own_later_echo() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let score = session.public_variables().get("score").await.unwrap();

    let done = score.set(5);
    poll_now(&session);
    let sent = rx.try_recv().unwrap();

    // Another client wrote 3 before our write reached the server.
    session
        .handle_message(r#"{"type":"public_variable_update","payload":[{"cvid":"c1","value":3}]}"#)
        .unwrap();
    assert_eq!(score.get(), CloudValue::from(5));

    echo(&session, &sent);
    assert_eq!(done.await, Ok(()));
    assert_eq!(score.get(), CloudValue::from(5));
}

#[tokio::test(start_paused = true)]
async fn test_rollback_and_redo_restore_the_same_value() {
    let (session, _rx) = open_session(CloudConfig::default());
    let score = session.public_variables().get("score").await.unwrap();
    let names = session.lists().get("names").await.unwrap();
    names.config().local_preupdate.set(true);

    let _a = score.set(8);
    let _b = names.push("c");
    let _c = names.remove(0);
    assert_eq!(names.copy(), vec![CloudValue::from("b"), CloudValue::from("c")]);

    for _ in 0..3 {
        session.config().local_preupdate.set(false);
        assert_eq!(score.get(), CloudValue::from(3));
        names.config().local_preupdate.set(false);
        assert_eq!(names.join(","), "a,b");

        session.config().local_preupdate.set(true);
        names.config().local_preupdate.set(true);
        assert_eq!(score.get(), CloudValue::from(8));
        assert_eq!(names.join(","), "b,c");
    }
}

#[tokio::test(start_paused = true)]
async fn test_illegal_commands_are_never_uploaded() {
    let (session, mut rx) = open_session(CloudConfig {
        string_length_limit: Some(8),
        ..Default::default()
    });
    let score = session.public_variables().get("score").await.unwrap();

    let mut too_long = score.set("far too long");
    let err = too_long.try_result().unwrap().unwrap_err();
    assert_eq!(err.root_cause(), &CloudError::IllegalCommand);

    // Legal when queued, illegal by the time the upload timer fires.
    let mut shrunk = score.set("abcd");
    session.config().string_length_limit.set(2);
    poll_now(&session);

    assert!(rx.try_recv().is_err());
    let err = shrunk.try_result().unwrap().unwrap_err();
    assert_eq!(err.root_cause(), &CloudError::IllegalCommand);
    assert_eq!(score.get(), CloudValue::from(3));
}

#[tokio::test(start_paused = true)]
async fn test_cache_time_delays_upload_exactly() {
    let (session, mut rx) = open_session(CloudConfig {
        cache_time: Some(Timing::millis(1000)),
        ..Default::default()
    });
    let score = session.public_variables().get("score").await.unwrap();
    let start = Instant::now();

    let _a = score.set(4);
    advance(Duration::from_millis(400)).await;
    let _b = score.set(5);
    assert_eq!(
        session.next_deadline(),
        Some(start + Duration::from_millis(1000))
    );

    advance(Duration::from_millis(599)).await;
    poll_now(&session);
    assert!(rx.try_recv().is_err());

    advance(Duration::from_millis(1)).await;
    poll_now(&session);
    let sent = rx.try_recv().unwrap();
    assert_eq!(
        sent.payload,
        json!([{"cvid": "c1", "value": 4.0}, {"cvid": "c1", "value": 5.0}])
    );
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_upload_times_out_after_four_seconds() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let score = session.public_variables().get("score").await.unwrap();

    let mut done = score.set(5);
    poll_now(&session);
    assert!(rx.try_recv().is_ok());
    let uploaded_at = Instant::now();

    assert_eq!(
        session.next_deadline(),
        Some(uploaded_at + Duration::from_millis(4000))
    );
    advance(Duration::from_millis(4000)).await;
    poll_now(&session);

    let err = done.try_result().unwrap().unwrap_err();
    assert_eq!(err.root_cause(), &CloudError::UploadTimeout);
    assert_eq!(
        err.to_string(),
        "cloud variable score: set to 5 failed: upload timed out"
    );
    assert_eq!(score.get(), CloudValue::from(3));
    assert_eq!(session.next_deadline(), None);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_batch_fails_only_its_own_commands() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let group = session.public_variables();
    let score = group.get("score").await.unwrap();
    let lives = group.get("lives").await.unwrap();
    let level = group.get("level").await.unwrap();

    let first = vec![score.set(10), lives.set(2), level.set(2)];
    poll_now(&session);
    assert!(rx.try_recv().is_ok());

    let mut second = score.set(11);
    poll_now(&session);
    let second_frame = rx.try_recv().unwrap();
    assert_eq!(group.pending_batches(), 2);

    session
        .handle_message(
            r#"{"type":"update_rejected","payload":{"kind":"update_public_variable","reason":"rate limited"}}"#,
        )
        .unwrap();
    for done in first {
        let err = done.await.unwrap_err();
        assert_eq!(err.root_cause(), &CloudError::Rejected("rate limited".into()));
    }
    assert!(second.try_result().is_none());
    assert_eq!(score.get(), CloudValue::from(11));
    assert_eq!(lives.get(), CloudValue::from(3));
    assert_eq!(level.get(), CloudValue::from(1));

    echo(&session, &second_frame);
    assert_eq!(second.await, Ok(()));
    assert_eq!(group.pending_batches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_list_edits_wait_for_server_order() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let names = session.lists().get("names").await.unwrap();

    let pushed = names.push("c");
    let replaced = names.replace(0, "z");
    assert_eq!(names.join(","), "a,b");
    poll_now(&session);

    let sent = rx.try_recv().unwrap();
    assert_eq!(sent.kind, SendMessageKind::UpdateList);
    assert_eq!(
        sent.payload,
        json!({"l1": [
            {"action": "push", "value": "c"},
            {"action": "replace", "index": 0, "value": "z"},
        ]})
    );

    // A foreign unshift is ordered first by the server.
    session
        .handle_message(r#"{"type":"list_update","payload":{"l1":[{"action":"unshift","value":"x"}]}}"#)
        .unwrap();
    assert_eq!(names.join(","), "x,a,b");

    echo(&session, &sent);
    assert_eq!(pushed.await, Ok(()));
    assert_eq!(replaced.await, Ok(()));
    assert_eq!(names.join(","), "z,a,b,c");
}

#[tokio::test(start_paused = true)]
async fn test_private_variables_upload_at_most_every_1500ms() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let coins = session.private_variables().get("coins").await.unwrap();

    let _a = coins.set(1);
    poll_now(&session);
    let first = rx.try_recv().unwrap();
    assert_eq!(first.kind, SendMessageKind::UpdatePrivateVariable);
    echo(&session, &first);

    let uploaded_at = Instant::now();
    advance(Duration::from_millis(100)).await;
    let _b = coins.set(2);
    assert_eq!(
        session.next_deadline(),
        Some(uploaded_at + Duration::from_millis(1500))
    );

    advance(Duration::from_millis(1399)).await;
    poll_now(&session);
    assert!(rx.try_recv().is_err());
    advance(Duration::from_millis(1)).await;
    poll_now(&session);
    assert_eq!(rx.try_recv().unwrap().payload, json!([{"cvid": "p1", "value": 2.0}]));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_fails_in_flight_and_reopen_uploads_the_rest() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let score = session.public_variables().get("score").await.unwrap();

    let sent = score.set(5);
    poll_now(&session);
    assert!(rx.try_recv().is_ok());
    session.handle_event(TransportEvent::Disconnected).unwrap();
    let queued = score.set(6);
    poll_now(&session);
    assert!(rx.try_recv().is_err());

    let err = sent.await.unwrap_err();
    assert_eq!(err.root_cause(), &CloudError::Disconnected);
    assert_eq!(score.get(), CloudValue::from(6));

    session.handle_event(TransportEvent::Opened).unwrap();
    poll_now(&session);
    let resent = rx.try_recv().unwrap();
    assert_eq!(resent.payload, json!([{"cvid": "c1", "value": 6.0}]));
    echo(&session, &resent);
    assert_eq!(queued.await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_cvid_in_update_creates_item() {
    let (session, _rx) = open_session(CloudConfig::default());
    session
        .handle_message(r#"{"type":"public_variable_update","payload":[{"cvid":"c9","value":"new"}]}"#)
        .unwrap();

    let created = session.public_variables().get("c9").await.unwrap();
    assert_eq!(created.name(), "c9");
    assert_eq!(created.get(), CloudValue::from("new"));
}

#[tokio::test(start_paused = true)]
async fn test_edit_after_close_fails_and_leaves_value_untouched() {
    let (session, mut rx) = open_session(CloudConfig::default());
    let score = session.public_variables().get("score").await.unwrap();
    session.handle_event(TransportEvent::Closed).unwrap();

    let late = score.set(5);
    advance(Duration::from_secs(100)).await;
    poll_now(&session);

    let err = late.await.unwrap_err();
    assert_eq!(err.root_cause(), &CloudError::Closed);
    assert_eq!(score.get(), CloudValue::from(3));
    assert!(rx.try_recv().is_err());
    assert_eq!(session.next_deadline(), None);
}
