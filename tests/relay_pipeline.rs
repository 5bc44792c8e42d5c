// tests/relay_pipeline.rs
// End-to-end send pipeline: scripted upstream -> orchestrator -> multiplexer subscribers

mod test_helpers;

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

use parley::chat::{NewMessage, Role, SendState};
use parley::config::HistoryPolicy;
use parley::relay::{StreamEvent, Subscription};
use test_helpers::{HELLO_FRAMES, ScriptedUpstream, test_config, test_state};

fn user_message(content: &str) -> NewMessage {
    NewMessage {
        content: content.to_string(),
        ..Default::default()
    }
}

/// Drain a subscription up to and including `End`
async fn collect_until_end(subscription: &mut Subscription) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for stream events");
        match event {
            Some(StreamEvent::End) => {
                events.push(StreamEvent::End);
                return events;
            }
            Some(event) => events.push(event),
            None => return events,
        }
    }
}

fn delta_texts(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta(d) => Some(d.text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_hello_round_trip() {
    let uploads = TempDir::new().unwrap();
    let upstream = Arc::new(ScriptedUpstream::hello());
    let state = test_state(test_config(uploads.path()), upstream.clone());

    let session = state.ledger.create_session();
    let mut subscription = state.multiplexer.subscribe(&session.id);

    let outcome = state.orchestrator.send(&session.id, user_message("hi")).await;
    assert_eq!(outcome.state, SendState::Completed);
    assert_eq!(outcome.assistant_message_id.as_deref(), Some("req-1"));

    let events = collect_until_end(&mut subscription).await;
    assert_eq!(delta_texts(&events), vec!["He", "Hello"]);
    assert_eq!(events.last(), Some(&StreamEvent::End));
    assert_eq!(events.iter().filter(|e| **e == StreamEvent::End).count(), 1);

    let messages = state.ledger.messages(&session.id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello");
    assert_eq!(messages[1].id, "req-1");

    // Placeholder sessions never carry an id upstream
    let requests = upstream.requests.lock();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].session_id.is_none());
    assert_eq!(requests[0].prompt, "hi");
}

#[tokio::test]
async fn test_every_subscriber_sees_the_same_stream() {
    let uploads = TempDir::new().unwrap();
    let state = test_state(test_config(uploads.path()), Arc::new(ScriptedUpstream::hello()));

    let session = state.ledger.create_session();
    let mut first = state.multiplexer.subscribe(&session.id);
    let mut second = state.multiplexer.subscribe(&session.id);

    state.orchestrator.send(&session.id, user_message("hi")).await;

    let a = collect_until_end(&mut first).await;
    let b = collect_until_end(&mut second).await;
    assert_eq!(a, b);
    assert_eq!(delta_texts(&a), vec!["He", "Hello"]);
}

#[tokio::test]
async fn test_chunk_boundaries_do_not_matter() {
    let uploads = TempDir::new().unwrap();
    let joined = HELLO_FRAMES.concat();
    // Split mid-field and across the frame boundary
    let (a, rest) = joined.split_at(37);
    let (b, c) = rest.split_at(90);
    let upstream = Arc::new(ScriptedUpstream::new(&[a, b, c]));
    let state = test_state(test_config(uploads.path()), upstream);

    let session = state.ledger.create_session();
    let mut subscription = state.multiplexer.subscribe(&session.id);
    state.orchestrator.send(&session.id, user_message("hi")).await;

    let events = collect_until_end(&mut subscription).await;
    assert_eq!(delta_texts(&events), vec!["He", "Hello"]);
}

#[tokio::test]
async fn test_placeholder_is_replaced_by_provider_session() {
    let uploads = TempDir::new().unwrap();
    let frames = [
        "data:{\"output\":{\"text\":\"Hi\",\"finish_reason\":null,\"session_id\":\"real123\"},\"request_id\":\"req-9\"}\n\n",
        "data:{\"output\":{\"text\":\"Hi there\",\"finish_reason\":\"stop\",\"session_id\":\"real123\"},\"request_id\":\"req-9\"}\n\n",
    ];
    let upstream = Arc::new(ScriptedUpstream::new(&frames));
    let state = test_state(test_config(uploads.path()), upstream.clone());

    let session = state.ledger.create_session();
    assert!(session.is_placeholder());
    let mut subscription = state.multiplexer.subscribe(&session.id);

    let outcome = state.orchestrator.send(&session.id, user_message("hello")).await;
    assert_eq!(outcome.state, SendState::Completed);
    assert_eq!(outcome.session_id, "real123");

    // The subscriber opened on the placeholder follows the rename
    let events = collect_until_end(&mut subscription).await;
    assert_eq!(delta_texts(&events), vec!["Hi", "Hi there"]);
    assert_eq!(events.last(), Some(&StreamEvent::End));

    assert!(state.ledger.get_session(&session.id).is_none());
    let messages = state.ledger.messages("real123").unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.session_id == "real123"));
    assert_eq!(state.multiplexer.subscriber_count(&session.id), 0);

    // Follow-up sends continue the provider-side conversation
    drop(subscription);
    state.orchestrator.send("real123", user_message("again")).await;
    let requests = upstream.requests.lock();
    assert_eq!(requests[1].session_id.as_deref(), Some("real123"));
    assert!(requests[1].messages.is_none());
}

#[tokio::test]
async fn test_send_queued_on_placeholder_follows_substitution() {
    let uploads = TempDir::new().unwrap();
    let frames = [
        "data:{\"output\":{\"text\":\"Hi\",\"finish_reason\":null,\"session_id\":\"real123\"},\"request_id\":\"req-9\"}\n\n",
        "data:{\"output\":{\"text\":\"Hi there\",\"finish_reason\":\"stop\",\"session_id\":\"real123\"},\"request_id\":\"req-9\"}\n\n",
    ];
    let upstream = Arc::new(ScriptedUpstream::new(&frames).with_delay(Duration::from_millis(30)));
    let state = test_state(test_config(uploads.path()), upstream.clone());

    let session = state.ledger.create_session();
    let first = state.orchestrator.dispatch(&session.id, user_message("first"));
    // Let the first send take the session lock before the second queues behind it
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = state.orchestrator.dispatch(&session.id, user_message("second"));

    let first = timeout(Duration::from_secs(5), first).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(5), second).await.unwrap().unwrap();
    assert_eq!(first.state, SendState::Completed);
    assert_eq!(second.state, SendState::Completed);
    assert_eq!(first.session_id, "real123");
    assert_eq!(second.session_id, "real123");

    let contents: Vec<String> = state
        .ledger
        .messages("real123")
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["first", "Hi there", "second", "Hi there"]);

    // The queued send already knew the provider session
    assert_eq!(upstream.requests.lock()[1].session_id.as_deref(), Some("real123"));

    // A late send addressed to the old placeholder lands in the same session
    let late = state.orchestrator.send(&session.id, user_message("third")).await;
    assert_eq!(late.state, SendState::Completed);
    assert_eq!(late.session_id, "real123");
    assert_eq!(state.ledger.messages("real123").unwrap().len(), 6);
}

#[tokio::test]
async fn test_full_replay_sends_history() {
    let uploads = TempDir::new().unwrap();
    let mut config = test_config(uploads.path());
    config.history_policy = HistoryPolicy::FullReplay;
    let upstream = Arc::new(ScriptedUpstream::hello());
    let state = test_state(config, upstream.clone());

    let session = state.ledger.create_session();
    state.orchestrator.send(&session.id, user_message("first")).await;
    state.orchestrator.send(&session.id, user_message("second")).await;

    let requests = upstream.requests.lock();
    let replay = requests[1].messages.as_ref().unwrap();
    let turns: Vec<(&str, &str)> = replay
        .iter()
        .map(|m| (m.role.as_str(), m.content.as_str()))
        .collect();
    assert_eq!(
        turns,
        vec![("user", "first"), ("assistant", "Hello"), ("user", "second")]
    );
}

#[tokio::test]
async fn test_upstream_refusal_reports_once() {
    let uploads = TempDir::new().unwrap();
    let state = test_state(test_config(uploads.path()), Arc::new(ScriptedUpstream::refusing(401)));

    let session = state.ledger.create_session();
    let mut subscription = state.multiplexer.subscribe(&session.id);

    let outcome = state.orchestrator.send(&session.id, user_message("hi")).await;
    assert_eq!(outcome.state, SendState::Failed);

    let events = collect_until_end(&mut subscription).await;
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(events.last(), Some(&StreamEvent::End));

    // The user message stays; no assistant message was created
    let messages = state.ledger.messages(&session.id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn test_delete_during_stream_closes_subscribers() {
    let uploads = TempDir::new().unwrap();
    let upstream = Arc::new(ScriptedUpstream::hello().with_delay(Duration::from_millis(200)));
    let state = test_state(test_config(uploads.path()), upstream);

    let session = state.ledger.create_session();
    let mut subscription = state.multiplexer.subscribe(&session.id);

    let handle = state.orchestrator.dispatch(&session.id, user_message("hi"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    state.orchestrator.delete_session(&session.id).await.unwrap();
    assert!(state.ledger.get_session(&session.id).is_none());
    assert_eq!(state.multiplexer.subscriber_count(&session.id), 0);
    assert_eq!(state.orchestrator.locks().lock_count().await, 0);

    // The channel closes without waiting for the upstream to finish
    let closed = timeout(Duration::from_secs(1), async {
        while subscription.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());

    let outcome = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(outcome.state.is_terminal());
    assert!(state.ledger.messages(&session.id).is_err());
}

#[tokio::test]
async fn test_sends_to_one_session_are_serialized() {
    let uploads = TempDir::new().unwrap();
    let upstream = Arc::new(ScriptedUpstream::hello().with_delay(Duration::from_millis(20)));
    let state = test_state(test_config(uploads.path()), upstream);

    let session = state.ledger.create_session();
    let first = state.orchestrator.dispatch(&session.id, user_message("one"));
    let second = state.orchestrator.dispatch(&session.id, user_message("two"));
    first.await.unwrap();
    second.await.unwrap();

    // Each user message is immediately followed by its own reply
    let roles: Vec<Role> = state
        .ledger
        .messages(&session.id)
        .unwrap()
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}
