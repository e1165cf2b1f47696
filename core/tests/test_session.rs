/// Session loop tests - intents and transport events through the running task
use chrono::Utc;
use duet_core::config::LoopbackConfig;
use duet_core::transport::{ChannelTransport, LoopbackPeer};
use duet_core::{
    ChatError, ChatSession, Config, MessageStatus, Participant, ParticipantId, SessionEvent,
    TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn config() -> Config {
    Config {
        contacts: vec![
            Participant::new("a", "Alice"),
            Participant::new("b", "Bob"),
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_send_returns_before_any_ack() {
    let (transport, mut outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);

    let sent = handle.send_message("a".into(), "hi").await.unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    let dispatched = outbound.recv().await.unwrap();
    assert_eq!(dispatched.id, sent.id);
    assert_eq!(handle.message(sent.id).await.unwrap().status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_acks_through_ingress() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);
    let ingress = handle.ingress();

    let m1 = handle.send_message("a".into(), "hi").await.unwrap();
    ingress
        .deliver(TransportEvent::ReadAck { message_id: m1.id })
        .await
        .unwrap();
    ingress
        .deliver(TransportEvent::DeliveredAck { message_id: m1.id })
        .await
        .unwrap();
    ingress
        .deliver(TransportEvent::ReadAck {
            message_id: duet_core::MessageId::new(12345),
        })
        .await
        .unwrap();

    handle.flush().await.unwrap();
    assert_eq!(handle.message(m1.id).await.unwrap().status, MessageStatus::Read);
}

#[tokio::test]
async fn test_intent_errors_surface_through_handle() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);

    assert!(matches!(
        handle.send_message("a".into(), "  ").await,
        Err(ChatError::EmptyBody)
    ));
    assert!(matches!(
        handle.send_message("zed".into(), "hi").await,
        Err(ChatError::UnknownIdentity(_))
    ));
    assert!(matches!(
        handle.register(Participant::new("a", "Dup")).await,
        Err(ChatError::DuplicateIdentity(_))
    ));
    handle.register(Participant::new("c", "Carol")).await.unwrap();
    assert_eq!(handle.snapshot().contacts.len(), 3);
}

#[tokio::test]
async fn test_snapshot_republished_after_open() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);
    let mut snapshots = handle.subscribe_snapshots();
    let a = ParticipantId::new("a");

    handle
        .ingress()
        .deliver(TransportEvent::MessageReceived {
            sender_id: a.clone(),
            body: "hey".into(),
            sent_at: Utc::now(),
        })
        .await
        .unwrap();
    handle.flush().await.unwrap();
    assert_eq!(handle.snapshot().unread(&a), 1);

    snapshots.borrow_and_update();
    handle.select_conversation(a.clone()).await.unwrap();
    assert!(snapshots.has_changed().unwrap());

    let snapshot = snapshots.borrow_and_update().clone();
    assert_eq!(snapshot.unread(&a), 0);
    let active = snapshot.active.unwrap();
    assert!(active
        .messages
        .iter()
        .all(|m| m.status == MessageStatus::Read));

    assert_eq!(handle.close_conversation().await.unwrap(), Some(a));
    assert!(handle.snapshot().active.is_none());
}

#[tokio::test]
async fn test_live_conversation_view_from_handle() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);

    let mut view = handle.conversation("b".into()).await.unwrap();
    assert!(view.current().is_empty());

    let sent = handle.send_message("b".into(), "yo").await.unwrap();
    let messages = timeout(Duration::from_secs(1), view.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(messages[0].id, sent.id);

    handle
        .ingress()
        .deliver(TransportEvent::DeliveredAck { message_id: sent.id })
        .await
        .unwrap();
    let messages = timeout(Duration::from_secs(1), view.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(messages[0].status, MessageStatus::Delivered);
}

#[tokio::test]
async fn test_search_served_from_snapshot() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&Config::default(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);

    let hits = handle.search("mi");
    let names: Vec<_> = hits.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Sarah Miller", "Michael Chen"]);
    assert_eq!(handle.search("").len(), 5);

    // Surrounding whitespace is part of the term
    let hits = handle.search("a ");
    let names: Vec<_> = hits.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Emma Wilson"]);
}

#[tokio::test]
async fn test_arrival_in_open_conversation_never_seen_unread() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(16);
    let a = ParticipantId::new("a");

    handle.open_conversation(a.clone()).await.unwrap();
    let mut events = handle.subscribe_events();
    handle
        .ingress()
        .deliver(TransportEvent::MessageReceived {
            sender_id: a.clone(),
            body: "hey".into(),
            sent_at: Utc::now(),
        })
        .await
        .unwrap();
    handle.flush().await.unwrap();

    match events.try_recv().unwrap() {
        SessionEvent::MessageAppended { message } => {
            assert_eq!(message.status, MessageStatus::Read)
        }
        other => panic!("unexpected event: {:?}", other),
    }
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SessionEvent::StatusChanged { .. }));
    }
    assert_eq!(handle.snapshot().unread(&a), 0);
}

#[tokio::test]
async fn test_loopback_peer_round_trip() {
    let (transport, outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, _task) = session.spawn(64);
    let mut events = handle.subscribe_events();

    let loopback = LoopbackPeer::spawn(
        outbound,
        handle.ingress(),
        LoopbackConfig {
            enabled: true,
            ack_delay: Duration::from_millis(5),
            reply_delay: Duration::from_millis(5),
            reply: Some("Thanks!".to_string()),
        },
    );

    let a = ParticipantId::new("a");
    let sent = handle.send_message(a.clone(), "hello").await.unwrap();

    let reply = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionEvent::MessageAppended { message }) = events.recv().await {
                if message.is_inbound() {
                    return message;
                }
            }
        }
    })
    .await
    .expect("loopback reply should arrive");

    assert_eq!(reply.body, "Thanks!");
    assert_eq!(reply.conversation_id, a);
    assert_eq!(handle.message(sent.id).await.unwrap().status, MessageStatus::Read);

    // Closed conversation, so the reply is unread
    handle.flush().await.unwrap();
    assert_eq!(handle.snapshot().unread(&a), 1);

    loopback.abort();
}

#[tokio::test]
async fn test_shutdown_returns_session() {
    let (transport, _outbound) = ChannelTransport::new();
    let session = ChatSession::from_config(&config(), Arc::new(transport)).unwrap();
    let (handle, task) = session.spawn(16);

    let sent = handle.send_message("a".into(), "bye").await.unwrap();
    handle.shutdown().await.unwrap();
    let session = task.await.unwrap();

    assert_eq!(session.message(sent.id).unwrap().body, "bye");
    assert!(matches!(
        handle.send_message("a".into(), "late").await,
        Err(ChatError::SessionClosed)
    ));
    assert!(matches!(
        handle
            .ingress()
            .deliver(TransportEvent::PresenceOnline {
                participant_id: "a".into()
            })
            .await,
        Err(ChatError::SessionClosed)
    ));
}
