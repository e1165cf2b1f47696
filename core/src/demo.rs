/// Starting state for the bundled demo contacts
///
/// Replays a short history with Alex, brings Alex and Emma online, gives the
/// others a last-seen time and opens Alex's conversation. Everything goes
/// through the session's public entry points, so the result is the same as if
/// the transport had produced it.
use crate::error::Result;
use crate::identity::ParticipantId;
use crate::messenger_types::TransportEvent;
use crate::session::ChatSession;
use crate::Timestamp;
use chrono::Duration;
use tracing::info;

const ALEX: &str = "1";
const EMMA: &str = "4";

/// (minutes before now, sent by us, body)
const ALEX_THREAD: [(i64, bool, &str); 5] = [
    (6, false, "Hey there! How are you doing?"),
    (5, true, "I'm good! Just finished the project. What about you?"),
    (4, false, "That's great! Can you share the files when you get a chance?"),
    (3, true, "Sure, I'll send them over in a bit. Working on some final touches."),
    (1, false, "Also, don't forget about the meeting tomorrow at 3 PM. We'll discuss the roadmap."),
];

/// Contacts that are offline, with how long ago they were last seen
fn last_seen() -> [(&'static str, Duration); 3] {
    [
        ("2", Duration::hours(2)),
        ("3", Duration::days(1)),
        ("5", Duration::hours(3)),
    ]
}

pub fn seed(session: &mut ChatSession, now: Timestamp) -> Result<()> {
    let alex = ParticipantId::new(ALEX);

    for (minutes_ago, from_us, body) in ALEX_THREAD {
        let at = now - Duration::minutes(minutes_ago);
        if from_us {
            let message = session.replay_local(&alex, body, at)?;
            session.handle_transport_event(TransportEvent::ReadAck {
                message_id: message.id,
            });
        } else {
            session.handle_transport_event(TransportEvent::MessageReceived {
                sender_id: alex.clone(),
                body: body.to_string(),
                sent_at: at,
            });
        }
    }

    for id in [ALEX, EMMA] {
        session.handle_transport_event(TransportEvent::PresenceOnline {
            participant_id: id.into(),
        });
    }
    for (id, ago) in last_seen() {
        session.handle_transport_event(TransportEvent::PresenceOffline {
            participant_id: id.into(),
            at: now - ago,
        });
    }

    session.select_conversation(&alex)?;
    info!("Seeded demo history ({} messages)", ALEX_THREAD.len());
    Ok(())
}
