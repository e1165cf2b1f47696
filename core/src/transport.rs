/// Transport collaborators
///
/// The core only ever calls `Transport::dispatch` and never waits on it;
/// acknowledgments and replies come back later as `TransportEvent`s through
/// the session's `Ingress`.
use crate::config::LoopbackConfig;
use crate::message_store::Message;
use crate::messenger_types::TransportEvent;
use crate::session::Ingress;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Outbound side of the network transport
pub trait Transport: Send + Sync {
    /// Best-effort send of a freshly appended local message. Must not block.
    fn dispatch(&self, message: &Message);
}

/// Forwards dispatched messages to a receiver owned by the network layer
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn dispatch(&self, message: &Message) {
        if self.tx.send(message.clone()).is_err() {
            warn!("Transport receiver dropped, message {} stays parked", message.id);
        }
    }
}

/// A transport with no connection. Messages stay at `Sent`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedTransport;

impl Transport for DisconnectedTransport {
    fn dispatch(&self, message: &Message) {
        debug!("Disconnected, not dispatching message {}", message.id);
    }
}

/// Simulated counterparty for local demos.
///
/// For every dispatched message the recipient comes online, acknowledges
/// delivery and then reading, optionally replies, and goes offline again.
pub struct LoopbackPeer;

impl LoopbackPeer {
    pub fn spawn(
        mut outbound: mpsc::UnboundedReceiver<Message>,
        ingress: Ingress,
        config: LoopbackConfig,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Loopback peer started");
            while let Some(message) = outbound.recv().await {
                let ingress = ingress.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(e) = Self::play(message, ingress, config).await {
                        debug!("Loopback peer stopped: {}", e);
                    }
                });
            }
            info!("Loopback peer stopped");
        })
    }

    async fn play(
        message: Message,
        ingress: Ingress,
        config: LoopbackConfig,
    ) -> crate::Result<()> {
        let peer = message.conversation_id.clone();

        ingress
            .deliver(TransportEvent::PresenceOnline {
                participant_id: peer.clone(),
            })
            .await?;

        sleep(config.ack_delay).await;
        ingress
            .deliver(TransportEvent::DeliveredAck {
                message_id: message.id,
            })
            .await?;

        sleep(config.ack_delay).await;
        ingress
            .deliver(TransportEvent::ReadAck {
                message_id: message.id,
            })
            .await?;

        if let Some(body) = config.reply {
            sleep(config.reply_delay).await;
            ingress
                .deliver(TransportEvent::MessageReceived {
                    sender_id: peer.clone(),
                    body,
                    sent_at: Utc::now(),
                })
                .await?;
        }

        ingress
            .deliver(TransportEvent::PresenceOffline {
                participant_id: peer,
                at: Utc::now(),
            })
            .await
    }
}
