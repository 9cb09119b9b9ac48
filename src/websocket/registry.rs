//! Live WebSocket connections per recipient.
//!
//! The registry only holds weak sender handles. The socket task owns the strong
//! sender, so a closed socket can never be kept alive by the registry; dead handles
//! are pruned on the next delivery and on unregister.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::delivery::model::{DeliveryError, NotificationMessage};
use crate::delivery::router::RealtimePublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Handle {
    id: ConnectionId,
    sender: mpsc::WeakSender<NotificationMessage>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Vec<Handle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        recipient_id: Uuid,
        sender: &mpsc::Sender<NotificationMessage>,
    ) -> ConnectionId {
        let id = ConnectionId::generate();
        self.connections
            .entry(recipient_id)
            .or_default()
            .push(Handle {
                id,
                sender: sender.downgrade(),
            });
        debug!("Registered {} for user {}", id, recipient_id);
        id
    }

    pub fn unregister(&self, recipient_id: Uuid, id: ConnectionId) {
        self.connections.remove_if_mut(&recipient_id, |_, handles| {
            handles.retain(|h| h.id != id && h.sender.upgrade().is_some());
            handles.is_empty()
        });
        debug!("Unregistered {} for user {}", id, recipient_id);
    }

    /// Number of live connections of one recipient.
    pub fn connections_of(&self, recipient_id: Uuid) -> usize {
        self.connections
            .get(&recipient_id)
            .map(|handles| {
                handles
                    .iter()
                    .filter(|h| h.sender.upgrade().is_some())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Pushes the message to every live socket of the recipient without waiting.
    /// A socket whose buffer is full misses the message.
    pub fn deliver_local(&self, recipient_id: Uuid, message: &NotificationMessage) -> usize {
        let mut delivered = 0;
        self.connections.remove_if_mut(&recipient_id, |_, handles| {
            handles.retain(|handle| match handle.sender.upgrade() {
                Some(sender) => {
                    match sender.try_send(message.clone()) {
                        Ok(()) => delivered += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!("Socket {} is backed up, dropping message", handle.id);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return false,
                    }
                    true
                }
                None => false,
            });
            handles.is_empty()
        });
        delivered
    }
}

#[async_trait]
impl RealtimePublisher for ConnectionRegistry {
    async fn publish(
        &self,
        recipient_id: Uuid,
        message: &NotificationMessage,
    ) -> Result<usize, DeliveryError> {
        Ok(self.deliver_local(recipient_id, message))
    }
}
