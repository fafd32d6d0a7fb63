//! Delivery coordinator: persist first, then push to the room.
//!
//! A send only fails if the message store refuses or fails the append.
//! Whatever the live transport does afterwards is best effort and never
//! changes the outcome the sender sees.

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info};

use matchday_shared::constants::MAX_MESSAGE_CHARS;
use matchday_shared::protocol::{MessageView, ServerEvent};
use matchday_shared::{resolve, ConnectionId, ParticipantId, RoomId};
use matchday_store::{Message, StoreError};

use crate::hub::ChannelHub;
use crate::store::MessageStore;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Message content is empty")]
    InvalidContent,

    #[error("Message exceeds {} characters", MAX_MESSAGE_CHARS)]
    ContentTooLong,

    #[error("A participant cannot message itself")]
    SelfMessageNotAllowed,

    #[error("Unknown receiver {0}")]
    UnknownReceiver(ParticipantId),

    #[error("Failed to persist message: {0}")]
    Persistence(#[from] StoreError),
}

/// Something that can push an event to the live members of a room.
pub trait LiveTransport: Send + Sync {
    /// Returns how many connections accepted the event. Never fails.
    fn publish(
        &self,
        room: RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> BoxFuture<'_, usize>;

    fn is_live(&self) -> bool {
        true
    }
}

impl LiveTransport for ChannelHub {
    fn publish(
        &self,
        room: RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> BoxFuture<'_, usize> {
        Box::pin(async move { self.broadcast_to_room(&room, event, exclude).await })
    }
}

/// Transport for polling-only deployments: every publish is dropped and
/// clients pick changes up on their next poll.
pub struct PollingOnly;

impl LiveTransport for PollingOnly {
    fn publish(
        &self,
        _room: RoomId,
        _event: ServerEvent,
        _exclude: Option<ConnectionId>,
    ) -> BoxFuture<'_, usize> {
        Box::pin(async { 0 })
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// Build the client-facing view of a stored message.
pub fn message_view(message: Message, sender_name: String) -> MessageView {
    MessageView {
        id: message.id,
        content: message.content,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        sender_name,
        timestamp: message.created_at,
        is_read: message.is_read,
    }
}

/// Checks that need no storage access. Returns the trimmed content.
pub fn check_send(
    sender: ParticipantId,
    receiver: ParticipantId,
    content: &str,
) -> Result<&str, DeliveryError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(DeliveryError::InvalidContent);
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DeliveryError::ContentTooLong);
    }
    if sender == receiver {
        return Err(DeliveryError::SelfMessageNotAllowed);
    }
    Ok(content)
}

#[derive(Clone)]
pub struct DeliveryCoordinator {
    store: MessageStore,
    transport: Arc<dyn LiveTransport>,
}

impl DeliveryCoordinator {
    pub fn new(store: MessageStore, transport: Arc<dyn LiveTransport>) -> Self {
        Self { store, transport }
    }

    pub fn transport(&self) -> &Arc<dyn LiveTransport> {
        &self.transport
    }

    /// Validate, persist and publish a direct message.
    ///
    /// `origin` is the live connection the send came from, if any; it is
    /// left out of the broadcast because it gets its own acknowledgement.
    pub async fn send_message(
        &self,
        sender: ParticipantId,
        receiver: ParticipantId,
        content: &str,
        origin: Option<ConnectionId>,
    ) -> Result<MessageView, DeliveryError> {
        let content = check_send(sender, receiver, content)?;
        if !self.store.participant_exists(receiver).await? {
            return Err(DeliveryError::UnknownReceiver(receiver));
        }

        let sender_name = self.store.participant(sender).await?.display_name;
        let message = self
            .store
            .append(sender, receiver, content.to_string())
            .await?;
        let view = message_view(message, sender_name);

        info!(
            message = %view.id,
            sender = %sender.short(),
            receiver = %receiver.short(),
            "Message stored"
        );

        let room = resolve(sender, receiver);
        let delivered = self
            .transport
            .publish(room.clone(), ServerEvent::NewMessage(view.clone()), origin)
            .await;
        debug!(room = %room, delivered, "Message published");

        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchday_store::Participant;

    async fn team(store: &MessageStore, name: &str) -> Participant {
        store
            .create_participant(name.to_string(), format!("hash-{name}"))
            .await
            .unwrap()
    }

    fn live_setup() -> (MessageStore, ChannelHub, DeliveryCoordinator) {
        let store = MessageStore::in_memory().unwrap();
        let hub = ChannelHub::new(16);
        let coordinator = DeliveryCoordinator::new(store.clone(), Arc::new(hub.clone()));
        (store, hub, coordinator)
    }

    #[tokio::test]
    async fn test_live_peer_receives_what_history_returns() {
        let (store, hub, coordinator) = live_setup();
        let a = team(&store, "Eagles").await;
        let b = team(&store, "Hawks").await;
        let room = resolve(a.id, b.id);

        let (conn_a, mut rx_a) = hub.connect(a.id).await;
        let (conn_b, mut rx_b) = hub.connect(b.id).await;
        hub.join(conn_a, &room).await.unwrap();
        hub.join(conn_b, &room).await.unwrap();

        let sent = coordinator
            .send_message(a.id, b.id, "hi", Some(conn_a))
            .await
            .unwrap();
        assert!(!sent.is_read);
        assert_eq!(sent.sender_name, "Eagles");

        let pushed = match rx_b.try_recv().unwrap() {
            ServerEvent::NewMessage(view) => view,
            other => panic!("unexpected event: {other:?}"),
        };
        assert!(rx_a.try_recv().is_err());

        let history = store.list_between(a.id, b.id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(pushed.id, history[0].id);
        assert_eq!(pushed.content, history[0].content);
        assert_eq!(pushed.sender_id, history[0].sender_id);
        assert_eq!(pushed.timestamp, history[0].created_at);
    }

    #[tokio::test]
    async fn test_offline_peer_finds_message_on_poll() {
        let (store, _hub, coordinator) = live_setup();
        let a = team(&store, "Eagles").await;
        let b = team(&store, "Hawks").await;

        let before = store.unread_count_from(a.id, b.id).await.unwrap();
        coordinator.send_message(a.id, b.id, "hi", None).await.unwrap();

        let history = store.list_between(b.id, a.id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
        assert_eq!(store.unread_count_from(a.id, b.id).await.unwrap(), before + 1);
    }

    #[tokio::test]
    async fn test_unread_attributed_per_sender() {
        let (store, _hub, coordinator) = live_setup();
        let a = team(&store, "Eagles").await;
        let b = team(&store, "Hawks").await;
        let c = team(&store, "Lions").await;

        coordinator.send_message(a.id, b.id, "from a", None).await.unwrap();
        coordinator.send_message(c.id, b.id, "from c", None).await.unwrap();

        let counts = store.unread_counts(b.id).await.unwrap();
        let total: u64 = counts.iter().map(|c| c.count).sum();
        assert_eq!(total, 2);
        assert_eq!(store.unread_count_from(a.id, b.id).await.unwrap(), 1);
        assert_eq!(store.unread_count_from(c.id, b.id).await.unwrap(), 1);
        assert_eq!(store.unread_count_from(a.id, c.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_persistence() {
        let (store, _hub, coordinator) = live_setup();
        let a = team(&store, "Eagles").await;
        let b = team(&store, "Hawks").await;

        assert!(matches!(
            coordinator.send_message(a.id, b.id, "   ", None).await,
            Err(DeliveryError::InvalidContent)
        ));
        assert!(matches!(
            coordinator.send_message(a.id, a.id, "hi", None).await,
            Err(DeliveryError::SelfMessageNotAllowed)
        ));
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            coordinator.send_message(a.id, b.id, &long, None).await,
            Err(DeliveryError::ContentTooLong)
        ));
        let ghost = ParticipantId::new();
        assert!(matches!(
            coordinator.send_message(a.id, ghost, "hi", None).await,
            Err(DeliveryError::UnknownReceiver(id)) if id == ghost
        ));

        assert!(store.list_between(a.id, b.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_polling_only_still_persists() {
        let store = MessageStore::in_memory().unwrap();
        let coordinator = DeliveryCoordinator::new(store.clone(), Arc::new(PollingOnly));
        let a = team(&store, "Eagles").await;
        let b = team(&store, "Hawks").await;

        let sent = coordinator
            .send_message(a.id, b.id, "  trimmed  ", None)
            .await
            .unwrap();
        assert_eq!(sent.content, "trimmed");
        assert!(!coordinator.transport().is_live());
        assert_eq!(store.list_between(a.id, b.id, None).await.unwrap().len(), 1);
    }
}
