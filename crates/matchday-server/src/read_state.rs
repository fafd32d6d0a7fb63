//! Read-state tracker: marks a conversation read and reports unread counts.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use matchday_shared::protocol::{ReadReceipt, ServerEvent};
use matchday_shared::{resolve, ParticipantId};
use matchday_store::{Result, UnreadCount};

use crate::delivery::LiveTransport;
use crate::store::MessageStore;

/// Per-peer unread counts plus their sum.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummary {
    pub per_peer: Vec<UnreadCount>,
    pub total: u64,
}

#[derive(Clone)]
pub struct ReadStateTracker {
    store: MessageStore,
    transport: Arc<dyn LiveTransport>,
}

impl ReadStateTracker {
    pub fn new(store: MessageStore, transport: Arc<dyn LiveTransport>) -> Self {
        Self { store, transport }
    }

    /// Mark everything `peer` sent to `reader` as read. Idempotent.
    ///
    /// Used both when a conversation is opened and when a message arrives
    /// in a conversation that is already open. Publishes a read receipt to
    /// the room when anything changed.
    pub async fn mark_read(&self, reader: ParticipantId, peer: ParticipantId) -> Result<usize> {
        let updated = self.store.mark_read_from(peer, reader).await?;

        if updated > 0 && reader != peer {
            let room = resolve(reader, peer);
            let receipt = ServerEvent::MessagesRead(ReadReceipt {
                room_id: room.clone(),
                reader_id: reader,
                count: updated,
            });
            let delivered = self.transport.publish(room.clone(), receipt, None).await;
            debug!(room = %room, updated, delivered, "Conversation marked read");
        }

        Ok(updated)
    }

    pub async fn unread_from(&self, reader: ParticipantId, peer: ParticipantId) -> Result<u64> {
        self.store.unread_count_from(peer, reader).await
    }

    pub async fn unread_summary(&self, reader: ParticipantId) -> Result<UnreadSummary> {
        let per_peer = self.store.unread_counts(reader).await?;
        let total = per_peer.iter().map(|c| c.count).sum();
        Ok(UnreadSummary { per_peer, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryCoordinator, PollingOnly};
    use crate::hub::ChannelHub;

    #[tokio::test]
    async fn test_opening_conversation_clears_unread() {
        let store = MessageStore::in_memory().unwrap();
        let transport: Arc<dyn LiveTransport> = Arc::new(PollingOnly);
        let coordinator = DeliveryCoordinator::new(store.clone(), transport.clone());
        let tracker = ReadStateTracker::new(store.clone(), transport);

        let a = store.create_participant("Eagles".into(), "a".into()).await.unwrap();
        let b = store.create_participant("Hawks".into(), "b".into()).await.unwrap();

        let first = coordinator.send_message(a.id, b.id, "one", None).await.unwrap();
        coordinator.send_message(a.id, b.id, "two", None).await.unwrap();
        assert_eq!(tracker.unread_from(b.id, a.id).await.unwrap(), 2);

        assert_eq!(tracker.mark_read(b.id, a.id).await.unwrap(), 2);
        assert_eq!(tracker.unread_from(b.id, a.id).await.unwrap(), 0);
        assert_eq!(tracker.mark_read(b.id, a.id).await.unwrap(), 0);

        let history = store.list_between(a.id, b.id, None).await.unwrap();
        let first_row = history.iter().find(|m| m.id == first.id).unwrap();
        assert!(first_row.is_read);

        coordinator.send_message(a.id, b.id, "three", None).await.unwrap();
        assert_eq!(tracker.unread_from(b.id, a.id).await.unwrap(), 1);

        let summary = tracker.unread_summary(b.id).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.per_peer, vec![UnreadCount { peer_id: a.id, count: 1 }]);
    }

    #[tokio::test]
    async fn test_mark_read_publishes_receipt_once() {
        let store = MessageStore::in_memory().unwrap();
        let hub = ChannelHub::new(8);
        let transport: Arc<dyn LiveTransport> = Arc::new(hub.clone());
        let tracker = ReadStateTracker::new(store.clone(), transport);

        let a = store.create_participant("Eagles".into(), "a".into()).await.unwrap();
        let b = store.create_participant("Hawks".into(), "b".into()).await.unwrap();
        store.append(a.id, b.id, "hi".into()).await.unwrap();

        let room = resolve(a.id, b.id);
        let (conn_a, mut rx_a) = hub.connect(a.id).await;
        hub.join(conn_a, &room).await.unwrap();

        tracker.mark_read(b.id, a.id).await.unwrap();
        match rx_a.try_recv().unwrap() {
            ServerEvent::MessagesRead(receipt) => {
                assert_eq!(receipt.reader_id, b.id);
                assert_eq!(receipt.count, 1);
                assert_eq!(receipt.room_id, room);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        tracker.mark_read(b.id, a.id).await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }
}
