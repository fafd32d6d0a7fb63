//! Async handle over the synchronous SQLite [`Database`].
//!
//! One connection sits behind a mutex and every call runs on the blocking
//! pool, so request handlers never stall the runtime on disk I/O. SQLite
//! serializes writers anyway; a single connection keeps `append` durable
//! and immediately visible to the next read.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use matchday_shared::ParticipantId;
use matchday_store::{
    ConversationSummary, Database, Message, Participant, Result, StoreError, UnreadCount,
};

#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Mutex<Database>>,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store worker failed: {e}")))?
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn append(
        &self,
        sender: ParticipantId,
        receiver: ParticipantId,
        content: String,
    ) -> Result<Message> {
        self.call(move |db| db.append_message(sender, receiver, &content))
            .await
    }

    pub async fn list_between(
        &self,
        a: ParticipantId,
        b: ParticipantId,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.call(move |db| db.list_between_after(a, b, after)).await
    }

    pub async fn mark_read_from(
        &self,
        sender: ParticipantId,
        receiver: ParticipantId,
    ) -> Result<usize> {
        self.call(move |db| db.mark_read_from(sender, receiver)).await
    }

    pub async fn unread_count_from(
        &self,
        peer: ParticipantId,
        reader: ParticipantId,
    ) -> Result<u64> {
        self.call(move |db| db.unread_count_from(peer, reader)).await
    }

    pub async fn unread_counts(&self, reader: ParticipantId) -> Result<Vec<UnreadCount>> {
        self.call(move |db| db.unread_counts(reader)).await
    }

    pub async fn conversations_for(&self, me: ParticipantId) -> Result<Vec<ConversationSummary>> {
        self.call(move |db| db.conversations_for(me)).await
    }

    // ------------------------------------------------------------------
    // Participant directory
    // ------------------------------------------------------------------

    pub async fn create_participant(
        &self,
        display_name: String,
        token_hash: String,
    ) -> Result<Participant> {
        self.call(move |db| db.create_participant(&display_name, &token_hash))
            .await
    }

    pub async fn participant(&self, id: ParticipantId) -> Result<Participant> {
        self.call(move |db| db.get_participant(id)).await
    }

    pub async fn participant_exists(&self, id: ParticipantId) -> Result<bool> {
        self.call(move |db| db.participant_exists(id)).await
    }

    pub async fn participant_by_token_hash(&self, token_hash: String) -> Result<Option<Participant>> {
        self.call(move |db| db.find_participant_by_token_hash(&token_hash))
            .await
    }

    pub async fn participants_except(&self, me: ParticipantId) -> Result<Vec<Participant>> {
        self.call(move |db| db.list_participants_except(me)).await
    }
}
