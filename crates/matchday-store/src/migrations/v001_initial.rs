//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `participants` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Participants (team accounts)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4, hyphenated lowercase
    display_name TEXT NOT NULL,
    token_hash   TEXT NOT NULL UNIQUE,        -- hex BLAKE3 of the bearer token
    created_at   TEXT NOT NULL                -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Direct messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,                -- FK -> participants(id)
    receiver_id TEXT NOT NULL,                -- FK -> participants(id)
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL,                -- fixed-width RFC-3339, sortable as text
    is_read     INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1

    CHECK (sender_id <> receiver_id),
    CHECK (length(trim(content)) > 0),
    FOREIGN KEY (sender_id) REFERENCES participants(id),
    FOREIGN KEY (receiver_id) REFERENCES participants(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(receiver_id, is_read, sender_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
