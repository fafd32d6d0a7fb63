use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE messages ADD COLUMN read_at TEXT;   -- RFC-3339, set once with is_read
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
