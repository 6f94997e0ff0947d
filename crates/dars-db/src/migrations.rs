use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                    TEXT PRIMARY KEY,
            username              TEXT NOT NULL UNIQUE,
            display_name          TEXT,
            role                  TEXT NOT NULL DEFAULT 'member',
            password              TEXT NOT NULL,
            subscription_enabled  INTEGER NOT NULL DEFAULT 0,
            created_at            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS topics (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL DEFAULT '',
            room_id      INTEGER,
            is_active    INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_name  TEXT NOT NULL,
            sender_role  TEXT NOT NULL,
            message      TEXT NOT NULL,
            topic_id     INTEGER REFERENCES topics(id) ON DELETE CASCADE,
            user_id      TEXT REFERENCES users(id),
            is_pinned    INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_topic
            ON messages(topic_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            title              TEXT NOT NULL,
            message            TEXT NOT NULL,
            notification_type  TEXT NOT NULL,
            color              TEXT NOT NULL,
            link               TEXT,
            priority           INTEGER NOT NULL DEFAULT 0,
            is_active          INTEGER NOT NULL DEFAULT 1,
            start_date         TEXT,
            end_date           TEXT,
            created_at         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS webinar_reactions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            webinar_id      INTEGER NOT NULL,
            participant_id  TEXT NOT NULL REFERENCES users(id),
            reaction_type   TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_webinar
            ON webinar_reactions(webinar_id, created_at);

        CREATE TABLE IF NOT EXISTS private_messages (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_key  TEXT NOT NULL,
            sender_id         TEXT NOT NULL REFERENCES users(id),
            recipient_id      TEXT NOT NULL REFERENCES users(id),
            sender_name       TEXT NOT NULL,
            message           TEXT NOT NULL,
            is_read           INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_private_conversation
            ON private_messages(conversation_key, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
