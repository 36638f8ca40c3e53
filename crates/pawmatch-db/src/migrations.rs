use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS shelters (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS animals (
            id          TEXT PRIMARY KEY,
            shelter_id  TEXT REFERENCES shelters(id),
            name        TEXT NOT NULL,
            photo       TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_animals_shelter
            ON animals(shelter_id);

        -- One conversation per participant+animal pair. A conversation is
        -- keyed by a user OR a device key; a device-scoped conversation may
        -- later be claimed by a user (user_id set, device_key kept).
        CREATE TABLE IF NOT EXISTS conversations (
            id                TEXT PRIMARY KEY,
            user_id           TEXT REFERENCES users(id),
            device_key        TEXT,
            animal_id         TEXT NOT NULL REFERENCES animals(id),
            shelter_id        TEXT REFERENCES shelters(id),
            animal_name       TEXT,
            animal_photo      TEXT,
            matched_at        TEXT NOT NULL,
            auto_message_sent INTEGER NOT NULL DEFAULT 0,
            last_message      TEXT,
            last_message_at   TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_user_animal
            ON conversations(user_id, animal_id) WHERE user_id IS NOT NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_device_animal
            ON conversations(device_key, animal_id) WHERE device_key IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_conversations_shelter
            ON conversations(shelter_id, updated_at);

        -- Append-only ledger. seq is the stable chronological tie-break.
        CREATE TABLE IF NOT EXISTS messages (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id),
            conversation_key    TEXT NOT NULL,
            user_id             TEXT,
            device_key          TEXT,
            animal_id           TEXT NOT NULL,
            shelter_id          TEXT,
            from_kind           TEXT NOT NULL,
            from_id             TEXT,
            to_kind             TEXT NOT NULL,
            to_id               TEXT,
            text                TEXT NOT NULL,
            author_display_name TEXT,
            read                INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, seq);

        CREATE INDEX IF NOT EXISTS idx_messages_conversation_key
            ON messages(conversation_key);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
