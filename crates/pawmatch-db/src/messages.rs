use crate::models::MessageRow;
use crate::{Database, OptionalExt};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "seq, id, conversation_id, conversation_key, user_id, device_key, \
     animal_id, shelter_id, from_kind, from_id, to_kind, to_id, text, \
     author_display_name, read, created_at";

/// A message about to enter the ledger. Kind derivation and text validation
/// happen in the flow layer; this is the raw insert shape.
pub struct NewMessage<'a> {
    pub conversation_id: &'a str,
    pub conversation_key: String,
    pub user_id: Option<&'a str>,
    pub device_key: Option<&'a str>,
    pub animal_id: &'a str,
    pub shelter_id: Option<&'a str>,
    pub from_kind: &'a str,
    pub from_id: Option<&'a str>,
    pub to_kind: &'a str,
    pub to_id: Option<&'a str>,
    pub text: &'a str,
    pub author_display_name: Option<&'a str>,
}

impl Database {
    /// Append one message and update the conversation's last-message
    /// projection, as a single transaction. When `claim_user` is set, the
    /// conversation is claimed for that user first (conditional on being
    /// unclaimed); any user reply implicitly claims a device conversation.
    pub fn append_message(
        &self,
        msg: &NewMessage<'_>,
        claim_user: Option<&str>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(user_id) = claim_user {
                crate::conversations::claim_conversation(&tx, msg.conversation_id, user_id)?;
            }
            let row = insert_message(&tx, msg)?;
            project_last_message(&tx, msg.conversation_id, msg.text, &row.created_at)?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Exactly-once append of the scripted opening message. The
    /// `auto_message_sent` flag flip is a compare-and-set executed in the
    /// same transaction as the insert; a call that loses the race observes
    /// zero matched rows and appends nothing.
    pub fn append_auto_message(&self, msg: &NewMessage<'_>) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let flipped = tx.execute(
                "UPDATE conversations SET auto_message_sent = 1, updated_at = ?1
                 WHERE id = ?2 AND auto_message_sent = 0",
                params![Utc::now().to_rfc3339(), msg.conversation_id],
            )?;
            if flipped == 0 {
                return Ok(None);
            }
            let row = insert_message(&tx, msg)?;
            project_last_message(&tx, msg.conversation_id, msg.text, &row.created_at)?;
            tx.commit()?;
            Ok(Some(row))
        })
    }

    /// Chronological message history for one conversation. Finite,
    /// read-only, safe to call repeatedly.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn insert_message(conn: &Connection, msg: &NewMessage<'_>) -> Result<MessageRow> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages
             (id, conversation_id, conversation_key, user_id, device_key, animal_id,
              shelter_id, from_kind, from_id, to_kind, to_id, text,
              author_display_name, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14)",
        params![
            id,
            msg.conversation_id,
            msg.conversation_key,
            msg.user_id,
            msg.device_key,
            msg.animal_id,
            msg.shelter_id,
            msg.from_kind,
            msg.from_id,
            msg.to_kind,
            msg.to_id,
            msg.text,
            msg.author_display_name,
            now
        ],
    )?;
    query_message_by_id(conn, &id)?.context("message vanished after insert")
}

fn project_last_message(
    conn: &Connection,
    conversation_id: &str,
    text: &str,
    at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET last_message = ?1, last_message_at = ?2, updated_at = ?2
         WHERE id = ?3",
        params![text, at, conversation_id],
    )?;
    Ok(())
}

fn query_message_by_id(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], map_message).optional()
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        conversation_id: row.get(2)?,
        conversation_key: row.get(3)?,
        user_id: row.get(4)?,
        device_key: row.get(5)?,
        animal_id: row.get(6)?,
        shelter_id: row.get(7)?,
        from_kind: row.get(8)?,
        from_id: row.get(9)?,
        to_kind: row.get(10)?,
        to_id: row.get(11)?,
        text: row.get(12)?,
        author_display_name: row.get(13)?,
        read: row.get(14)?,
        created_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawmatch_types::identity::ParticipantKey;

    fn seed_conversation(db: &Database, key: &ParticipantKey) -> crate::models::ConversationRow {
        db.create_shelter("s1", "Dierenasiel Noord", "noord@example.org", "hash")
            .unwrap();
        db.create_animal("a1", Some("s1"), "Noodle", None).unwrap();
        let animal = db.get_animal("a1").unwrap().unwrap();
        db.upsert_conversation(key, &animal).unwrap()
    }

    fn reply<'a>(
        convo_id: &'a str,
        key: &ParticipantKey,
        user_id: Option<&'a str>,
        text: &'a str,
    ) -> NewMessage<'a> {
        NewMessage {
            conversation_id: convo_id,
            conversation_key: key.conversation_key("a1"),
            user_id,
            device_key: None,
            animal_id: "a1",
            shelter_id: Some("s1"),
            from_kind: "user",
            from_id: None,
            to_kind: "shelter",
            to_id: Some("s1"),
            text,
            author_display_name: None,
        }
    }

    #[test]
    fn messages_come_back_in_append_order_and_project_last_message() {
        let db = Database::open_in_memory().unwrap();
        let key = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let convo = seed_conversation(&db, &key);

        for text in ["first", "second", "third"] {
            db.append_message(&reply(&convo.id, &key, None, text), None)
                .unwrap();
        }

        let messages = db.list_messages(&convo.id).unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
        assert!(messages.windows(2).all(|w| w[0].seq < w[1].seq));

        let convo = db.get_conversation(&convo.id).unwrap().unwrap();
        assert_eq!(convo.last_message.as_deref(), Some("third"));
        assert_eq!(
            convo.last_message_at.as_deref(),
            Some(messages.last().unwrap().created_at.as_str())
        );
    }

    #[test]
    fn user_reply_claims_unclaimed_conversation() {
        let db = Database::open_in_memory().unwrap();
        let device = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let convo = seed_conversation(&db, &device);
        db.create_user("u1", "Robin", "robin@example.org", "hash")
            .unwrap();

        let key = ParticipantKey::User {
            user_id: "u1".into(),
            device_key: Some("dev-123".into()),
        };
        db.append_message(
            &reply(&convo.id, &key, Some("u1"), "is Noodle still there?"),
            Some("u1"),
        )
        .unwrap();

        let convo = db.get_conversation(&convo.id).unwrap().unwrap();
        assert_eq!(convo.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn auto_message_appends_at_most_once() {
        let db = Database::open_in_memory().unwrap();
        let key = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let convo = seed_conversation(&db, &key);

        let auto = NewMessage {
            conversation_id: &convo.id,
            conversation_key: key.conversation_key("a1"),
            user_id: None,
            device_key: Some("dev-123"),
            animal_id: "a1",
            shelter_id: Some("s1"),
            from_kind: "shelter",
            from_id: Some("s1"),
            to_kind: "user",
            to_id: None,
            text: "Hi there!",
            author_display_name: Some("Dierenasiel Noord"),
        };

        let first = db.append_auto_message(&auto).unwrap();
        assert!(first.is_some());
        let second = db.append_auto_message(&auto).unwrap();
        assert!(second.is_none());

        assert_eq!(db.list_messages(&convo.id).unwrap().len(), 1);
        let convo = db.get_conversation(&convo.id).unwrap().unwrap();
        assert!(convo.auto_message_sent);
    }
}
