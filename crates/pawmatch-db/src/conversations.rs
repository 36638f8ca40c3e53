use crate::models::{AnimalRow, ConversationRow};
use crate::{Database, OptionalExt};
use anyhow::{Context, Result};
use chrono::Utc;
use pawmatch_types::identity::ParticipantKey;
use rusqlite::{Connection, params};
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, user_id, device_key, animal_id, shelter_id, animal_name, \
     animal_photo, matched_at, auto_message_sent, last_message, last_message_at, \
     created_at, updated_at";

impl Database {
    /// Atomic find-or-create for a (participant, animal) pair.
    ///
    /// The animal snapshot fields (name/photo/shelter) are refreshed on every
    /// call; `matched_at` is set only when the row is first inserted. For a
    /// user presenting a device key, an unclaimed device conversation for the
    /// same animal is claimed instead of creating a second row. The partial
    /// unique indexes on (user_id, animal_id) and (device_key, animal_id)
    /// back the upsert; an insert that loses a concurrent race retries the
    /// update arm once and returns the committed row.
    pub fn upsert_conversation(
        &self,
        key: &ParticipantKey,
        animal: &AnimalRow,
    ) -> Result<ConversationRow> {
        self.with_conn_mut(|conn| {
            let now = Utc::now().to_rfc3339();
            for attempt in 0..2 {
                let tx = conn.transaction()?;

                if let Some(row) = update_existing(&tx, key, animal, &now)? {
                    tx.commit()?;
                    return Ok(row);
                }

                let id = Uuid::new_v4().to_string();
                let (user_id, device_key) = match key {
                    ParticipantKey::User {
                        user_id,
                        device_key,
                    } => (Some(user_id.as_str()), device_key.as_deref()),
                    ParticipantKey::Device { device_key } => (None, Some(device_key.as_str())),
                };

                let inserted = tx.execute(
                    "INSERT INTO conversations
                         (id, user_id, device_key, animal_id, shelter_id, animal_name,
                          animal_photo, matched_at, auto_message_sent, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10)",
                    params![
                        id,
                        user_id,
                        device_key,
                        animal.id,
                        animal.shelter_id,
                        animal.name,
                        animal.photo,
                        now,
                        now,
                        now
                    ],
                );

                match inserted {
                    Ok(_) => {
                        let row = query_conversation_by_id(&tx, &id)?
                            .context("conversation vanished after insert")?;
                        tx.commit()?;
                        return Ok(row);
                    }
                    // Lost a first-contact race: another writer inserted the
                    // same (participant, animal) row. Re-run the update arm
                    // against the committed state.
                    Err(e) if attempt == 0 && is_unique_violation(&e) => {
                        drop(tx);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            anyhow::bail!("conversation upsert did not converge")
        })
    }

    /// Look up an existing conversation for a participant, without creating
    /// one. For users, falls back to an unclaimed device conversation and
    /// claims it atomically (guarded on `user_id IS NULL`); a conversation
    /// already claimed by a different user is not visible to the caller.
    pub fn find_conversation(
        &self,
        key: &ParticipantKey,
        animal_id: &str,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn_mut(|conn| match key {
            ParticipantKey::User {
                user_id,
                device_key,
            } => {
                if let Some(row) = query_user_conversation(conn, user_id, animal_id)? {
                    return Ok(Some(row));
                }
                let Some(device_key) = device_key else {
                    return Ok(None);
                };
                let Some(row) = query_device_conversation(conn, device_key, animal_id)? else {
                    return Ok(None);
                };
                match row.user_id.as_deref() {
                    Some(owner) if owner == user_id.as_str() => Ok(Some(row)),
                    Some(_) => Ok(None),
                    None => {
                        claim_conversation(conn, &row.id, user_id)?;
                        // Re-read: a lost claim race to a different user means
                        // the conversation is not ours.
                        let row = query_conversation_by_id(conn, &row.id)?;
                        Ok(row.filter(|r| r.user_id.as_deref() == Some(user_id.as_str())))
                    }
                }
            }
            ParticipantKey::Device { device_key } => {
                query_device_conversation(conn, device_key, animal_id)
            }
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, id))
    }

    /// Shelter-scoped lookup by primary id. Ownership is established by the
    /// stored shelter reference, or transitively via the animal's shelter,
    /// in which case the reference is backfilled onto the conversation.
    pub fn find_conversation_for_shelter(
        &self,
        conversation_id: &str,
        shelter_id: &str,
    ) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let Some(row) = query_conversation_by_id(conn, conversation_id)? else {
                return Ok(None);
            };
            match row.shelter_id.as_deref() {
                Some(owner) => Ok((owner == shelter_id).then_some(row)),
                None => {
                    let owns = conn
                        .query_row(
                            "SELECT 1 FROM animals WHERE id = ?1 AND shelter_id = ?2",
                            params![row.animal_id, shelter_id],
                            |_| Ok(()),
                        )
                        .optional()?
                        .is_some();
                    if !owns {
                        return Ok(None);
                    }
                    conn.execute(
                        "UPDATE conversations SET shelter_id = ?1, updated_at = ?2 WHERE id = ?3",
                        params![shelter_id, Utc::now().to_rfc3339(), conversation_id],
                    )?;
                    query_conversation_by_id(conn, conversation_id)
                }
            }
        })
    }

    pub fn list_conversations_for_participant(
        &self,
        key: &ParticipantKey,
    ) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let (clause, value): (&str, &str) = match key {
                ParticipantKey::User { user_id, .. } => ("user_id = ?1", user_id),
                ParticipantKey::Device { device_key } => ("device_key = ?1", device_key),
            };
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE {clause} ORDER BY updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([value], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Conversations owned by a shelter, optionally narrowed to one animal
    /// or one user. The claimed user's name rides along for list rendering
    /// (single JOIN, no per-row lookups).
    pub fn list_conversations_for_shelter(
        &self,
        shelter_id: &str,
        animal_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Vec<(ConversationRow, Option<String>)>> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {}, u.name FROM conversations c
                 LEFT JOIN users u ON c.user_id = u.id
                 WHERE c.shelter_id = ?1",
                qualified_columns("c")
            );
            let mut params_vec: Vec<&dyn rusqlite::types::ToSql> = vec![&shelter_id];
            if let Some(ref animal_id) = animal_id {
                sql.push_str(&format!(" AND c.animal_id = ?{}", params_vec.len() + 1));
                params_vec.push(animal_id);
            }
            if let Some(ref user_id) = user_id {
                sql.push_str(&format!(" AND c.user_id = ?{}", params_vec.len() + 1));
                params_vec.push(user_id);
            }
            sql.push_str(" ORDER BY c.updated_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_vec.as_slice(), |row| {
                    Ok((map_conversation(row)?, row.get::<_, Option<String>>(13)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete a conversation and every message referencing it, as one
    /// transaction. Authorization is the caller's responsibility.
    pub fn delete_conversation_cascade(&self, conversation_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                [conversation_id],
            )?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", [conversation_id])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Backfill the owning-shelter reference (auto-message attribution path).
    pub fn set_conversation_shelter(&self, conversation_id: &str, shelter_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET shelter_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![shelter_id, Utc::now().to_rfc3339(), conversation_id],
            )?;
            Ok(())
        })
    }
}

/// Snapshot-update arm of the upsert. Returns the refreshed row when an
/// existing conversation matched the participant filter (including the
/// claim-union arm for users presenting a device key).
fn update_existing(
    conn: &Connection,
    key: &ParticipantKey,
    animal: &AnimalRow,
    now: &str,
) -> Result<Option<ConversationRow>> {
    match key {
        ParticipantKey::User {
            user_id,
            device_key,
        } => {
            let n = conn.execute(
                "UPDATE conversations
                 SET animal_name = ?1, animal_photo = ?2, shelter_id = ?3,
                     device_key = COALESCE(?4, device_key), updated_at = ?5
                 WHERE user_id = ?6 AND animal_id = ?7",
                params![
                    animal.name,
                    animal.photo,
                    animal.shelter_id,
                    device_key,
                    now,
                    user_id,
                    animal.id
                ],
            )?;
            if n > 0 {
                return query_user_conversation(conn, user_id, &animal.id);
            }
            if let Some(device_key) = device_key {
                // Claim arm: adopt an unclaimed device conversation.
                let n = conn.execute(
                    "UPDATE conversations
                     SET user_id = ?1, animal_name = ?2, animal_photo = ?3,
                         shelter_id = ?4, updated_at = ?5
                     WHERE device_key = ?6 AND animal_id = ?7 AND user_id IS NULL",
                    params![
                        user_id,
                        animal.name,
                        animal.photo,
                        animal.shelter_id,
                        now,
                        device_key,
                        animal.id
                    ],
                )?;
                if n > 0 {
                    return query_user_conversation(conn, user_id, &animal.id);
                }
            }
            Ok(None)
        }
        ParticipantKey::Device { device_key } => {
            let n = conn.execute(
                "UPDATE conversations
                 SET animal_name = ?1, animal_photo = ?2, shelter_id = ?3, updated_at = ?4
                 WHERE device_key = ?5 AND animal_id = ?6",
                params![
                    animal.name,
                    animal.photo,
                    animal.shelter_id,
                    now,
                    device_key,
                    animal.id
                ],
            )?;
            if n > 0 {
                return query_device_conversation(conn, device_key, &animal.id);
            }
            Ok(None)
        }
    }
}

/// Conditional claim: no-op when the conversation already has a user.
pub(crate) fn claim_conversation(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<usize> {
    let n = conn.execute(
        "UPDATE conversations SET user_id = ?1, updated_at = ?2
         WHERE id = ?3 AND user_id IS NULL",
        params![user_id, Utc::now().to_rfc3339(), conversation_id],
    )?;
    Ok(n)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn qualified_columns(alias: &str) -> String {
    CONVERSATION_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_key: row.get(2)?,
        animal_id: row.get(3)?,
        shelter_id: row.get(4)?,
        animal_name: row.get(5)?,
        animal_photo: row.get(6)?,
        matched_at: row.get(7)?,
        auto_message_sent: row.get(8)?,
        last_message: row.get(9)?,
        last_message_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub(crate) fn query_conversation_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<ConversationRow>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    conn.query_row(&sql, [id], map_conversation).optional()
}

fn query_user_conversation(
    conn: &Connection,
    user_id: &str,
    animal_id: &str,
) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ?1 AND animal_id = ?2"
    );
    conn.query_row(&sql, [user_id, animal_id], map_conversation)
        .optional()
}

fn query_device_conversation(
    conn: &Connection,
    device_key: &str,
    animal_id: &str,
) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE device_key = ?1 AND animal_id = ?2"
    );
    conn.query_row(&sql, [device_key, animal_id], map_conversation)
        .optional()
}
