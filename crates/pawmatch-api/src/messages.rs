use anyhow::{Context, anyhow};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use pawmatch_db::Database;
use pawmatch_db::messages::NewMessage;
use pawmatch_db::models::{ConversationRow, MessageRow};
use pawmatch_types::api::{MessageHistoryResponse, MessageResponse, ReplyRequest};
use pawmatch_types::identity::{ParticipantKey, PartyKind};

use crate::auth::AppState;
use crate::conversations::conversation_response;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::{parse_timestamp, parse_uuid};

/// Message history for one conversation, chronological. Participants
/// address the conversation by animal id (with the device-claim fallback);
/// shelters address it by conversation id, ownership-checked.
pub async fn get_messages(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageHistoryResponse>, ApiError> {
    let st = state.clone();
    let (conversation, messages) = crate::run_blocking(move || {
        let conversation = locate_conversation(&st.db, &identity, &id.to_string())?;
        let messages = st
            .db
            .list_messages(&conversation.id)
            .with_context(|| format!("list messages for conversation {}", conversation.id))?;
        Ok((conversation, messages))
    })
    .await?;

    Ok(Json(MessageHistoryResponse {
        conversation: conversation_response(&conversation),
        messages: messages.iter().map(message_response).collect(),
    }))
}

/// Post a reply. Participant flows create the conversation if it does not
/// exist yet (and a user reply claims an unclaimed device conversation);
/// shelter flows require an existing, owned conversation.
pub async fn post_message(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    let message = crate::run_blocking(move || {
        let id = id.to_string();
        match identity {
            Identity::Shelter { shelter_id, name } => {
                let shelter_id = shelter_id.to_string();
                let conversation = st
                    .db
                    .find_conversation_for_shelter(&id, &shelter_id)?
                    .ok_or(ApiError::ConversationNotFound)?;
                let display_name = match name {
                    Some(name) => Some(name),
                    None => st.db.get_shelter(&shelter_id)?.map(|s| s.name),
                };
                append_reply(
                    &st.db,
                    &conversation,
                    &Sender::Shelter {
                        shelter_id,
                        display_name,
                    },
                    &req.text,
                )
            }
            Identity::User {
                user_id,
                name,
                device_key,
            } => {
                let key = ParticipantKey::User {
                    user_id: user_id.to_string(),
                    device_key,
                };
                let sender = Sender::User {
                    user_id: user_id.to_string(),
                    display_name: name,
                };
                participant_reply(&st.db, &key, &sender, &id, &req.text)
            }
            Identity::Device { device_key } => {
                let key = ParticipantKey::Device { device_key };
                participant_reply(&st.db, &key, &Sender::Device, &id, &req.text)
            }
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message_response(&message))))
}

fn locate_conversation(
    db: &Database,
    identity: &Identity,
    id: &str,
) -> Result<ConversationRow, ApiError> {
    match identity {
        Identity::Shelter { shelter_id, .. } => db
            .find_conversation_for_shelter(id, &shelter_id.to_string())?
            .ok_or(ApiError::ConversationNotFound),
        participant => {
            let key = participant.participant_key().ok_or(ApiError::Unauthorized)?;
            db.find_conversation(&key, id)?
                .ok_or(ApiError::ConversationNotFound)
        }
    }
}

fn participant_reply(
    db: &Database,
    key: &ParticipantKey,
    sender: &Sender,
    animal_id: &str,
    text: &str,
) -> Result<MessageRow, ApiError> {
    let animal = db.get_animal(animal_id)?.ok_or(ApiError::AnimalNotFound)?;
    let conversation = db
        .upsert_conversation(key, &animal)
        .with_context(|| format!("upsert conversation for animal {animal_id}"))?;
    append_reply(db, &conversation, sender, text)
}

pub(crate) enum Sender {
    User {
        user_id: String,
        display_name: Option<String>,
    },
    Device,
    Shelter {
        shelter_id: String,
        display_name: Option<String>,
    },
}

/// Recipient derivation: user→shelter, shelter→user, animal→user when the
/// conversation has one, else shelter.
pub(crate) fn recipient_for(
    sender: PartyKind,
    conversation: &ConversationRow,
) -> (PartyKind, Option<String>) {
    match sender {
        PartyKind::User => (PartyKind::Shelter, conversation.shelter_id.clone()),
        PartyKind::Shelter | PartyKind::System => (PartyKind::User, conversation.user_id.clone()),
        PartyKind::Animal => match conversation.user_id.clone() {
            Some(user_id) => (PartyKind::User, Some(user_id)),
            None => (PartyKind::Shelter, conversation.shelter_id.clone()),
        },
    }
}

/// The ledger key mirrors the conversation's participant state. A user
/// about to claim the conversation counts as its user.
pub(crate) fn participant_key_of(
    conversation: &ConversationRow,
    claiming_user: Option<&str>,
) -> Option<ParticipantKey> {
    if let Some(user_id) = conversation.user_id.as_deref().or(claiming_user) {
        Some(ParticipantKey::User {
            user_id: user_id.to_string(),
            device_key: conversation.device_key.clone(),
        })
    } else {
        conversation
            .device_key
            .as_deref()
            .map(|device_key| ParticipantKey::Device {
                device_key: device_key.to_string(),
            })
    }
}

/// Append one message to a conversation's ledger: trims and validates the
/// text, derives sender/recipient kinds, performs the implicit
/// claim-on-reply for user senders, and lets the store update the
/// last-message projection in the same transaction.
pub(crate) fn append_reply(
    db: &Database,
    conversation: &ConversationRow,
    sender: &Sender,
    text: &str,
) -> Result<MessageRow, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::Validation("text is required".into()));
    }

    let claim_user = match (sender, &conversation.user_id) {
        (Sender::User { user_id, .. }, None) => Some(user_id.as_str()),
        _ => None,
    };

    let key = participant_key_of(conversation, claim_user).ok_or_else(|| {
        ApiError::Internal(anyhow!(
            "conversation {} has no participant key",
            conversation.id
        ))
    })?;
    let conversation_key = key.conversation_key(&conversation.animal_id);
    let user_id = match &key {
        ParticipantKey::User { user_id, .. } => Some(user_id.clone()),
        ParticipantKey::Device { .. } => None,
    };

    let from_kind = match sender {
        Sender::User { .. } | Sender::Device => PartyKind::User,
        Sender::Shelter { .. } => PartyKind::Shelter,
    };
    let (to_kind, to_id) = recipient_for(from_kind, conversation);

    let (from_id, display_name) = match sender {
        Sender::User {
            user_id,
            display_name,
        } => (Some(user_id.as_str()), display_name.as_deref()),
        Sender::Device => (None, None),
        Sender::Shelter {
            shelter_id,
            display_name,
        } => (Some(shelter_id.as_str()), display_name.as_deref()),
    };

    let message = NewMessage {
        conversation_id: &conversation.id,
        conversation_key,
        user_id: user_id.as_deref(),
        device_key: conversation.device_key.as_deref(),
        animal_id: &conversation.animal_id,
        shelter_id: conversation.shelter_id.as_deref(),
        from_kind: from_kind.as_str(),
        from_id,
        to_kind: to_kind.as_str(),
        to_id: to_id.as_deref(),
        text,
        author_display_name: display_name,
    };

    let row = db
        .append_message(&message, claim_user)
        .with_context(|| format!("append message to conversation {}", conversation.id))?;
    Ok(row)
}

pub(crate) fn message_response(row: &MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message id"),
        text: row.text.clone(),
        from_kind: row.from_kind.clone(),
        to_kind: row.to_kind.clone(),
        author_display_name: row.author_display_name.clone(),
        read: row.read,
        created_at: parse_timestamp(&row.created_at, "message created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawmatch_db::models::AnimalRow;

    fn seed(db: &Database) -> AnimalRow {
        db.create_shelter("s1", "Dierenasiel Noord", "noord@example.org", "hash")
            .unwrap();
        db.create_animal("a1", Some("s1"), "Noodle", None).unwrap();
        db.get_animal("a1").unwrap().unwrap()
    }

    #[test]
    fn empty_text_is_rejected_before_any_write() {
        let db = Database::open_in_memory().unwrap();
        let animal = seed(&db);
        let key = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let conversation = db.upsert_conversation(&key, &animal).unwrap();

        let err = append_reply(&db, &conversation, &Sender::Device, "   ").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(db.list_messages(&conversation.id).unwrap().is_empty());
    }

    #[test]
    fn device_reply_is_user_kind_addressed_to_shelter() {
        let db = Database::open_in_memory().unwrap();
        let animal = seed(&db);
        let key = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let conversation = db.upsert_conversation(&key, &animal).unwrap();

        let row = append_reply(&db, &conversation, &Sender::Device, "hello Noodle").unwrap();
        assert_eq!(row.from_kind, "user");
        assert_eq!(row.to_kind, "shelter");
        assert_eq!(row.to_id.as_deref(), Some("s1"));
        assert_eq!(row.conversation_key, "device:dev-123:a1");
    }

    #[test]
    fn shelter_reply_is_addressed_to_the_claimed_user() {
        let db = Database::open_in_memory().unwrap();
        let animal = seed(&db);
        db.create_user("u1", "Robin", "robin@example.org", "hash")
            .unwrap();
        let key = ParticipantKey::User {
            user_id: "u1".into(),
            device_key: None,
        };
        let conversation = db.upsert_conversation(&key, &animal).unwrap();

        let sender = Sender::Shelter {
            shelter_id: "s1".into(),
            display_name: Some("Dierenasiel Noord".into()),
        };
        let row = append_reply(&db, &conversation, &sender, "Come visit us!").unwrap();
        assert_eq!(row.from_kind, "shelter");
        assert_eq!(row.to_kind, "user");
        assert_eq!(row.to_id.as_deref(), Some("u1"));
        assert_eq!(row.author_display_name.as_deref(), Some("Dierenasiel Noord"));
        assert_eq!(row.conversation_key, "u1:a1");
    }

    #[test]
    fn user_reply_claims_and_switches_ledger_key() {
        let db = Database::open_in_memory().unwrap();
        let animal = seed(&db);
        db.create_user("u1", "Robin", "robin@example.org", "hash")
            .unwrap();
        let device = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let conversation = db.upsert_conversation(&device, &animal).unwrap();

        let sender = Sender::User {
            user_id: "u1".into(),
            display_name: Some("Robin".into()),
        };
        let row = append_reply(&db, &conversation, &sender, "still available?").unwrap();
        assert_eq!(row.conversation_key, "u1:a1");
        assert_eq!(row.user_id.as_deref(), Some("u1"));

        let claimed = db.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(claimed.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn animal_sender_recipient_depends_on_claim_state() {
        let db = Database::open_in_memory().unwrap();
        let animal = seed(&db);
        let key = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        let mut conversation = db.upsert_conversation(&key, &animal).unwrap();

        let (to_kind, to_id) = recipient_for(PartyKind::Animal, &conversation);
        assert_eq!(to_kind, PartyKind::Shelter);
        assert_eq!(to_id.as_deref(), Some("s1"));

        conversation.user_id = Some("u1".into());
        let (to_kind, to_id) = recipient_for(PartyKind::Animal, &conversation);
        assert_eq!(to_kind, PartyKind::User);
        assert_eq!(to_id.as_deref(), Some("u1"));
    }
}
