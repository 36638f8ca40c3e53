use anyhow::Context;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use pawmatch_db::Database;
use pawmatch_db::models::ConversationRow;
use pawmatch_types::api::{
    ConversationResponse, ConversationSummary, ShelterConversationSummary,
    StartConversationRequest, StartConversationResponse,
};
use pawmatch_types::identity::ParticipantKey;

use crate::auth::AppState;
use crate::auto_message;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::messages::message_response;
use crate::{parse_timestamp, parse_uuid};

#[derive(Debug, serde::Deserialize)]
pub struct ShelterListQuery {
    pub animal_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

/// Start-or-attach: upsert the conversation for (identity, animal) and
/// optionally fire the scripted opening message. 201 when a message was
/// actually created, 200 otherwise.
pub async fn start_conversation(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<StartConversationRequest>,
) -> Result<Response, ApiError> {
    let st = state.clone();
    let (conversation, message) = crate::run_blocking(move || {
        let key = participant_key_for(&st.db, &identity, req.user_id)?;
        let animal_id = req.animal_id.to_string();
        let animal = st.db.get_animal(&animal_id)?.ok_or(ApiError::AnimalNotFound)?;
        let conversation = st.db.upsert_conversation(&key, &animal).with_context(|| {
            format!(
                "upsert conversation ({} identity, animal {})",
                identity.kind(),
                animal_id
            )
        })?;

        let message = if req.auto_message || req.auto_message_text.is_some() {
            auto_message::ensure_opening_message(
                &st.db,
                &identity,
                &conversation,
                req.auto_message_text.as_deref(),
            )?
        } else {
            None
        };

        // The trigger mutates the flag and last-message projection.
        let conversation = match &message {
            Some(_) => st
                .db
                .get_conversation(&conversation.id)?
                .ok_or(ApiError::ConversationNotFound)?,
            None => conversation,
        };
        Ok((conversation, message))
    })
    .await?;

    let status = if message.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(StartConversationResponse {
            conversation: conversation_response(&conversation),
            message: message.as_ref().map(message_response),
        }),
    )
        .into_response())
}

/// Conversation list for the resolved identity. Participants see their own
/// conversations; shelters see conversations owned by them, optionally
/// narrowed by animal or user.
pub async fn list_conversations(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<ShelterListQuery>,
) -> Result<Response, ApiError> {
    let st = state.clone();
    match identity {
        Identity::Shelter { shelter_id, .. } => {
            let rows = crate::run_blocking(move || {
                let animal_id = query.animal_id.map(|id| id.to_string());
                let user_id = query.user_id.map(|id| id.to_string());
                st.db
                    .list_conversations_for_shelter(
                        &shelter_id.to_string(),
                        animal_id.as_deref(),
                        user_id.as_deref(),
                    )
                    .context("list shelter conversations")
                    .map_err(ApiError::from)
            })
            .await?;
            let out: Vec<ShelterConversationSummary> = rows
                .iter()
                .map(|(row, user_name)| shelter_conversation_summary(row, user_name.clone()))
                .collect();
            Ok(Json(out).into_response())
        }
        participant => {
            let key = participant.participant_key().ok_or(ApiError::Unauthorized)?;
            let rows = crate::run_blocking(move || {
                st.db
                    .list_conversations_for_participant(&key)
                    .context("list participant conversations")
                    .map_err(ApiError::from)
            })
            .await?;
            let out: Vec<ConversationSummary> =
                rows.iter().map(conversation_summary).collect();
            Ok(Json(out).into_response())
        }
    }
}

/// Delete a conversation and its messages. Allowed for the owning shelter
/// or the participant (user or device) attached to the conversation.
pub async fn delete_conversation(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let st = state.clone();
    crate::run_blocking(move || {
        let id = id.to_string();
        let conversation = match &identity {
            Identity::Shelter { shelter_id, .. } => st
                .db
                .find_conversation_for_shelter(&id, &shelter_id.to_string())?
                .ok_or(ApiError::ConversationNotFound)?,
            Identity::User { user_id, .. } => {
                owned_conversation(&st.db, &id, |c| {
                    c.user_id.as_deref() == Some(user_id.to_string().as_str())
                })?
            }
            Identity::Device { device_key } => {
                owned_conversation(&st.db, &id, |c| {
                    c.device_key.as_deref() == Some(device_key.as_str())
                })?
            }
        };
        st.db
            .delete_conversation_cascade(&conversation.id)
            .with_context(|| format!("cascade delete conversation {}", conversation.id))?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({ "success": true })))
}

fn owned_conversation(
    db: &Database,
    id: &str,
    is_owner: impl Fn(&ConversationRow) -> bool,
) -> Result<ConversationRow, ApiError> {
    let conversation = db
        .get_conversation(id)?
        .ok_or(ApiError::ConversationNotFound)?;
    // Not-owned and not-found are indistinguishable to the caller.
    if !is_owner(&conversation) {
        return Err(ApiError::ConversationNotFound);
    }
    Ok(conversation)
}

/// The storage filter a start/reply request acts under. Shelters act on
/// behalf of an explicit user id; an existing conversation already claimed
/// by a different user is never overridden (the upsert's claim arm only
/// fills an unset user).
fn participant_key_for(
    db: &Database,
    identity: &Identity,
    on_behalf_of: Option<Uuid>,
) -> Result<ParticipantKey, ApiError> {
    match identity {
        Identity::Shelter { .. } => {
            let user_id = on_behalf_of.ok_or_else(|| {
                ApiError::Validation(
                    "user_id is required when a shelter starts a conversation".into(),
                )
            })?;
            if !db.user_exists(&user_id.to_string())? {
                return Err(ApiError::Validation("unknown user_id".into()));
            }
            Ok(ParticipantKey::User {
                user_id: user_id.to_string(),
                device_key: None,
            })
        }
        participant => participant.participant_key().ok_or(ApiError::Unauthorized),
    }
}

pub(crate) fn conversation_response(row: &ConversationRow) -> ConversationResponse {
    ConversationResponse {
        id: parse_uuid(&row.id, "conversation id"),
        user_id: row.user_id.as_deref().map(|v| parse_uuid(v, "user id")),
        device_key: row.device_key.clone(),
        animal_id: parse_uuid(&row.animal_id, "animal id"),
        shelter_id: row.shelter_id.as_deref().map(|v| parse_uuid(v, "shelter id")),
        animal_name: row.animal_name.clone(),
        animal_photo: row.animal_photo.clone(),
        matched_at: parse_timestamp(&row.matched_at, "matched_at"),
        auto_message_sent: row.auto_message_sent,
        last_message: row.last_message.clone(),
        last_message_at: row
            .last_message_at
            .as_deref()
            .map(|v| parse_timestamp(v, "last_message_at")),
        created_at: parse_timestamp(&row.created_at, "created_at"),
        updated_at: parse_timestamp(&row.updated_at, "updated_at"),
    }
}

fn conversation_summary(row: &ConversationRow) -> ConversationSummary {
    ConversationSummary {
        id: parse_uuid(&row.id, "conversation id"),
        animal_id: parse_uuid(&row.animal_id, "animal id"),
        name: row
            .animal_name
            .clone()
            .unwrap_or_else(|| "Unknown animal".to_string()),
        last_message: row.last_message.clone().unwrap_or_default(),
        last_message_at: row
            .last_message_at
            .as_deref()
            .map(|v| parse_timestamp(v, "last_message_at")),
        matched_at: parse_timestamp(&row.matched_at, "matched_at"),
        avatar: row.animal_photo.clone(),
    }
}

fn shelter_conversation_summary(
    row: &ConversationRow,
    user_name: Option<String>,
) -> ShelterConversationSummary {
    ShelterConversationSummary {
        id: parse_uuid(&row.id, "conversation id"),
        animal_id: parse_uuid(&row.animal_id, "animal id"),
        user_id: row.user_id.as_deref().map(|v| parse_uuid(v, "user id")),
        user_name,
        device_key: row.device_key.clone(),
        name: row
            .animal_name
            .clone()
            .unwrap_or_else(|| "Unknown animal".to_string()),
        last_message: row.last_message.clone().unwrap_or_default(),
        last_message_at: row
            .last_message_at
            .as_deref()
            .map(|v| parse_timestamp(v, "last_message_at")),
        matched_at: parse_timestamp(&row.matched_at, "matched_at"),
        avatar: row.animal_photo.clone(),
    }
}
