use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// User JWT claims shared between token issuance (auth handlers) and the
/// identity resolver. Canonical definition lives here in pawmatch-types to
/// eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

/// Shelter JWT claims. Signed with the admin secret and carried in the
/// `X-Shelter-Token` header; `kind` must be `"shelter"` for the token to
/// resolve to a shelter identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelterClaims {
    pub sub: Uuid,
    pub name: String,
    pub kind: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShelterLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct ShelterLoginResponse {
    pub shelter_id: Uuid,
    pub name: String,
    pub token: String,
}

// -- Animals --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAnimalRequest {
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnimalResponse {
    pub id: Uuid,
    pub shelter_id: Option<Uuid>,
    pub name: String,
    pub photo: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConversationRequest {
    pub animal_id: Uuid,
    /// Shelter callers start on behalf of this user; ignored otherwise.
    pub user_id: Option<Uuid>,
    /// Fire the scripted opening message (at most once per conversation).
    #[serde(default)]
    pub auto_message: bool,
    /// Override text for the opening message; implies `auto_message`.
    pub auto_message_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartConversationResponse {
    pub conversation: ConversationResponse,
    pub message: Option<MessageResponse>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub device_key: Option<String>,
    pub animal_id: Uuid,
    pub shelter_id: Option<Uuid>,
    pub animal_name: Option<String>,
    pub animal_photo: Option<String>,
    pub matched_at: DateTime<Utc>,
    pub auto_message_sent: bool,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a participant's conversation list, shaped for rendering:
/// animal name/photo snapshots stand in for a join against animals.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub animal_id: Uuid,
    pub name: String,
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub matched_at: DateTime<Utc>,
    pub avatar: Option<String>,
}

/// One row of a shelter's conversation list; `user_name` is resolved from
/// the claimed user when there is one.
#[derive(Debug, Serialize)]
pub struct ShelterConversationSummary {
    pub id: Uuid,
    pub animal_id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub device_key: Option<String>,
    pub name: String,
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub matched_at: DateTime<Utc>,
    pub avatar: Option<String>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplyRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub text: String,
    pub from_kind: String,
    pub to_kind: String,
    pub author_display_name: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageHistoryResponse {
    pub conversation: ConversationResponse,
    pub messages: Vec<MessageResponse>,
}
