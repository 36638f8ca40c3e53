/// Database row types — these map directly to SQLite rows.
/// Distinct from pawmatch-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct ShelterRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct AnimalRow {
    pub id: String,
    pub shelter_id: Option<String>,
    pub name: String,
    pub photo: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub user_id: Option<String>,
    pub device_key: Option<String>,
    pub animal_id: String,
    pub shelter_id: Option<String>,
    pub animal_name: Option<String>,
    pub animal_photo: Option<String>,
    pub matched_at: String,
    pub auto_message_sent: bool,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub conversation_key: String,
    pub user_id: Option<String>,
    pub device_key: Option<String>,
    pub animal_id: String,
    pub shelter_id: Option<String>,
    pub from_kind: String,
    pub from_id: Option<String>,
    pub to_kind: String,
    pub to_id: Option<String>,
    pub text: String,
    pub author_display_name: Option<String>,
    pub read: bool,
    pub created_at: String,
}
