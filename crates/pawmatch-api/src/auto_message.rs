use anyhow::{Context, anyhow};
use rand::seq::IndexedRandom;
use tracing::debug;

use pawmatch_db::Database;
use pawmatch_db::messages::NewMessage;
use pawmatch_db::models::{ConversationRow, MessageRow};
use pawmatch_types::identity::PartyKind;

use crate::error::ApiError;
use crate::identity::Identity;
use crate::messages::{participant_key_of, recipient_for};

/// Intro pool for the scripted opening message. One line is drawn uniformly
/// at random and joined to the closing paragraph by a blank line.
const INTRO_LINES: &[&str] = &[
    "Hi! Thanks for the match — I already like you.",
    "Hello! I heard you swiped right on me. Good choice, if I may say so.",
    "You matched with me! I promise I'm even cuter in real life.",
    "Hi there! I've been waiting for someone like you to come along.",
];

const OUTRO: &str = "Would you like to meet? Reply here and the shelter team \
will help you plan a visit.";

/// The effective opening text: a non-empty override wins; otherwise one
/// random intro line plus the closing paragraph. Returns None only when no
/// non-empty text can be produced at all.
pub(crate) fn compose_opening_text(override_text: Option<&str>) -> Option<String> {
    if let Some(text) = override_text {
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    let intro = INTRO_LINES.choose(&mut rand::rng()).copied();
    match intro {
        Some(intro) if !OUTRO.is_empty() => Some(format!("{intro}\n\n{OUTRO}")),
        Some(intro) => Some(intro.to_string()),
        None if !OUTRO.is_empty() => Some(OUTRO.to_string()),
        None => None,
    }
}

/// Append the scripted opening message to a conversation, at most once over
/// its lifetime. The flag flip is a compare-and-set inside the store, so
/// concurrent duplicate calls append a single message; the losers return
/// None. Also returns None when no text or no attributable shelter can be
/// resolved.
pub fn ensure_opening_message(
    db: &Database,
    identity: &Identity,
    conversation: &ConversationRow,
    override_text: Option<&str>,
) -> Result<Option<MessageRow>, ApiError> {
    if conversation.auto_message_sent {
        return Ok(None);
    }
    let Some(text) = compose_opening_text(override_text) else {
        return Ok(None);
    };
    let Some(shelter_id) = resolve_attribution(db, identity, conversation)? else {
        debug!(
            "conversation {} has no attributable shelter; skipping opening message",
            conversation.id
        );
        return Ok(None);
    };

    let shelter_name = db.get_shelter(&shelter_id)?.map(|s| s.name);
    let key = participant_key_of(conversation, None).ok_or_else(|| {
        ApiError::Internal(anyhow!(
            "conversation {} has no participant key",
            conversation.id
        ))
    })?;
    let (to_kind, to_id) = recipient_for(PartyKind::Shelter, conversation);

    let message = NewMessage {
        conversation_id: &conversation.id,
        conversation_key: key.conversation_key(&conversation.animal_id),
        user_id: conversation.user_id.as_deref(),
        device_key: conversation.device_key.as_deref(),
        animal_id: &conversation.animal_id,
        shelter_id: Some(&shelter_id),
        from_kind: PartyKind::Shelter.as_str(),
        from_id: Some(&shelter_id),
        to_kind: to_kind.as_str(),
        to_id: to_id.as_deref(),
        text: &text,
        author_display_name: shelter_name.as_deref(),
    };

    let row = db
        .append_auto_message(&message)
        .with_context(|| format!("append opening message to conversation {}", conversation.id))?;
    Ok(row)
}

/// The shelter the opening message speaks for: the conversation's stored
/// reference, else the calling shelter, else the animal's owning shelter
/// (cached back onto the conversation).
fn resolve_attribution(
    db: &Database,
    identity: &Identity,
    conversation: &ConversationRow,
) -> Result<Option<String>, ApiError> {
    if let Some(shelter_id) = &conversation.shelter_id {
        return Ok(Some(shelter_id.clone()));
    }
    if let Identity::Shelter { shelter_id, .. } = identity {
        return Ok(Some(shelter_id.to_string()));
    }
    if let Some(shelter_id) = db
        .get_animal(&conversation.animal_id)?
        .and_then(|animal| animal.shelter_id)
    {
        db.set_conversation_shelter(&conversation.id, &shelter_id)?;
        return Ok(Some(shelter_id));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawmatch_types::identity::ParticipantKey;

    fn device_identity() -> Identity {
        Identity::Device {
            device_key: "dev-123".into(),
        }
    }

    fn seed_conversation(db: &Database, shelter_on_animal: bool) -> ConversationRow {
        db.create_shelter("s1", "Dierenasiel Noord", "noord@example.org", "hash")
            .unwrap();
        let shelter_id = shelter_on_animal.then_some("s1");
        db.create_animal("a1", shelter_id, "Noodle", None).unwrap();
        let animal = db.get_animal("a1").unwrap().unwrap();
        let key = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        db.upsert_conversation(&key, &animal).unwrap()
    }

    #[test]
    fn composed_text_is_an_intro_line_plus_outro() {
        let text = compose_opening_text(None).unwrap();
        let (intro, outro) = text.split_once("\n\n").unwrap();
        assert!(INTRO_LINES.contains(&intro));
        assert_eq!(outro, OUTRO);
    }

    #[test]
    fn override_text_wins_and_is_trimmed() {
        assert_eq!(
            compose_opening_text(Some("  Hoi!  ")).as_deref(),
            Some("Hoi!")
        );
        // A blank override falls back to the generated default.
        assert!(compose_opening_text(Some("   ")).is_some());
    }

    #[test]
    fn sends_exactly_once_and_flips_the_flag() {
        let db = Database::open_in_memory().unwrap();
        let conversation = seed_conversation(&db, true);
        assert!(!conversation.auto_message_sent);

        let first = ensure_opening_message(&db, &device_identity(), &conversation, None)
            .unwrap()
            .unwrap();
        assert_eq!(first.from_kind, "shelter");
        assert_eq!(first.from_id.as_deref(), Some("s1"));
        assert_eq!(first.to_kind, "user");
        assert_eq!(first.author_display_name.as_deref(), Some("Dierenasiel Noord"));

        // Second call observes the flag and is a no-op, including a call
        // still holding the stale pre-send row.
        let updated = db.get_conversation(&conversation.id).unwrap().unwrap();
        assert!(updated.auto_message_sent);
        assert!(
            ensure_opening_message(&db, &device_identity(), &updated, None)
                .unwrap()
                .is_none()
        );
        assert!(
            ensure_opening_message(&db, &device_identity(), &conversation, None)
                .unwrap()
                .is_none()
        );
        assert_eq!(db.list_messages(&conversation.id).unwrap().len(), 1);
    }

    #[test]
    fn backfills_shelter_from_animal_when_reference_is_missing() {
        let db = Database::open_in_memory().unwrap();
        let conversation = seed_conversation(&db, true);
        // Strip the stored ref; attribution must fall back to the animal.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET shelter_id = NULL WHERE id = ?1",
                [&conversation.id],
            )?;
            Ok(())
        })
        .unwrap();
        let stripped = db.get_conversation(&conversation.id).unwrap().unwrap();

        let message = ensure_opening_message(&db, &device_identity(), &stripped, None)
            .unwrap()
            .unwrap();
        assert_eq!(message.shelter_id.as_deref(), Some("s1"));

        let cached = db.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(cached.shelter_id.as_deref(), Some("s1"));
    }

    #[test]
    fn no_attributable_shelter_means_no_message() {
        let db = Database::open_in_memory().unwrap();
        let conversation = seed_conversation(&db, false);
        // The conversation snapshot carries no shelter and neither does the
        // animal; a device identity cannot supply one either.
        assert!(
            ensure_opening_message(&db, &device_identity(), &conversation, None)
                .unwrap()
                .is_none()
        );
        assert!(db.list_messages(&conversation.id).unwrap().is_empty());

        let row = db.get_conversation(&conversation.id).unwrap().unwrap();
        assert!(!row.auto_message_sent);
    }

    #[test]
    fn calling_shelter_supplies_attribution() {
        let db = Database::open_in_memory().unwrap();
        let conversation = seed_conversation(&db, false);
        let shelter = Identity::Shelter {
            shelter_id: uuid::Uuid::new_v4(),
            name: Some("Dierenasiel Zuid".into()),
        };

        let message = ensure_opening_message(&db, &shelter, &conversation, None)
            .unwrap()
            .unwrap();
        assert_eq!(message.from_kind, "shelter");
        assert!(message.from_id.is_some());
    }
}
