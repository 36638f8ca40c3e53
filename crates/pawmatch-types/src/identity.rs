use serde::{Deserialize, Serialize};

/// Storage-level participant filter: a conversation is keyed by either
/// (user, animal) or (device key, animal). The user variant optionally
/// carries a device key so lookups can fall back to (and claim) a
/// conversation the same person started before authenticating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantKey {
    User {
        user_id: String,
        device_key: Option<String>,
    },
    Device {
        device_key: String,
    },
}

impl ParticipantKey {
    /// Redundant message-ledger key, kept for indexing and debugging.
    pub fn conversation_key(&self, animal_id: &str) -> String {
        match self {
            ParticipantKey::User { user_id, .. } => format!("{user_id}:{animal_id}"),
            ParticipantKey::Device { device_key } => format!("device:{device_key}:{animal_id}"),
        }
    }
}

/// Who a message is from or to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    User,
    Shelter,
    Animal,
    System,
}

impl PartyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyKind::User => "user",
            PartyKind::Shelter => "shelter",
            PartyKind::Animal => "animal",
            PartyKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(PartyKind::User),
            "shelter" => Some(PartyKind::Shelter),
            "animal" => Some(PartyKind::Animal),
            "system" => Some(PartyKind::System),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_shapes() {
        let user = ParticipantKey::User {
            user_id: "u1".into(),
            device_key: Some("dev-123".into()),
        };
        assert_eq!(user.conversation_key("a1"), "u1:a1");

        let device = ParticipantKey::Device {
            device_key: "dev-123".into(),
        };
        assert_eq!(device.conversation_key("a1"), "device:dev-123:a1");
    }

    #[test]
    fn party_kind_round_trips_as_str() {
        for kind in [
            PartyKind::User,
            PartyKind::Shelter,
            PartyKind::Animal,
            PartyKind::System,
        ] {
            assert_eq!(PartyKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PartyKind::parse("robot"), None);
    }
}
