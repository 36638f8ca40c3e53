use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use pawmatch_types::api::{Claims, ShelterClaims};
use pawmatch_types::identity::ParticipantKey;

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

pub const SHELTER_TOKEN_HEADER: &str = "x-shelter-token";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const DEVICE_KEY_HEADER: &str = "x-device-key";

/// The resolved caller classification for one request. Exactly one variant
/// wins, by fixed precedence: verified shelter token, then verified user
/// bearer token (with the existence-checked X-User-Id fallback), then the
/// anonymous device key. A user identity keeps a device key presented
/// alongside it; that is the handle the claim flow uses to pick up
/// conversations started before authenticating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User {
        user_id: Uuid,
        name: Option<String>,
        device_key: Option<String>,
    },
    Device {
        device_key: String,
    },
    Shelter {
        shelter_id: Uuid,
        name: Option<String>,
    },
}

impl Identity {
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::User { .. } => "user",
            Identity::Device { .. } => "device",
            Identity::Shelter { .. } => "shelter",
        }
    }

    /// The storage filter for this identity, if it is a participant.
    /// Shelters are not participants: they attach to existing
    /// conversations, or act on behalf of an explicit user id.
    pub fn participant_key(&self) -> Option<ParticipantKey> {
        match self {
            Identity::User {
                user_id,
                device_key,
                ..
            } => Some(ParticipantKey::User {
                user_id: user_id.to_string(),
                device_key: device_key.clone(),
            }),
            Identity::Device { device_key } => Some(ParticipantKey::Device {
                device_key: device_key.clone(),
            }),
            Identity::Shelter { .. } => None,
        }
    }
}

/// Resolve the caller's identity from the request's credential bag.
///
/// Invalid credentials in a higher tier fall through silently to the next
/// one: a malformed or unverifiable shelter token or bearer token is
/// treated as absent, not as a hard failure. Only a fully empty bag is
/// Unauthorized.
pub fn resolve_identity(headers: &HeaderMap, state: &AppStateInner) -> Result<Identity, ApiError> {
    if let Some(identity) = shelter_from_token(headers, &state.admin_jwt_secret) {
        return Ok(identity);
    }

    let device_key = header_value(headers, DEVICE_KEY_HEADER).map(str::to_owned);

    if let Some((user_id, name)) = user_from_bearer(headers, &state.jwt_secret) {
        return Ok(Identity::User {
            user_id,
            name: Some(name),
            device_key,
        });
    }

    if let Some(identity) = user_from_fallback_header(headers, state, device_key.clone())? {
        return Ok(identity);
    }

    if let Some(device_key) = device_key {
        return Ok(Identity::Device { device_key });
    }

    Err(ApiError::Unauthorized)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn shelter_from_token(headers: &HeaderMap, admin_secret: &str) -> Option<Identity> {
    let token = header_value(headers, SHELTER_TOKEN_HEADER)?;
    let data = decode::<ShelterClaims>(
        token,
        &DecodingKey::from_secret(admin_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    if data.claims.kind != "shelter" {
        return None;
    }
    Some(Identity::Shelter {
        shelter_id: data.claims.sub,
        name: Some(data.claims.name),
    })
}

fn user_from_bearer(headers: &HeaderMap, secret: &str) -> Option<(Uuid, String)> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let token = auth_header.strip_prefix("Bearer ")?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some((data.claims.sub, data.claims.name))
}

/// X-User-Id fallback: a well-formed id of an existing user counts as a user
/// identity; a malformed or unknown id is skipped, continuing resolution.
fn user_from_fallback_header(
    headers: &HeaderMap,
    state: &AppStateInner,
    device_key: Option<String>,
) -> Result<Option<Identity>, ApiError> {
    let Some(raw) = header_value(headers, USER_ID_HEADER) else {
        return Ok(None);
    };
    let Ok(user_id) = raw.parse::<Uuid>() else {
        return Ok(None);
    };
    let Some(user) = state.db.get_user(&user_id.to_string())? else {
        return Ok(None);
    };
    Ok(Some(Identity::User {
        user_id,
        name: Some(user.name),
        device_key,
    }))
}

impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve_identity(&parts.headers, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{create_shelter_token, create_user_token};
    use axum::http::HeaderValue;
    use pawmatch_db::Database;

    fn test_state() -> AppStateInner {
        AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "user-secret".into(),
            admin_jwt_secret: "admin-secret".into(),
        }
    }

    fn headers(pairs: &[(&str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn shelter_token_wins_over_bearer() {
        let state = test_state();
        let shelter_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let shelter_token =
            create_shelter_token(&state.admin_jwt_secret, shelter_id, "Noord").unwrap();
        let user_token = create_user_token(&state.jwt_secret, user_id, "Robin").unwrap();

        let identity = resolve_identity(
            &headers(&[
                (SHELTER_TOKEN_HEADER, shelter_token),
                ("authorization", format!("Bearer {user_token}")),
            ]),
            &state,
        )
        .unwrap();

        assert!(matches!(
            identity,
            Identity::Shelter { shelter_id: id, .. } if id == shelter_id
        ));
    }

    #[test]
    fn user_token_in_shelter_header_is_ignored() {
        let state = test_state();
        let user_id = Uuid::new_v4();
        // Signed with the user secret and lacking kind="shelter": both
        // disqualify it as a shelter credential.
        let user_token = create_user_token(&state.jwt_secret, user_id, "Robin").unwrap();

        let identity = resolve_identity(
            &headers(&[
                (SHELTER_TOKEN_HEADER, user_token),
                (DEVICE_KEY_HEADER, "dev-123".into()),
            ]),
            &state,
        )
        .unwrap();

        assert_eq!(
            identity,
            Identity::Device {
                device_key: "dev-123".into()
            }
        );
    }

    #[test]
    fn invalid_bearer_falls_through_to_device_key() {
        let state = test_state();
        let identity = resolve_identity(
            &headers(&[
                ("authorization", "Bearer not-a-real-token".to_string()),
                (DEVICE_KEY_HEADER, "dev-123".into()),
            ]),
            &state,
        )
        .unwrap();

        assert_eq!(
            identity,
            Identity::Device {
                device_key: "dev-123".into()
            }
        );
    }

    #[test]
    fn bearer_identity_keeps_presented_device_key() {
        let state = test_state();
        let user_id = Uuid::new_v4();
        let token = create_user_token(&state.jwt_secret, user_id, "Robin").unwrap();

        let identity = resolve_identity(
            &headers(&[
                ("authorization", format!("Bearer {token}")),
                (DEVICE_KEY_HEADER, "dev-123".into()),
            ]),
            &state,
        )
        .unwrap();

        match identity {
            Identity::User {
                user_id: id,
                device_key,
                ..
            } => {
                assert_eq!(id, user_id);
                assert_eq!(device_key.as_deref(), Some("dev-123"));
            }
            other => panic!("expected user identity, got {other:?}"),
        }
    }

    #[test]
    fn user_id_header_requires_existing_user() {
        let state = test_state();
        let known = Uuid::new_v4();
        state
            .db
            .create_user(&known.to_string(), "Robin", "robin@example.org", "hash")
            .unwrap();

        let identity = resolve_identity(
            &headers(&[(USER_ID_HEADER, known.to_string())]),
            &state,
        )
        .unwrap();
        assert!(matches!(identity, Identity::User { user_id, .. } if user_id == known));

        // Unknown or malformed ids are skipped, not errors.
        let unknown = resolve_identity(
            &headers(&[
                (USER_ID_HEADER, Uuid::new_v4().to_string()),
                (DEVICE_KEY_HEADER, "dev-123".into()),
            ]),
            &state,
        )
        .unwrap();
        assert!(matches!(unknown, Identity::Device { .. }));

        let malformed = resolve_identity(
            &headers(&[
                (USER_ID_HEADER, "not-a-uuid".to_string()),
                (DEVICE_KEY_HEADER, "dev-123".into()),
            ]),
            &state,
        )
        .unwrap();
        assert!(matches!(malformed, Identity::Device { .. }));
    }

    #[test]
    fn empty_credential_bag_is_unauthorized() {
        let state = test_state();
        let result = resolve_identity(&HeaderMap::new(), &state);
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
