use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use pawmatch_db::models::AnimalRow;
use pawmatch_types::api::{AnimalResponse, CreateAnimalRequest};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::{parse_timestamp, parse_uuid};

/// Register an animal under the calling shelter. Thin collaborator surface:
/// the conversation core only needs animals to exist and to carry a
/// name/photo/shelter triple.
pub async fn create_animal(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<CreateAnimalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Identity::Shelter { shelter_id, .. } = identity else {
        return Err(ApiError::Unauthorized);
    };
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }

    let animal_id = Uuid::new_v4();
    state.db.create_animal(
        &animal_id.to_string(),
        Some(&shelter_id.to_string()),
        name,
        req.photo.as_deref(),
    )?;

    let row = state
        .db
        .get_animal(&animal_id.to_string())?
        .ok_or(ApiError::AnimalNotFound)?;
    Ok((StatusCode::CREATED, Json(animal_response(&row))))
}

pub async fn get_animal(
    State(state): State<AppState>,
    Path(animal_id): Path<Uuid>,
) -> Result<Json<AnimalResponse>, ApiError> {
    let row = state
        .db
        .get_animal(&animal_id.to_string())?
        .ok_or(ApiError::AnimalNotFound)?;
    Ok(Json(animal_response(&row)))
}

fn animal_response(row: &AnimalRow) -> AnimalResponse {
    AnimalResponse {
        id: parse_uuid(&row.id, "animal id"),
        shelter_id: row.shelter_id.as_deref().map(|v| parse_uuid(v, "shelter id")),
        name: row.name.clone(),
        photo: row.photo.clone(),
        created_at: parse_timestamp(&row.created_at, "animal created_at"),
    }
}
