use crate::{
    errors::AppError,
    models::{Story, StoryRing},
    storage::story_media_key,
    AppState,
};
use axum::{
    body::Body,
    extract::{FromRequestParts, Multipart, Path, State},
    http::{header, request::Parts, StatusCode},
    response::Response,
    Json,
};
use mime_guess;
use std::sync::Arc;
use tracing;
use uuid::Uuid;

/// Header carrying the caller's identity, set by the upstream identity provider.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, taken from the `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| CallerId(id.to_string()))
            .ok_or(AppError::Unauthenticated)
    }
}

/// POST /stories: uploads the `image` field and publishes it as a story.
pub async fn create_story(
    State(state): State<Arc<AppState>>,
    CallerId(author_id): CallerId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Story>), AppError> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut image_filename: Option<String> = None;
    let mut image_content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        match field_name.as_str() {
            "image" => {
                image_filename = field.file_name().map(|s| s.to_string());
                image_content_type = field.content_type().map(|m| m.to_string());
                image_data = Some(field.bytes().await?.to_vec());
            }
            _ => tracing::debug!("Ignoring unknown multipart field: {}", field_name),
        }
    }

    let image_data = image_data.ok_or_else(|| AppError::MissingFormField("image".to_string()))?;
    if image_data.is_empty() {
        return Err(AppError::InvalidInput("image data cannot be empty".to_string()));
    }

    let media_key = story_media_key(&author_id, image_filename.as_deref());
    let content_type = image_content_type
        .or_else(|| mime_guess::from_path(&media_key).first_raw().map(|s| s.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let media_url = state
        .media
        .upload(&media_key, image_data, Some(content_type))
        .await?;

    match state.stories.create_story(&author_id, &media_url).await {
        Ok(story) => Ok((StatusCode::CREATED, Json(story))),
        Err(err) => {
            // Nothing references the object now; remove it best-effort.
            if let Err(cleanup_err) = state.media.delete(&media_key).await {
                tracing::warn!(%media_key, error = %cleanup_err, "Story not persisted and its media could not be removed");
            } else {
                tracing::debug!(%media_key, "Removed media of story that failed to persist");
            }
            Err(err.into())
        }
    }
}

/// GET /stories: every active story, newest first.
pub async fn list_stories(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Story>>, AppError> {
    let now = state.stories.now();
    let stories = state.stories.list_active_stories(now).await?;
    Ok(Json(stories))
}

/// GET /stories/rings: one ring per author for the calling viewer.
pub async fn story_rings(
    State(state): State<Arc<AppState>>,
    CallerId(viewer_id): CallerId,
) -> Result<Json<Vec<StoryRing>>, AppError> {
    let now = state.stories.now();
    let rings = state.stories.story_rings(&viewer_id, now).await?;
    tracing::debug!(%viewer_id, rings = rings.len(), "Built story rings");
    Ok(Json(rings))
}

pub async fn get_story(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<Story>, AppError> {
    let story_id = Uuid::parse_str(&id_str)?;
    let story = state.stories.get_story(story_id).await?;
    Ok(Json(story))
}

/// POST /stories/{id}/views: records that the caller watched the story.
pub async fn mark_viewed(
    State(state): State<Arc<AppState>>,
    CallerId(viewer_id): CallerId,
    Path(id_str): Path<String>,
) -> Result<StatusCode, AppError> {
    let story_id = Uuid::parse_str(&id_str)?;
    state.stories.mark_viewed(story_id, &viewer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/{author_id}/stories: one author's active stories, oldest first.
pub async fn author_stories(
    State(state): State<Arc<AppState>>,
    Path(author_id): Path<String>,
) -> Result<Json<Vec<Story>>, AppError> {
    let now = state.stories.now();
    let stories = state.stories.list_author_stories(&author_id, now).await?;
    Ok(Json(stories))
}

/// GET /media/{*key}
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    tracing::debug!(media_key = %key, "Fetching media via handler");

    let (data, content_type) = state.media.download(&key).await?;
    let content_type = content_type
        .or_else(|| mime_guess::from_path(&key).first_raw().map(|s| s.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(data))
        .map_err(|e| AppError::InternalServerError(format!("Failed to build media response: {}", e)))
}
