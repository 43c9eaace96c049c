use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// --- Infrastructure Errors ---

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Story {0} was modified since it was read")]
    Conflict(Uuid),

    #[error("Story data corrupted: {0}")]
    DataCorruption(String),

    #[error("Database backend error: {0}")]
    BackendError(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media upload failed: {0}")]
    UploadFailed(String),

    #[error("Media not found with key: {0}")]
    NotFound(String),

    #[error("Media backend error: {0}")]
    BackendError(#[from] anyhow::Error),
}

// --- Story Lifecycle Errors ---

/// Failure of the persistent story store as seen by callers of the lifecycle manager.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Story store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Story {story_id} kept changing concurrently ({attempts} attempts)")]
    Conflict { story_id: Uuid, attempts: u32 },

    #[error("Story store operation failed")]
    Repository(#[source] RepoError),
}

#[derive(Error, Debug)]
pub enum StoryError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Story not found with ID: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Media storage operation failed")]
    Media(#[source] MediaError),
}

impl From<RepoError> for StoryError {
    fn from(err: RepoError) -> Self {
        StoryError::Storage(StorageError::Repository(err))
    }
}

impl From<MediaError> for StoryError {
    fn from(err: MediaError) -> Self {
        StoryError::Media(err)
    }
}

// --- Web Layer Error ---

#[derive(Error, Debug)]
pub enum AppError {
    // Input validation / request parsing errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing form field: {0}")]
    MissingFormField(String),
    #[error("Error processing multipart form data: {0}")]
    MultipartError(#[from] axum::extract::multipart::MultipartError),
    #[error("Invalid story ID format: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("Missing caller identity")]
    Unauthenticated,

    #[error("Story not found with ID: {0}")]
    StoryNotFound(Uuid),
    #[error("Media not found with key: {0}")]
    MediaNotFound(String),
    #[error("Story store timed out")]
    StoreTimeout(#[source] StorageError),
    #[error("Story was modified concurrently")]
    StoreConflict(#[source] StorageError),
    #[error("Could not access story data")]
    RepositoryError(#[source] StorageError),
    #[error("Could not perform media storage operation")]
    MediaError(#[source] MediaError),

    // Configuration / Startup errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

// --- Conversions from Domain Errors to AppError ---

impl From<StoryError> for AppError {
    fn from(err: StoryError) -> Self {
        match err {
            StoryError::Validation(msg) => AppError::InvalidInput(msg),
            StoryError::NotFound(id) => AppError::StoryNotFound(id),
            StoryError::Storage(e @ StorageError::Timeout(_)) => AppError::StoreTimeout(e),
            StoryError::Storage(e @ StorageError::Conflict { .. }) => AppError::StoreConflict(e),
            StoryError::Storage(e) => AppError::RepositoryError(e),
            StoryError::Media(e) => e.into(),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotFound(key) => AppError::MediaNotFound(key),
            e => AppError::MediaError(e),
        }
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<aws_smithy_types::error::operation::BuildError> for AppError {
    fn from(err: aws_smithy_types::error::operation::BuildError) -> Self {
        AppError::InitError(format!("Failed to build AWS request: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InitError(format!("I/O error: {}", err))
    }
}

// --- Axum Response Implementation ---

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            // 4xx Client Errors
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::MissingFormField(field) => (StatusCode::BAD_REQUEST, format!("Missing form field: {}", field)),
            AppError::MultipartError(e) => (StatusCode::BAD_REQUEST, format!("Invalid multipart form data: {}", e)),
            AppError::InvalidUuid(e) => (StatusCode::BAD_REQUEST, format!("Invalid ID format: {}", e)),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Missing X-User-Id header".to_string()),
            AppError::StoryNotFound(id) => (StatusCode::NOT_FOUND, format!("Story not found with ID: {}", id)),
            AppError::MediaNotFound(key) => (StatusCode::NOT_FOUND, format!("Media not found with key: {}", key)),
            AppError::StoreConflict(e) => {
                tracing::warn!(error.source = ?e, "Optimistic update gave up after retry");
                (StatusCode::CONFLICT, "Story was modified concurrently, try again".to_string())
            }

            // 5xx Server Errors
            AppError::StoreTimeout(e) => {
                tracing::error!(error.source = ?e, "Story store timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Story store timed out".to_string())
            }
            AppError::RepositoryError(e) => {
                tracing::error!(error.source = ?e, "Repository error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database operation failed".to_string())
            }
            AppError::MediaError(e) => {
                tracing::error!(error.source = ?e, "Media storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Media storage operation failed".to_string())
            }
            AppError::ConfigError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error".to_string())
            }
            AppError::InitError(msg) => {
                tracing::error!("Initialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server initialization error".to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred".to_string())
            }
        };

        tracing::debug!(error.message = %error_message, error.detail = %self, "Responding with error");

        let body = Json(serde_json::json!({ "error": error_message }));
        (status, body).into_response()
    }
}
