use crate::errors::{MediaError, RepoError};
use crate::models::{Story, VersionedStory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Persistent collection of stories.
#[async_trait]
pub trait StoryRepository: Send + Sync + 'static { // Send+Sync+'static required for Arc<dyn>
    /// Inserts a new story at version 0. Must not overwrite an existing id.
    async fn insert(&self, story: &Story) -> Result<(), RepoError>;

    /// Returns Ok(None) if the story does not exist.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<VersionedStory>, RepoError>;

    /// All stories with `expires_at > now`, in no particular order.
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Story>, RepoError>;

    /// Active stories of a single author, in no particular order.
    async fn list_active_by_author(
        &self,
        author_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Story>, RepoError>;

    /// Replaces the viewer set only if the stored version still equals
    /// `expected_version`, bumping the version on success.
    /// Returns `RepoError::Conflict` when the story changed in between.
    async fn replace_viewers(
        &self,
        id: Uuid,
        viewers: &BTreeSet<String>,
        expected_version: u64,
    ) -> Result<(), RepoError>;
}

/// Object store holding story media.
#[async_trait]
pub trait MediaStorage: Send + Sync + 'static {
    /// Stores the object and returns its public URL.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<String, MediaError>;

    /// Returns the object bytes and its content type.
    async fn download(&self, key: &str) -> Result<(Vec<u8>, Option<String>), MediaError>;

    /// Removes the object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), MediaError>;
}
