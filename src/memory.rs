use crate::{
    domain::{MediaStorage, StoryRepository},
    errors::{MediaError, RepoError},
    models::{Story, VersionedStory},
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing;
use uuid::Uuid;

/// Process-local story store for development and tests.
///
/// Applies the same version check as the DynamoDB repository, so concurrent
/// viewer updates behave identically. The lock is never held across an await.
#[derive(Debug, Default)]
pub struct InMemoryStoryRepository {
    items: Mutex<HashMap<Uuid, VersionedStory>>,
}

impl InMemoryStoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> Result<MutexGuard<'_, HashMap<Uuid, VersionedStory>>, RepoError> {
        self.items
            .lock()
            .map_err(|_| RepoError::BackendError(anyhow!("in-memory story store lock poisoned")))
    }
}

#[async_trait]
impl StoryRepository for InMemoryStoryRepository {
    async fn insert(&self, story: &Story) -> Result<(), RepoError> {
        let mut items = self.items()?;
        if items.contains_key(&story.id) {
            return Err(RepoError::BackendError(anyhow!("story {} already exists", story.id)));
        }
        items.insert(story.id, VersionedStory { story: story.clone(), version: 0 });
        tracing::debug!(story_id = %story.id, "Memory: Story inserted");
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<VersionedStory>, RepoError> {
        Ok(self.items()?.get(&id).cloned())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Story>, RepoError> {
        Ok(self
            .items()?
            .values()
            .filter(|item| item.story.expires_at > now)
            .map(|item| item.story.clone())
            .collect())
    }

    async fn list_active_by_author(&self, author_id: &str, now: DateTime<Utc>) -> Result<Vec<Story>, RepoError> {
        Ok(self
            .items()?
            .values()
            .filter(|item| item.story.author_id == author_id && item.story.expires_at > now)
            .map(|item| item.story.clone())
            .collect())
    }

    async fn replace_viewers(&self, id: Uuid, viewers: &BTreeSet<String>, expected_version: u64) -> Result<(), RepoError> {
        let mut items = self.items()?;
        // A missing item fails the condition the same way DynamoDB's attribute_exists does.
        let item = items.get_mut(&id).ok_or(RepoError::Conflict(id))?;
        if item.version != expected_version {
            tracing::debug!(story_id = %id, expected_version, actual_version = item.version, "Memory: Version mismatch");
            return Err(RepoError::Conflict(id));
        }
        item.story.viewed_by = viewers.clone();
        item.version += 1;
        Ok(())
    }
}

/// Process-local media store. URLs point at the service's own `/media` route.
#[derive(Debug)]
pub struct InMemoryMediaStorage {
    public_base_url: String,
    objects: Mutex<HashMap<String, (Vec<u8>, Option<String>)>>,
}

impl InMemoryMediaStorage {
    pub fn new(public_base_url: String) -> Self {
        Self {
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn objects(&self) -> Result<MutexGuard<'_, HashMap<String, (Vec<u8>, Option<String>)>>, MediaError> {
        self.objects
            .lock()
            .map_err(|_| MediaError::BackendError(anyhow!("in-memory media store lock poisoned")))
    }
}

#[async_trait]
impl MediaStorage for InMemoryMediaStorage {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<String, MediaError> {
        tracing::debug!(media_key = %key, size = data.len(), "Memory: Storing media");
        self.objects()?.insert(key.to_string(), (data, content_type));
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn download(&self, key: &str) -> Result<(Vec<u8>, Option<String>), MediaError> {
        self.objects()?
            .get(key)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), MediaError> {
        if self.objects()?.remove(key).is_some() {
            tracing::debug!(media_key = %key, "Memory: Media deleted");
        }
        Ok(())
    }
}
