//! Creation, expiry filtering, view tracking and per-author grouping of stories.
//!
//! The manager keeps no state between calls. Everything lives in the
//! [`StoryRepository`]; the only shared mutable field is a story's viewer set,
//! which is written with an optimistic version check and one bounded retry.

use crate::clock::Clock;
use crate::domain::StoryRepository;
use crate::errors::{RepoError, StorageError, StoryError};
use crate::models::{Story, StoryRing};
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing;
use uuid::Uuid;

/// Total read-modify-write attempts for `mark_viewed`.
const MARK_VIEWED_ATTEMPTS: u32 = 2;

/// Called with every story right after it has been persisted.
pub type StoryCreatedHook = Arc<dyn Fn(&Story) + Send + Sync>;

#[derive(Clone)]
pub struct StoryLifecycleManager {
    stories: Arc<dyn StoryRepository>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    created_hooks: Vec<StoryCreatedHook>,
}

impl StoryLifecycleManager {
    pub fn new(stories: Arc<dyn StoryRepository>, clock: Arc<dyn Clock>, store_timeout: Duration) -> Self {
        Self {
            stories,
            clock,
            store_timeout,
            created_hooks: Vec::new(),
        }
    }

    /// Registers a hook run after each successful `create_story`.
    pub fn with_created_hook(mut self, hook: StoryCreatedHook) -> Self {
        self.created_hooks.push(hook);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create_story(&self, author_id: &str, media_ref: &str) -> Result<Story, StoryError> {
        let author_id = non_empty("author_id", author_id)?;
        let media_ref = non_empty("media_ref", media_ref)?;

        let story = Story::new(author_id.to_string(), media_ref.to_string(), self.clock.now());
        self.timed(self.stories.insert(&story)).await?;

        tracing::info!(story_id = %story.id, author_id = %story.author_id, expires_at = %story.expires_at, "Story created");
        for hook in &self.created_hooks {
            hook(&story);
        }
        Ok(story)
    }

    pub async fn get_story(&self, story_id: Uuid) -> Result<Story, StoryError> {
        self.timed(self.stories.get_by_id(story_id))
            .await?
            .map(|versioned| versioned.story)
            .ok_or(StoryError::NotFound(story_id))
    }

    /// Stories not yet expired at `now`, newest first.
    pub async fn list_active_stories(&self, now: DateTime<Utc>) -> Result<Vec<Story>, StoryError> {
        let mut stories = self.timed(self.stories.list_active(now)).await?;
        stories.retain(|story| story.is_active(now));
        stories.sort_by(|a, b| newest_first(a, b));
        tracing::debug!(count = stories.len(), %now, "Listed active stories");
        Ok(stories)
    }

    /// One author's active stories in playback order (oldest first).
    pub async fn list_author_stories(&self, author_id: &str, now: DateTime<Utc>) -> Result<Vec<Story>, StoryError> {
        let author_id = non_empty("author_id", author_id)?;
        let mut stories = self.timed(self.stories.list_active_by_author(author_id, now)).await?;
        stories.retain(|story| story.is_active(now) && story.author_id == author_id);
        stories.sort_by(|a, b| newest_first(b, a));
        Ok(stories)
    }

    /// One ring per author with an active story, newest author first.
    pub async fn story_rings(&self, viewer_id: &str, now: DateTime<Utc>) -> Result<Vec<StoryRing>, StoryError> {
        let viewer_id = non_empty("viewer_id", viewer_id)?;
        let active = self.list_active_stories(now).await?;

        let mut by_author: BTreeMap<&str, Vec<Story>> = BTreeMap::new();
        for story in &active {
            by_author.entry(story.author_id.as_str()).or_default().push(story.clone());
        }

        let mut rings: Vec<StoryRing> = group_by_author_latest(&active)
            .into_iter()
            .map(|(author_id, latest)| {
                let stories = by_author.get(author_id.as_str()).map(Vec::as_slice).unwrap_or_default();
                StoryRing {
                    has_unseen: has_unseen_story(&author_id, stories, viewer_id),
                    story_count: stories.len(),
                    author_id,
                    latest,
                }
            })
            .collect();
        rings.sort_by(|a, b| newest_first(&a.latest, &b.latest));
        Ok(rings)
    }

    /// Records that `viewer_id` has seen the story. Idempotent.
    pub async fn mark_viewed(&self, story_id: Uuid, viewer_id: &str) -> Result<(), StoryError> {
        let viewer_id = non_empty("viewer_id", viewer_id)?;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(100))
            // Attempts alone bound the retry; each store call has its own timeout.
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                match self.try_mark_viewed(story_id, viewer_id).await {
                    Ok(()) => Ok(()),
                    Err(StoryError::Storage(StorageError::Repository(RepoError::Conflict(_)))) => {
                        let err = StoryError::Storage(StorageError::Conflict { story_id, attempts: current });
                        if current < MARK_VIEWED_ATTEMPTS {
                            tracing::debug!(%story_id, %viewer_id, attempt = current, "Viewer update conflicted, retrying");
                            Err(backoff::Error::transient(err))
                        } else {
                            tracing::warn!(%story_id, %viewer_id, attempt = current, "Viewer update conflicted again, giving up");
                            Err(backoff::Error::permanent(err))
                        }
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        })
        .await
    }

    async fn try_mark_viewed(&self, story_id: Uuid, viewer_id: &str) -> Result<(), StoryError> {
        let current = self
            .timed(self.stories.get_by_id(story_id))
            .await?
            .ok_or(StoryError::NotFound(story_id))?;

        if current.story.is_viewed_by(viewer_id) {
            tracing::debug!(%story_id, %viewer_id, "Story already viewed, nothing to write");
            return Ok(());
        }

        let mut viewers = current.story.viewed_by;
        viewers.insert(viewer_id.to_string());
        self.timed(self.stories.replace_viewers(story_id, &viewers, current.version))
            .await?;

        tracing::info!(%story_id, %viewer_id, version = current.version + 1, "Story marked viewed");
        Ok(())
    }

    async fn timed<T, F>(&self, call: F) -> Result<T, StoryError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(StoryError::from),
            Err(_) => {
                tracing::error!(timeout = ?self.store_timeout, "Story store call timed out");
                Err(StorageError::Timeout(self.store_timeout).into())
            }
        }
    }
}

/// Picks each author's newest story. Ties on `created_at` go to the greater id.
pub fn group_by_author_latest(stories: &[Story]) -> BTreeMap<String, Story> {
    let mut latest: BTreeMap<String, Story> = BTreeMap::new();
    for story in stories {
        let newer = match latest.get(&story.author_id) {
            Some(current) => newest_first(story, current) == Ordering::Less,
            None => true,
        };
        if newer {
            latest.insert(story.author_id.clone(), story.clone());
        }
    }
    latest
}

/// True if any of `author_id`'s stories has not been seen by `viewer_id`.
/// Stories by other authors are ignored.
pub fn has_unseen_story(author_id: &str, stories_for_author: &[Story], viewer_id: &str) -> bool {
    stories_for_author
        .iter()
        .any(|story| story.author_id == author_id && !story.is_viewed_by(viewer_id))
}

// Less means `a` sorts before `b` in a newest-first listing.
fn newest_first(a: &Story, b: &Story) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

fn non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, StoryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoryError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn story_at(author: &str, hour: u32, id: u128) -> Story {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
        Story {
            id: Uuid::from_u128(id),
            author_id: author.to_string(),
            media_url: format!("media://{}/{}", author, id),
            created_at,
            expires_at: created_at + ChronoDuration::hours(24),
            viewed_by: Default::default(),
        }
    }

    #[test]
    fn group_picks_latest_per_author() {
        let stories = vec![
            story_at("A", 10, 1),
            story_at("A", 11, 2),
            story_at("A", 9, 3),
            story_at("B", 8, 4),
        ];

        let grouped = group_by_author_latest(&stories);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["A"].id, Uuid::from_u128(2));
        assert_eq!(grouped["B"].id, Uuid::from_u128(4));
    }

    #[test]
    fn group_breaks_ties_on_greater_id() {
        let stories = vec![story_at("A", 10, 7), story_at("A", 10, 9), story_at("A", 10, 8)];

        let grouped = group_by_author_latest(&stories);
        assert_eq!(grouped["A"].id, Uuid::from_u128(9));

        let reversed: Vec<Story> = stories.into_iter().rev().collect();
        assert_eq!(group_by_author_latest(&reversed)["A"].id, Uuid::from_u128(9));
    }

    #[test]
    fn group_of_nothing_is_empty() {
        assert!(group_by_author_latest(&[]).is_empty());
    }

    #[test]
    fn unseen_until_viewer_recorded() {
        let mut story = story_at("A", 10, 1);
        assert!(has_unseen_story("A", std::slice::from_ref(&story), "viewer1"));

        story.viewed_by.insert("viewer1".to_string());
        assert!(!has_unseen_story("A", std::slice::from_ref(&story), "viewer1"));
        assert!(has_unseen_story("A", std::slice::from_ref(&story), "viewer2"));
    }

    #[test]
    fn unseen_ignores_other_authors() {
        let story = story_at("B", 10, 1);
        assert!(!has_unseen_story("A", &[story], "viewer1"));
        assert!(!has_unseen_story("A", &[], "viewer1"));
    }

    #[test]
    fn newest_first_orders_by_time_then_id() {
        let mut stories = vec![story_at("A", 9, 1), story_at("B", 11, 2), story_at("C", 11, 3)];
        stories.sort_by(newest_first);
        let ids: Vec<u128> = stories.iter().map(|s| s.id.as_u128()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn blank_input_is_rejected() {
        assert!(matches!(non_empty("author_id", "   "), Err(StoryError::Validation(_))));
        assert_eq!(non_empty("author_id", " u1 ").unwrap(), "u1");
    }
}
