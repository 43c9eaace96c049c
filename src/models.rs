use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// How long a story stays visible after it is created.
pub const STORY_TTL: Duration = Duration::hours(24);

/// One ephemeral media post.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Story {
    pub id: Uuid,
    pub author_id: String,
    pub media_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub viewed_by: BTreeSet<String>,
}

impl Story {
    /// Builds a fresh story created at `now`.
    ///
    /// `created_at` is truncated to milliseconds so the record survives a round
    /// trip through the store unchanged; `expires_at` is derived from it once and
    /// never recomputed.
    pub fn new(author_id: String, media_url: String, now: DateTime<Utc>) -> Self {
        let created_at = now.trunc_subsecs(3);
        Self {
            id: Uuid::new_v4(),
            author_id,
            media_url,
            created_at,
            expires_at: created_at + STORY_TTL,
            viewed_by: BTreeSet::new(),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_viewed_by(&self, viewer_id: &str) -> bool {
        self.viewed_by.contains(viewer_id)
    }
}

/// A story together with the optimistic-concurrency version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedStory {
    pub story: Story,
    pub version: u64,
}

/// One entry of the story bar: an author's newest active story plus viewer state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoryRing {
    pub author_id: String,
    pub latest: Story,
    pub story_count: usize,
    pub has_unseen: bool,
}
