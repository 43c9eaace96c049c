use crate::{
    domain::StoryRepository,
    errors::RepoError,
    models::{Story, VersionedStory},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::SdkError,
    types::AttributeValue,
    Client as DynamoDbClient,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{self, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DynamoDbStoryRepository {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDbStoryRepository {
    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        info!(%table_name, "Initializing DynamoDbStoryRepository");
        Self { client, table_name }
    }

    /// Scans the table with a filter expression, following pagination.
    async fn scan_stories(
        &self,
        filter_expression: &str,
        values: HashMap<String, AttributeValue>,
    ) -> Result<Vec<Story>, RepoError> {
        let mut stories: Vec<Story> = Vec::new();
        let mut last_evaluated_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request_builder = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression(filter_expression)
                .set_expression_attribute_values(Some(values.clone()));

            if let Some(lek) = last_evaluated_key {
                request_builder = request_builder.set_exclusive_start_key(Some(lek));
            }

            let resp = request_builder
                .send()
                .await
                .context(format!("DynamoDB: Failed to scan table '{}'", self.table_name))
                .map_err(RepoError::BackendError)?;

            for item in resp.items.unwrap_or_default() {
                let versioned = item_to_story(&item).ok_or_else(|| {
                    let item_id = item.get("story_id").and_then(|v| v.as_s().ok());
                    tracing::error!(item.id = ?item_id, table_name = %self.table_name, "DynamoDB: Failed to parse item from scan into Story");
                    RepoError::DataCorruption(format!(
                        "DynamoDB: Failed to parse item {:?} during scan of table '{}'",
                        item_id, self.table_name
                    ))
                })?;
                stories.push(versioned.story);
            }

            last_evaluated_key = resp.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
            tracing::debug!(table_name = %self.table_name, "DynamoDB Scan: Continuing with LastEvaluatedKey");
        }

        tracing::debug!(table_name = %self.table_name, count = stories.len(), "DynamoDB Scan: Complete");
        Ok(stories)
    }
}

#[async_trait]
impl StoryRepository for DynamoDbStoryRepository {
    async fn insert(&self, story: &Story) -> Result<(), RepoError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("story_id", AttributeValue::S(story.id.to_string()))
            .item("author_id", AttributeValue::S(story.author_id.clone()))
            .item("media_url", AttributeValue::S(story.media_url.clone()))
            .item("created_at", millis(story.created_at))
            .item("expires_at", millis(story.expires_at))
            .item("version", AttributeValue::N("0".to_string()))
            .condition_expression("attribute_not_exists(story_id)");
        // String sets cannot be empty, so the attribute is left out until the first view.
        if !story.viewed_by.is_empty() {
            request = request.item("viewed_by", AttributeValue::Ss(story.viewed_by.iter().cloned().collect()));
        }

        request
            .send()
            .await
            .context(format!("DynamoDB (table: {}): Failed to put story (id: {})", self.table_name, story.id))
            .map_err(RepoError::BackendError)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<VersionedStory>, RepoError> {
        let id_str = id.to_string();
        let resp = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("story_id", AttributeValue::S(id_str.clone()))
            .consistent_read(true)
            .send()
            .await
            .context(format!("DynamoDB (table: {}): Failed to get story (id: {})", self.table_name, id_str))
            .map_err(RepoError::BackendError)?;

        match resp.item {
            Some(item) => match item_to_story(&item) {
                Some(versioned) => Ok(Some(versioned)),
                None => {
                    tracing::error!(story_id = %id_str, table_name = %self.table_name, "DynamoDB: Retrieved item but failed to parse into Story");
                    Err(RepoError::DataCorruption(format!(
                        "Failed to parse story data retrieved from DynamoDB table '{}' for id {}",
                        self.table_name, id_str
                    )))
                }
            },
            None => Ok(None),
        }
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Story>, RepoError> {
        let values = HashMap::from([(":now".to_string(), millis(now))]);
        self.scan_stories("expires_at > :now", values).await
    }

    async fn list_active_by_author(&self, author_id: &str, now: DateTime<Utc>) -> Result<Vec<Story>, RepoError> {
        let values = HashMap::from([
            (":now".to_string(), millis(now)),
            (":author".to_string(), AttributeValue::S(author_id.to_string())),
        ]);
        self.scan_stories("author_id = :author AND expires_at > :now", values).await
    }

    async fn replace_viewers(&self, id: Uuid, viewers: &BTreeSet<String>, expected_version: u64) -> Result<(), RepoError> {
        let id_str = id.to_string();
        tracing::debug!(story_id = %id_str, expected_version, viewers = viewers.len(), "DynamoDB: Conditionally updating viewers");

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("story_id", AttributeValue::S(id_str.clone()))
            .update_expression("SET viewed_by = :viewers, #version = :next")
            .condition_expression("attribute_exists(story_id) AND #version = :expected")
            .expression_attribute_names("#version", "version")
            .expression_attribute_values(":viewers", AttributeValue::Ss(viewers.iter().cloned().collect()))
            .expression_attribute_values(":expected", AttributeValue::N(expected_version.to_string()))
            .expression_attribute_values(":next", AttributeValue::N((expected_version + 1).to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_conditional_check_failed_exception() => {
                tracing::debug!(story_id = %id_str, expected_version, "DynamoDB: Version check failed");
                Err(RepoError::Conflict(id))
            }
            Err(e) => Err(RepoError::BackendError(anyhow::Error::new(e).context(format!(
                "DynamoDB (table: {}): Failed to update viewers of story (id: {})",
                self.table_name, id_str
            )))),
        }
    }
}

fn millis(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(at.timestamp_millis().to_string())
}

fn item_millis(item: &HashMap<String, AttributeValue>, name: &str) -> Option<DateTime<Utc>> {
    let raw = item.get(name)?.as_n().ok()?;
    DateTime::from_timestamp_millis(raw.parse().ok()?)
}

// Helper function to convert DynamoDB item map to a versioned Story.
fn item_to_story(item: &HashMap<String, AttributeValue>) -> Option<VersionedStory> {
    let id = item
        .get("story_id")?
        .as_s()
        .ok()
        .and_then(|s| Uuid::parse_str(s).ok())?;
    let author_id = item.get("author_id")?.as_s().ok()?.to_string();
    let media_url = item.get("media_url")?.as_s().ok()?.to_string();
    let created_at = item_millis(item, "created_at")?;
    let expires_at = item_millis(item, "expires_at")?;
    let viewed_by = match item.get("viewed_by") {
        Some(value) => value.as_ss().ok()?.iter().cloned().collect(),
        None => BTreeSet::new(),
    };
    let version = item.get("version")?.as_n().ok()?.parse().ok()?;

    Some(VersionedStory {
        story: Story {
            id,
            author_id,
            media_url,
            created_at,
            expires_at,
            viewed_by,
        },
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_item() -> HashMap<String, AttributeValue> {
        HashMap::from([
            ("story_id".to_string(), AttributeValue::S("67e55044-10b1-426f-9247-bb680e5fe0c8".into())),
            ("author_id".to_string(), AttributeValue::S("u1".into())),
            ("media_url".to_string(), AttributeValue::S("https://media.example/stories/u1/a.png".into())),
            ("created_at".to_string(), AttributeValue::N("1714557600000".into())),
            ("expires_at".to_string(), AttributeValue::N("1714644000000".into())),
            ("version".to_string(), AttributeValue::N("3".into())),
        ])
    }

    #[test]
    fn parses_item_without_viewers() {
        let versioned = item_to_story(&sample_item()).expect("item should parse");

        assert_eq!(versioned.version, 3);
        assert_eq!(versioned.story.author_id, "u1");
        assert_eq!(versioned.story.created_at, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert_eq!(versioned.story.expires_at - versioned.story.created_at, crate::models::STORY_TTL);
        assert!(versioned.story.viewed_by.is_empty());
    }

    #[test]
    fn parses_viewer_set() {
        let mut item = sample_item();
        item.insert("viewed_by".to_string(), AttributeValue::Ss(vec!["b".into(), "a".into()]));

        let versioned = item_to_story(&item).expect("item should parse");
        let viewers: Vec<&str> = versioned.story.viewed_by.iter().map(String::as_str).collect();
        assert_eq!(viewers, vec!["a", "b"]);
    }

    #[test]
    fn rejects_item_missing_version_or_bad_id() {
        let mut item = sample_item();
        item.remove("version");
        assert!(item_to_story(&item).is_none());

        let mut item = sample_item();
        item.insert("story_id".to_string(), AttributeValue::S("not-a-uuid".into()));
        assert!(item_to_story(&item).is_none());
    }

    #[test]
    fn timestamps_are_stored_as_epoch_millis() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(millis(at), AttributeValue::N("1714557600000".into()));
    }
}
