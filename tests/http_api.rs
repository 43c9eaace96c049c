use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{multipart, StatusCode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

use story_service::clock::SystemClock;
use story_service::domain::{MediaStorage, StoryRepository};
use story_service::errors::{MediaError, RepoError};
use story_service::lifecycle::StoryLifecycleManager;
use story_service::memory::{InMemoryMediaStorage, InMemoryStoryRepository};
use story_service::models::{Story, VersionedStory};
use story_service::routes::create_router;
use story_service::AppState;

async fn spawn_app() -> anyhow::Result<(String, tokio::task::JoinHandle<()>)> {
    spawn_app_with(
        Arc::new(InMemoryStoryRepository::new()),
        Arc::new(InMemoryMediaStorage::new("/media".to_string())),
    )
    .await
}

async fn spawn_app_with(
    stories: Arc<dyn StoryRepository>,
    media: Arc<dyn MediaStorage>,
) -> anyhow::Result<(String, tokio::task::JoinHandle<()>)> {
    let manager = StoryLifecycleManager::new(stories, Arc::new(SystemClock), Duration::from_secs(2));
    let state = Arc::new(AppState { stories: manager, media });
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });

    Ok((format!("http://{}", addr), server_handle))
}

/// Refuses every write, as a store that is down would.
struct UnavailableRepository;

#[async_trait]
impl StoryRepository for UnavailableRepository {
    async fn insert(&self, _story: &Story) -> Result<(), RepoError> {
        Err(RepoError::BackendError(anyhow::anyhow!("store unavailable")))
    }

    async fn get_by_id(&self, _id: Uuid) -> Result<Option<VersionedStory>, RepoError> {
        Ok(None)
    }

    async fn list_active(&self, _now: DateTime<Utc>) -> Result<Vec<Story>, RepoError> {
        Ok(Vec::new())
    }

    async fn list_active_by_author(&self, _author_id: &str, _now: DateTime<Utc>) -> Result<Vec<Story>, RepoError> {
        Ok(Vec::new())
    }

    async fn replace_viewers(&self, id: Uuid, _viewers: &BTreeSet<String>, _expected_version: u64) -> Result<(), RepoError> {
        Err(RepoError::Conflict(id))
    }
}

/// Remembers every uploaded key so tests can check what is left behind.
struct RecordingMediaStorage {
    inner: InMemoryMediaStorage,
    uploaded: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStorage for RecordingMediaStorage {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<String, MediaError> {
        self.uploaded.lock().unwrap().push(key.to_string());
        self.inner.upload(key, data, content_type).await
    }

    async fn download(&self, key: &str) -> Result<(Vec<u8>, Option<String>), MediaError> {
        self.inner.download(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), MediaError> {
        self.inner.delete(key).await
    }
}

async fn upload(client: &reqwest::Client, base: &str, user: &str, bytes: Vec<u8>) -> anyhow::Result<reqwest::Response> {
    let part = multipart::Part::bytes(bytes).file_name("sunset.PNG").mime_str("image/png")?;
    let form = multipart::Form::new().part("image", part);
    Ok(client
        .post(format!("{}/stories", base))
        .header("X-User-Id", user)
        .multipart(form)
        .send()
        .await?)
}

#[tokio::test]
async fn upload_view_and_list_stories() -> anyhow::Result<()> {
    let (base, server_handle) = spawn_app().await?;
    let client = reqwest::Client::new();

    // create story
    let resp = upload(&client, &base, "u1", vec![0x89, 0x50, 0x4e, 0x47]).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let story: Value = resp.json().await?;
    let id = story["id"].as_str().expect("id").to_string();
    let media_url = story["media_url"].as_str().expect("media_url").to_string();
    assert_eq!(story["author_id"], "u1");
    assert!(media_url.starts_with("/media/stories/u1/"));
    assert!(media_url.ends_with(".png"));
    assert_eq!(story["viewed_by"], serde_json::json!([]));

    // media is served back with its content type
    let resp = client.get(format!("{}{}", base, media_url)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "image/png");
    assert_eq!(resp.bytes().await?.to_vec(), vec![0x89, 0x50, 0x4e, 0x47]);

    // listed as active
    let resp = client.get(format!("{}/stories", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let listed: Vec<Value> = resp.json().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());

    // unseen for viewer1 until viewed
    let rings: Vec<Value> = client
        .get(format!("{}/stories/rings", base))
        .header("X-User-Id", "viewer1")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(rings.len(), 1);
    assert_eq!(rings[0]["has_unseen"], true);

    for _ in 0..2 {
        let resp = client
            .post(format!("{}/stories/{}/views", base, id))
            .header("X-User-Id", "viewer1")
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    let rings: Vec<Value> = client
        .get(format!("{}/stories/rings", base))
        .header("X-User-Id", "viewer1")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(rings[0]["has_unseen"], false);
    assert_eq!(rings[0]["story_count"], 1);

    let fetched: Value = client.get(format!("{}/stories/{}", base, id)).send().await?.json().await?;
    assert_eq!(fetched["viewed_by"], serde_json::json!(["viewer1"]));

    let by_author: Vec<Value> = client.get(format!("{}/users/u1/stories", base)).send().await?.json().await?;
    assert_eq!(by_author.len(), 1);
    let nobody: Vec<Value> = client.get(format!("{}/users/u2/stories", base)).send().await?.json().await?;
    assert!(nobody.is_empty());

    server_handle.abort();
    Ok(())
}

#[tokio::test]
async fn caller_identity_is_required() -> anyhow::Result<()> {
    let (base, server_handle) = spawn_app().await?;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/stories/rings", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await?;
    assert!(body["error"].is_string());

    let resp = client
        .post(format!("{}/stories/{}/views", base, uuid::Uuid::new_v4()))
        .header("X-User-Id", "   ")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    server_handle.abort();
    Ok(())
}

#[tokio::test]
async fn bad_requests_are_reported() -> anyhow::Result<()> {
    let (base, server_handle) = spawn_app().await?;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/stories/not-a-uuid", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.get(format!("{}/stories/{}", base, uuid::Uuid::new_v4())).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(format!("{}/stories/{}/views", base, uuid::Uuid::new_v4()))
        .header("X-User-Id", "viewer1")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = upload(&client, &base, "u1", Vec::new()).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let form = multipart::Form::new().text("caption", "no image here");
    let resp = client
        .post(format!("{}/stories", base))
        .header("X-User-Id", "u1")
        .multipart(form)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.get(format!("{}/media/stories/u1/missing.png", base)).send().await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server_handle.abort();
    Ok(())
}

#[tokio::test]
async fn failed_story_insert_removes_uploaded_media() -> anyhow::Result<()> {
    let media = Arc::new(RecordingMediaStorage {
        inner: InMemoryMediaStorage::new("/media".to_string()),
        uploaded: Mutex::new(Vec::new()),
    });
    let (base, server_handle) = spawn_app_with(Arc::new(UnavailableRepository), media.clone()).await?;
    let client = reqwest::Client::new();

    let resp = upload(&client, &base, "u1", vec![1, 2, 3]).await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let uploaded = media.uploaded.lock().unwrap().clone();
    assert_eq!(uploaded.len(), 1);
    assert!(matches!(media.download(&uploaded[0]).await, Err(MediaError::NotFound(_))));

    server_handle.abort();
    Ok(())
}
