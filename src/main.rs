use std::sync::Arc;
use story_service::{
    aws_clients::{create_dynamodb_client, create_s3_client, create_sdk_config},
    clock::SystemClock,
    config::{Backend, Config},
    domain::{MediaStorage, StoryRepository},
    errors::AppError,
    lifecycle::StoryLifecycleManager,
    memory::{InMemoryMediaStorage, InMemoryStoryRepository},
    models::Story,
    repositories::DynamoDbStoryRepository,
    routes::create_router,
    startup::init_resources,
    storage::S3MediaStorage,
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "story_service=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(backend = ?config.backend, bind_address = %config.bind_address, "Configuration loaded");

    let (stories, media): (Arc<dyn StoryRepository>, Arc<dyn MediaStorage>) = match config.backend {
        Backend::DynamoDb => {
            let sdk_config = create_sdk_config(&config).await;
            let db_client = create_dynamodb_client(&sdk_config);
            let s3_client = create_s3_client(&sdk_config);

            // NOTE: Creating resources here isn't ideal for production; prefer IaC.
            init_resources(
                &db_client,
                &s3_client,
                &config.stories_table_name,
                &config.media_bucket_name,
                &config.aws_region,
            )
            .await?;

            (
                Arc::new(DynamoDbStoryRepository::new(db_client, config.stories_table_name.clone())),
                Arc::new(S3MediaStorage::new(
                    s3_client,
                    config.media_bucket_name.clone(),
                    config.media_public_base_url.clone(),
                )),
            )
        }
        Backend::Memory => {
            tracing::warn!("Using in-memory story store; data is lost on restart");
            (
                Arc::new(InMemoryStoryRepository::new()),
                Arc::new(InMemoryMediaStorage::new(config.media_public_base_url.clone())),
            )
        }
    };

    let manager = StoryLifecycleManager::new(stories, Arc::new(SystemClock), config.store_timeout)
        .with_created_hook(Arc::new(|story: &Story| {
            tracing::info!(story_id = %story.id, author_id = %story.author_id, "Story published");
        }));

    let state = Arc::new(AppState { stories: manager, media });
    let app = create_router(state);

    tracing::info!("Server listening on http://{}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
