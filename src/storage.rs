use crate::{
    domain::MediaStorage,
    errors::MediaError,
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    Client as S3Client,
    error::SdkError,
};
use tracing;
use uuid::Uuid;

/// Builds the object key for a story upload: `stories/{author_id}/{random}.{ext}`.
///
/// The extension comes from the uploaded filename, lowercased; anything without
/// a usable extension is stored as `bin`.
pub fn story_media_key(author_id: &str, filename: Option<&str>) -> String {
    let extension = filename
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext))
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    format!("stories/{}/{}.{}", author_id, Uuid::new_v4(), extension)
}

#[derive(Debug, Clone)]
pub struct S3MediaStorage {
    client: S3Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3MediaStorage {
    pub fn new(client: S3Client, bucket_name: String, public_base_url: String) -> Self {
        let public_base_url = public_base_url.trim_end_matches('/').to_string();
        tracing::info!(bucket = %bucket_name, %public_base_url, "Initializing S3MediaStorage");
        Self { client, bucket_name, public_base_url }
    }
}

#[async_trait]
impl MediaStorage for S3MediaStorage {
    /// Uploads data to S3 using PutObject and returns the public URL of the object.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<String, MediaError> {
        let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, %content_type, "S3: Uploading media");

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context(format!("S3: Failed to upload object with key '{}'", key))
            .map_err(|e| MediaError::UploadFailed(format!("{:#}", e)))?;

        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, "S3: Upload successful");
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    /// Downloads object bytes and content type from S3 using GetObject.
    async fn download(&self, key: &str) -> Result<(Vec<u8>, Option<String>), MediaError> {
        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, "S3: Downloading media");

        let output = self.client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|sdk_err| {
                if let SdkError::ServiceError(service_err) = &sdk_err {
                    if service_err.err().is_no_such_key() {
                        tracing::warn!(s3_key = %key, bucket = %self.bucket_name, "S3: NoSuchKey downloading media");
                        return MediaError::NotFound(key.to_string());
                    }
                }
                tracing::error!(s3_key = %key, bucket = %self.bucket_name, error = %sdk_err, "S3: Error downloading media");
                MediaError::BackendError(anyhow::Error::new(sdk_err).context(format!("S3: Failed to download object with key '{}'", key)))
            })?;

        let content_type = output.content_type().map(|s| s.to_string());
        let data = output
            .body
            .collect()
            .await
            .context(format!("S3: Failed to read body of object '{}'", key))
            .map_err(MediaError::BackendError)?;

        Ok((data.into_bytes().to_vec(), content_type))
    }

    /// Deletes an object from S3 using DeleteObject.
    async fn delete(&self, key: &str) -> Result<(), MediaError> {
        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, "S3: Deleting media");

        // DeleteObject succeeds for keys that do not exist.
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|sdk_err| {
                tracing::error!(s3_key = %key, bucket = %self.bucket_name, error = %sdk_err, "S3: Error deleting media");
                MediaError::BackendError(anyhow::Error::new(sdk_err).context(format!("S3: Failed to delete object with key '{}'", key)))
            })?;

        tracing::debug!(s3_key = %key, bucket = %self.bucket_name, "S3: Delete request successful");
        Ok(())
    }
}
