//! S3-compatible object storage provider.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use zipline_core::config::S3StorageConfig;
use zipline_core::error::{AppError, ErrorKind};
use zipline_core::result::AppResult;
use zipline_core::traits::storage::{AssemblySink, ByteStream, StorageProvider};

/// Smallest part size S3 accepts for any part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible storage provider.
#[derive(Debug, Clone)]
pub struct S3StorageProvider {
    client: Client,
    bucket: String,
    part_size: usize,
}

impl S3StorageProvider {
    /// Build a client from the `storage.s3` section.
    ///
    /// `part_size` is the multipart part size used by assemblies. It is
    /// raised to the S3 minimum when smaller.
    pub async fn new(config: &S3StorageConfig, part_size: u64) -> AppResult<Self> {
        info!(
            endpoint = %config.endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing S3 storage provider"
        );

        let region = RegionProviderChain::first_try(Region::new(config.region.clone()))
            .or_default_provider();
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        if !config.access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "zipline-config",
            ));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(&config.endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            part_size: usize::try_from(part_size)
                .unwrap_or(usize::MAX)
                .max(MIN_PART_SIZE),
        })
    }
}

fn s3_error(message: impl Into<String>, e: impl std::error::Error + Send + Sync + 'static) -> AppError {
    AppError::with_source(ErrorKind::Storage, message, e)
}

#[async_trait]
impl StorageProvider for S3StorageProvider {
    fn provider_type(&self) -> &str {
        "s3"
    }

    async fn health_check(&self) -> AppResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(bucket = %self.bucket, error = %e, "S3 health check failed");
                Ok(false)
            }
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> AppResult<()> {
        let len = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| s3_error(format!("Failed to put object: {key}"), e))?;
        debug!(key, bytes = len, "Put object");
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AppError::not_found(format!("File not found: {key}"))
                } else {
                    s3_error(format!("Failed to get object: {key}"), e)
                }
            })?;

        let stream = ReaderStream::new(output.body.into_async_read());
        Ok(Box::pin(stream.map(|r| r.map(Bytes::from))))
    }

    async fn range(&self, key: &str, start: u64, end: u64) -> AppResult<Bytes> {
        if end <= start {
            return Ok(Bytes::new());
        }
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end - 1))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    AppError::not_found(format!("File not found: {key}"))
                } else {
                    s3_error(format!("Failed to read range of {key}"), e)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| s3_error(format!("Failed to read body of {key}"), e))?;
        Ok(data.into_bytes())
    }

    async fn size(&self, key: &str) -> AppResult<u64> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    AppError::not_found(format!("File not found: {key}"))
                } else {
                    s3_error(format!("Failed to stat object: {key}"), e)
                }
            })?;
        Ok(output.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error(format!("Failed to delete object: {key}"), e))?;
        Ok(())
    }

    async fn begin_assembly(
        &self,
        key: &str,
        content_type: &str,
    ) -> AppResult<Box<dyn AssemblySink>> {
        Ok(Box::new(S3AssemblySink {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            buffer: PartBuffer::new(self.part_size),
            upload_id: None,
            parts: Vec::new(),
        }))
    }
}

/// Accumulates sequential writes and cuts them into fixed-size parts.
#[derive(Debug)]
pub struct PartBuffer {
    part_size: usize,
    pending: BytesMut,
    written: u64,
}

impl PartBuffer {
    /// Create a buffer producing parts of `part_size` bytes.
    pub fn new(part_size: usize) -> Self {
        Self {
            part_size,
            pending: BytesMut::new(),
            written: 0,
        }
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append data that must start at `offset`, returning every part that
    /// is now full.
    pub fn push(&mut self, offset: u64, data: &[u8]) -> AppResult<Vec<Bytes>> {
        if offset != self.written {
            return Err(AppError::validation(format!(
                "Non-sequential write: expected offset {}, got {offset}",
                self.written
            )));
        }
        self.pending.extend_from_slice(data);
        self.written += data.len() as u64;

        let mut full = Vec::new();
        while self.pending.len() >= self.part_size {
            full.push(self.pending.split_to(self.part_size).freeze());
        }
        Ok(full)
    }

    /// Take whatever is left as the final (possibly short) part.
    pub fn finish(&mut self) -> Bytes {
        self.pending.split().freeze()
    }
}

/// Streams an object to S3 as a multipart upload.
///
/// The multipart upload is created lazily when the first full part is
/// ready. Objects smaller than one part are sent with a single PutObject.
#[derive(Debug)]
pub struct S3AssemblySink {
    client: Client,
    bucket: String,
    key: String,
    content_type: String,
    buffer: PartBuffer,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl S3AssemblySink {
    async fn ensure_upload(&mut self) -> AppResult<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(&self.content_type)
            .send()
            .await
            .map_err(|e| s3_error(format!("Failed to start multipart upload for {}", self.key), e))?;
        let id = output
            .upload_id()
            .ok_or_else(|| AppError::storage("S3 returned no multipart upload id"))?
            .to_string();
        debug!(key = %self.key, upload_id = %id, "Started multipart upload");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, data: Bytes) -> AppResult<()> {
        let upload_id = self.ensure_upload().await?;
        let part_number = self.parts.len() as i32 + 1;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| s3_error(format!("Failed to upload part {part_number} of {}", self.key), e))?;

        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(output.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl AssemblySink for S3AssemblySink {
    async fn write_at(&mut self, offset: u64, data: Bytes) -> AppResult<()> {
        for part in self.buffer.push(offset, &data)? {
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> AppResult<u64> {
        let last = self.buffer.finish();
        let size = self.buffer.written();

        let Some(upload_id) = self.upload_id.clone() else {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .content_type(&self.content_type)
                .body(S3Body::from(last))
                .send()
                .await
                .map_err(|e| s3_error(format!("Failed to put object: {}", self.key), e))?;
            return Ok(size);
        };

        if let Err(e) = self.complete(&upload_id, last).await {
            // A failed completion leaves billed parts behind unless aborted.
            if let Err(abort) = self.abort_upload(&upload_id).await {
                warn!(key = %self.key, error = %abort, "Failed to abort multipart upload");
            }
            return Err(e);
        }

        debug!(key = %self.key, bytes = size, "Completed multipart upload");
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> AppResult<()> {
        match &self.upload_id {
            Some(upload_id) => self.abort_upload(upload_id).await,
            None => Ok(()),
        }
    }
}

impl S3AssemblySink {
    async fn complete(&mut self, upload_id: &str, last: Bytes) -> AppResult<()> {
        if !last.is_empty() {
            self.upload_part(last).await?;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                s3_error(format!("Failed to complete multipart upload for {}", self.key), e)
            })?;
        Ok(())
    }

    async fn abort_upload(&self, upload_id: &str) -> AppResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                s3_error(format!("Failed to abort multipart upload for {}", self.key), e)
            })?;
        debug!(key = %self.key, upload_id = %upload_id, "Aborted multipart upload");
        Ok(())
    }
}
