// kubebackup/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use tracing::{info, warn};

use crate::config::S3Settings;
use crate::secrets::AwsCredentials;

/// Streams shorter than one part go up with a single PutObject.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Builds a client with static credentials taken from the resolved secrets.
pub async fn build_client(settings: &S3Settings, credentials: &AwsCredentials) -> s3::Client {
    let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,     // session_token
            None,     // expiry
            "Static", // provider_name
        ));
    if let Some(endpoint) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    // S3-compatible stores behind a custom endpoint rarely support virtual-hosted buckets.
    let s3_config = s3::config::Builder::from(&sdk_config)
        .force_path_style(settings.endpoint_url.is_some())
        .build();
    s3::Client::from_conf(s3_config)
}

/// Cuts a byte stream into upload parts. A part is only cut once more than
/// `part_size` bytes are pending, so a stream of at most one part is sent
/// with a single PutObject.
#[derive(Debug)]
struct PartBuffer {
    part_size: usize,
    pending: Vec<u8>,
}

impl PartBuffer {
    fn new(part_size: usize) -> Self {
        Self {
            part_size,
            pending: Vec::with_capacity(part_size),
        }
    }

    /// Adds a chunk and returns the parts that are now complete.
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut full = Vec::new();
        while self.pending.len() > self.part_size {
            let rest = self.pending.split_off(self.part_size);
            full.push(std::mem::replace(&mut self.pending, rest));
        }
        full
    }

    fn take_rest(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

/// How the buffered tail of a stream is sent once the stream ends.
#[derive(Debug, PartialEq, Eq)]
enum Completion {
    Single(Vec<u8>),
    Multipart { last_part: Option<Vec<u8>> },
}

fn completion(multipart_started: bool, rest: Vec<u8>) -> Completion {
    match (multipart_started, rest.is_empty()) {
        (false, _) => Completion::Single(rest),
        (true, true) => Completion::Multipart { last_part: None },
        (true, false) => Completion::Multipart { last_part: Some(rest) },
    }
}

/// An object being written part by part.
pub struct S3Upload {
    client: s3::Client,
    bucket: String,
    key: String,
    buffer: PartBuffer,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    bytes_sent: u64,
}

impl S3Upload {
    pub fn new(client: s3::Client, bucket: &str, key: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: PartBuffer::new(PART_SIZE),
            upload_id: None,
            parts: Vec::new(),
            bytes_sent: 0,
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        for part in self.buffer.push(chunk) {
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn upload_id(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .with_context(|| format!("Failed to start multipart upload to s3://{}/{}", self.bucket, self.key))?;
        let id = created
            .upload_id()
            .context("S3 did not return an upload id")?
            .to_string();
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, part: Vec<u8>) -> Result<()> {
        let upload_id = self.upload_id().await?;
        let part_number = i32::try_from(self.parts.len() + 1).context("Too many upload parts")?;
        let len = part.len() as u64;

        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(ByteStream::from(part))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload part {} of s3://{}/{}",
                    part_number, self.bucket, self.key
                )
            })?;

        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        self.bytes_sent += len;
        Ok(())
    }

    /// Sends whatever is buffered and completes the object.
    pub async fn finish(mut self) -> Result<u64> {
        let rest = self.buffer.take_rest();
        let last_part = match completion(self.upload_id.is_some(), rest) {
            Completion::Single(body) => {
                let len = body.len() as u64;
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, self.key))?;
                return Ok(len);
            }
            Completion::Multipart { last_part } => last_part,
        };

        if let Some(last) = last_part {
            self.upload_part(last).await?;
        }
        let upload_id = self.upload_id().await?;
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
            .with_context(|| format!("Failed to complete multipart upload to s3://{}/{}", self.bucket, self.key))?;
        Ok(self.bytes_sent)
    }

    /// Drops an unfinished multipart upload so no parts linger in the bucket.
    pub async fn abort(self) {
        let Some(upload_id) = self.upload_id else {
            return;
        };
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .send()
            .await
        {
            warn!(
                "⚠️ Failed to abort multipart upload {} for s3://{}/{}: {}",
                upload_id, self.bucket, self.key, e
            );
        }
    }
}

/// Checks that the credentials work and the bucket is reachable.
pub async fn check_s3_connection(client: &s3::Client, bucket: &str) -> Result<()> {
    match client.list_buckets().send().await {
        Ok(_) => info!("✓ S3 connection successful (ListBuckets)."),
        // ListBuckets is often denied to backup users; HeadBucket on the target is enough.
        Err(e) => warn!("⚠️ S3 ListBuckets failed, trying HeadBucket on '{}': {}", bucket, e),
    }

    client
        .head_bucket()
        .bucket(bucket)
        .send()
        .await
        .with_context(|| format!("Could not access bucket '{}' with a HEAD request", bucket))?;
    info!("✓ Target bucket {} is accessible.", bucket);
    Ok(())
}
