// kubebackup/src/backup/sink.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::s3_upload::S3Upload;

/// Where an artifact ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local(path) => write!(f, "{}", path.display()),
            Destination::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
        }
    }
}

/// Optional compression applied to the stream before it reaches the sink.
pub enum Encoding {
    Identity,
    Gzip(GzEncoder<Vec<u8>>),
}

impl Encoding {
    pub fn gzip() -> Self {
        Encoding::Gzip(GzEncoder::new(Vec::new(), Compression::default()))
    }

    /// Returns the encoded bytes ready to be written for this chunk.
    pub fn encode(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        match self {
            Encoding::Identity => Ok(chunk.to_vec()),
            Encoding::Gzip(encoder) => {
                encoder.write_all(chunk).context("Failed to compress backup stream")?;
                Ok(std::mem::take(encoder.get_mut()))
            }
        }
    }

    /// Flushes whatever the encoder still holds, including the gzip trailer.
    pub fn finish(self) -> Result<Vec<u8>> {
        match self {
            Encoding::Identity => Ok(Vec::new()),
            Encoding::Gzip(encoder) => encoder.finish().context("Failed to finish gzip stream"),
        }
    }
}

pub enum Sink {
    Local { file: File, path: PathBuf, written: u64 },
    S3(S3Upload),
}

impl Sink {
    /// Creates the parent directories and the destination file.
    pub async fn create_local(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create backup directory: {}", parent.display()))?;
        }
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create backup file: {}", path.display()))?;
        Ok(Sink::Local { file, path, written: 0 })
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self {
            Sink::Local { file, path, written } => {
                file.write_all(bytes)
                    .await
                    .with_context(|| format!("Failed to write backup file: {}", path.display()))?;
                *written += bytes.len() as u64;
                Ok(())
            }
            Sink::S3(upload) => upload.write(bytes).await,
        }
    }

    /// Makes the artifact durable and returns the number of bytes stored.
    pub async fn finish(self) -> Result<u64> {
        match self {
            Sink::Local { mut file, path, written } => {
                file.flush()
                    .await
                    .with_context(|| format!("Failed to flush backup file: {}", path.display()))?;
                file.sync_all()
                    .await
                    .with_context(|| format!("Failed to sync backup file: {}", path.display()))?;
                Ok(written)
            }
            Sink::S3(upload) => upload.finish().await,
        }
    }

    /// Gives up on the transfer. A partial local file is left in place.
    pub async fn abort(self) {
        match self {
            Sink::Local { .. } => {}
            Sink::S3(upload) => upload.abort().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_encoding_round_trips_across_chunks() -> anyhow::Result<()> {
        let mut encoding = Encoding::gzip();
        let mut compressed = Vec::new();
        for chunk in ["CREATE TABLE t (id INT);\n", "INSERT INTO t VALUES (1);\n", "INSERT INTO t VALUES (2);\n"] {
            compressed.extend(encoding.encode(chunk.as_bytes())?);
        }
        compressed.extend(encoding.finish()?);

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut decoded)?;
        assert_eq!(
            decoded,
            "CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_local_sink_creates_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop").join("20261019-1430").join("web-0.tar.gz");

        let mut sink = Sink::create_local(path.clone()).await?;
        sink.write(b"archive").await?;
        sink.write(b"").await?;
        let written = sink.finish().await?;

        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&path)?, b"archive");
        Ok(())
    }

    #[test]
    fn test_destination_display() {
        let s3 = Destination::S3 {
            bucket: "backups".to_string(),
            key: "shop/20261019-1430/db-0.gz".to_string(),
        };
        assert_eq!(s3.to_string(), "s3://backups/shop/20261019-1430/db-0.gz");
    }
}
