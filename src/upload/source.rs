//! Restart-capable byte sources for uploads
//!
//! Uploads never hold on to a half-consumed stream. Each request body is
//! produced on demand from a [`BlobSource`] and a [`ByteRange`], so the
//! transport can rebuild it from the range's first byte whenever a request
//! has to be resent.

use crate::error::{RegistryError, Result};
use crate::registry::transport::RequestBody;
use crate::upload::range::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Size of each read when streaming a file range into a request
const FILE_READ_BUFFER: usize = 64 * 1024;

#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Total number of bytes in the blob
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly the bytes of `range` into memory
    async fn read_range(&self, range: ByteRange) -> Result<Bytes>;

    /// Fresh request body covering `range`
    async fn open_range(&self, range: ByteRange) -> Result<reqwest::Body> {
        Ok(reqwest::Body::from(self.read_range(range).await?))
    }
}

/// Build a request body whose factory re-reads `range` from `source` on every call
pub fn range_body(source: Arc<dyn BlobSource>, range: ByteRange) -> RequestBody {
    RequestBody::new(range.len(), move || {
        let source = Arc::clone(&source);
        Box::pin(async move { source.open_range(range).await })
    })
}

fn check_bounds(range: ByteRange, len: u64) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(RegistryError::Validation(format!(
            "Range {}..{} is outside a blob of {} bytes",
            range.start, range.end, len
        )));
    }
    Ok(())
}

/// Blob held entirely in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl BlobSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        check_bounds(range, self.len())?;
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

/// Blob read from a file on disk; the file is reopened for every read
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(RegistryError::Validation(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn seek_to(&self, range: ByteRange) -> Result<File> {
        check_bounds(range, self.len)?;
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        Ok(file)
    }
}

#[async_trait]
impl BlobSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        let mut file = self.seek_to(range).await?;
        let mut buffer = vec![0u8; range.len() as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    async fn open_range(&self, range: ByteRange) -> Result<reqwest::Body> {
        let reader = self.seek_to(range).await?.take(range.len());
        let stream = futures::stream::try_unfold(reader, |mut reader| async move {
            let mut buffer = vec![0u8; FILE_READ_BUFFER];
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buffer.truncate(read);
            Ok(Some((Bytes::from(buffer), reader)))
        });
        Ok(reqwest::Body::wrap_stream(stream))
    }
}
