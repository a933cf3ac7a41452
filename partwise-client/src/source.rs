//! Byte sources a large upload reads its parts from

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{ClientError, Result};

/// Random-access view of the file being uploaded
#[async_trait]
pub trait PartSource: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes in `[start, end)`
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes>;
}

fn check_range(start: u64, end: u64, len: u64) -> Result<()> {
    if start > end || end > len {
        return Err(ClientError::InvalidState(format!(
            "range {}..{} outside source of {} bytes",
            start, end, len
        )));
    }
    Ok(())
}

#[async_trait]
impl PartSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        check_range(start, end, PartSource::len(self))?;
        Ok(self.slice(start as usize..end as usize))
    }
}

/// File on disk; each read opens its own handle so concurrent parts do not
/// share a cursor
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
            return Err(ClientError::InvalidState(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(FileSource {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PartSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        check_range(start, end, self.len)?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// A file offered for upload: its name, media type and bytes
#[derive(Clone)]
pub struct UploadFile {
    pub filename: String,
    pub mime_type: String,
    pub source: Arc<dyn PartSource>,
}

impl UploadFile {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        source: Arc<dyn PartSource>,
    ) -> Self {
        UploadFile {
            filename: filename.into(),
            mime_type: mime_type.into(),
            source,
        }
    }

    /// In-memory file, mostly for tests
    pub fn from_bytes(filename: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self::new(filename, mime_type, Arc::new(data))
    }

    /// Open a file on disk, guessing its media type from the extension
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = FileSource::open(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = guess_mime_type(&filename).to_string();
        Ok(Self::new(filename, mime_type, Arc::new(source)))
    }

    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("len", &self.len())
            .finish()
    }
}

/// Media type for common large-file extensions
pub fn guess_mime_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "pdf" => "application/pdf",
        "iso" => "application/x-iso9660-image",
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}
