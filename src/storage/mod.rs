//! Media storage. The social core only ever sees the retrieval path a store
//! hands back; bytes, file names and type checks stay behind [`BlobStore`].

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{AppError, AppResult};

/// URL prefix under which stored media is served.
pub const PUBLIC_PREFIX: &str = "/uploads/";

/// Accepted image types and the extension each is stored under.
pub const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` and return the path clients use to fetch them.
    async fn store(&self, bytes: Bytes, content_type: &str) -> AppResult<String>;

    /// Read back a stored object, `None` when it does not exist.
    async fn fetch(&self, retrieval_path: &str) -> AppResult<Option<Bytes>>;

    /// Best-effort removal of a previously stored object.
    async fn remove(&self, retrieval_path: &str) -> AppResult<()>;
}

/// Store an upload and hand its retrieval path to `commit`, which records it
/// somewhere. If `commit` fails the object is removed again, so a failed
/// write never leaves an unreferenced file behind.
pub async fn store_then<T>(
    store: &dyn BlobStore,
    bytes: Bytes,
    content_type: &str,
    commit: impl FnOnce(&str) -> AppResult<T>,
) -> AppResult<T> {
    let retrieval_path = store.store(bytes, content_type).await?;
    match commit(&retrieval_path) {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Err(cleanup) = store.remove(&retrieval_path).await {
                tracing::warn!(
                    "Failed to remove orphaned upload {}: {}",
                    retrieval_path,
                    cleanup
                );
            }
            Err(e)
        }
    }
}

/// Guess the image type from magic bytes.
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Check size and type policy. The declared type must be allowed and must
/// agree with what the bytes actually are.
pub fn validate_upload(
    bytes: &[u8],
    content_type: &str,
    max_bytes: usize,
) -> AppResult<&'static str> {
    if bytes.is_empty() {
        return Err(AppError::InvalidArgument("Upload is empty".into()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "Upload exceeds {} bytes",
            max_bytes
        )));
    }

    let declared = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let extension = ALLOWED_TYPES
        .iter()
        .find(|(mime, _)| *mime == declared)
        .map(|(_, ext)| *ext)
        .ok_or_else(|| {
            AppError::InvalidArgument("Only JPEG, PNG, GIF and WebP images are accepted".into())
        })?;

    if sniff_image_type(bytes) != Some(declared.as_str()) {
        return Err(AppError::InvalidArgument(
            "File contents do not match the declared image type".into(),
        ));
    }
    Ok(extension)
}

/// Stores uploads as flat files under a directory.
pub struct FsBlobStore {
    root: PathBuf,
    max_bytes: usize,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    /// Map a retrieval path (or the tail after [`PUBLIC_PREFIX`]) back to a
    /// file under the root. Anything that could escape the root is refused.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let name = path.strip_prefix(PUBLIC_PREFIX).unwrap_or(path);
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        safe.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, bytes: Bytes, content_type: &str) -> AppResult<String> {
        let extension = validate_upload(&bytes, content_type, self.max_bytes)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let name = format!("{}.{}", uuid::Uuid::now_v7().simple(), extension);
        tokio::fs::write(self.root.join(&name), &bytes).await?;

        tracing::debug!(name = %name, size = bytes.len(), "Stored upload");
        Ok(format!("{}{}", PUBLIC_PREFIX, name))
    }

    async fn fetch(&self, retrieval_path: &str) -> AppResult<Option<Bytes>> {
        let Some(file) = self.resolve(retrieval_path) else {
            return Ok(None);
        };
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, retrieval_path: &str) -> AppResult<()> {
        let Some(file) = self.resolve(retrieval_path) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
