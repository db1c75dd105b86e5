//! Filesystem blob storage for uploaded images
//!
//! Every payload lands in one flat content directory under a generated name:
//! `<unix-millis>_<random>_<client-name>`. Uniqueness comes from the name
//! itself; files are opened create-new so an existing blob is never
//! overwritten.

use crate::config::MediaConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Upper bound (exclusive) of the random filename component
const RANDOM_SUFFIX_RANGE: u32 = 1_000_000;

/// Storage for opaque binary payloads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `payload` under a fresh name derived from `hint`, returning its locator
    async fn store(&self, payload: &[u8], hint: &str) -> Result<String>;

    /// Read back the payload behind a locator
    async fn read(&self, locator: &str) -> Result<Vec<u8>>;

    /// Check whether a locator still points at a file
    async fn exists(&self, locator: &str) -> Result<bool>;
}

/// Blob store backed by a local content directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a blob store rooted at the configured content directory.
    ///
    /// Relative roots are resolved against the working directory and `.`/`..`
    /// segments are folded away, so returned locators are always absolute and
    /// pass [`resolve`](Self::resolve).
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let root = if config.content_root.is_absolute() {
            config.content_root.clone()
        } else {
            std::env::current_dir()?.join(&config.content_root)
        };

        Ok(Self {
            root: normalize(&root),
        })
    }

    /// Create the content directory if needed
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(content_root = %self.root.display(), "Blob store initialized");
        Ok(())
    }

    /// Get the content directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path inside the content root
    fn resolve(&self, locator: &str) -> Result<PathBuf> {
        let path = PathBuf::from(locator);
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));

        if escapes || !path.starts_with(&self.root) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("locator is outside the content root: {}", locator),
            )
            .into());
        }

        Ok(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, payload), fields(size_bytes = payload.len()))]
    async fn store(&self, payload: &[u8], hint: &str) -> Result<String> {
        fs::create_dir_all(&self.root).await?;

        let path = self.root.join(unique_filename(hint));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let written = async {
            file.write_all(payload).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            // A truncated file is referenced by nothing, drop it
            if let Err(cleanup) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove partial blob");
            }
            metrics::counter!("blobs.write_failed").increment(1);
            return Err(e.into());
        }

        let locator = path.to_string_lossy().into_owned();

        metrics::counter!("blobs.written").increment(1);
        metrics::counter!("blobs.bytes_written").increment(payload.len() as u64);
        debug!(locator = %locator, size_bytes = payload.len(), "Wrote blob");

        Ok(locator)
    }

    async fn read(&self, locator: &str) -> Result<Vec<u8>> {
        let path = self.resolve(locator)?;
        let data = fs::read(&path).await?;

        debug!(locator = %locator, size_bytes = data.len(), "Read blob");

        Ok(data)
    }

    async fn exists(&self, locator: &str) -> Result<bool> {
        let path = self.resolve(locator)?;
        Ok(fs::try_exists(&path).await?)
    }
}

/// Lexically drop `.` segments and fold `..` into its parent
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Build `<unix-millis>_<random>_<sanitized hint>`
fn unique_filename(hint: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = rand::thread_rng().gen_range(0..RANDOM_SUFFIX_RANGE);
    format!("{}_{}_{}", millis, suffix, sanitize_filename(hint))
}

/// Reduce a client-supplied filename to a safe single path component
fn sanitize_filename(hint: &str) -> String {
    let base = hint.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "blob".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn create_test_store(temp: &TempDir) -> LocalBlobStore {
        let config = MediaConfig {
            content_root: temp.path().join("media"),
            ..Default::default()
        };
        LocalBlobStore::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);

        let locator = store.store(b"\x01\x02", "img.png").await.unwrap();

        assert!(Path::new(&locator).is_absolute());
        assert!(locator.ends_with("_img.png"));
        assert_eq!(store.read(&locator).await.unwrap(), vec![1u8, 2]);
    }

    #[tokio::test]
    async fn test_store_creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);
        assert!(!store.root().exists());

        store.store(b"data", "a.png").await.unwrap();

        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn test_filename_layout() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);

        let locator = store.store(b"data", "photo.jpg").await.unwrap();
        let name = Path::new(&locator).file_name().unwrap().to_str().unwrap();
        let parts: Vec<&str> = name.splitn(3, '_').collect();

        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().is_ok());
        assert!(parts[1].parse::<u32>().unwrap() < RANDOM_SUFFIX_RANGE);
        assert_eq!(parts[2], "photo.jpg");
        assert_eq!(Path::new(&locator).parent().unwrap(), store.root());
    }

    #[tokio::test]
    async fn test_concurrent_stores_never_collide() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);

        let writes = (0..64u8).map(|i| {
            let store = store.clone();
            async move { store.store(&[i], "same.png").await }
        });
        let locators: Vec<String> = futures::future::join_all(writes)
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();

        let unique: HashSet<_> = locators.iter().collect();
        assert_eq!(unique.len(), 64);
    }

    #[tokio::test]
    async fn test_read_rejects_paths_outside_root() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);
        store.initialize().await.unwrap();

        let outside = temp.path().join("secret.txt");
        std::fs::write(&outside, b"secret").unwrap();

        let err = store.read(outside.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));

        let sneaky = format!("{}/../secret.txt", store.root().display());
        assert!(store.read(&sneaky).await.is_err());
    }

    #[tokio::test]
    async fn test_exists() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);

        let locator = store.store(b"exists", "e.png").await.unwrap();
        assert!(store.exists(&locator).await.unwrap());

        std::fs::remove_file(&locator).unwrap();
        assert!(!store.exists(&locator).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing_blob_is_io_error() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(&temp);

        let missing = store.root().join("0_0_missing.png");
        let err = store.read(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_root_with_parent_segments_reads_own_locators() {
        let temp = TempDir::new().unwrap();
        let config = MediaConfig {
            content_root: temp.path().join("a").join("..").join(".").join("media"),
            ..Default::default()
        };
        let store = LocalBlobStore::new(&config).unwrap();
        assert_eq!(store.root(), temp.path().join("media"));

        let locator = store.store(b"data", "img.png").await.unwrap();

        assert!(!locator.contains(".."));
        assert_eq!(store.read(&locator).await.unwrap(), b"data".to_vec());
        assert!(store.exists(&locator).await.unwrap());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/srv/a/../media")), PathBuf::from("/srv/media"));
        assert_eq!(normalize(Path::new("/srv/./media/")), PathBuf::from("/srv/media"));
        assert_eq!(normalize(Path::new("/../media")), PathBuf::from("/media"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("img.png"), "img.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\pic.jpg"), "pic.jpg");
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "blob");
        assert_eq!(sanitize_filename(".."), "blob");
    }
}
