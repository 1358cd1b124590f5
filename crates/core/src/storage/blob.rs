use crate::types::DataStore;
use anyhow::{Context, Result};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Folder-and-name keyed blob storage shared by actions and the monitor
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob under `folder/name`
    async fn put(&self, folder: &str, name: &str, data: Bytes) -> Result<()>;

    /// Retrieve a blob, `None` if it does not exist
    async fn get(&self, folder: &str, name: &str) -> Result<Option<Bytes>>;

    /// Check if a blob exists
    async fn head(&self, folder: &str, name: &str) -> Result<bool>;
}

/// Join a folder and name into a `/`-separated key
pub fn object_key(folder: &str, name: &str) -> String {
    let folder = folder.replace('\\', "/");
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Filesystem-based blob store (for local development and tests)
#[derive(Clone)]
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)
            .context("Failed to create blob store directory")?;
        Ok(Self { base_path })
    }

    fn blob_path(&self, folder: &str, name: &str) -> PathBuf {
        object_key(folder, name)
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.base_path.clone(), |path, part| path.join(part))
    }
}

#[async_trait::async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, folder: &str, name: &str, data: Bytes) -> Result<()> {
        let path = self.blob_path(folder, name);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create blob directory")?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .context("Failed to create blob file")?;
        file.write_all(&data)
            .await
            .context("Failed to write blob")?;
        file.sync_all().await.context("Failed to sync blob")?;

        Ok(())
    }

    async fn get(&self, folder: &str, name: &str) -> Result<Option<Bytes>> {
        let path = self.blob_path(folder, name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read blob"),
        }
    }

    async fn head(&self, folder: &str, name: &str) -> Result<bool> {
        tokio::fs::try_exists(self.blob_path(folder, name))
            .await
            .context("Failed to check blob existence")
    }
}

/// Object store-based blob store (S3, MinIO, etc.)
pub struct ObjectStoreBlobStore {
    store: Box<dyn object_store::ObjectStore>,
    prefix: String,
}

impl ObjectStoreBlobStore {
    pub fn new(store: Box<dyn object_store::ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// S3-compatible store for a data store entry of the workflow definition
    pub fn from_data_store(
        data_store: &DataStore,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&data_store.bucket)
            .with_region(data_store.region.as_deref().unwrap_or("us-east-1"))
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);

        if let Some(endpoint) = &data_store.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .with_context(|| format!("Failed to build S3 client for bucket {}", data_store.bucket))?;

        tracing::info!("Initialized S3 client for bucket: {}", data_store.bucket);
        Ok(Self::new(Box::new(store), ""))
    }

    fn blob_key(&self, folder: &str, name: &str) -> object_store::path::Path {
        let key = object_key(folder, name);
        if self.prefix.is_empty() {
            object_store::path::Path::from(key)
        } else {
            object_store::path::Path::from(format!("{}/{}", self.prefix, key))
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn put(&self, folder: &str, name: &str, data: Bytes) -> Result<()> {
        let key = self.blob_key(folder, name);

        self.store
            .put(&key, data.into())
            .await
            .context("Failed to put blob to object store")?;

        Ok(())
    }

    async fn get(&self, folder: &str, name: &str) -> Result<Option<Bytes>> {
        let key = self.blob_key(folder, name);

        match self.store.get(&key).await {
            Ok(result) => {
                let bytes = result.bytes().await.context("Failed to read blob bytes")?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e).context("Failed to get blob from object store"),
        }
    }

    async fn head(&self, folder: &str, name: &str) -> Result<bool> {
        let key = self.blob_key(folder, name);
        match self.store.head(&key).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e).context("Failed to check blob existence"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("logs/run-1", "a.txt"), "logs/run-1/a.txt");
        assert_eq!(object_key("logs\\run-1\\", "a.txt"), "logs/run-1/a.txt");
        assert_eq!(object_key("", "a.txt"), "a.txt");
    }

    #[tokio::test]
    async fn test_filesystem_blob_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(!store.head("run/function_completions", "a.done").await.unwrap());
        assert!(store.get("run", "a.txt").await.unwrap().is_none());

        let data = Bytes::from("Hello, world!");
        store.put("run", "a.txt", data.clone()).await.unwrap();
        store
            .put("run/function_completions", "a.done", Bytes::new())
            .await
            .unwrap();

        assert!(store.head("run", "a.txt").await.unwrap());
        assert!(store.head("run/function_completions", "a.done").await.unwrap());
        assert_eq!(store.get("run", "a.txt").await.unwrap().unwrap(), data);
    }

    #[tokio::test]
    async fn test_object_store_blob_store() {
        let store = ObjectStoreBlobStore::new(Box::new(InMemory::new()), "bucket-prefix");

        assert!(!store.head("run", "a.txt").await.unwrap());
        assert!(store.get("run", "a.txt").await.unwrap().is_none());

        store
            .put("run", "a.txt", Bytes::from("line one\nline two"))
            .await
            .unwrap();

        assert!(store.head("run", "a.txt").await.unwrap());
        assert_eq!(
            store.get("run", "a.txt").await.unwrap().unwrap(),
            Bytes::from("line one\nline two")
        );
    }
}
