use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use ulid::Ulid;

/// Storage for uploaded photos and ID documents. The engine keeps only the
/// returned reference and never looks at the bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8]) -> io::Result<String>;
}

/// Stores each blob as `<root>/<ulid>`; the reference is `uploads/<ulid>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: &[u8]) -> io::Result<String> {
        if bytes.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty upload"));
        }
        tokio::fs::create_dir_all(&self.root).await?;
        let name = Ulid::new().to_string();
        tokio::fs::write(self.root.join(&name), bytes).await?;
        Ok(format!("uploads/{name}"))
    }
}
