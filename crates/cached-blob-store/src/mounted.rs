//! Remote namespace mounted into the local filesystem
//!
//! Serves a store whose namespace is reachable through a mount point (an
//! HDFS NFS gateway or FUSE mount). The path of a blob URI maps onto the same
//! relative path below the mount root.

use crate::id::BlobId;
use crate::remote::{BlobReader, BlobWriter, RemoteHandle, RemoteStore};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

/// [`RemoteStore`] backed by a mounted directory
pub struct MountedStore {
    root: PathBuf,
}

impl MountedStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RemoteStore for MountedStore {
    async fn resolve_handle(&self, endpoint: &Url) -> io::Result<Arc<dyn RemoteHandle>> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("mount root {} is not a directory", self.root.display()),
            ));
        }

        info!(endpoint = %endpoint, root = ?self.root, "Resolved mounted namespace");
        Ok(Arc::new(MountedHandle {
            endpoint: endpoint.clone(),
            root: self.root.clone(),
        }))
    }
}

struct MountedHandle {
    endpoint: Url,
    root: PathBuf,
}

impl MountedHandle {
    /// Map an identifier onto a file below the mount root
    fn locate(&self, id: &BlobId) -> io::Result<PathBuf> {
        let url = id.as_url();
        if url.host_str() != self.endpoint.host_str() || url.port() != self.endpoint.port() {
            return Err(invalid(format!(
                "{} does not belong to namespace {}",
                id, self.endpoint
            )));
        }

        let mut path = self.root.clone();
        for segment in id.path().split('/').filter(|s| !s.is_empty()) {
            let segment = urlencoding::decode(segment)
                .map_err(|_| invalid(format!("{} is not valid UTF-8", id)))?;
            let mut components = Path::new(segment.as_ref()).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => path.push(segment.as_ref()),
                _ => return Err(invalid(format!("{} has an illegal path segment", id))),
            }
        }

        if path == self.root {
            return Err(invalid(format!("{} does not name a blob", id)));
        }
        Ok(path)
    }

    /// Inverse of `locate` for files found while listing
    fn id_for(&self, path: &Path) -> io::Result<BlobId> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| invalid(format!("{} is outside the mount", path.display())))?;

        let mut segments = Vec::new();
        for component in relative.components() {
            let segment = component.as_os_str().to_str().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is not valid UTF-8", path.display()),
                )
            })?;
            // set_path escapes everything else a path segment may not carry
            segments.push(segment.replace('%', "%25"));
        }

        let mut url = self.endpoint.clone();
        url.set_path(&format!("/{}", segments.join("/")));
        url.set_query(None);
        url.set_fragment(None);
        Ok(BlobId::from(url))
    }

    async fn file_metadata(&self, id: &BlobId) -> io::Result<std::fs::Metadata> {
        let path = self.locate(id)?;
        let meta = fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a file", path.display()),
            ));
        }
        Ok(meta)
    }
}

#[async_trait]
impl RemoteHandle for MountedHandle {
    async fn open(&self, id: &BlobId) -> io::Result<BlobReader> {
        self.file_metadata(id).await?;
        let file = fs::File::open(self.locate(id)?).await?;
        Ok(Box::pin(file))
    }

    async fn exists(&self, id: &BlobId) -> io::Result<bool> {
        match self.file_metadata(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size(&self, id: &BlobId) -> io::Result<u64> {
        Ok(self.file_metadata(id).await?.len())
    }

    async fn create(&self, id: &BlobId, overwrite: bool) -> io::Result<BlobWriter> {
        let path = self.locate(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let file = options.open(&path).await?;
        debug!(id = %id, path = ?path, "Created remote blob");
        Ok(Box::pin(file))
    }

    async fn delete(&self, id: &BlobId) -> io::Result<()> {
        match fs::remove_file(self.locate(id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> io::Result<Vec<BlobId>> {
        let mut ids = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let id = self.id_for(&entry.path())?;
                    if prefix.map_or(true, |p| id.as_str().starts_with(p)) {
                        ids.push(id);
                    }
                }
            }
        }

        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}
