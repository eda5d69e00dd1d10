use crate::artifacts::{validate_key, ArtifactError, ArtifactStore};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONTENT_TYPE_SUFFIX: &str = ".content-type";

/// Filesystem-backed artifact store. Writes go to a temp file and are renamed into place,
/// so readers never observe a partial artifact.
#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalArtifactStore {
    pub fn open(
        root: impl AsRef<Path>,
        public_base: Option<String>,
    ) -> Result<Self, ArtifactError> {
        let root = root.as_ref();
        let io_err = |source| ArtifactError::Io {
            key: root.display().to_string(),
            source,
        };
        std::fs::create_dir_all(root).map_err(io_err)?;
        let root = root.canonicalize().map_err(io_err)?;
        let public_base = public_base
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty());
        Ok(Self { root, public_base })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    pub async fn content_type(&self, key: &str) -> Result<Option<String>, ArtifactError> {
        let path = self.path_for(key)?;
        let sidecar = sidecar_path(&path);
        match tokio::fs::read_to_string(&sidecar).await {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtifactError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(CONTENT_TYPE_SUFFIX);
    PathBuf::from(s)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = {
        let mut s = path.as_os_str().to_owned();
        s.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        PathBuf::from(s)
    };
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn map_read_err(key: &str, source: std::io::Error) -> ArtifactError {
    if source.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::NotFound(key.to_string())
    } else {
        ArtifactError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), ArtifactError> {
        let path = self.path_for(key)?;
        let io_err = |source| ArtifactError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        write_atomic(&path, bytes).await.map_err(io_err)?;
        write_atomic(&sidecar_path(&path), content_type.as_bytes())
            .await
            .map_err(io_err)?;
        debug!("artifact stored: {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), ArtifactError> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| map_read_err(key, e))?;
        tokio::fs::write(local_path, bytes)
            .await
            .map_err(|source| ArtifactError::Io {
                key: key.to_string(),
                source,
            })
    }

    async fn get_content(&self, key: &str) -> Result<String, ArtifactError> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| map_read_err(key, e))?;
        String::from_utf8(bytes).map_err(|_| ArtifactError::NotText {
            key: key.to_string(),
        })
    }

    fn url_for(&self, key: &str, ttl: Duration) -> Result<String, ArtifactError> {
        let path = self.path_for(key)?;
        match &self.public_base {
            Some(base) => {
                let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
                Ok(format!("{base}/{key}?expires={expires}"))
            }
            None => Ok(format!("file://{}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_fetch_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path(), None).unwrap();
        let body = b"time,close\n2024-01-01,\"1,5\"\n";

        store.upload("r1/full_data.csv", body, "text/csv").await.unwrap();
        let out = dir.path().join("copy.csv");
        store.download("r1/full_data.csv", &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), body);
        assert_eq!(
            store.get_content("r1/full_data.csv").await.unwrap().as_bytes(),
            body
        );
        assert_eq!(
            store.content_type("r1/full_data.csv").await.unwrap().as_deref(),
            Some("text/csv")
        );
    }

    #[tokio::test]
    async fn upload_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path(), None).unwrap();
        store.upload("r1/script.py", b"v1", "text/x-python").await.unwrap();
        store.upload("r1/script.py", b"v2", "text/x-python").await.unwrap();
        assert_eq!(store.get_content("r1/script.py").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn missing_and_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path(), None).unwrap();
        assert!(matches!(
            store.get_content("r1/report.md").await,
            Err(ArtifactError::NotFound(_))
        ));
        assert!(matches!(
            store.upload("../escape", b"x", "text/plain").await,
            Err(ArtifactError::InvalidKey(_))
        ));
    }

    #[test]
    fn urls_use_public_base_with_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            LocalArtifactStore::open(dir.path(), Some("https://cdn.example.com/a/".into())).unwrap();
        let url = store
            .url_for("r1/report.md", Duration::from_secs(3600))
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/a/r1/report.md?expires="));

        let plain = LocalArtifactStore::open(dir.path(), None).unwrap();
        assert!(plain
            .url_for("r1/report.md", Duration::from_secs(3600))
            .unwrap()
            .starts_with("file://"));
    }
}
