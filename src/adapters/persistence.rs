use crate::CoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Durable storage for work orders, runs and their iteration history.
/// Keyed generically by entity kind + id so the scheduler, orchestrator
/// and API layer can all persist through the same handle.
///
/// Values cross the trait boundary as `serde_json::Value` rather than a
/// generic type parameter so this trait stays object-safe (`Arc<dyn
/// Persistence>` is how every caller holds it); [`PersistenceExt`] below
/// restores the typed save/load call sites actually use.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_value(&self, kind: &str, id: Uuid, value: serde_json::Value) -> crate::Result<()>;
    async fn load_value(&self, kind: &str, id: Uuid) -> crate::Result<Option<serde_json::Value>>;
    async fn delete(&self, kind: &str, id: Uuid) -> crate::Result<()>;
    async fn list_ids(&self, kind: &str) -> crate::Result<Vec<Uuid>>;

    /// Scans every persisted file and reports which ones fail to
    /// deserialize, without attempting repair (§9).
    async fn scan_for_corruption(&self) -> crate::Result<crate::models::CorruptionScanResult>;
}

/// Typed convenience wrappers over [`Persistence`]'s value-based methods.
#[async_trait]
pub trait PersistenceExt: Persistence {
    async fn save<T: Serialize + Send + Sync>(&self, kind: &str, id: Uuid, value: &T) -> crate::Result<()> {
        self.save_value(kind, id, serde_json::to_value(value)?).await
    }

    async fn load<T: DeserializeOwned + Send + Sync>(&self, kind: &str, id: Uuid) -> crate::Result<Option<T>> {
        match self.load_value(kind, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<P: Persistence + ?Sized> PersistenceExt for P {}

/// One JSON file per entity under `<root>/<kind>/<id>.json`, written
/// atomically (write to a temp file, then rename) so a crash mid-write
/// never leaves a half-written file behind.
pub struct JsonFilePersistence {
    root: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_for(&self, kind: &str) -> PathBuf {
        self.root.join(kind)
    }

    fn path_for(&self, kind: &str, id: Uuid) -> PathBuf {
        self.dir_for(kind).join(format!("{id}.json"))
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn save_value(&self, kind: &str, id: Uuid, value: serde_json::Value) -> crate::Result<()> {
        let dir = self.dir_for(kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Persistence(format!("failed to create {dir:?}: {e}")))?;

        let path = self.path_for(kind, id);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&value)?;

        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| CoreError::Persistence(format!("failed to write {tmp_path:?}: {e}")))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| CoreError::Persistence(format!("failed to rename into {path:?}: {e}")))?;

        Ok(())
    }

    async fn load_value(&self, kind: &str, id: Uuid) -> crate::Result<Option<serde_json::Value>> {
        let path = self.path_for(kind, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Persistence(format!("failed to read {path:?}: {e}"))),
        }
    }

    async fn delete(&self, kind: &str, id: Uuid) -> crate::Result<()> {
        let path = self.path_for(kind, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Persistence(format!("failed to delete {path:?}: {e}"))),
        }
    }

    async fn list_ids(&self, kind: &str) -> crate::Result<Vec<Uuid>> {
        let dir = self.dir_for(kind);
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(CoreError::Persistence(format!("failed to list {dir:?}: {e}"))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Persistence(format!("failed to iterate {dir:?}: {e}")))?
        {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }

    async fn scan_for_corruption(&self) -> crate::Result<crate::models::CorruptionScanResult> {
        let start = std::time::Instant::now();
        let mut result = crate::models::CorruptionScanResult::default();

        let mut kinds = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(result);
            }
            Err(e) => return Err(CoreError::Persistence(format!("failed to scan root: {e}"))),
        };

        while let Some(kind_entry) = kinds
            .next_entry()
            .await
            .map_err(|e| CoreError::Persistence(format!("failed to iterate root: {e}")))?
        {
            if !kind_entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false)
            {
                continue;
            }

            let mut files = tokio::fs::read_dir(kind_entry.path())
                .await
                .map_err(|e| CoreError::Persistence(format!("failed to scan kind dir: {e}")))?;

            while let Some(file_entry) = files
                .next_entry()
                .await
                .map_err(|e| CoreError::Persistence(format!("failed to iterate kind dir: {e}")))?
            {
                let path = file_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                result.total_files += 1;
                match tokio::fs::read(&path).await {
                    Ok(bytes) if serde_json::from_slice::<serde_json::Value>(&bytes).is_ok() => {
                        result.valid_count += 1;
                    }
                    _ => {
                        result.invalid_count += 1;
                        result.corrupted_files.push(path.to_string_lossy().into_owned());
                    }
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::PersistenceExt as _;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let id = Uuid::new_v4();
        store.save("samples", id, &Sample { value: 42 }).await.unwrap();

        let loaded: Option<Sample> = store.load("samples", id).await.unwrap();
        assert_eq!(loaded, Some(Sample { value: 42 }));
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let loaded: Option<Sample> = store.load("samples", Uuid::new_v4()).await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn scan_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let id = Uuid::new_v4();
        store.save("samples", id, &Sample { value: 1 }).await.unwrap();

        let corrupt_path = dir.path().join("samples").join(format!("{}.json", Uuid::new_v4()));
        tokio::fs::write(&corrupt_path, b"{not json").await.unwrap();

        let scan = store.scan_for_corruption().await.unwrap();
        assert_eq!(scan.total_files, 2);
        assert_eq!(scan.valid_count, 1);
        assert_eq!(scan.invalid_count, 1);
    }
}
