use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

use super::{apply_update, LinkageStore, LinkageUpdate, StoredLinkage};

/// Linkage store keeping one TOML file per job under a directory.
///
/// A save holds an exclusive lock on `<job>.lock` while it re-reads the record,
/// checks the revision and swaps in the new file. Writers in other processes
/// therefore see each other's revisions and get a conflict instead of
/// overwriting.
pub struct FileLinkageStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLinkageStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Store(format!(
                "Failed to create store directory {}: {e}",
                dir.display()
            ))
        })?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", file_stem(job)))
    }

    async fn read_record(path: &Path) -> Result<StoredLinkage> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredLinkage::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read-check-write for one record under the job's lock file.
fn save_locked(dir: &Path, stem: &str, job: &str, update: LinkageUpdate) -> Result<u64> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(format!("{stem}.lock")))?;
    fs2::FileExt::lock_exclusive(&lock).map_err(|e| {
        AppError::Store(format!("Failed to lock linkage record for {job}: {e}"))
    })?;

    let path = dir.join(format!("{stem}.toml"));
    let mut current = match std::fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredLinkage::default(),
        Err(e) => return Err(e.into()),
    };
    let revision = apply_update(job, &mut current, update)?;

    // Unique temp name per write, renamed over the record.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(toml::to_string(&current)?.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| AppError::Io(e.error))?;

    // The lock is released when `lock` is closed.
    Ok(revision)
}

/// File name for a job. Names that need escaping get a hash suffix so
/// `folder/api` and `folder_api` never share a record.
fn file_stem(job: &str) -> String {
    let sanitized: String = job
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized == job && !job.starts_with('.') {
        return sanitized;
    }

    let digest = Sha256::digest(job.as_bytes());
    format!("{}-{}", sanitized.trim_start_matches('.'), hex::encode(&digest[..4]))
}

#[async_trait]
impl LinkageStore for FileLinkageStore {
    async fn load(&self, job: &str) -> StoredLinkage {
        let path = self.record_path(job);
        match Self::read_record(&path).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    job = job,
                    path = %path.display(),
                    error = %e,
                    "Failed to read linkage record, treating job as untracked"
                );
                StoredLinkage::default()
            }
        }
    }

    async fn save(&self, job: &str, update: LinkageUpdate) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let dir = self.dir.clone();
        let stem = file_stem(job);
        let name = job.to_string();

        let revision = tokio::task::spawn_blocking(move || save_locked(&dir, &stem, &name, update))
            .await
            .map_err(|e| AppError::Internal(format!("Linkage save task failed: {e}")))??;

        tracing::debug!(job = job, revision = revision, "Saved linkage record");
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkage::{HistoryAction, IssueLinkage, TransitionRecord};

    #[test]
    fn test_file_stem_keeps_simple_names() {
        assert_eq!(file_stem("api"), "api");
        assert_eq!(file_stem("api-nightly_2.x"), "api-nightly_2.x");
    }

    #[test]
    fn test_file_stem_disambiguates_escaped_names() {
        let nested = file_stem("folder/api");
        assert!(nested.starts_with("folder_api-"));
        assert_ne!(nested, file_stem("folder_api"));
        assert!(!file_stem("..").starts_with('.'));
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLinkageStore::open(tmp.path()).await.unwrap();

        store
            .save(
                "api",
                LinkageUpdate {
                    expected_revision: 0,
                    linkage: IssueLinkage::tracked(42),
                    record: Some(TransitionRecord {
                        build: "#7".to_string(),
                        action: HistoryAction::Open,
                        issue: 42,
                        url: Some("https://github.com/acme/api/issues/42".to_string()),
                        at: chrono::Utc::now(),
                    }),
                },
            )
            .await
            .unwrap();

        let reopened = FileLinkageStore::open(tmp.path()).await.unwrap();
        let stored = reopened.load("api").await;
        assert_eq!(stored.linkage.issue(), Some(42));
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(stored.history[0].action, HistoryAction::Open);

        let contents = std::fs::read_to_string(tmp.path().join("api.toml")).unwrap();
        assert!(contents.contains("issue_number = 42"));
    }

    #[tokio::test]
    async fn test_reset_is_written_as_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLinkageStore::open(tmp.path()).await.unwrap();

        for (revision, linkage) in [(0, IssueLinkage::tracked(9)), (1, IssueLinkage::NONE)] {
            store
                .save(
                    "api",
                    LinkageUpdate {
                        expected_revision: revision,
                        linkage,
                        record: None,
                    },
                )
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(tmp.path().join("api.toml")).unwrap();
        assert!(contents.contains("issue_number = 0"));
        assert!(store.load("api").await.linkage.is_absent());
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLinkageStore::open(tmp.path()).await.unwrap();
        let update = LinkageUpdate {
            expected_revision: 0,
            linkage: IssueLinkage::tracked(1),
            record: None,
        };

        store.save("api", update.clone()).await.unwrap();
        let err = store.save("api", update).await.unwrap_err();
        assert!(matches!(err, AppError::StoreConflict { found: 1, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_independent_handles_see_each_others_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let first = FileLinkageStore::open(tmp.path()).await.unwrap();
        let second = FileLinkageStore::open(tmp.path()).await.unwrap();
        let update = |issue| LinkageUpdate {
            expected_revision: 0,
            linkage: IssueLinkage::tracked(issue),
            record: None,
        };

        let (a, b) = tokio::join!(first.save("api", update(1)), second.save("api", update(2)));

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let conflict = a.err().or(b.err()).unwrap();
        assert!(matches!(conflict, AppError::StoreConflict { found: 1, .. }));
        assert_eq!(first.load("api").await.revision, 1);

        let mut names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["api.lock".to_string(), "api.toml".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_record_loads_default_but_refuses_save() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLinkageStore::open(tmp.path()).await.unwrap();
        std::fs::write(tmp.path().join("api.toml"), "issue_number = [").unwrap();

        assert!(store.load("api").await.linkage.is_absent());
        let result = store
            .save(
                "api",
                LinkageUpdate {
                    expected_revision: 0,
                    linkage: IssueLinkage::tracked(3),
                    record: None,
                },
            )
            .await;
        assert!(result.is_err());
    }
}
