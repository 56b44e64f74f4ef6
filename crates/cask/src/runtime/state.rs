//! Container record persistence.

use cask_common::{CaskError, CaskPaths, CaskResult, ContainerRecord};

/// Reads and writes `<runtime>/containers/<name>/config.json`.
#[derive(Debug, Clone)]
pub struct RecordStore {
    paths: CaskPaths,
}

impl RecordStore {
    /// Create a store over `paths`.
    #[must_use]
    pub const fn new(paths: CaskPaths) -> Self {
        Self { paths }
    }

    /// Save a record, replacing any previous one of the same name.
    ///
    /// # Errors
    ///
    /// Fails when the record cannot be written.
    pub fn save(&self, record: &ContainerRecord) -> CaskResult<()> {
        let path = self.paths.container_config(&record.name);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CaskError::io_context(format!("create {}", parent.display()), e))?;
        }

        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)
            .map_err(|e| CaskError::io_context(format!("write {}", path.display()), e))?;

        tracing::debug!(
            container = %record.name,
            path = %path.display(),
            "Saved container record"
        );

        Ok(())
    }

    /// Load the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::ContainerNotFound`] when there is no record.
    pub fn load(&self, name: &str) -> CaskResult<ContainerRecord> {
        let path = self.paths.container_config(name);

        if !path.exists() {
            return Err(CaskError::ContainerNotFound {
                name: name.to_string(),
            });
        }

        let json = std::fs::read_to_string(&path)
            .map_err(|e| CaskError::io_context(format!("read {}", path.display()), e))?;
        let record: ContainerRecord = serde_json::from_str(&json)?;

        tracing::debug!(container = %name, path = %path.display(), "Loaded container record");

        Ok(record)
    }

    /// Delete the record directory of `name`, including its log.
    ///
    /// # Errors
    ///
    /// Fails when the directory exists but cannot be removed.
    pub fn delete(&self, name: &str) -> CaskResult<()> {
        let container_dir = self.paths.container(name);

        if container_dir.exists() {
            std::fs::remove_dir_all(&container_dir).map_err(|e| {
                CaskError::io_context(format!("remove {}", container_dir.display()), e)
            })?;
            tracing::debug!(
                container = %name,
                path = %container_dir.display(),
                "Deleted container record"
            );
        }

        Ok(())
    }

    /// Every readable record, sorted by name. Unreadable ones are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Fails when the containers directory exists but cannot be listed.
    pub fn list(&self) -> CaskResult<Vec<ContainerRecord>> {
        let dir = self.paths.containers();
        let mut records = Vec::new();

        if !dir.exists() {
            return Ok(records);
        }

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| CaskError::io_context(format!("list {}", dir.display()), e))?;
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::error!(container = %name, error = %e, "Failed to read container record");
                }
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Whether a record exists for `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.paths.container_config(name).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_common::{ContainerId, ContainerStatus};
    use tempfile::tempdir;

    fn record(name: &str) -> ContainerRecord {
        ContainerRecord::new(42, ContainerId::generate(), name, &["top".to_string()])
    }

    #[test]
    fn save_and_load_record() {
        let temp = tempdir().unwrap();
        let store = RecordStore::new(CaskPaths::with_root(temp.path()));

        store.save(&record("web")).unwrap();

        let loaded = store.load("web").unwrap();
        assert_eq!(loaded.name, "web");
        assert_eq!(loaded.pid, "42");
        assert_eq!(loaded.status, ContainerStatus::Running);
    }

    #[test]
    fn missing_record_is_not_found() {
        let temp = tempdir().unwrap();
        let store = RecordStore::new(CaskPaths::with_root(temp.path()));

        assert!(matches!(
            store.load("ghost"),
            Err(CaskError::ContainerNotFound { .. })
        ));
    }

    #[test]
    fn list_records() {
        let temp = tempdir().unwrap();
        let paths = CaskPaths::with_root(temp.path());
        let store = RecordStore::new(paths.clone());

        store.save(&record("b")).unwrap();
        store.save(&record("a")).unwrap();
        std::fs::create_dir_all(paths.container("broken")).unwrap();
        std::fs::write(paths.container_config("broken"), "{").unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn delete_record() {
        let temp = tempdir().unwrap();
        let paths = CaskPaths::with_root(temp.path());
        let store = RecordStore::new(paths.clone());

        store.save(&record("web")).unwrap();
        std::fs::write(paths.container_log("web"), "output").unwrap();
        assert!(store.exists("web"));

        store.delete("web").unwrap();
        assert!(!store.exists("web"));
        assert!(!paths.container("web").exists());
    }
}
