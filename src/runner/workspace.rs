//! Per-instance workspace directories

use crate::runner::ExecutorError;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Hands out a fresh directory per instance attempt
///
/// Layout: `<root>/<run id>/<index>-<instance slug>/attempt-<n>`. The
/// instance index keeps sibling matrix cells apart even when their slugs
/// collide.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every attempt of one instance
    pub fn instance_dir(&self, run_id: Uuid, index: usize, instance_id: &str) -> PathBuf {
        self.root
            .join(run_id.to_string())
            .join(format!("{}-{}", index, slug(instance_id)))
    }

    /// Create an empty directory for one attempt, clearing leftovers
    pub async fn provision(
        &self,
        run_id: Uuid,
        index: usize,
        instance_id: &str,
        attempt: u32,
    ) -> Result<PathBuf, ExecutorError> {
        let path = self
            .instance_dir(run_id, index, instance_id)
            .join(format!("attempt-{}", attempt));

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|source| ExecutorError::Workspace {
                    path: path.clone(),
                    source,
                })?;
        }

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| ExecutorError::Workspace {
                path: path.clone(),
                source,
            })?;

        debug!("Provisioned workspace {}", path.display());
        Ok(path)
    }
}

/// File-system friendly form of an instance id
pub fn slug(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut last_dash = false;
    for c in id.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("test (ubuntu, 3.9)"), "test-ubuntu-3.9");
        assert_eq!(slug("lint"), "lint");
    }

    #[tokio::test]
    async fn test_siblings_get_distinct_directories() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(dir.path());
        let run_id = Uuid::new_v4();

        let a = manager.provision(run_id, 0, "test (a/b)", 1).await.unwrap();
        let b = manager.provision(run_id, 1, "test (a-b)", 1).await.unwrap();

        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
    }

    #[tokio::test]
    async fn test_provision_clears_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(dir.path());
        let run_id = Uuid::new_v4();

        let path = manager.provision(run_id, 0, "build", 1).await.unwrap();
        std::fs::write(path.join("stale.txt"), "old").unwrap();

        let again = manager.provision(run_id, 0, "build", 1).await.unwrap();
        assert_eq!(path, again);
        assert!(!again.join("stale.txt").exists());
    }
}
