use crate::models::{Snapshot, WorkspaceSource};
use crate::CoreError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

/// Resolves a work order's [`WorkspaceSource`] into a local checkout and
/// captures content-addressed snapshots of it across iterations.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn prepare(&self, source: &WorkspaceSource, work_order_id: Uuid) -> crate::Result<PathBuf>;

    async fn snapshot(
        &self,
        workspace_path: &Path,
        iteration: u32,
        branch: &str,
        commit_message: &str,
    ) -> crate::Result<Snapshot>;

    async fn cleanup(&self, workspace_path: &Path) -> crate::Result<()>;
}

/// Checks out workspaces under a base directory, one subdirectory per
/// work order, and fingerprints each iteration's diff with sha256 so the
/// hybrid loop strategy can recognize a run making no further progress
/// without depending on git internals.
pub struct FsWorkspaceStore {
    base_dir: PathBuf,
}

impl FsWorkspaceStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn workspace_dir(&self, work_order_id: Uuid) -> PathBuf {
        self.base_dir.join(work_order_id.to_string())
    }

    async fn run_git(&self, workspace_path: &Path, args: &[&str]) -> crate::Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(workspace_path)
            .output()
            .await
            .map_err(|e| CoreError::Workspace(format!("git {args:?} failed to spawn: {e}")))?;

        if !output.status.success() {
            return Err(CoreError::Workspace(format!(
                "git {args:?} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ensure_git_repo(&self, workspace_path: &Path) -> crate::Result<()> {
        if workspace_path.join(".git").exists() {
            return Ok(());
        }
        self.run_git(workspace_path, &["init", "--quiet"]).await?;
        self.run_git(workspace_path, &["add", "-A"]).await?;
        let _ = self
            .run_git(
                workspace_path,
                &["commit", "--quiet", "--allow-empty", "-m", "initial snapshot"],
            )
            .await;
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for FsWorkspaceStore {
    async fn prepare(&self, source: &WorkspaceSource, work_order_id: Uuid) -> crate::Result<PathBuf> {
        let dest = self.workspace_dir(work_order_id);
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|e| CoreError::Workspace(format!("failed to create workspace dir: {e}")))?;

        match source {
            WorkspaceSource::Local { path } => {
                copy_dir_recursive(Path::new(path), &dest).await?;
            }
            WorkspaceSource::GitHub {
                owner,
                repo,
                branch,
            } => {
                let url = format!("https://github.com/{owner}/{repo}.git");
                self.run_git(
                    &self.base_dir,
                    &["clone", "--branch", branch, "--depth", "1", &url, &dest.to_string_lossy()],
                )
                .await?;
            }
            WorkspaceSource::GitHubNew {
                owner,
                name: _,
                template,
            } => {
                let url = format!("https://github.com/{owner}/{template}.git");
                self.run_git(
                    &self.base_dir,
                    &["clone", "--depth", "1", &url, &dest.to_string_lossy()],
                )
                .await?;
                tokio::fs::remove_dir_all(dest.join(".git"))
                    .await
                    .map_err(|e| CoreError::Workspace(format!("failed to reset template history: {e}")))?;
            }
        }

        self.ensure_git_repo(&dest).await?;
        Ok(dest)
    }

    async fn snapshot(
        &self,
        workspace_path: &Path,
        iteration: u32,
        branch: &str,
        commit_message: &str,
    ) -> crate::Result<Snapshot> {
        self.ensure_git_repo(workspace_path).await?;
        self.run_git(workspace_path, &["add", "-A"]).await?;

        let shortstat = self
            .run_git(workspace_path, &["diff", "--cached", "--shortstat"])
            .await
            .unwrap_or_default();
        let (files_changed, insertions, deletions) = parse_shortstat(&shortstat);

        let diff_text = self
            .run_git(workspace_path, &["diff", "--cached"])
            .await
            .unwrap_or_default();

        let _ = self
            .run_git(
                workspace_path,
                &["commit", "--quiet", "--allow-empty", "-m", commit_message],
            )
            .await;

        let mut hasher = Sha256::new();
        hasher.update(diff_text.as_bytes());
        let after_sha = format!("{:x}", hasher.finalize());

        Ok(Snapshot {
            after_sha,
            files_changed,
            insertions,
            deletions,
            iteration,
            branch: branch.to_string(),
            commit_message: commit_message.to_string(),
        })
    }

    async fn cleanup(&self, workspace_path: &Path) -> crate::Result<()> {
        if workspace_path.starts_with(&self.base_dir) {
            tokio::fs::remove_dir_all(workspace_path)
                .await
                .map_err(|e| CoreError::Workspace(format!("failed to remove workspace: {e}")))?;
        }
        Ok(())
    }
}

/// Parses the trailing line of `git diff --shortstat`, e.g.
/// " 3 files changed, 12 insertions(+), 4 deletions(-)".
fn parse_shortstat(line: &str) -> (u32, u32, u32) {
    let mut files = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "file" || *part == "files" {
            files = parts.get(i.wrapping_sub(1)).and_then(|p| p.parse().ok()).unwrap_or(0);
        } else if part.starts_with("insertion") {
            insertions = parts.get(i.wrapping_sub(1)).and_then(|p| p.parse().ok()).unwrap_or(0);
        } else if part.starts_with("deletion") {
            deletions = parts.get(i.wrapping_sub(1)).and_then(|p| p.parse().ok()).unwrap_or(0);
        }
    }
    (files, insertions, deletions)
}

fn copy_dir_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = crate::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| CoreError::Workspace(format!("failed to create dir {dst:?}: {e}")))?;

        let mut entries = tokio::fs::read_dir(src)
            .await
            .map_err(|e| CoreError::Workspace(format!("failed to read dir {src:?}: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Workspace(format!("failed to iterate dir {src:?}: {e}")))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CoreError::Workspace(format!("failed to stat entry: {e}")))?;
            let dest_path = dst.join(entry.file_name());

            if entry.file_name() == ".git" {
                continue;
            }

            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &dest_path).await?;
            } else {
                tokio::fs::copy(entry.path(), &dest_path)
                    .await
                    .map_err(|e| CoreError::Workspace(format!("failed to copy file: {e}")))?;
            }
        }

        Ok(())
    })
}
