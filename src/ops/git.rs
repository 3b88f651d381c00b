//! Native git operations for the deployed checkout
//!
//! Reads the current HEAD, fetches `origin` and hard-resets for rollbacks,
//! all through git2 without shelling out to the git CLI.

use git2::{Commit, Cred, CredentialType, Error as Git2Error, FetchOptions, RemoteCallbacks, Repository, ResetType};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git2(#[from] Git2Error),
    #[error("Repository not found at {0}")]
    NotFound(String),
    #[error("Remote not found: {0}")]
    RemoteNotFound(String),
    #[error("Invalid commit reference: {0}")]
    InvalidRevision(String),
    #[error("Commit not found: {0}")]
    CommitNotFound(String),
}

/// Result type for git operations
pub type GitResult<T> = Result<T, GitError>;

/// HEAD summary shown on the ops dashboard
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GitInfo {
    /// First 8 hex chars
    pub hash: String,
    pub branch: String,
    /// Subject line
    pub message: String,
    pub date: String,
}

/// Git repository wrapper
pub struct GitRepo {
    repo: Repository,
}

impl GitRepo {
    /// Open the repository containing `path`
    pub fn open<P: AsRef<Path>>(path: P) -> GitResult<Self> {
        let path = path.as_ref();
        let repo = Repository::discover(path)
            .map_err(|_| GitError::NotFound(path.display().to_string()))?;
        Ok(Self { repo })
    }

    /// Initialize a new repository
    pub fn init<P: AsRef<Path>>(path: P) -> GitResult<Self> {
        let repo = Repository::init(path)?;
        Ok(Self { repo })
    }

    /// Current branch name, "HEAD" when detached
    pub fn current_branch(&self) -> GitResult<String> {
        let head = self.repo.head()?;
        if self.repo.head_detached()? {
            return Ok("HEAD".to_string());
        }
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    pub fn head_info(&self) -> GitResult<GitInfo> {
        let commit = self.repo.head()?.peel_to_commit()?;
        let mut info = commit_to_info(&commit);
        info.branch = self.current_branch()?;
        Ok(info)
    }

    /// Fetch all refs from `remote_name`
    ///
    /// SSH remotes authenticate through the agent, HTTPS remotes with
    /// `token` when given.
    pub fn fetch(&self, remote_name: &str, token: Option<&str>) -> GitResult<()> {
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .map_err(|_| GitError::RemoteNotFound(remote_name.to_string()))?;

        let token = token.map(str::to_string);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, allowed_types| {
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(ref token) = token {
                    return Cred::userpass_plaintext("x-access-token", token);
                }
            }
            let username = username_from_url.unwrap_or("git");
            Cred::ssh_key_from_agent(username)
        });

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);

        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;

        info!("Fetched from {}", remote_name);
        Ok(())
    }

    /// Move HEAD, index and working tree to `sha`
    pub fn reset_hard(&self, sha: &str) -> GitResult<GitInfo> {
        if !is_commit_ref(sha) {
            return Err(GitError::InvalidRevision(sha.to_string()));
        }

        let commit = self
            .repo
            .revparse_single(sha)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| GitError::CommitNotFound(sha.to_string()))?;

        self.repo.reset(commit.as_object(), ResetType::Hard, None)?;

        let info = commit_to_info(&commit);
        info!("Reset to {} - {}", info.hash, info.message);
        Ok(info)
    }
}

/// 4 to 40 hex chars
fn is_commit_ref(sha: &str) -> bool {
    (4..=40).contains(&sha.len()) && sha.chars().all(|c| c.is_ascii_hexdigit())
}

fn commit_to_info(commit: &Commit) -> GitInfo {
    let hash = commit.id().to_string();
    let date = chrono::DateTime::from_timestamp(commit.time().seconds(), 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    debug!("Commit {} at {}", hash, date);

    GitInfo {
        hash: hash[..8.min(hash.len())].to_string(),
        branch: String::new(),
        message: commit.summary().unwrap_or("").to_string(),
        date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::tempdir;

    fn commit_file(repo: &GitRepo, dir: &Path, name: &str, content: &str, message: &str) -> String {
        std::fs::write(dir.join(name), content).unwrap();
        let mut index = repo.repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        let parent = repo.repo.head().and_then(|h| h.peel_to_commit()).ok();
        let parents: Vec<&Commit> = parent.iter().collect();
        repo.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_head_info() {
        let dir = tempdir().unwrap();
        let repo = GitRepo::init(dir.path()).unwrap();
        let sha = commit_file(&repo, dir.path(), "a.txt", "one", "Initial commit\n\nbody");

        let info = repo.head_info().unwrap();
        assert_eq!(info.hash, &sha[..8]);
        assert_eq!(info.message, "Initial commit");
        assert!(!info.branch.is_empty());
        assert_eq!(info.date.len(), 19);
    }

    #[test]
    fn test_reset_hard_restores_content() {
        let dir = tempdir().unwrap();
        let repo = GitRepo::init(dir.path()).unwrap();
        let first = commit_file(&repo, dir.path(), "a.txt", "one", "first");
        commit_file(&repo, dir.path(), "a.txt", "two", "second");

        let info = repo.reset_hard(&first).unwrap();
        assert_eq!(info.message, "first");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one");
        assert_eq!(repo.head_info().unwrap().hash, &first[..8]);
    }

    #[test]
    fn test_reset_rejects_bad_refs() {
        let dir = tempdir().unwrap();
        let repo = GitRepo::init(dir.path()).unwrap();
        commit_file(&repo, dir.path(), "a.txt", "one", "first");

        assert!(matches!(repo.reset_hard("HEAD~1; rm -rf"), Err(GitError::InvalidRevision(_))));
        assert!(matches!(repo.reset_hard("deadbeef"), Err(GitError::CommitNotFound(_))));
    }

    #[test]
    fn test_fetch_missing_remote() {
        let dir = tempdir().unwrap();
        let repo = GitRepo::init(dir.path()).unwrap();
        assert!(matches!(repo.fetch("origin", None), Err(GitError::RemoteNotFound(_))));
    }

    #[test]
    fn test_open_outside_repo_fails() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("missing");
        assert!(GitRepo::open(&nested).is_err());
    }
}
