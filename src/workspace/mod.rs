//! Per-conversation sandbox directories.
//!
//! Every conversation owns one directory under the workspace base. It is the
//! root for all filesystem side effects of tools running on behalf of that
//! conversation:
//! - files read and written by the file tools
//! - the command transcript
//! - saved search and extraction outputs
//!
//! Containment is decided here and nowhere else. Tools hand a relative path to
//! [`WorkspaceManager::resolve`] and only ever touch the path it returns.

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::agent::ConversationId;

/// Prefix marking a hex-encoded directory name.
const ENCODED_PREFIX: &str = "x-";

/// Errors raised while provisioning or resolving workspace paths.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Access denied: '{path}' resolves outside the workspace of conversation {conversation_id}")]
    AccessDenied {
        conversation_id: ConversationId,
        path: String,
    },

    #[error("Workspace I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Allocates and resolves conversation workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `base_dir`. Nothing is created on disk yet.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The directory holding every conversation workspace.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the base directory if it is missing.
    pub async fn init(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.base_dir).await?;
        tracing::info!(base_dir = %self.base_dir.display(), "Workspace base ready");
        Ok(())
    }

    /// Directory for a conversation. Pure and deterministic; distinct ids never
    /// share a directory.
    pub fn path_for(&self, conversation_id: &ConversationId) -> PathBuf {
        self.base_dir.join(dir_name(conversation_id.as_str()))
    }

    /// Create the conversation directory if absent and return it.
    ///
    /// Safe to call concurrently: an already existing directory is not an error.
    pub async fn ensure(&self, conversation_id: &ConversationId) -> Result<PathBuf, WorkspaceError> {
        let path = self.path_for(conversation_id);
        fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Resolve `relative` against the conversation workspace.
    ///
    /// The returned path is canonical and lies underneath the canonical
    /// workspace root. Anything else, including absolute paths, traversal out
    /// of the root and symlinks pointing outside, is `AccessDenied`.
    pub async fn resolve(
        &self,
        conversation_id: &ConversationId,
        relative: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let root = self.ensure(conversation_id).await?;
        let canonical_root = fs::canonicalize(&root).await?;

        let denied = || {
            tracing::warn!(
                conversation_id = %conversation_id,
                path = relative,
                "Sandbox escape attempt rejected"
            );
            WorkspaceError::AccessDenied {
                conversation_id: conversation_id.clone(),
                path: relative.to_string(),
            }
        };

        let candidate = normalize_lexically(&canonical_root.join(relative));
        let resolved = match canonicalize_existing_prefix(&candidate).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => return Err(denied()),
            Err(e) => return Err(e.into()),
        };

        if !resolved.starts_with(&canonical_root) {
            return Err(denied());
        }

        Ok(resolved)
    }
}

/// Map a conversation id to a single safe path segment.
///
/// Ids made of `[A-Za-z0-9_-]` are used as-is unless they start with the
/// encoding prefix; everything else is hex-encoded behind that prefix, which
/// keeps the mapping injective.
fn dir_name(id: &str) -> String {
    let plain = !id.is_empty()
        && !id.starts_with(ENCODED_PREFIX)
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if plain {
        return id.to_string();
    }

    let mut name = String::with_capacity(ENCODED_PREFIX.len() + id.len() * 2);
    name.push_str(ENCODED_PREFIX);
    for byte in id.bytes() {
        name.push_str(&format!("{:02x}", byte));
    }
    name
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-attach the missing tail.
///
/// A dangling symlink in the path is reported as `PermissionDenied`, since
/// writing through it would land wherever it points.
async fn canonicalize_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(&existing).await {
            Ok(mut resolved) => {
                for segment in tail.iter().rev() {
                    resolved.push(segment);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(&existing).await.is_ok() {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "dangling symlink",
                    ));
                }
                match existing.file_name() {
                    Some(name) => {
                        tail.push(name.to_os_string());
                        existing.pop();
                    }
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, WorkspaceManager) {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path().join("runs"));
        (dir, manager)
    }

    #[test]
    fn test_path_for_is_deterministic() {
        let (_dir, manager) = manager();
        let id = ConversationId::from("abc-123");

        assert_eq!(manager.path_for(&id), manager.path_for(&id));
        assert!(manager.path_for(&id).ends_with("abc-123"));
    }

    #[test]
    fn test_dir_name_is_injective() {
        let ids = ["..", "x-2e2e", "a/b", "a_b", "", "x-", "ABC", "abc"];
        let names: std::collections::HashSet<String> = ids.iter().map(|id| dir_name(id)).collect();
        assert_eq!(names.len(), ids.len());

        for id in ids {
            let name = dir_name(id);
            assert!(!name.contains('/'));
            assert_ne!(name, "..");
            assert!(!name.is_empty());
        }
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (_dir, manager) = manager();
        let id = ConversationId::new();

        let first = manager.ensure(&id).await.unwrap();
        let second = manager.ensure(&id).await.unwrap();

        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[tokio::test]
    async fn test_resolve_inside_workspace() {
        let (_dir, manager) = manager();
        let id = ConversationId::new();

        let resolved = manager.resolve(&id, "notes/today.txt").await.unwrap();
        let root = std::fs::canonicalize(manager.path_for(&id)).unwrap();

        assert!(resolved.starts_with(&root));
        assert!(resolved.ends_with("notes/today.txt"));
    }

    #[tokio::test]
    async fn test_resolve_collapses_inner_traversal() {
        let (_dir, manager) = manager();
        let id = ConversationId::new();

        let resolved = manager.resolve(&id, "a/b/../../c.txt").await.unwrap();
        let root = std::fs::canonicalize(manager.path_for(&id)).unwrap();

        assert_eq!(resolved, root.join("c.txt"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_escapes() {
        let (_dir, manager) = manager();
        let id = ConversationId::new();

        for path in ["../../etc/passwd", "..", "/etc/passwd", "sub/../../other"] {
            let err = manager.resolve(&id, path).await.unwrap_err();
            assert!(
                matches!(err, WorkspaceError::AccessDenied { .. }),
                "expected AccessDenied for {path}, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_rejects_sibling_prefix() {
        let (_dir, manager) = manager();
        let id = ConversationId::from("conv");
        manager.ensure(&ConversationId::from("conv2")).await.unwrap();

        let err = manager.resolve(&id, "../conv2/file.txt").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::AccessDenied { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_out_of_workspace() {
        let (dir, manager) = manager();
        let id = ConversationId::new();
        let root = manager.ensure(&id).await.unwrap();

        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), root.join("dangling")).unwrap();

        let err = manager.resolve(&id, "link/secret.txt").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::AccessDenied { .. }));

        let err = manager.resolve(&id, "dangling").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::AccessDenied { .. }));
    }
}
