//! Confines tool path arguments to the workspace root.

use std::path::{Component, Path, PathBuf};

use delver_index::workspace::Workspace;

use crate::error::ToolError;

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.canonicalize().unwrap_or_else(|_| root.to_path_buf()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) and reject anything
    /// that lands outside the root, including through symlinks.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Sandbox`] when the path escapes the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let raw = Path::new(path.trim());
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let resolved = resolve_via_ancestors(&normalize(&joined));
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(ToolError::Sandbox {
                path: path.to_owned(),
            })
        }
    }

    /// `/`-separated path relative to the root.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a file argument, falling back to a basename search over the
    /// workspace when the path does not exist as given.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Sandbox`] for escaping paths and
    /// [`ToolError::Execution`] when the file is missing or the name is
    /// ambiguous (the candidates are listed).
    pub fn find_file(&self, workspace: &Workspace, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve(path)?;
        if resolved.is_file() {
            return Ok(resolved);
        }

        let Some(base) = Path::new(path.trim()).file_name().and_then(|b| b.to_str()) else {
            return Err(ToolError::execution(format!("file '{path}' not found")));
        };
        let candidates: Vec<String> = workspace
            .files()
            .into_iter()
            .filter(|rel| rel.rsplit('/').next() == Some(base))
            .collect();

        match candidates.as_slice() {
            [] => Err(ToolError::execution(format!("file '{path}' not found"))),
            [only] => {
                tracing::debug!(requested = path, found = %only, "resolved file by basename");
                self.resolve(only)
            }
            many => Err(ToolError::execution(format!(
                "'{path}' is ambiguous, candidates:\n{}",
                many.join("\n")
            ))),
        }
    }
}

/// Drop `.` and fold `..` lexically so that non-existent suffixes cannot
/// climb out after the existing prefix is canonicalized.
fn normalize(path: &Path) -> PathBuf {
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

/// Canonicalize the longest existing ancestor and re-append the rest.
fn resolve_via_ancestors(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut suffix = PathBuf::new();
    while !existing.exists() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            break;
        };
        suffix = PathBuf::from(name).join(&suffix);
        existing = parent;
    }
    let base = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    if suffix.as_os_str().is_empty() {
        base
    } else {
        base.join(suffix)
    }
}
