//! Per-run scratch directories.
//!
//! A [`Workspace`] owns a uniquely named temporary directory for the lifetime
//! of one program execution. Every intermediate artifact and the not-yet-
//! published output live inside it. Dropping the workspace removes the
//! directory and everything in it, whichever way execution ended.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scoped temporary directory for one program execution.
///
/// # Example
///
/// ```no_run
/// use cf_av::Workspace;
/// use std::path::Path;
///
/// let ws = Workspace::create(None, "job-1").unwrap();
/// // ... the engine writes ws.artifact("final.mp4") ...
/// ws.publish_file("final.mp4", Path::new("/out/final.mp4")).unwrap();
/// // dropping `ws` removes the scratch directory
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a fresh directory named `clipforge-<label>-XXXXXX` under
    /// `root`, or under the system temp dir when `root` is `None`.
    pub fn create(root: Option<&Path>, label: &str) -> cf_core::Result<Self> {
        let prefix = format!("clipforge-{label}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let temp_dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| cf_core::Error::tool("workspace", format!("failed to create temp dir: {e}")))?;

        tracing::debug!(path = %temp_dir.path().display(), "workspace created");
        Ok(Self { temp_dir })
    }

    /// Path to the scratch directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path for a named artifact inside the workspace.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Write `contents` to a named artifact and return its path.
    pub fn write_artifact(&self, name: &str, contents: &str) -> cf_core::Result<PathBuf> {
        let path = self.artifact(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Create a named sub-directory inside the workspace.
    pub fn artifact_dir(&self, name: &str) -> cf_core::Result<PathBuf> {
        let path = self.artifact(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Move an artifact to its final destination.
    ///
    /// Parent directories of `dest` are created. A rename is tried first;
    /// across filesystems the file is copied then removed.
    pub fn publish_file(&self, name: &str, dest: &Path) -> cf_core::Result<PathBuf> {
        let source = self.artifact(name);
        if !source.exists() {
            return Err(cf_core::Error::tool(
                "workspace",
                format!("output file does not exist: {}", source.display()),
            ));
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if std::fs::rename(&source, dest).is_err() {
            std::fs::copy(&source, dest).map_err(|e| {
                cf_core::Error::tool(
                    "workspace",
                    format!("failed to copy output to {}: {e}", dest.display()),
                )
            })?;
            if let Err(e) = std::fs::remove_file(&source) {
                tracing::warn!(path = %source.display(), error = %e, "failed to remove copied artifact");
            }
        }

        tracing::debug!(dest = %dest.display(), "artifact published");
        Ok(dest.to_path_buf())
    }

    /// Move every file of an artifact directory into `dest_dir`, sorted by
    /// name. Returns the published paths.
    ///
    /// Files are first gathered in a hidden sibling of `dest_dir`, which is
    /// then renamed into place, so a failed publish leaves no partial
    /// directory behind. When `dest_dir` already holds files the staged
    /// files are renamed into it one by one.
    pub fn publish_dir(&self, name: &str, dest_dir: &Path) -> cf_core::Result<Vec<PathBuf>> {
        let source = self.artifact(name);
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&source)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        let parent = dest_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".clipforge-publish-")
            .tempdir_in(parent)
            .map_err(|e| cf_core::Error::tool("workspace", format!("failed to stage {}: {e}", dest_dir.display())))?;

        let mut names = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(file_name) = entry.file_name() else {
                continue;
            };
            let relative = Path::new(name).join(file_name);
            self.publish_file(&relative.to_string_lossy(), &staging.path().join(file_name))?;
            names.push(file_name.to_os_string());
        }

        let occupied = std::fs::read_dir(dest_dir).is_ok_and(|mut d| d.next().is_some());
        let placed = if occupied {
            names
                .iter()
                .try_for_each(|n| std::fs::rename(staging.path().join(n), dest_dir.join(n)))
        } else {
            if dest_dir.is_dir() {
                std::fs::remove_dir(dest_dir)?;
            }
            // The emptied staging guard is dropped afterwards without effect.
            std::fs::rename(staging.path(), dest_dir)
        };
        placed.map_err(|e| {
            cf_core::Error::tool("workspace", format!("failed to publish {}: {e}", dest_dir.display()))
        })?;

        tracing::debug!(dest = %dest_dir.display(), files = names.len(), "artifact directory published");
        Ok(names.iter().map(|n| dest_dir.join(n)).collect())
    }

    /// Remove the workspace now, reporting removal errors instead of
    /// swallowing them as `Drop` does.
    pub fn release(self) -> cf_core::Result<()> {
        let path = self.temp_dir.path().to_path_buf();
        self.temp_dir.close()?;
        tracing::debug!(path = %path.display(), "workspace released");
        Ok(())
    }
}
