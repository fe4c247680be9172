//! Per-invocation isolated workspace directory.
//!
//! SPEC_FULL.md §12.1 resolves the open question in spec.md §9 (0755 vs
//! 0700) in favor of 0700 — owner-only — applied immediately after the
//! directory is created.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Workspace {
    #[allow(dead_code)]
    temp_dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    pub fn new(prefix: &str) -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .context("failed to create workspace directory")?;

        restrict_permissions(temp_dir.path())?;

        Ok(Self {
            root: temp_dir.path().to_path_buf(),
            temp_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .context("failed to stat workspace directory")?
        .permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms).context("failed to restrict workspace directory permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn workspace_is_owner_only() {
        let ws = Workspace::new("chatgate-test-").unwrap();
        let mode = std::fs::metadata(ws.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
