use crate::error::{SwapFailure, UpdateError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Installed artifact and its single retained backup generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub installed: PathBuf,
    pub backup: PathBuf,
}

impl ArtifactPaths {
    pub fn has_backup(&self) -> bool {
        self.backup.is_file()
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Replaces the installed artifact with `bytes`.
///
/// Order: stage the candidate next to the installed file, back the
/// installed file up, then rename the staged file into place. A failed
/// backup aborts before the installed file is touched; a failed rename
/// leaves it unchanged.
pub fn install(paths: &ArtifactPaths, bytes: &[u8]) -> Result<(), SwapFailure> {
    let dir = parent_dir(&paths.installed);
    fs::create_dir_all(dir).map_err(SwapFailure::Stage)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".candidate_")
        .tempfile_in(dir)
        .map_err(SwapFailure::Stage)?;
    staged.write_all(bytes).map_err(SwapFailure::Stage)?;
    staged.as_file().sync_all().map_err(SwapFailure::Stage)?;

    if paths.installed.exists() {
        let permissions = fs::metadata(&paths.installed)
            .map_err(SwapFailure::Stage)?
            .permissions();
        fs::set_permissions(staged.path(), permissions).map_err(SwapFailure::Stage)?;

        let current = fs::read(&paths.installed).map_err(SwapFailure::Backup)?;
        fs::create_dir_all(parent_dir(&paths.backup)).map_err(SwapFailure::Backup)?;
        crate::state::write_atomic(&paths.backup, &current).map_err(SwapFailure::Backup)?;
    }

    staged
        .persist(&paths.installed)
        .map_err(|e| SwapFailure::Replace(e.error))?;
    Ok(())
}

/// Moves the backup over the installed artifact. Without a backup nothing
/// is touched.
pub fn restore_backup(paths: &ArtifactPaths) -> Result<(), UpdateError> {
    if !paths.has_backup() {
        return Err(UpdateError::RollbackUnavailable(paths.backup.clone()));
    }
    fs::rename(&paths.backup, &paths.installed).map_err(|e| SwapFailure::Replace(e).into())
}
