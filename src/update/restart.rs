use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Replaces the running process with the freshly installed artifact.
///
/// On success `restart` never returns; the returned error describes why the
/// handover did not happen.
pub trait Restarter: Send + Sync {
    fn restart(&self) -> io::Error;
}

/// Re-executes the current binary with its original arguments.
#[derive(Debug, Clone)]
pub struct ExecRestarter {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecRestarter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn current() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, std::env::args_os().skip(1).collect()))
    }

    /// Re-executes the installed artifact when it is an executable file, so
    /// the swapped-in code is what runs next. A plain data artifact (no
    /// execute permission) is read by the current binary at boot instead,
    /// and the restart falls back to [`ExecRestarter::current`].
    pub fn for_artifact(installed: &Path) -> io::Result<Self> {
        if is_executable(installed) {
            return Ok(Self::new(installed, std::env::args_os().skip(1).collect()));
        }
        Self::current()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}

impl Restarter for ExecRestarter {
    #[cfg(unix)]
    fn restart(&self) -> io::Error {
        use std::os::unix::process::CommandExt;
        tracing::info!(program = %self.program.display(), "re-executing");
        self.command().exec()
    }

    #[cfg(not(unix))]
    fn restart(&self) -> io::Error {
        tracing::info!(program = %self.program.display(), "spawning replacement process");
        match self.command().spawn() {
            Ok(_) => std::process::exit(0),
            Err(error) => error,
        }
    }
}
